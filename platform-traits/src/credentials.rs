//! Credential storage seam.
//!
//! OAuth flows and secret storage live outside the core. Adapters receive a
//! [`CredentialProvider`] and treat tokens as opaque strings; the core never
//! sees credential material.

use crate::adapter::Platform;
use crate::error::Result;

/// Opaque credential store consumed by adapters.
///
/// Implementations back onto OS keychains, encrypted files or test fixtures.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token for a platform, if one is stored.
    async fn access_token(&self, platform: Platform) -> Result<Option<String>>;

    /// Persist a refreshed token pair after an adapter-driven auth flow.
    async fn store_tokens(
        &self,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<()>;

    /// Drop all stored credentials for a platform.
    async fn clear(&self, platform: Platform) -> Result<()>;
}
