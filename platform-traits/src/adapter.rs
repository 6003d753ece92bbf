//! Platform adapter interface.
//!
//! One adapter per external platform. Adapters translate between this
//! interface and the remote wire format; they never touch the repository.

use crate::error::{PlatformError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The external platforms Cratesync synchronizes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Streaming service playlists.
    Spotify,
    /// DJ application with a local database.
    Rekordbox,
    /// Vinyl catalog; collection and wantlist exposed as collection views.
    Discogs,
    /// Video service playlists.
    Youtube,
}

impl Platform {
    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::Rekordbox => "rekordbox",
            Platform::Discogs => "discogs",
            Platform::Youtube => "youtube",
        }
    }

    /// All known platforms, in display order.
    pub fn all() -> [Platform; 4] {
        [
            Platform::Spotify,
            Platform::Rekordbox,
            Platform::Discogs,
            Platform::Youtube,
        ]
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "spotify" => Ok(Platform::Spotify),
            "rekordbox" => Ok(Platform::Rekordbox),
            "discogs" => Ok(Platform::Discogs),
            "youtube" => Ok(Platform::Youtube),
            other => Err(PlatformError::NotFound(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A track as reported by a platform.
///
/// `raw` carries the platform-specific metadata blob verbatim; the core
/// stores it opaquely on the corresponding link record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtTrack {
    /// Opaque platform-side identifier.
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    /// Strong identifier when the platform exposes one (ISRC, release
    /// id + position, file hash). Equality alone proves identity.
    pub strong_id: Option<String>,
    /// URI/URL of the track on the platform, when addressable.
    pub uri: Option<String>,
    /// Platform-specific metadata, stored opaquely.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ExtTrack {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_ms: None,
            strong_id: None,
            uri: None,
            raw: serde_json::Value::Null,
        }
    }
}

/// A playlist (or collection view) as reported by a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtPlaylist {
    /// Opaque platform-side identifier.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub track_count: Option<u32>,
    /// Whether the authenticated user owns the playlist. Non-owned
    /// playlists are import-only by policy.
    pub is_owned: bool,
}

/// Static declaration of what a platform supports.
///
/// The core branches on these flags, never on adapter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFlags {
    /// Remote playlist creation is supported.
    pub can_create_playlists: bool,
    /// Remote playlist deletion is supported.
    pub can_delete_playlists: bool,
    /// The platform permits modifying playlists shared by other users.
    pub can_modify_shared: bool,
    /// External ids resolve to local filesystem paths (DJ databases).
    pub owns_filesystem_paths: bool,
    /// Only the user's personal content is reachable (no shared catalog).
    pub is_personal_only: bool,
    /// Outbound call budget enforced by the rate limiter.
    pub rate_budget_per_minute: u32,
    /// Largest item count accepted by a single add/remove call.
    pub max_batch_size: usize,
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self {
            can_create_playlists: true,
            can_delete_playlists: false,
            can_modify_shared: false,
            owns_filesystem_paths: false,
            is_personal_only: false,
            rate_budget_per_minute: 60,
            max_batch_size: 100,
        }
    }
}

/// Per-item outcome of a batched add/remove call.
///
/// A batch may partially succeed; the executor marks only the failed items'
/// changes as failed and keeps the rest.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// External ids applied successfully.
    pub succeeded: Vec<String>,
    /// External ids that failed, with the per-item cause.
    pub failed: Vec<(String, PlatformError)>,
}

impl BatchReport {
    /// A report where every requested item succeeded.
    pub fn all_ok<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            succeeded: ids.into_iter().collect(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Uniform contract implemented by every platform adapter.
///
/// Failure semantics per operation are documented on each method; adapters
/// map wire-level failures onto [`PlatformError`] and never leak wire
/// formats into the core.
#[async_trait::async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter fronts.
    fn platform(&self) -> Platform;

    /// Static capability declaration.
    fn capabilities(&self) -> CapabilityFlags;

    /// Pure read of cached credential state. Never fails.
    fn authenticated(&self) -> bool;

    /// Run the platform's authentication flow. May block on an external
    /// OAuth round-trip. Fails with [`PlatformError::AuthFailed`].
    async fn authenticate(&self) -> Result<()>;

    /// List the user's playlists. Pagination is handled inside the
    /// adapter; the full list is returned in platform order.
    async fn list_playlists(&self) -> Result<Vec<ExtPlaylist>>;

    /// Fetch the ordered membership of one playlist.
    async fn fetch_playlist_tracks(&self, ext_playlist_id: &str) -> Result<Vec<ExtTrack>>;

    /// Create a playlist and return its new external id. Fails with
    /// [`PlatformError::NotPermitted`] when `can_create_playlists` is false.
    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> Result<String>;

    /// Add tracks to a playlist. Batched up to `max_batch_size`; reports
    /// per-item success.
    async fn add_tracks(&self, ext_playlist_id: &str, ext_track_ids: &[String])
        -> Result<BatchReport>;

    /// Remove tracks from a playlist. May reject wholesale when the remote
    /// playlist is not owned by the user.
    async fn remove_tracks(
        &self,
        ext_playlist_id: &str,
        ext_track_ids: &[String],
    ) -> Result<BatchReport>;

    /// Free-text track search, used for export-time matching.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ExtTrack>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        for platform in Platform::all() {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("napster".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_parse_is_case_insensitive() {
        assert_eq!("Spotify".parse::<Platform>().unwrap(), Platform::Spotify);
        assert_eq!("YOUTUBE".parse::<Platform>().unwrap(), Platform::Youtube);
    }

    #[test]
    fn test_batch_report_all_ok() {
        let report = BatchReport::all_ok(vec!["a".to_string(), "b".to_string()]);
        assert!(report.is_complete());
        assert_eq!(report.succeeded.len(), 2);
    }
}
