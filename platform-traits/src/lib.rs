//! # Platform Adapter Contracts
//!
//! Defines the uniform interface every external music platform implements,
//! plus the shared error taxonomy and the credential-storage seam.
//!
//! ## Overview
//!
//! The synchronization core never talks to a remote wire format directly.
//! Each platform (streaming service, DJ database, vinyl catalog, video
//! service) ships an adapter implementing [`PlatformAdapter`]; the core
//! branches on [`CapabilityFlags`], never on adapter identity, so new
//! platforms drop in without core changes.
//!
//! ## Components
//!
//! - **Adapter Interface** (`adapter`): [`PlatformAdapter`], external
//!   track/playlist types, capability flags, batch reports
//! - **Credentials** (`credentials`): opaque [`CredentialProvider`] seam
//! - **Errors** (`error`): [`PlatformError`] taxonomy with retry semantics

pub mod adapter;
pub mod credentials;
pub mod error;

pub use adapter::{
    BatchReport, CapabilityFlags, ExtPlaylist, ExtTrack, Platform, PlatformAdapter,
};
pub use credentials::CredentialProvider;
pub use error::{PlatformError, Result};
