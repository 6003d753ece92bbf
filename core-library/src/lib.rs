//! # Library Persistence
//!
//! Owns the canonical music library database and exposes repository
//! patterns for every persisted entity.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite schema and embedded migrations
//! - The data model: tracks, playlists, ordered membership, cross-platform
//!   links, playlist/platform bindings, per-binding snapshots
//! - Repository traits with SQLite implementations
//! - Connection-level mutators (`tx`) composed into the single-transaction
//!   sync apply
//!
//! ## Concurrency contract
//!
//! One writer per playlist at a time, any number of readers. The sync layer
//! serializes writers per binding; this crate enforces uniqueness invariants
//! and surfaces violations as [`LibraryError::Conflict`].

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod tx;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    ArtworkVariant, BindingId, LinkId, PlatformLink, Playlist, PlaylistId, PlaylistKind,
    PlaylistMember, PlaylistPlatformBinding, Snapshot, SyncMode, Track, TrackId,
    LIBRARY_COLLECTION_NAME, SNAPSHOT_SCHEMA_VERSION,
};
pub use repositories::{
    ArtworkRepository, BindingRepository, LinkRepository, PlaylistRepository, SettingsRepository,
    SnapshotRepository, SqliteArtworkRepository, SqliteBindingRepository, SqliteLinkRepository,
    SqlitePlaylistRepository, SqliteSettingsRepository, SqliteSnapshotRepository,
    SqliteTrackRepository, TrackRepository, TrackSearchFilter,
};
