//! Data model for the canonical library.
//!
//! Entities map one-to-one onto the SQLite tables in `migrations/`. Local
//! ids are monotonic rowids wrapped in newtypes; all timestamps are UTC
//! Unix seconds.

use crate::error::{LibraryError, Result};
use platform_traits::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Name of the system playlist that mirrors the whole library.
pub const LIBRARY_COLLECTION_NAME: &str = "Library Collection";

/// Snapshot payload schema version written by this build.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// ID Types
// ============================================================================

macro_rules! rowid_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

rowid_newtype!(
    /// Monotonic local identifier for a track.
    TrackId
);
rowid_newtype!(
    /// Monotonic local identifier for a playlist or folder.
    PlaylistId
);
rowid_newtype!(
    /// Monotonic local identifier for a playlist/platform binding.
    BindingId
);
rowid_newtype!(
    /// Monotonic local identifier for a platform link record.
    LinkId
);

// ============================================================================
// Tracks
// ============================================================================

/// A song as known to the local library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    /// Lowercased, NFC-normalized title used for search and matching.
    pub normalized_title: String,
    /// Lowercased, NFC-normalized artist used for search and matching.
    pub normalized_artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    pub year: Option<i64>,
    pub bpm: Option<f64>,
    pub is_local_file: bool,
    pub local_path: Option<String>,
    /// User-assigned quality rating, 0-5.
    pub quality_rating: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Soft-delete marker; deleted tracks are excluded from queries.
    pub deleted_at: Option<i64>,
}

impl Track {
    /// Create a new, unpersisted track. The id is assigned on insert.
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        let title = title.into();
        let artist = artist.into();
        let now = chrono::Utc::now().timestamp();
        Self {
            id: TrackId(0),
            normalized_title: core_matching::normalize(&title),
            normalized_artist: core_matching::normalize(&artist),
            title,
            artist,
            album: None,
            duration_ms: None,
            year: None,
            bpm: None,
            is_local_file: false,
            local_path: None,
            quality_rating: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.is_local_file = true;
        self.local_path = Some(path.into());
        self
    }

    /// Recompute the normalized columns after editing title or artist.
    pub fn refresh_normalized(&mut self) {
        self.normalized_title = core_matching::normalize(&self.title);
        self.normalized_artist = core_matching::normalize(&self.artist);
    }

    /// Title and artist must be non-empty after normalization.
    pub fn validate(&self) -> Result<()> {
        if self.normalized_title.is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "title".to_string(),
                message: "empty after normalization".to_string(),
            });
        }
        if self.normalized_artist.is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "artist".to_string(),
                message: "empty after normalization".to_string(),
            });
        }
        if let Some(rating) = self.quality_rating {
            if !(0..=5).contains(&rating) {
                return Err(LibraryError::InvalidInput {
                    field: "quality_rating".to_string(),
                    message: format!("{rating} outside 0-5"),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Playlists
// ============================================================================

/// What a playlist row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaylistKind {
    /// Contains only other playlists and folders, never tracks.
    Folder,
    /// An ordered list of tracks.
    Playlist,
    /// A read-mostly projection of an external collection (e.g. a vinyl
    /// collection or wantlist).
    CollectionView,
}

impl PlaylistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistKind::Folder => "folder",
            PlaylistKind::Playlist => "playlist",
            PlaylistKind::CollectionView => "collection-view",
        }
    }
}

impl FromStr for PlaylistKind {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "folder" => Ok(PlaylistKind::Folder),
            "playlist" => Ok(PlaylistKind::Playlist),
            "collection-view" => Ok(PlaylistKind::CollectionView),
            other => Err(LibraryError::InvalidInput {
                field: "kind".to_string(),
                message: format!("unknown playlist kind: {other}"),
            }),
        }
    }
}

/// An ordered collection of tracks, or a folder of other playlists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub kind: PlaylistKind,
    pub parent_id: Option<PlaylistId>,
    /// System playlists (the root "Library Collection") cannot be deleted
    /// or renamed.
    pub is_system: bool,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: PlaylistId(0),
            name: name.into(),
            kind: PlaylistKind::Playlist,
            parent_id: None,
            is_system: false,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_folder(name: impl Into<String>) -> Self {
        let mut playlist = Self::new(name);
        playlist.kind = PlaylistKind::Folder;
        playlist
    }

    /// The root system playlist mirroring the whole library.
    pub fn new_library_collection() -> Self {
        let mut playlist = Self::new(LIBRARY_COLLECTION_NAME);
        playlist.kind = PlaylistKind::CollectionView;
        playlist.is_system = true;
        playlist
    }

    pub fn with_parent(mut self, parent_id: PlaylistId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "name".to_string(),
                message: "playlist name is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Ordered membership edge between a playlist and a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistMember {
    pub playlist_id: PlaylistId,
    pub track_id: TrackId,
    /// Dense position starting at zero; kept contiguous by every mutator.
    pub position: i64,
    pub added_at: i64,
}

// ============================================================================
// Platform links & bindings
// ============================================================================

/// Bridge between a local track and its representation on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformLink {
    pub id: LinkId,
    pub track_id: TrackId,
    pub platform: Platform,
    /// Opaque platform-side identifier. Never empty.
    pub external_id: String,
    pub external_uri: Option<String>,
    /// Opaque platform metadata blob.
    pub metadata: serde_json::Value,
    pub match_confidence: f64,
    pub needs_refresh: bool,
    pub last_synced_at: i64,
}

impl PlatformLink {
    pub fn new(track_id: TrackId, platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            id: LinkId(0),
            track_id,
            platform,
            external_id: external_id.into(),
            external_uri: None,
            metadata: serde_json::Value::Null,
            match_confidence: 1.0,
            needs_refresh: false,
            last_synced_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.match_confidence = confidence;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.external_id.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "external_id".to_string(),
                message: "empty external id".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.match_confidence) {
            return Err(LibraryError::InvalidInput {
                field: "match_confidence".to_string(),
                message: format!("{} outside [0, 1]", self.match_confidence),
            });
        }
        Ok(())
    }
}

/// How changes flow across a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullBidirectional,
    AddOnly,
    MirrorFromPlatform,
    MirrorToPlatform,
    ImportOnly,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::FullBidirectional => "full_bidirectional",
            SyncMode::AddOnly => "add_only",
            SyncMode::MirrorFromPlatform => "mirror_from_platform",
            SyncMode::MirrorToPlatform => "mirror_to_platform",
            SyncMode::ImportOnly => "import_only",
        }
    }
}

impl FromStr for SyncMode {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full_bidirectional" => Ok(SyncMode::FullBidirectional),
            "add_only" => Ok(SyncMode::AddOnly),
            "mirror_from_platform" => Ok(SyncMode::MirrorFromPlatform),
            "mirror_to_platform" => Ok(SyncMode::MirrorToPlatform),
            "import_only" => Ok(SyncMode::ImportOnly),
            other => Err(LibraryError::InvalidInput {
                field: "sync_mode".to_string(),
                message: format!("unknown sync mode: {other}"),
            }),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Records that a local playlist is linked to an external playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistPlatformBinding {
    pub id: BindingId,
    pub playlist_id: PlaylistId,
    pub platform: Platform,
    /// None until the remote counterpart exists (first export creates it).
    pub external_playlist_id: Option<String>,
    pub sync_mode: SyncMode,
    /// Whether the local user owns the remote playlist. Shared playlists
    /// are import-only by policy.
    pub is_personal: bool,
    pub last_synced_at: Option<i64>,
}

impl PlaylistPlatformBinding {
    pub fn new(playlist_id: PlaylistId, platform: Platform) -> Self {
        Self {
            id: BindingId(0),
            playlist_id,
            platform,
            external_playlist_id: None,
            sync_mode: SyncMode::FullBidirectional,
            is_personal: true,
            last_synced_at: None,
        }
    }

    pub fn with_external_id(mut self, external_playlist_id: impl Into<String>) -> Self {
        self.external_playlist_id = Some(external_playlist_id.into());
        self
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn shared(mut self) -> Self {
        self.is_personal = false;
        self
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// The observed membership of a binding at the last successful sync.
///
/// Immutable once written; replaced atomically by the next successful sync.
/// The payload is serialized as versioned JSON; unknown fields are ignored
/// on read so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub binding_id: BindingId,
    pub taken_at: i64,
    /// Ordered local membership at snapshot time.
    #[serde(default)]
    pub library_members: Vec<TrackId>,
    /// Ordered platform membership (external ids) at snapshot time.
    #[serde(default)]
    pub platform_members: Vec<String>,
    /// external_id → track_id pairs as observed at snapshot time.
    #[serde(default)]
    pub link_pairs: BTreeMap<String, TrackId>,
}

impl Snapshot {
    pub fn new(binding_id: BindingId) -> Self {
        Self {
            binding_id,
            taken_at: chrono::Utc::now().timestamp(),
            library_members: Vec::new(),
            platform_members: Vec::new(),
            link_pairs: BTreeMap::new(),
        }
    }
}

/// Artwork size variants stored in the blob table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtworkVariant {
    Thumb,
    Small,
    Medium,
    Large,
}

impl ArtworkVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkVariant::Thumb => "thumb",
            ArtworkVariant::Small => "small",
            ArtworkVariant::Medium => "medium",
            ArtworkVariant::Large => "large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_new_computes_normalized_columns() {
        let track = Track::new("Blue Monday (2016 Remaster)", "New Order");
        assert_eq!(track.normalized_title, "blue monday");
        assert_eq!(track.normalized_artist, "new order");
        track.validate().unwrap();
    }

    #[test]
    fn test_track_validation_rejects_empty_metadata() {
        assert!(Track::new("", "New Order").validate().is_err());
        assert!(Track::new("Blue Monday", "   ").validate().is_err());
    }

    #[test]
    fn test_track_validation_rejects_out_of_range_rating() {
        let mut track = Track::new("Blue Monday", "New Order");
        track.quality_rating = Some(6);
        assert!(track.validate().is_err());
        track.quality_rating = Some(5);
        assert!(track.validate().is_ok());
    }

    #[test]
    fn test_playlist_kind_round_trip() {
        for kind in [
            PlaylistKind::Folder,
            PlaylistKind::Playlist,
            PlaylistKind::CollectionView,
        ] {
            assert_eq!(kind.as_str().parse::<PlaylistKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_sync_mode_round_trip() {
        for mode in [
            SyncMode::FullBidirectional,
            SyncMode::AddOnly,
            SyncMode::MirrorFromPlatform,
            SyncMode::MirrorToPlatform,
            SyncMode::ImportOnly,
        ] {
            assert_eq!(mode.as_str().parse::<SyncMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_link_validation() {
        let link = PlatformLink::new(TrackId(1), Platform::Spotify, "");
        assert!(link.validate().is_err());

        let link = PlatformLink::new(TrackId(1), Platform::Spotify, "ext-1").with_confidence(1.5);
        assert!(link.validate().is_err());

        let link = PlatformLink::new(TrackId(1), Platform::Spotify, "ext-1").with_confidence(0.9);
        assert!(link.validate().is_ok());
    }

    #[test]
    fn test_snapshot_payload_ignores_unknown_fields() {
        // A payload written by a future version with extra fields must
        // still deserialize.
        let payload = r#"{
            "binding_id": 7,
            "taken_at": 1700000000,
            "library_members": [1, 2],
            "platform_members": ["a", "b"],
            "link_pairs": {"a": 1},
            "some_future_field": {"nested": true}
        }"#;
        let snapshot: Snapshot = serde_json::from_str(payload).unwrap();
        assert_eq!(snapshot.binding_id, BindingId(7));
        assert_eq!(snapshot.library_members, vec![TrackId(1), TrackId(2)]);
        assert_eq!(snapshot.link_pairs.get("a"), Some(&TrackId(1)));
    }
}
