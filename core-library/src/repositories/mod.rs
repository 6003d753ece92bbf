//! Repository traits and their SQLite implementations.

pub mod artwork;
pub mod binding;
pub mod link;
pub mod playlist;
pub mod settings;
pub mod snapshot;
pub mod track;

pub use artwork::{ArtworkRepository, SqliteArtworkRepository};
pub use binding::{BindingRepository, SqliteBindingRepository};
pub use link::{LinkRepository, SqliteLinkRepository};
pub use playlist::{PlaylistRepository, SqlitePlaylistRepository};
pub use settings::{SettingsRepository, SqliteSettingsRepository};
pub use snapshot::{SnapshotRepository, SqliteSnapshotRepository};
pub use track::{SqliteTrackRepository, TrackRepository, TrackSearchFilter};
