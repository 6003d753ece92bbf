//! Snapshot store.
//!
//! One snapshot per binding: the membership observed at the last successful
//! sync, which is the only history the change detector compares against.
//! Writes replace the previous snapshot atomically; reads verify the stored
//! schema version and tolerate unknown payload fields.

use crate::error::{LibraryError, Result};
use crate::models::{BindingId, Snapshot, SNAPSHOT_SCHEMA_VERSION};
use crate::tx;
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Data access for per-binding snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// The last snapshot for a binding, if any.
    async fn get(&self, binding_id: BindingId) -> Result<Option<Snapshot>>;

    /// Replace the snapshot for a binding atomically.
    async fn replace(&self, snapshot: &Snapshot) -> Result<()>;

    /// Drop a binding's snapshot (e.g. on unbind).
    async fn delete(&self, binding_id: BindingId) -> Result<bool>;
}

/// SQLite implementation of [`SnapshotRepository`].
pub struct SqliteSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotRepository for SqliteSnapshotRepository {
    async fn get(&self, binding_id: BindingId) -> Result<Option<Snapshot>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT schema_version, payload FROM snapshots WHERE binding_id = ?",
        )
        .bind(binding_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some((schema_version, payload)) = row else {
            return Ok(None);
        };
        if schema_version as u32 > SNAPSHOT_SCHEMA_VERSION {
            return Err(LibraryError::Snapshot(format!(
                "schema version {schema_version} is newer than supported {SNAPSHOT_SCHEMA_VERSION}"
            )));
        }

        let snapshot: Snapshot = serde_json::from_str(&payload)
            .map_err(|e| LibraryError::Snapshot(format!("payload parse failed: {e}")))?;
        Ok(Some(snapshot))
    }

    async fn replace(&self, snapshot: &Snapshot) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        tx::replace_snapshot(&mut conn, snapshot).await
    }

    async fn delete(&self, binding_id: BindingId) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM snapshots WHERE binding_id = ?")
            .bind(binding_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Playlist, PlaylistPlatformBinding, TrackId};
    use crate::repositories::binding::{BindingRepository, SqliteBindingRepository};
    use crate::repositories::playlist::{PlaylistRepository, SqlitePlaylistRepository};
    use platform_traits::Platform;

    async fn setup() -> (SqlitePool, SqliteSnapshotRepository, BindingId) {
        let pool = create_test_pool().await.unwrap();
        let playlists = SqlitePlaylistRepository::new(pool.clone());
        let bindings = SqliteBindingRepository::new(pool.clone());
        let playlist = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let binding = bindings
            .insert(
                &PlaylistPlatformBinding::new(playlist, Platform::Spotify)
                    .with_external_id("sp-1"),
            )
            .await
            .unwrap();
        (pool.clone(), SqliteSnapshotRepository::new(pool), binding)
    }

    fn sample(binding_id: BindingId) -> Snapshot {
        let mut snapshot = Snapshot::new(binding_id);
        snapshot.library_members = vec![TrackId(1), TrackId(2)];
        snapshot.platform_members = vec!["a".to_string(), "b".to_string()];
        snapshot.link_pairs.insert("a".to_string(), TrackId(1));
        snapshot.link_pairs.insert("b".to_string(), TrackId(2));
        snapshot
    }

    #[tokio::test]
    async fn test_missing_snapshot_reads_none() {
        let (_, snapshots, binding) = setup().await;
        assert!(snapshots.get(binding).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_read_back() {
        let (_, snapshots, binding) = setup().await;
        let snapshot = sample(binding);
        snapshots.replace(&snapshot).await.unwrap();

        let loaded = snapshots.get(binding).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_replace_overwrites_previous() {
        let (_, snapshots, binding) = setup().await;
        snapshots.replace(&sample(binding)).await.unwrap();

        let mut updated = Snapshot::new(binding);
        updated.platform_members = vec!["c".to_string()];
        snapshots.replace(&updated).await.unwrap();

        let loaded = snapshots.get(binding).await.unwrap().unwrap();
        assert_eq!(loaded.platform_members, vec!["c"]);
        assert!(loaded.library_members.is_empty());
    }

    #[tokio::test]
    async fn test_newer_schema_version_is_refused() {
        let (pool, snapshots, binding) = setup().await;
        sqlx::query(
            "INSERT INTO snapshots (binding_id, schema_version, taken_at, payload) VALUES (?, ?, 0, '{}')",
        )
        .bind(binding.0)
        .bind((SNAPSHOT_SCHEMA_VERSION + 1) as i64)
        .execute(&pool)
        .await
        .unwrap();

        assert!(matches!(
            snapshots.get(binding).await,
            Err(LibraryError::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_snapshot() {
        let (_, snapshots, binding) = setup().await;
        snapshots.replace(&sample(binding)).await.unwrap();
        assert!(snapshots.delete(binding).await.unwrap());
        assert!(snapshots.get(binding).await.unwrap().is_none());
    }
}
