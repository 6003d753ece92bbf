//! Playlist/platform binding repository.

use crate::error::{LibraryError, Result};
use crate::models::{BindingId, PlaylistId, PlaylistPlatformBinding, SyncMode};
use async_trait::async_trait;
use platform_traits::Platform;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

/// Data access for playlist/platform bindings.
#[async_trait]
pub trait BindingRepository: Send + Sync {
    /// Create a binding. `(playlist_id, platform)` and
    /// `(platform, external_playlist_id)` must both be unused.
    async fn insert(&self, binding: &PlaylistPlatformBinding) -> Result<BindingId>;

    async fn find_by_id(&self, id: BindingId) -> Result<Option<PlaylistPlatformBinding>>;

    async fn find(
        &self,
        playlist_id: PlaylistId,
        platform: Platform,
    ) -> Result<Option<PlaylistPlatformBinding>>;

    /// All bindings of one playlist across platforms.
    async fn list_for_playlist(
        &self,
        playlist_id: PlaylistId,
    ) -> Result<Vec<PlaylistPlatformBinding>>;

    async fn set_mode(&self, id: BindingId, mode: SyncMode) -> Result<()>;

    /// Explicit unbind. Cascades the binding's snapshot.
    async fn delete(&self, id: BindingId) -> Result<bool>;
}

/// SQLite implementation of [`BindingRepository`].
pub struct SqliteBindingRepository {
    pool: SqlitePool,
}

impl SqliteBindingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct BindingRow {
    id: i64,
    playlist_id: i64,
    platform: String,
    external_playlist_id: Option<String>,
    sync_mode: String,
    is_personal: i64,
    last_synced_at: Option<i64>,
}

impl TryFrom<BindingRow> for PlaylistPlatformBinding {
    type Error = LibraryError;

    fn try_from(row: BindingRow) -> Result<Self> {
        let platform = Platform::from_str(&row.platform).map_err(|_| {
            LibraryError::InvalidInput {
                field: "platform".to_string(),
                message: format!("unknown platform: {}", row.platform),
            }
        })?;
        Ok(PlaylistPlatformBinding {
            id: BindingId(row.id),
            playlist_id: PlaylistId(row.playlist_id),
            platform,
            external_playlist_id: row.external_playlist_id,
            sync_mode: SyncMode::from_str(&row.sync_mode)?,
            is_personal: row.is_personal != 0,
            last_synced_at: row.last_synced_at,
        })
    }
}

#[async_trait]
impl BindingRepository for SqliteBindingRepository {
    async fn insert(&self, binding: &PlaylistPlatformBinding) -> Result<BindingId> {
        let result = sqlx::query(
            r#"
            INSERT INTO playlist_bindings (
                playlist_id, platform, external_playlist_id, sync_mode, is_personal, last_synced_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(binding.playlist_id.0)
        .bind(binding.platform.as_str())
        .bind(&binding.external_playlist_id)
        .bind(binding.sync_mode.as_str())
        .bind(binding.is_personal as i64)
        .bind(binding.last_synced_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LibraryError::from_write(e, "binding insert"))?;

        Ok(BindingId(result.last_insert_rowid()))
    }

    async fn find_by_id(&self, id: BindingId) -> Result<Option<PlaylistPlatformBinding>> {
        let row: Option<BindingRow> =
            sqlx::query_as("SELECT * FROM playlist_bindings WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PlaylistPlatformBinding::try_from).transpose()
    }

    async fn find(
        &self,
        playlist_id: PlaylistId,
        platform: Platform,
    ) -> Result<Option<PlaylistPlatformBinding>> {
        let row: Option<BindingRow> = sqlx::query_as(
            "SELECT * FROM playlist_bindings WHERE playlist_id = ? AND platform = ?",
        )
        .bind(playlist_id.0)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PlaylistPlatformBinding::try_from).transpose()
    }

    async fn list_for_playlist(
        &self,
        playlist_id: PlaylistId,
    ) -> Result<Vec<PlaylistPlatformBinding>> {
        let rows: Vec<BindingRow> = sqlx::query_as(
            "SELECT * FROM playlist_bindings WHERE playlist_id = ? ORDER BY platform",
        )
        .bind(playlist_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(PlaylistPlatformBinding::try_from)
            .collect()
    }

    async fn set_mode(&self, id: BindingId, mode: SyncMode) -> Result<()> {
        let affected = sqlx::query("UPDATE playlist_bindings SET sync_mode = ? WHERE id = ?")
            .bind(mode.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(LibraryError::NotFound {
                entity: "binding",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: BindingId) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM playlist_bindings WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}
