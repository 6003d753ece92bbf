//! Platform link repository: the cross-platform identity records.

use crate::error::{LibraryError, Result};
use crate::models::{LinkId, PlatformLink, TrackId};
use crate::tx;
use async_trait::async_trait;
use platform_traits::Platform;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

/// Data access for platform links.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Create or update the link for `(track_id, platform)`. Refuses to
    /// claim an external id already linked to a different track.
    async fn upsert(&self, link: &PlatformLink) -> Result<()>;

    async fn find(&self, track_id: TrackId, platform: Platform) -> Result<Option<PlatformLink>>;

    async fn find_by_external(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<PlatformLink>>;

    /// Links on one platform for a set of tracks, loaded in one query.
    async fn links_for_tracks(
        &self,
        track_ids: &[TrackId],
        platform: Platform,
    ) -> Result<HashMap<TrackId, PlatformLink>>;

    /// Every link on one platform, loaded in one query. The detector uses
    /// this to resolve remote members against the whole library.
    async fn all_for_platform(&self, platform: Platform) -> Result<Vec<PlatformLink>>;

    /// Explicit unlink. Returns whether a link existed.
    async fn delete(&self, track_id: TrackId, platform: Platform) -> Result<bool>;

    /// Flag a link whose remote metadata should be re-fetched.
    async fn mark_needs_refresh(&self, track_id: TrackId, platform: Platform) -> Result<()>;
}

/// SQLite implementation of [`LinkRepository`].
pub struct SqliteLinkRepository {
    pool: SqlitePool,
}

impl SqliteLinkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct LinkRow {
    id: i64,
    track_id: i64,
    platform: String,
    external_id: String,
    external_uri: Option<String>,
    metadata: Option<String>,
    match_confidence: f64,
    needs_refresh: i64,
    last_synced_at: i64,
}

impl TryFrom<LinkRow> for PlatformLink {
    type Error = LibraryError;

    fn try_from(row: LinkRow) -> Result<Self> {
        let platform = Platform::from_str(&row.platform).map_err(|_| {
            LibraryError::InvalidInput {
                field: "platform".to_string(),
                message: format!("unknown platform: {}", row.platform),
            }
        })?;
        let metadata = match row.metadata.as_deref() {
            None | Some("") => serde_json::Value::Null,
            Some(raw) => serde_json::from_str(raw).unwrap_or(serde_json::Value::Null),
        };
        Ok(PlatformLink {
            id: LinkId(row.id),
            track_id: TrackId(row.track_id),
            platform,
            external_id: row.external_id,
            external_uri: row.external_uri,
            metadata,
            match_confidence: row.match_confidence,
            needs_refresh: row.needs_refresh != 0,
            last_synced_at: row.last_synced_at,
        })
    }
}

#[async_trait]
impl LinkRepository for SqliteLinkRepository {
    async fn upsert(&self, link: &PlatformLink) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        tx::upsert_link(&mut conn, link).await
    }

    async fn find(&self, track_id: TrackId, platform: Platform) -> Result<Option<PlatformLink>> {
        let row: Option<LinkRow> = sqlx::query_as(
            "SELECT * FROM platform_links WHERE track_id = ? AND platform = ?",
        )
        .bind(track_id.0)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PlatformLink::try_from).transpose()
    }

    async fn find_by_external(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<PlatformLink>> {
        let row: Option<LinkRow> = sqlx::query_as(
            "SELECT * FROM platform_links WHERE platform = ? AND external_id = ?",
        )
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PlatformLink::try_from).transpose()
    }

    async fn links_for_tracks(
        &self,
        track_ids: &[TrackId],
        platform: Platform,
    ) -> Result<HashMap<TrackId, PlatformLink>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM platform_links WHERE platform = ");
        builder.push_bind(platform.as_str());
        builder.push(" AND track_id IN (");
        let mut separated = builder.separated(", ");
        for track_id in track_ids {
            separated.push_bind(track_id.0);
        }
        builder.push(")");

        let rows: Vec<LinkRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut links = HashMap::with_capacity(rows.len());
        for row in rows {
            let link = PlatformLink::try_from(row)?;
            links.insert(link.track_id, link);
        }
        Ok(links)
    }

    async fn all_for_platform(&self, platform: Platform) -> Result<Vec<PlatformLink>> {
        let rows: Vec<LinkRow> =
            sqlx::query_as("SELECT * FROM platform_links WHERE platform = ? ORDER BY id")
                .bind(platform.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(PlatformLink::try_from).collect()
    }

    async fn delete(&self, track_id: TrackId, platform: Platform) -> Result<bool> {
        let affected = sqlx::query(
            "DELETE FROM platform_links WHERE track_id = ? AND platform = ?",
        )
        .bind(track_id.0)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn mark_needs_refresh(&self, track_id: TrackId, platform: Platform) -> Result<()> {
        sqlx::query(
            "UPDATE platform_links SET needs_refresh = 1 WHERE track_id = ? AND platform = ?",
        )
        .bind(track_id.0)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
