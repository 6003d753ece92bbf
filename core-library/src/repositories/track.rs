//! Track repository trait and SQLite implementation.

use crate::error::{LibraryError, Result};
use crate::models::{Track, TrackId};
use async_trait::async_trait;
use platform_traits::Platform;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

/// Optional narrowing applied to track searches.
#[derive(Debug, Clone, Default)]
pub struct TrackSearchFilter {
    /// Restrict to tracks tagged with this genre.
    pub genre: Option<String>,
    /// Restrict to tracks that have a link on this platform.
    pub on_platform: Option<Platform>,
}

/// Data access for tracks.
#[async_trait]
pub trait TrackRepository: Send + Sync {
    /// Insert a new track and return its assigned id.
    async fn insert(&self, track: &Track) -> Result<TrackId>;

    async fn find_by_id(&self, id: TrackId) -> Result<Option<Track>>;

    /// Update mutable metadata of an existing track.
    async fn update(&self, track: &Track) -> Result<()>;

    /// Set the user quality rating (0-5), or clear it with `None`.
    async fn set_quality_rating(&self, id: TrackId, rating: Option<i64>) -> Result<()>;

    /// Soft-delete a track. Refused while any playlist references it.
    async fn soft_delete(&self, id: TrackId) -> Result<()>;

    /// Find the local track linked to `(platform, external_id)`, if any.
    async fn find_by_platform_id(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<Track>>;

    /// Search by normalized title/artist substring, optionally filtered.
    async fn search(
        &self,
        query: &str,
        filter: &TrackSearchFilter,
        limit: u32,
    ) -> Result<Vec<Track>>;

    /// All live tracks, in id order. Used as the matching pool.
    async fn list_all(&self) -> Result<Vec<Track>>;

    /// Tag a track with a genre, creating the genre row if needed.
    async fn add_genre(&self, id: TrackId, name: &str, source: Option<&str>) -> Result<()>;

    /// Genre names tagged on a track.
    async fn genres_of(&self, id: TrackId) -> Result<Vec<String>>;

    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of [`TrackRepository`].
pub struct SqliteTrackRepository {
    pool: SqlitePool,
}

impl SqliteTrackRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TrackRow {
    id: i64,
    title: String,
    artist: String,
    normalized_title: String,
    normalized_artist: String,
    album: Option<String>,
    duration_ms: Option<i64>,
    year: Option<i64>,
    bpm: Option<f64>,
    is_local_file: i64,
    local_path: Option<String>,
    quality_rating: Option<i64>,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl From<TrackRow> for Track {
    fn from(row: TrackRow) -> Self {
        Track {
            id: TrackId(row.id),
            title: row.title,
            artist: row.artist,
            normalized_title: row.normalized_title,
            normalized_artist: row.normalized_artist,
            album: row.album,
            duration_ms: row.duration_ms,
            year: row.year,
            bpm: row.bpm,
            is_local_file: row.is_local_file != 0,
            local_path: row.local_path,
            quality_rating: row.quality_rating,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[async_trait]
impl TrackRepository for SqliteTrackRepository {
    async fn insert(&self, track: &Track) -> Result<TrackId> {
        track.validate()?;
        let result = sqlx::query(
            r#"
            INSERT INTO tracks (
                title, artist, normalized_title, normalized_artist, album,
                duration_ms, year, bpm, is_local_file, local_path,
                quality_rating, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.normalized_title)
        .bind(&track.normalized_artist)
        .bind(&track.album)
        .bind(track.duration_ms)
        .bind(track.year)
        .bind(track.bpm)
        .bind(track.is_local_file as i64)
        .bind(&track.local_path)
        .bind(track.quality_rating)
        .bind(track.created_at)
        .bind(track.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LibraryError::from_write(e, "track insert"))?;

        Ok(TrackId(result.last_insert_rowid()))
    }

    async fn find_by_id(&self, id: TrackId) -> Result<Option<Track>> {
        let row: Option<TrackRow> =
            sqlx::query_as("SELECT * FROM tracks WHERE id = ? AND deleted_at IS NULL")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Track::from))
    }

    async fn update(&self, track: &Track) -> Result<()> {
        track.validate()?;
        let affected = sqlx::query(
            r#"
            UPDATE tracks SET
                title = ?, artist = ?, normalized_title = ?, normalized_artist = ?,
                album = ?, duration_ms = ?, year = ?, bpm = ?,
                is_local_file = ?, local_path = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.normalized_title)
        .bind(&track.normalized_artist)
        .bind(&track.album)
        .bind(track.duration_ms)
        .bind(track.year)
        .bind(track.bpm)
        .bind(track.is_local_file as i64)
        .bind(&track.local_path)
        .bind(chrono::Utc::now().timestamp())
        .bind(track.id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LibraryError::NotFound {
                entity: "track",
                id: track.id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_quality_rating(&self, id: TrackId, rating: Option<i64>) -> Result<()> {
        if let Some(rating) = rating {
            if !(0..=5).contains(&rating) {
                return Err(LibraryError::InvalidInput {
                    field: "quality_rating".to_string(),
                    message: format!("{rating} outside 0-5"),
                });
            }
        }
        let affected = sqlx::query(
            "UPDATE tracks SET quality_rating = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(rating)
        .bind(chrono::Utc::now().timestamp())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LibraryError::NotFound {
                entity: "track",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn soft_delete(&self, id: TrackId) -> Result<()> {
        let (references,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM playlist_tracks WHERE track_id = ?")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await?;
        if references > 0 {
            return Err(LibraryError::Conflict(format!(
                "track {id} is referenced by {references} playlist(s)"
            )));
        }

        sqlx::query("UPDATE tracks SET deleted_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_platform_id(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<Track>> {
        let row: Option<TrackRow> = sqlx::query_as(
            r#"
            SELECT t.* FROM tracks t
            JOIN platform_links pl ON pl.track_id = t.id
            WHERE pl.platform = ? AND pl.external_id = ? AND t.deleted_at IS NULL
            "#,
        )
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Track::from))
    }

    async fn search(
        &self,
        query: &str,
        filter: &TrackSearchFilter,
        limit: u32,
    ) -> Result<Vec<Track>> {
        let pattern = format!("%{}%", core_matching::normalize(query));

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT DISTINCT t.* FROM tracks t");
        if filter.genre.is_some() {
            builder.push(
                " JOIN track_genres tg ON tg.track_id = t.id \
                  JOIN genres g ON g.id = tg.genre_id",
            );
        }
        if filter.on_platform.is_some() {
            builder.push(" JOIN platform_links pl ON pl.track_id = t.id");
        }
        builder.push(" WHERE t.deleted_at IS NULL AND (t.normalized_title LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR t.normalized_artist LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
        if let Some(genre) = &filter.genre {
            builder.push(" AND g.name = ");
            builder.push_bind(genre.clone());
        }
        if let Some(platform) = filter.on_platform {
            builder.push(" AND pl.platform = ");
            builder.push_bind(platform.as_str());
        }
        builder.push(" ORDER BY t.normalized_artist, t.normalized_title LIMIT ");
        builder.push_bind(limit as i64);

        let rows: Vec<TrackRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Track::from).collect())
    }

    async fn list_all(&self) -> Result<Vec<Track>> {
        let rows: Vec<TrackRow> =
            sqlx::query_as("SELECT * FROM tracks WHERE deleted_at IS NULL ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Track::from).collect())
    }

    async fn add_genre(&self, id: TrackId, name: &str, source: Option<&str>) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO genres (name, source) VALUES (?, ?)")
            .bind(name)
            .bind(source)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO track_genres (track_id, genre_id)
            SELECT ?, id FROM genres WHERE name = ?
            "#,
        )
        .bind(id.0)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn genres_of(&self, id: TrackId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT g.name FROM genres g
            JOIN track_genres tg ON tg.genre_id = g.id
            WHERE tg.track_id = ?
            ORDER BY g.name
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tracks WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn repo() -> SqliteTrackRepository {
        SqliteTrackRepository::new(create_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_find_track() {
        let repo = repo().await;
        let track = Track::new("Blue Monday", "New Order").with_duration_ms(445_000);
        let id = repo.insert(&track).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.title, "Blue Monday");
        assert_eq!(found.normalized_artist, "new order");
        assert_eq!(found.duration_ms, Some(445_000));
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_track() {
        let repo = repo().await;
        assert!(repo.insert(&Track::new("", "New Order")).await.is_err());
    }

    #[tokio::test]
    async fn test_update_track() {
        let repo = repo().await;
        let id = repo.insert(&Track::new("Blu Monday", "New Order")).await.unwrap();

        let mut track = repo.find_by_id(id).await.unwrap().unwrap();
        track.title = "Blue Monday".to_string();
        track.refresh_normalized();
        repo.update(&track).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.title, "Blue Monday");
        assert_eq!(found.normalized_title, "blue monday");
    }

    #[tokio::test]
    async fn test_quality_rating_bounds() {
        let repo = repo().await;
        let id = repo.insert(&Track::new("Blue Monday", "New Order")).await.unwrap();

        assert!(repo.set_quality_rating(id, Some(6)).await.is_err());
        repo.set_quality_rating(id, Some(4)).await.unwrap();
        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.quality_rating, Some(4));

        repo.set_quality_rating(id, None).await.unwrap();
        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.quality_rating, None);
    }

    #[tokio::test]
    async fn test_search_matches_normalized_metadata() {
        let repo = repo().await;
        repo.insert(&Track::new("Blue Monday (2016 Remaster)", "New Order"))
            .await
            .unwrap();
        repo.insert(&Track::new("Atmosphere", "Joy Division"))
            .await
            .unwrap();

        let hits = repo
            .search("blue monday", &TrackSearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].artist, "New Order");
    }

    #[tokio::test]
    async fn test_search_genre_filter() {
        let repo = repo().await;
        let a = repo.insert(&Track::new("Blue Monday", "New Order")).await.unwrap();
        repo.insert(&Track::new("Blue Bossa", "Joe Henderson"))
            .await
            .unwrap();
        repo.add_genre(a, "synthpop", Some("user")).await.unwrap();

        let filter = TrackSearchFilter {
            genre: Some("synthpop".to_string()),
            on_platform: None,
        };
        let hits = repo.search("blue", &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);

        assert_eq!(repo.genres_of(a).await.unwrap(), vec!["synthpop"]);
    }

    #[tokio::test]
    async fn test_soft_delete_requires_no_references() {
        let repo = repo().await;
        let id = repo.insert(&Track::new("Blue Monday", "New Order")).await.unwrap();
        repo.soft_delete(id).await.unwrap();
        assert!(repo.find_by_id(id).await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
