//! Connection-level mutators for the sync apply path.
//!
//! A sync apply wraps every local mutation in a single transaction: the
//! executor opens one with `pool.begin()`, threads the connection through
//! these helpers, and either commits or rolls back wholesale. The same
//! helpers back the standalone repository mutators so position invariants
//! hold everywhere.

use crate::error::{LibraryError, Result};
use crate::models::{
    BindingId, PlatformLink, PlaylistId, Snapshot, Track, TrackId, SNAPSHOT_SCHEMA_VERSION,
};
use sqlx::SqliteConnection;

/// Insert a track and return its assigned id.
pub async fn insert_track(conn: &mut SqliteConnection, track: &Track) -> Result<TrackId> {
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
    .execute(&mut *conn)
    .await
    .map_err(|e| LibraryError::from_write(e, "track insert"))?;
    Ok(TrackId(result.last_insert_rowid()))
}

/// Overwrite a track's descriptive metadata (conflict resolution taking the
/// platform side).
pub async fn update_track_metadata(
    conn: &mut SqliteConnection,
    track_id: TrackId,
    title: &str,
    artist: &str,
    album: Option<&str>,
    duration_ms: Option<i64>,
) -> Result<()> {
    let affected = sqlx::query(
        r#"
        UPDATE tracks SET
            title = ?, artist = ?, normalized_title = ?, normalized_artist = ?,
            album = COALESCE(?, album), duration_ms = COALESCE(?, duration_ms),
            updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(title)
    .bind(artist)
    .bind(core_matching::normalize(title))
    .bind(core_matching::normalize(artist))
    .bind(album)
    .bind(duration_ms)
    .bind(chrono::Utc::now().timestamp())
    .bind(track_id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(LibraryError::NotFound {
            entity: "track",
            id: track_id.to_string(),
        });
    }
    Ok(())
}

/// Append a member at the end of a playlist. A no-op when the member is
/// already present; positions stay dense either way.
pub async fn append_member(
    conn: &mut SqliteConnection,
    playlist_id: PlaylistId,
    track_id: TrackId,
) -> Result<bool> {
    let (exists,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM playlist_tracks WHERE playlist_id = ? AND track_id = ?",
    )
    .bind(playlist_id.0)
    .bind(track_id.0)
    .fetch_one(&mut *conn)
    .await?;
    if exists > 0 {
        return Ok(false);
    }

    let (next,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_tracks WHERE playlist_id = ?",
    )
    .bind(playlist_id.0)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO playlist_tracks (playlist_id, track_id, position, added_at) VALUES (?, ?, ?, ?)",
    )
    .bind(playlist_id.0)
    .bind(track_id.0)
    .bind(next)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| LibraryError::from_write(e, "member insert"))?;
    Ok(true)
}

/// Remove a member and renumber the remainder. Removing an absent member
/// is a no-op returning `false`.
pub async fn remove_member(
    conn: &mut SqliteConnection,
    playlist_id: PlaylistId,
    track_id: TrackId,
) -> Result<bool> {
    let affected = sqlx::query(
        "DELETE FROM playlist_tracks WHERE playlist_id = ? AND track_id = ?",
    )
    .bind(playlist_id.0)
    .bind(track_id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Ok(false);
    }
    renumber_positions(conn, playlist_id).await?;
    Ok(true)
}

/// Rewrite positions as the dense sequence 0..n preserving current order.
pub async fn renumber_positions(
    conn: &mut SqliteConnection,
    playlist_id: PlaylistId,
) -> Result<()> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT track_id FROM playlist_tracks WHERE playlist_id = ? ORDER BY position",
    )
    .bind(playlist_id.0)
    .fetch_all(&mut *conn)
    .await?;

    for (index, (track_id,)) in rows.iter().enumerate() {
        sqlx::query(
            "UPDATE playlist_tracks SET position = ? WHERE playlist_id = ? AND track_id = ?",
        )
        .bind(index as i64)
        .bind(playlist_id.0)
        .bind(track_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Create or update the link for `(track_id, platform)`.
///
/// Fails with [`LibraryError::Conflict`] when `(platform, external_id)` is
/// already claimed by a different track: external identity never splits.
pub async fn upsert_link(conn: &mut SqliteConnection, link: &PlatformLink) -> Result<()> {
    link.validate()?;

    let claimed: Option<(i64,)> = sqlx::query_as(
        "SELECT track_id FROM platform_links WHERE platform = ? AND external_id = ?",
    )
    .bind(link.platform.as_str())
    .bind(&link.external_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some((owner,)) = claimed {
        if owner != link.track_id.0 {
            return Err(LibraryError::Conflict(format!(
                "{}:{} is already linked to track {owner}",
                link.platform, link.external_id
            )));
        }
    }

    let metadata = serde_json::to_string(&link.metadata).map_err(|e| {
        LibraryError::InvalidInput {
            field: "metadata".to_string(),
            message: e.to_string(),
        }
    })?;

    sqlx::query(
        r#"
        INSERT INTO platform_links (
            track_id, platform, external_id, external_uri, metadata,
            match_confidence, needs_refresh, last_synced_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (track_id, platform) DO UPDATE SET
            external_id = excluded.external_id,
            external_uri = excluded.external_uri,
            metadata = excluded.metadata,
            match_confidence = excluded.match_confidence,
            needs_refresh = excluded.needs_refresh,
            last_synced_at = excluded.last_synced_at
        "#,
    )
    .bind(link.track_id.0)
    .bind(link.platform.as_str())
    .bind(&link.external_id)
    .bind(&link.external_uri)
    .bind(metadata)
    .bind(link.match_confidence)
    .bind(link.needs_refresh as i64)
    .bind(link.last_synced_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| LibraryError::from_write(e, "link upsert"))?;
    Ok(())
}

/// Record the external playlist id on a binding (first export).
pub async fn set_binding_external_id(
    conn: &mut SqliteConnection,
    binding_id: BindingId,
    external_playlist_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE playlist_bindings SET external_playlist_id = ? WHERE id = ?")
        .bind(external_playlist_id)
        .bind(binding_id.0)
        .execute(&mut *conn)
        .await
        .map_err(|e| LibraryError::from_write(e, "binding external id"))?;
    Ok(())
}

/// Stamp a binding's `last_synced_at`.
pub async fn touch_binding(
    conn: &mut SqliteConnection,
    binding_id: BindingId,
    timestamp: i64,
) -> Result<()> {
    sqlx::query("UPDATE playlist_bindings SET last_synced_at = ? WHERE id = ?")
        .bind(timestamp)
        .bind(binding_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Atomically replace the snapshot for a binding.
pub async fn replace_snapshot(conn: &mut SqliteConnection, snapshot: &Snapshot) -> Result<()> {
    let payload = serde_json::to_string(snapshot).map_err(|e| {
        LibraryError::Snapshot(format!("serialize failed: {e}"))
    })?;
    sqlx::query(
        r#"
        INSERT INTO snapshots (binding_id, schema_version, taken_at, payload)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (binding_id) DO UPDATE SET
            schema_version = excluded.schema_version,
            taken_at = excluded.taken_at,
            payload = excluded.payload
        "#,
    )
    .bind(snapshot.binding_id.0)
    .bind(SNAPSHOT_SCHEMA_VERSION as i64)
    .bind(snapshot.taken_at)
    .bind(payload)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::Playlist;
    use platform_traits::Platform;

    async fn setup() -> (sqlx::SqlitePool, PlaylistId, Vec<TrackId>) {
        let pool = create_test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let playlist = Playlist::new("Workout");
        let result = sqlx::query(
            "INSERT INTO playlists (name, kind, is_system, created_at, updated_at) VALUES (?, 'playlist', 0, 0, 0)",
        )
        .bind(&playlist.name)
        .execute(&mut *conn)
        .await
        .unwrap();
        let playlist_id = PlaylistId(result.last_insert_rowid());

        let mut tracks = Vec::new();
        for index in 0..3 {
            let id = insert_track(&mut conn, &Track::new(format!("Track {index}"), "Artist"))
                .await
                .unwrap();
            tracks.push(id);
        }
        drop(conn);
        (pool, playlist_id, tracks)
    }

    #[tokio::test]
    async fn test_append_member_is_idempotent_and_dense() {
        let (pool, playlist_id, tracks) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        assert!(append_member(&mut conn, playlist_id, tracks[0]).await.unwrap());
        assert!(!append_member(&mut conn, playlist_id, tracks[0]).await.unwrap());
        assert!(append_member(&mut conn, playlist_id, tracks[1]).await.unwrap());

        let positions: Vec<(i64,)> = sqlx::query_as(
            "SELECT position FROM playlist_tracks WHERE playlist_id = ? ORDER BY position",
        )
        .bind(playlist_id.0)
        .fetch_all(&mut *conn)
        .await
        .unwrap();
        assert_eq!(positions, vec![(0,), (1,)]);
    }

    #[tokio::test]
    async fn test_remove_absent_member_is_noop() {
        let (pool, playlist_id, tracks) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        assert!(!remove_member(&mut conn, playlist_id, tracks[2]).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_link_refuses_identity_split() {
        let (pool, _, tracks) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let link = PlatformLink::new(tracks[0], Platform::Spotify, "ext-1");
        upsert_link(&mut conn, &link).await.unwrap();

        // Same external id on a different track must be refused.
        let stolen = PlatformLink::new(tracks[1], Platform::Spotify, "ext-1");
        assert!(matches!(
            upsert_link(&mut conn, &stolen).await,
            Err(LibraryError::Conflict(_))
        ));

        // Re-linking the same track updates in place.
        let refreshed = PlatformLink::new(tracks[0], Platform::Spotify, "ext-1")
            .with_confidence(0.9);
        upsert_link(&mut conn, &refreshed).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM platform_links")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_membership_writes() {
        let (pool, playlist_id, tracks) = setup().await;

        {
            let mut tx = pool.begin().await.unwrap();
            append_member(&mut tx, playlist_id, tracks[0]).await.unwrap();
            tx.rollback().await.unwrap();
        }

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM playlist_tracks WHERE playlist_id = ?")
                .bind(playlist_id.0)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 0);
    }
}
