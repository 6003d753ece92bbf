//! Playlist repository: CRUD, tree structure, ordered membership.
//!
//! Invariants enforced here:
//! - folders never contain tracks
//! - the parent chain is acyclic
//! - system playlists cannot be renamed or deleted
//! - positions form a dense sequence starting at zero after every mutation

use crate::error::{LibraryError, Result};
use crate::models::{Playlist, PlaylistId, PlaylistKind, PlaylistMember, Track, TrackId};
use crate::repositories::track::TrackRow;
use crate::tx;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

/// Data access for playlists and their membership.
#[async_trait]
pub trait PlaylistRepository: Send + Sync {
    async fn insert(&self, playlist: &Playlist) -> Result<PlaylistId>;

    async fn find_by_id(&self, id: PlaylistId) -> Result<Option<Playlist>>;

    /// Rename / re-describe / re-parent a playlist. System playlists refuse
    /// renames; re-parenting validates acyclicity and that the new parent
    /// is a folder.
    async fn update(&self, playlist: &Playlist) -> Result<()>;

    /// Delete a playlist (and its membership edges). System playlists and
    /// non-empty folders refuse.
    async fn delete(&self, id: PlaylistId) -> Result<()>;

    /// Direct children of a folder (or the roots for `None`).
    async fn children(&self, parent_id: Option<PlaylistId>) -> Result<Vec<Playlist>>;

    /// Append a track at the end of a playlist. Adding an already-present
    /// member is a no-op.
    async fn add_track(&self, id: PlaylistId, track_id: TrackId) -> Result<()>;

    /// Remove a member and close the position gap.
    async fn remove_track(&self, id: PlaylistId, track_id: TrackId) -> Result<bool>;

    /// Move a member to a new position, shifting the others.
    async fn move_track(&self, id: PlaylistId, track_id: TrackId, position: i64) -> Result<()>;

    /// Membership edges in position order.
    async fn members(&self, id: PlaylistId) -> Result<Vec<PlaylistMember>>;

    /// Member tracks in position order, loaded in one query.
    async fn member_tracks(&self, id: PlaylistId) -> Result<Vec<Track>>;

    /// Remove every member.
    async fn clear_tracks(&self, id: PlaylistId) -> Result<()>;

    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of [`PlaylistRepository`].
pub struct SqlitePlaylistRepository {
    pool: SqlitePool,
}

impl SqlitePlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Walk the parent chain from `start`; error if it reaches `target`.
    async fn ensure_acyclic(&self, target: PlaylistId, start: Option<PlaylistId>) -> Result<()> {
        let mut cursor = start;
        while let Some(current) = cursor {
            if current == target {
                return Err(LibraryError::Conflict(format!(
                    "playlist {target} would become its own ancestor"
                )));
            }
            let row: Option<(Option<i64>,)> =
                sqlx::query_as("SELECT parent_id FROM playlists WHERE id = ?")
                    .bind(current.0)
                    .fetch_optional(&self.pool)
                    .await?;
            cursor = match row {
                Some((parent,)) => parent.map(PlaylistId),
                None => {
                    return Err(LibraryError::NotFound {
                        entity: "playlist",
                        id: current.to_string(),
                    })
                }
            };
        }
        Ok(())
    }

    async fn require(&self, id: PlaylistId) -> Result<Playlist> {
        self.find_by_id(id).await?.ok_or(LibraryError::NotFound {
            entity: "playlist",
            id: id.to_string(),
        })
    }
}

#[derive(Debug, FromRow)]
struct PlaylistRow {
    id: i64,
    name: String,
    kind: String,
    parent_id: Option<i64>,
    is_system: i64,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<PlaylistRow> for Playlist {
    type Error = LibraryError;

    fn try_from(row: PlaylistRow) -> Result<Self> {
        Ok(Playlist {
            id: PlaylistId(row.id),
            name: row.name,
            kind: PlaylistKind::from_str(&row.kind)?,
            parent_id: row.parent_id.map(PlaylistId),
            is_system: row.is_system != 0,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    playlist_id: i64,
    track_id: i64,
    position: i64,
    added_at: i64,
}

impl From<MemberRow> for PlaylistMember {
    fn from(row: MemberRow) -> Self {
        PlaylistMember {
            playlist_id: PlaylistId(row.playlist_id),
            track_id: TrackId(row.track_id),
            position: row.position,
            added_at: row.added_at,
        }
    }
}

#[async_trait]
impl PlaylistRepository for SqlitePlaylistRepository {
    async fn insert(&self, playlist: &Playlist) -> Result<PlaylistId> {
        playlist.validate()?;
        if let Some(parent_id) = playlist.parent_id {
            let parent = self.require(parent_id).await?;
            if parent.kind != PlaylistKind::Folder {
                return Err(LibraryError::Conflict(format!(
                    "parent {parent_id} is not a folder"
                )));
            }
        }
        let result = sqlx::query(
            r#"
            INSERT INTO playlists (name, kind, parent_id, is_system, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&playlist.name)
        .bind(playlist.kind.as_str())
        .bind(playlist.parent_id.map(|p| p.0))
        .bind(playlist.is_system as i64)
        .bind(&playlist.description)
        .bind(playlist.created_at)
        .bind(playlist.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LibraryError::from_write(e, "playlist insert"))?;

        Ok(PlaylistId(result.last_insert_rowid()))
    }

    async fn find_by_id(&self, id: PlaylistId) -> Result<Option<Playlist>> {
        let row: Option<PlaylistRow> = sqlx::query_as("SELECT * FROM playlists WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Playlist::try_from).transpose()
    }

    async fn update(&self, playlist: &Playlist) -> Result<()> {
        playlist.validate()?;
        let existing = self.require(playlist.id).await?;

        if existing.is_system && playlist.name != existing.name {
            return Err(LibraryError::Conflict(format!(
                "system playlist {} cannot be renamed",
                existing.name
            )));
        }
        if playlist.parent_id != existing.parent_id {
            if let Some(parent_id) = playlist.parent_id {
                let parent = self.require(parent_id).await?;
                if parent.kind != PlaylistKind::Folder {
                    return Err(LibraryError::Conflict(format!(
                        "parent {parent_id} is not a folder"
                    )));
                }
            }
            self.ensure_acyclic(playlist.id, playlist.parent_id).await?;
        }

        sqlx::query(
            r#"
            UPDATE playlists
            SET name = ?, parent_id = ?, description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&playlist.name)
        .bind(playlist.parent_id.map(|p| p.0))
        .bind(&playlist.description)
        .bind(chrono::Utc::now().timestamp())
        .bind(playlist.id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: PlaylistId) -> Result<()> {
        let playlist = self.require(id).await?;
        if playlist.is_system {
            return Err(LibraryError::Conflict(format!(
                "system playlist {} cannot be deleted",
                playlist.name
            )));
        }
        let (children,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM playlists WHERE parent_id = ?")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await?;
        if children > 0 {
            return Err(LibraryError::Conflict(format!(
                "folder {} still has {children} children",
                playlist.name
            )));
        }

        sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM playlists WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn children(&self, parent_id: Option<PlaylistId>) -> Result<Vec<Playlist>> {
        let rows: Vec<PlaylistRow> = match parent_id {
            Some(parent_id) => {
                sqlx::query_as("SELECT * FROM playlists WHERE parent_id = ? ORDER BY name")
                    .bind(parent_id.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM playlists WHERE parent_id IS NULL ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Playlist::try_from).collect()
    }

    async fn add_track(&self, id: PlaylistId, track_id: TrackId) -> Result<()> {
        let playlist = self.require(id).await?;
        if playlist.kind == PlaylistKind::Folder {
            return Err(LibraryError::Conflict(format!(
                "folder {} cannot contain tracks",
                playlist.name
            )));
        }
        let mut conn = self.pool.acquire().await?;
        tx::append_member(&mut conn, id, track_id).await?;
        Ok(())
    }

    async fn remove_track(&self, id: PlaylistId, track_id: TrackId) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        tx::remove_member(&mut conn, id, track_id).await
    }

    async fn move_track(&self, id: PlaylistId, track_id: TrackId, position: i64) -> Result<()> {
        let members = self.members(id).await?;
        let Some(current) = members.iter().position(|m| m.track_id == track_id) else {
            return Err(LibraryError::NotFound {
                entity: "playlist member",
                id: format!("{id}/{track_id}"),
            });
        };

        let mut order: Vec<TrackId> = members.iter().map(|m| m.track_id).collect();
        let moved = order.remove(current);
        let target = (position.max(0) as usize).min(order.len());
        order.insert(target, moved);

        let mut tx = self.pool.begin().await?;
        for (index, member_track) in order.iter().enumerate() {
            sqlx::query(
                "UPDATE playlist_tracks SET position = ? WHERE playlist_id = ? AND track_id = ?",
            )
            .bind(index as i64)
            .bind(id.0)
            .bind(member_track.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn members(&self, id: PlaylistId) -> Result<Vec<PlaylistMember>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            "SELECT * FROM playlist_tracks WHERE playlist_id = ? ORDER BY position",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PlaylistMember::from).collect())
    }

    async fn member_tracks(&self, id: PlaylistId) -> Result<Vec<Track>> {
        let rows: Vec<TrackRow> = sqlx::query_as(
            r#"
            SELECT t.* FROM tracks t
            JOIN playlist_tracks pt ON pt.track_id = t.id
            WHERE pt.playlist_id = ?
            ORDER BY pt.position
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Track::from).collect())
    }

    async fn clear_tracks(&self, id: PlaylistId) -> Result<()> {
        sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playlists")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::repositories::track::{SqliteTrackRepository, TrackRepository};

    async fn setup() -> (SqlitePlaylistRepository, SqliteTrackRepository) {
        let pool = create_test_pool().await.unwrap();
        (
            SqlitePlaylistRepository::new(pool.clone()),
            SqliteTrackRepository::new(pool),
        )
    }

    async fn insert_tracks(tracks: &SqliteTrackRepository, count: usize) -> Vec<TrackId> {
        let mut ids = Vec::new();
        for index in 0..count {
            ids.push(
                tracks
                    .insert(&Track::new(format!("Track {index}"), "Artist"))
                    .await
                    .unwrap(),
            );
        }
        ids
    }

    #[tokio::test]
    async fn test_insert_and_find_playlist() {
        let (playlists, _) = setup().await;
        let id = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let found = playlists.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.name, "Workout");
        assert_eq!(found.kind, PlaylistKind::Playlist);
    }

    #[tokio::test]
    async fn test_positions_stay_dense_through_mutations() {
        let (playlists, tracks) = setup().await;
        let playlist = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let ids = insert_tracks(&tracks, 4).await;

        for id in &ids {
            playlists.add_track(playlist, *id).await.unwrap();
        }
        playlists.remove_track(playlist, ids[1]).await.unwrap();

        let members = playlists.members(playlist).await.unwrap();
        let positions: Vec<i64> = members.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        let order: Vec<TrackId> = members.iter().map(|m| m.track_id).collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn test_add_track_is_idempotent() {
        let (playlists, tracks) = setup().await;
        let playlist = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let ids = insert_tracks(&tracks, 1).await;

        playlists.add_track(playlist, ids[0]).await.unwrap();
        playlists.add_track(playlist, ids[0]).await.unwrap();

        assert_eq!(playlists.members(playlist).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_move_track_renumbers() {
        let (playlists, tracks) = setup().await;
        let playlist = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let ids = insert_tracks(&tracks, 3).await;
        for id in &ids {
            playlists.add_track(playlist, *id).await.unwrap();
        }

        playlists.move_track(playlist, ids[2], 0).await.unwrap();

        let members = playlists.members(playlist).await.unwrap();
        let order: Vec<TrackId> = members.iter().map(|m| m.track_id).collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);
        let positions: Vec<i64> = members.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_folders_reject_tracks() {
        let (playlists, tracks) = setup().await;
        let folder = playlists.insert(&Playlist::new_folder("Crates")).await.unwrap();
        let ids = insert_tracks(&tracks, 1).await;
        assert!(matches!(
            playlists.add_track(folder, ids[0]).await,
            Err(LibraryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_parent_chain_stays_acyclic() {
        let (playlists, _) = setup().await;
        let a = playlists.insert(&Playlist::new_folder("A")).await.unwrap();
        let b = playlists
            .insert(&Playlist::new_folder("B").with_parent(a))
            .await
            .unwrap();

        let mut folder_a = playlists.find_by_id(a).await.unwrap().unwrap();
        folder_a.parent_id = Some(b);
        assert!(matches!(
            playlists.update(&folder_a).await,
            Err(LibraryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_system_playlist_is_protected() {
        let (playlists, _) = setup().await;
        let id = playlists
            .insert(&Playlist::new_library_collection())
            .await
            .unwrap();

        let mut system = playlists.find_by_id(id).await.unwrap().unwrap();
        system.name = "Renamed".to_string();
        assert!(playlists.update(&system).await.is_err());
        assert!(playlists.delete(id).await.is_err());
    }

    #[tokio::test]
    async fn test_rename_survives_for_regular_playlists() {
        let (playlists, _) = setup().await;
        let id = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let mut playlist = playlists.find_by_id(id).await.unwrap().unwrap();
        playlist.name = "Gym".to_string();
        playlists.update(&playlist).await.unwrap();
        assert_eq!(
            playlists.find_by_id(id).await.unwrap().unwrap().name,
            "Gym"
        );
    }

    #[tokio::test]
    async fn test_member_tracks_loads_in_order() {
        let (playlists, tracks) = setup().await;
        let playlist = playlists.insert(&Playlist::new("Workout")).await.unwrap();
        let ids = insert_tracks(&tracks, 3).await;
        for id in ids.iter().rev() {
            playlists.add_track(playlist, *id).await.unwrap();
        }

        let loaded = playlists.member_tracks(playlist).await.unwrap();
        let loaded_ids: Vec<TrackId> = loaded.iter().map(|t| t.id).collect();
        assert_eq!(loaded_ids, vec![ids[2], ids[1], ids[0]]);
    }
}
