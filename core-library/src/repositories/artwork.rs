//! Opaque artwork blob storage.

use crate::error::Result;
use crate::models::ArtworkVariant;
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Blob storage keyed by owning entity and size variant. The core never
/// interprets the bytes.
#[async_trait]
pub trait ArtworkRepository: Send + Sync {
    async fn store(&self, owner_id: i64, variant: ArtworkVariant, data: &[u8]) -> Result<()>;

    async fn load(&self, owner_id: i64, variant: ArtworkVariant) -> Result<Option<Vec<u8>>>;

    /// Drop every variant stored for an owner.
    async fn delete_all(&self, owner_id: i64) -> Result<u64>;
}

/// SQLite implementation of [`ArtworkRepository`].
pub struct SqliteArtworkRepository {
    pool: SqlitePool,
}

impl SqliteArtworkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtworkRepository for SqliteArtworkRepository {
    async fn store(&self, owner_id: i64, variant: ArtworkVariant, data: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artwork (owner_id, size_variant, data) VALUES (?, ?, ?)
            ON CONFLICT (owner_id, size_variant) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(owner_id)
        .bind(variant.as_str())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, owner_id: i64, variant: ArtworkVariant) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT data FROM artwork WHERE owner_id = ? AND size_variant = ?",
        )
        .bind(owner_id)
        .bind(variant.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(data,)| data))
    }

    async fn delete_all(&self, owner_id: i64) -> Result<u64> {
        let affected = sqlx::query("DELETE FROM artwork WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_store_load_round_trip() {
        let repo = SqliteArtworkRepository::new(create_test_pool().await.unwrap());
        repo.store(1, ArtworkVariant::Thumb, &[1, 2, 3]).await.unwrap();
        repo.store(1, ArtworkVariant::Large, &[4, 5]).await.unwrap();

        assert_eq!(
            repo.load(1, ArtworkVariant::Thumb).await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(repo.load(1, ArtworkVariant::Medium).await.unwrap(), None);

        // Overwrite replaces in place.
        repo.store(1, ArtworkVariant::Thumb, &[9]).await.unwrap();
        assert_eq!(
            repo.load(1, ArtworkVariant::Thumb).await.unwrap(),
            Some(vec![9])
        );

        assert_eq!(repo.delete_all(1).await.unwrap(), 2);
    }
}
