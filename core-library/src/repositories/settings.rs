//! Typed key-value settings persistence.

use crate::error::{LibraryError, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// A setting value with its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    String(String),
    Bool(bool),
    Int(i64),
    Json(serde_json::Value),
}

impl SettingValue {
    fn data_type(&self) -> &'static str {
        match self {
            SettingValue::String(_) => "string",
            SettingValue::Bool(_) => "boolean",
            SettingValue::Int(_) => "integer",
            SettingValue::Json(_) => "json",
        }
    }

    fn encode(&self) -> Result<String> {
        Ok(match self {
            SettingValue::String(s) => s.clone(),
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Json(v) => {
                serde_json::to_string(v).map_err(|e| LibraryError::InvalidInput {
                    field: "value".to_string(),
                    message: e.to_string(),
                })?
            }
        })
    }

    fn decode(data_type: &str, raw: &str) -> Result<Self> {
        match data_type {
            "string" => Ok(SettingValue::String(raw.to_string())),
            "boolean" => Ok(SettingValue::Bool(matches!(raw, "true" | "1" | "yes"))),
            "integer" => raw.parse().map(SettingValue::Int).map_err(|e| {
                LibraryError::InvalidInput {
                    field: "value".to_string(),
                    message: format!("not an integer: {e}"),
                }
            }),
            "json" => serde_json::from_str(raw).map(SettingValue::Json).map_err(|e| {
                LibraryError::InvalidInput {
                    field: "value".to_string(),
                    message: format!("not valid json: {e}"),
                }
            }),
            other => Err(LibraryError::InvalidInput {
                field: "data_type".to_string(),
                message: format!("unknown data type: {other}"),
            }),
        }
    }
}

/// Typed key-value settings store.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn set(&self, key: &str, value: SettingValue) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<SettingValue>>;

    async fn delete(&self, key: &str) -> Result<bool>;
}

/// SQLite implementation of [`SettingsRepository`].
pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn set(&self, key: &str, value: SettingValue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, data_type) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, data_type = excluded.data_type
            "#,
        )
        .bind(key)
        .bind(value.encode()?)
        .bind(value.data_type())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<SettingValue>> {
        let row: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT value, data_type FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((Some(raw), data_type)) => Ok(Some(SettingValue::decode(&data_type, &raw)?)),
            Some((None, _)) | None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}
