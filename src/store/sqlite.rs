//! SQLite progress repository.
//!
//! One row per player holding the whole aggregate as JSON, keyed by the
//! lower-cased username.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::ProgressRepository;
use crate::error::StoreError;
use crate::quest::state::QuestProgressData;

pub struct SqliteProgressRepository {
    pool: SqlitePool,
}

impl SqliteProgressRepository {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quest_progress (
                username TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                progress_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Quest progress migrations complete");
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for SqliteProgressRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<QuestProgressData>, StoreError> {
        let row = sqlx::query("SELECT progress_json FROM quest_progress WHERE username = ?")
            .bind(username.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("progress_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, data: &QuestProgressData) -> Result<(), StoreError> {
        let json = serde_json::to_string(data)?;

        sqlx::query(
            r#"INSERT INTO quest_progress (username, display_name, progress_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(username) DO UPDATE SET
                display_name = excluded.display_name,
                progress_json = excluded.progress_json,
                updated_at = excluded.updated_at"#,
        )
        .bind(data.username.to_lowercase())
        .bind(&data.username)
        .bind(json)
        .bind(data.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_find() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", temp_dir.path().join("quests.db").display());
        let repo = SqliteProgressRepository::new(&url).await.unwrap();

        assert!(repo.find_by_username("erin").await.unwrap().is_none());

        let mut data = QuestProgressData::new("Erin");
        data.record_completion("intro", Utc::now());
        data.record_failure("escort", Some("Merchant died".to_string()), Utc::now());
        repo.save(&data).await.unwrap();

        data.record_completion("intro", Utc::now());
        repo.save(&data).await.unwrap();

        let loaded = repo.find_by_username("ERIN").await.unwrap().unwrap();
        assert_eq!(loaded.username, "Erin");
        assert_eq!(loaded.completed_quests.len(), 1);
        assert_eq!(loaded.completed_quests[0].completion_count, 2);
        assert_eq!(loaded.failed_quests[0].reason.as_deref(), Some("Merchant died"));
    }
}
