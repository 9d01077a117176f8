use crate::application::ports::MutationLog;
use crate::domain::entities::{MutationDraft, MutationRecord};
use crate::infrastructure::database::ConnectionPool;
use crate::shared::error::{Result, SyncError};
use async_trait::async_trait;

/// SQLite-backed mutation log. Survives process restarts; insertion order is
/// the autoincrement rowid order.
pub struct SqliteMutationLog {
    pool: ConnectionPool,
}

impl SqliteMutationLog {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mutation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                method TEXT NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                body TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    fn map_db_error(err: sqlx::Error) -> SyncError {
        if let sqlx::Error::Database(ref db) = err {
            // SQLITE_FULL
            if db.code().as_deref() == Some("13") {
                return SyncError::StorageQuota(
                    "Local storage is full; the change could not be queued".to_string(),
                );
            }
        }
        SyncError::from(err)
    }
}

#[async_trait]
impl MutationLog for SqliteMutationLog {
    async fn enqueue(&self, draft: MutationDraft) -> Result<MutationRecord> {
        let headers = draft.headers_json()?;
        let created_at = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO mutation_log (url, method, headers, body, attempts, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
        )
        .bind(&draft.url)
        .bind(&draft.method)
        .bind(&headers)
        .bind(&draft.body)
        .bind(created_at)
        .execute(self.pool.get_pool())
        .await
        .map_err(Self::map_db_error)?;

        Ok(MutationRecord {
            id: result.last_insert_rowid(),
            url: draft.url,
            method: draft.method,
            headers,
            body: draft.body,
            attempts: 0,
            created_at,
        })
    }

    async fn list_all(&self) -> Result<Vec<MutationRecord>> {
        let records = sqlx::query_as::<_, MutationRecord>(
            "SELECT * FROM mutation_log ORDER BY id ASC",
        )
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(records)
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM mutation_log WHERE id = ?1")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn record_attempt(&self, id: i64) -> Result<u32> {
        sqlx::query("UPDATE mutation_log SET attempts = attempts + 1 WHERE id = ?1")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        let attempts: i32 =
            sqlx::query_scalar("SELECT attempts FROM mutation_log WHERE id = ?1")
                .bind(id)
                .fetch_one(self.pool.get_pool())
                .await?;
        Ok(attempts as u32)
    }
}
