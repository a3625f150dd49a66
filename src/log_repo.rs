use crate::models::LogRecord;
use sqlx::SqlitePool;

/// Persists `LogRecord`s transactionally: the row is visible
/// iff the HTTP request returned success. `request_id` is the primary key
/// and client-observable.
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                request_id TEXT PRIMARY KEY,
                time TEXT NOT NULL,
                public_ip TEXT,
                private_ip TEXT,
                host TEXT,
                hostname TEXT,
                prompt TEXT NOT NULL,
                attachment TEXT,
                interface TEXT NOT NULL,
                modified_prompt TEXT NOT NULL,
                has_sensitive INTEGER NOT NULL,
                entities TEXT NOT NULL,
                processing_ms INTEGER NOT NULL,
                file_blocked INTEGER NOT NULL,
                allow INTEGER NOT NULL,
                action TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One begin/commit-or-rollback transaction per request. On any error
    /// the transaction is dropped
    /// (implicit rollback) and the error propagates to the handler, which
    /// maps it to a 500 with no persisted record.
    pub async fn create(&self, rec: &LogRecord) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let entities_json = serde_json::to_string(&rec.entities).unwrap_or_else(|_| "[]".to_string());
        let attachment_json = rec.attachment.as_ref().map(|v| v.to_string());
        let action_str = rec.action.as_str();

        sqlx::query(
            r#"
            INSERT INTO logs (
                request_id, time, public_ip, private_ip, host, hostname, prompt,
                attachment, interface, modified_prompt, has_sensitive, entities,
                processing_ms, file_blocked, allow, action, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rec.request_id)
        .bind(&rec.time)
        .bind(&rec.public_ip)
        .bind(&rec.private_ip)
        .bind(&rec.host)
        .bind(&rec.hostname)
        .bind(&rec.prompt)
        .bind(&attachment_json)
        .bind(&rec.interface)
        .bind(&rec.modified_prompt)
        .bind(rec.has_sensitive)
        .bind(&entities_json)
        .bind(rec.processing_ms as i64)
        .bind(rec.file_blocked)
        .bind(rec.allow)
        .bind(action_str)
        .bind(rec.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use chrono::Utc;

    fn sample_record() -> LogRecord {
        LogRecord {
            request_id: "req-1".to_string(),
            time: "2026-07-28T10:00:00".to_string(),
            public_ip: Some("1.2.3.4".to_string()),
            private_ip: None,
            host: Some("chatgpt.com".to_string()),
            hostname: None,
            prompt: "hello".to_string(),
            attachment: None,
            interface: "llm".to_string(),
            modified_prompt: "hello".to_string(),
            has_sensitive: false,
            entities: vec![],
            processing_ms: 12,
            file_blocked: false,
            allow: true,
            action: Action::Allow,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_persists_record_visible_by_request_id() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = LogRepository::new(pool.clone());
        repo.migrate().await.unwrap();

        repo.create(&sample_record()).await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT request_id FROM logs WHERE request_id = ?")
            .bind("req-1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, "req-1");
    }

    #[tokio::test]
    async fn duplicate_request_id_fails_and_does_not_double_insert() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = LogRepository::new(pool.clone());
        repo.migrate().await.unwrap();

        repo.create(&sample_record()).await.unwrap();
        let second = repo.create(&sample_record()).await;
        assert!(second.is_err());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs WHERE request_id = ?")
            .bind("req-1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
