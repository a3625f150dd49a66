use crate::models::PolicySnapshot;
use arc_swap::ArcSwap;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Read-only cache over the admin-configured policy: a background/
/// on-demand refresh swaps in a fresh `Arc<PolicySnapshot>` without
/// blocking readers on the hot path.
pub struct SettingsStore {
    snapshot: ArcSwap<PolicySnapshot>,
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { snapshot: ArcSwap::new(Arc::new(PolicySnapshot::default())), pool }
    }

    /// Create the backing table if absent. The (out-of-scope) admin
    /// settings API owns writes to this table; this crate only ever
    /// reads it.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS policy_settings (
                response_method TEXT NOT NULL,
                service_filters TEXT NOT NULL,
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current cached snapshot, without touching the database.
    pub fn current(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }

    /// Re-read the policy row from the database and swap in the new
    /// snapshot. On any failure, default to `{monitored = true,
    /// response_method = mask}` — this falls out naturally from
    /// `PolicySnapshot::default()`, which is what remains cached when
    /// refresh fails.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let row = sqlx::query_as::<_, PolicyRow>(
            "SELECT response_method, service_filters, version FROM policy_settings ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            self.snapshot.store(Arc::new(PolicySnapshot::default()));
            return Ok(());
        };

        let response_method = match row.response_method.as_str() {
            "allow" => crate::models::ResponseMethod::Allow,
            "block" => crate::models::ResponseMethod::Block,
            _ => crate::models::ResponseMethod::Mask,
        };
        let service_filters = serde_json::from_str(&row.service_filters).unwrap_or_default();

        self.snapshot.store(Arc::new(PolicySnapshot {
            response_method,
            service_filters,
            version: row.version,
        }));

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    response_method: String,
    service_filters: String,
    version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_policy_table_row_defaults_on_refresh_failure() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = SettingsStore::new(pool);
        // No `policy_settings` table exists in this bare pool, so the
        // query itself errors and `current()` must still return the
        // built-in default rather than panicking.
        assert!(store.refresh().await.is_err());
        let snapshot = store.current();
        assert_eq!(snapshot.response_method, crate::models::ResponseMethod::Mask);
    }

    #[tokio::test]
    async fn refresh_picks_up_latest_version() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE policy_settings (response_method TEXT, service_filters TEXT, version INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO policy_settings VALUES ('block', '{}', 1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO policy_settings VALUES ('allow', '{}', 2)")
            .execute(&pool)
            .await
            .unwrap();

        let store = SettingsStore::new(pool);
        store.refresh().await.unwrap();
        assert_eq!(store.current().response_method, crate::models::ResponseMethod::Allow);
        assert_eq!(store.current().version, 2);
    }
}
