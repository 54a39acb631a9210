use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use opsdesk_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Open a pool per application config.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Open a pool with explicit sizing, used directly by tests.
///
/// Every connection gets the same PRAGMA setup: foreign keys enforced, WAL
/// journaling, and a busy timeout so concurrent tool reads don't surface
/// immediate SQLITE_BUSY errors to the gateway.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use opsdesk_core::config::DatabaseConfig;

    use super::connect;

    #[tokio::test]
    async fn foreign_keys_are_enforced_on_every_connection() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 30,
        };
        let pool = connect(&config).await.expect("connect");
        crate::migrations::run_pending(&pool).await.expect("migrate");

        // work_orders.project_id references projects(id); an orphan insert
        // must be rejected at the connection level.
        let orphan = sqlx::query(
            "INSERT INTO work_orders (project_id, quantity) VALUES (999, 1)",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err());
    }
}
