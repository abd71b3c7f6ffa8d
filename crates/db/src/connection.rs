use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use dastyar_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Connect with the configured pool sizing. The SQLite busy timeout follows
/// the configured acquire timeout instead of a separate knob.
pub async fn connect(settings: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&settings.url, settings.max_connections, settings.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let busy_timeout_ms = timeout_secs.max(1).saturating_mul(1000);
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use dastyar_core::config::DatabaseConfig;
    use sqlx::Row;

    use super::connect;

    #[tokio::test]
    async fn pool_settings_follow_the_database_config() {
        let pool = connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 2,
        })
        .await
        .expect("connect");

        let row = sqlx::query("PRAGMA busy_timeout").fetch_one(&pool).await.expect("pragma");
        assert_eq!(row.get::<i64, _>(0), 2000);
    }
}
