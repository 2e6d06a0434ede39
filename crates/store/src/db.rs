//! The SQLite database behind the submission store.

use exn::ResultExt;
use msid_config::DatabaseConfig;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);
const TUNING: &str = r#"
    PRAGMA wal_autocheckpoint = 800;
    PRAGMA cache_size = -8192;
    PRAGMA temp_store = MEMORY;
"#;

/// An open, migrated submission database.
///
/// Several handles may point at the same file; batches from all of them are
/// serialised on SQLite's single writer lock.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, meta| Box::pin(async move { Self::tune(conn, meta).await }))
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open (or create) the submission database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::options(BUSY_TIMEOUT).filename(path.as_ref()).create_if_missing(true);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// Open a private in-memory database. Its contents vanish on [`close`](Self::close).
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::options(BUSY_TIMEOUT).filename(":memory:");
        // Each `:memory:` connection is its own database.
        Self::open(options, 1).await
    }

    /// Open the database described by `config`.
    pub async fn connect_with(config: &DatabaseConfig) -> Result<Self> {
        if config.is_in_memory() {
            return Self::connect_in_memory().await;
        }
        let options = Self::options(Duration::from_millis(config.busy_timeout_ms))
            .filename(&config.path)
            .create_if_missing(true);
        Self::open(options, config.max_connections).await
    }

    fn options(busy_timeout: Duration) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // How long a batch queues for the writer lock. Running out is a
            // database error, not a lost race.
            .busy_timeout(busy_timeout)
    }

    async fn tune(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(TUNING).execute(conn).await?;
        Ok(())
    }

    #[instrument("migrating submission database", skip_all)]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for outstanding connections and close the pool.
    pub async fn close(&self) {
        // Best effort; a failed optimize leaves nothing to clean up.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(!db.pool().is_closed());
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_connections_are_tuned() {
        let db = Database::connect_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("PRAGMA foreign_keys").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 1);
        let row: (i64,) = sqlx::query_as("PRAGMA wal_autocheckpoint").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 800);
        db.close().await;
    }

    #[tokio::test]
    async fn test_connect_with_file_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("msid.sqlite"),
            max_connections: 2,
            busy_timeout_ms: 500,
        };
        let db = Database::connect_with(&config).await.unwrap();
        assert!(config.path.exists());
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'submissions'")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(tables, vec!["submissions".to_string()]);
        db.close().await;
    }
}
