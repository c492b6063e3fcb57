use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use dk_types::{DockyardError, Result};

/// Async SQLite connection manager for the run ledger.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the ledger at `path`.
    pub async fn new(path: &Path) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| DockyardError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a new in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::new().filename(":memory:");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| DockyardError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Initialize tables and indexes.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS container_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                component_id TEXT NOT NULL,
                config_id TEXT,
                row_id TEXT,
                image TEXT,
                start_time TIMESTAMP NOT NULL,
                end_time TIMESTAMP,
                duration_seconds REAL,
                status TEXT DEFAULT 'running',
                exit_code INTEGER,
                error TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DockyardError::Database(format!("Create container_runs table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_container_runs_job
             ON container_runs(job_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DockyardError::Database(format!("Create container_runs job index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_container_runs_component_time
             ON container_runs(component_id, start_time)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DockyardError::Database(format!("Create container_runs component index: {e}"))
        })?;

        info!("Run ledger schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}
