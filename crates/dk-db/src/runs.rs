use chrono::Utc;
use serde::Serialize;

use dk_types::{DockyardError, Result};

use crate::connection::Database;

/// Identity of a container run being recorded.
#[derive(Debug, Clone, Default)]
pub struct RunStart<'a> {
    pub job_id: &'a str,
    pub run_id: &'a str,
    pub component_id: &'a str,
    pub config_id: Option<&'a str>,
    pub row_id: Option<&'a str>,
    pub image: Option<&'a str>,
}

/// One row of the run ledger.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: i64,
    pub job_id: String,
    pub run_id: String,
    pub component_id: String,
    pub config_id: Option<String>,
    pub row_id: Option<String>,
    pub image: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub status: String,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

/// Aggregated run statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub timeouts: i64,
    pub avg_duration: f64,
    pub max_duration: f64,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_runs: Option<i64>,
    successful_runs: Option<i64>,
    failed_runs: Option<i64>,
    timeouts: Option<i64>,
    avg_duration: Option<f64>,
    max_duration: Option<f64>,
}

const SELECT_RUN: &str = "SELECT id, job_id, run_id, component_id, config_id, row_id, image,
        start_time, end_time, duration_seconds, status, exit_code, error
     FROM container_runs";

/// Repository for the container run ledger.
pub struct RunRepository<'a> {
    db: &'a Database,
}

impl<'a> RunRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record a container run start. Returns the ledger ID.
    pub async fn record_run_start(&self, run: &RunStart<'_>) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO container_runs
                (job_id, run_id, component_id, config_id, row_id, image, start_time, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'running')",
        )
        .bind(run.job_id)
        .bind(run.run_id)
        .bind(run.component_id)
        .bind(run.config_id)
        .bind(run.row_id)
        .bind(run.image)
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(|e| DockyardError::Database(format!("Record run start: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    /// Record a container run end.
    pub async fn record_run_end(
        &self,
        id: i64,
        status: &str,
        duration_seconds: Option<f64>,
        exit_code: Option<i32>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE container_runs
             SET end_time = ?, duration_seconds = ?, status = ?, exit_code = ?, error = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(duration_seconds)
        .bind(status)
        .bind(exit_code)
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| DockyardError::Database(format!("Record run end: {e}")))?;

        Ok(())
    }

    pub async fn get_run(&self, id: i64) -> Result<Option<RunRecord>> {
        let query = format!("{SELECT_RUN} WHERE id = ?");
        sqlx::query_as::<_, RunRecord>(&query)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| DockyardError::Database(format!("Get run: {e}")))
    }

    /// All runs of one job, oldest first.
    pub async fn get_job_runs(&self, job_id: &str) -> Result<Vec<RunRecord>> {
        let query = format!("{SELECT_RUN} WHERE job_id = ? ORDER BY id");
        sqlx::query_as::<_, RunRecord>(&query)
            .bind(job_id)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| DockyardError::Database(format!("Get job runs: {e}")))
    }

    /// Run statistics for the last `days` days, optionally for one component.
    pub async fn get_run_stats(&self, component_id: Option<&str>, days: i64) -> Result<RunStats> {
        let mut query = String::from(
            "SELECT
                COUNT(*) as total_runs,
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) as successful_runs,
                SUM(CASE WHEN status IN ('error', 'user_error') THEN 1 ELSE 0 END) as failed_runs,
                SUM(CASE WHEN status = 'timeout' THEN 1 ELSE 0 END) as timeouts,
                AVG(duration_seconds) as avg_duration,
                MAX(duration_seconds) as max_duration
             FROM container_runs
             WHERE start_time > datetime('now', '-' || ? || ' days')",
        );
        if component_id.is_some() {
            query.push_str(" AND component_id = ?");
        }

        let mut q = sqlx::query_as::<_, StatsRow>(&query).bind(days);
        if let Some(component_id) = component_id {
            q = q.bind(component_id);
        }
        let row = q
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| DockyardError::Database(format!("Get run stats: {e}")))?;

        Ok(RunStats {
            total_runs: row.total_runs.unwrap_or(0),
            successful_runs: row.successful_runs.unwrap_or(0),
            failed_runs: row.failed_runs.unwrap_or(0),
            timeouts: row.timeouts.unwrap_or(0),
            avg_duration: row.avg_duration.unwrap_or(0.0),
            max_duration: row.max_duration.unwrap_or(0.0),
        })
    }
}
