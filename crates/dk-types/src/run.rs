use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::image::PulledImage;

/// Structured output of one container run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub images: Vec<PulledImage>,
    #[serde(default)]
    pub config_version: Option<u64>,
    /// Filtered process output (stdout, or stderr if stdout is empty).
    pub process_output: String,
    /// State after a successful run: `component` holds `out/state.json` (secrets
    /// encrypted), `storage.input` the adaptive input marks.
    #[serde(default)]
    pub state: Option<Value>,
}

/// Outcome of one container process. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub output: Output,
}

impl ContainerRunResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    /// Some rows marked `continue_on_failure` failed.
    Warning,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Result of one job definition inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub config_id: Option<String>,
    pub row_id: Option<String>,
    pub succeeded: bool,
    #[serde(default)]
    pub output: Option<Output>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Aggregated result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub rows: Vec<RowOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_display() {
        assert_eq!(JobStatus::Warning.to_string(), "warning");
        assert_eq!(
            serde_json::to_value(JobStatus::Cancelled).unwrap(),
            "cancelled"
        );
    }

    #[test]
    fn run_result_success() {
        let result = ContainerRunResult {
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
            duration: Duration::from_secs(1),
            output: Output::default(),
        };
        assert!(result.succeeded());
    }
}
