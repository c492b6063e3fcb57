use std::path::PathBuf;
use std::time::Duration;

use dk_types::{DockyardError, Result};
use tracing::debug;

/// Runner configuration, constructed once at process start and threaded through the pipeline.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    // Docker
    pub docker_binary: String,

    // Paths
    pub work_root: PathBuf,
    pub ledger_path: Option<PathBuf>,
    pub keep_working_dirs: bool,

    // Platform
    pub stack_id: String,
    pub storage_api_url: String,

    // Timeouts
    pub container_timeout: u64,
    pub action_timeout: u64,
    pub pull_timeout: u64,

    // Pull retry
    pub pull_max_attempts: u32,
    pub pull_backoff_base_ms: u64,
    pub pull_backoff_max_ms: u64,

    // Registries
    pub default_ecr_region: String,
    pub quay_server: String,
    pub dockerhub_server: String,

    // Output
    pub max_output_chars: usize,

    // Logging
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub log_structured: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            work_root: std::env::temp_dir().join("dockyard"),
            ledger_path: None,
            keep_working_dirs: false,
            stack_id: "localhost".to_string(),
            storage_api_url: "https://connection.keboola.com".to_string(),
            container_timeout: 3600,
            action_timeout: 60,
            pull_timeout: 3600,
            pull_max_attempts: 3,
            pull_backoff_base_ms: 10_000,
            pull_backoff_max_ms: 120_000,
            default_ecr_region: "us-east-1".to_string(),
            quay_server: "quay.io".to_string(),
            dockerhub_server: "https://index.docker.io/v1/".to_string(),
            max_output_chars: 4000,
            log_level: "info".to_string(),
            log_file: None,
            log_structured: false,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables (with dotenvy).
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (file may not exist)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = RunnerConfig {
            docker_binary: env_or("DOCKER_BINARY", || defaults.docker_binary.clone()),

            work_root: env_path_or("WORK_ROOT", || defaults.work_root.clone()),
            ledger_path: env_opt("LEDGER_PATH").map(PathBuf::from),
            keep_working_dirs: env_bool("KEEP_WORKING_DIRS", false),

            stack_id: env_or("STACK_ID", || defaults.stack_id.clone()),
            storage_api_url: env_or("STORAGE_API_URL", || defaults.storage_api_url.clone()),

            container_timeout: env_u64("CONTAINER_TIMEOUT", defaults.container_timeout),
            action_timeout: env_u64("ACTION_TIMEOUT", defaults.action_timeout),
            pull_timeout: env_u64("PULL_TIMEOUT", defaults.pull_timeout),

            pull_max_attempts: env_u32("PULL_MAX_ATTEMPTS", defaults.pull_max_attempts),
            pull_backoff_base_ms: env_u64("PULL_BACKOFF_BASE_MS", defaults.pull_backoff_base_ms),
            pull_backoff_max_ms: env_u64("PULL_BACKOFF_MAX_MS", defaults.pull_backoff_max_ms),

            default_ecr_region: env_or("DEFAULT_ECR_REGION", || {
                defaults.default_ecr_region.clone()
            }),
            quay_server: env_or("QUAY_SERVER", || defaults.quay_server.clone()),
            dockerhub_server: env_or("DOCKERHUB_SERVER", || defaults.dockerhub_server.clone()),

            max_output_chars: env_usize("MAX_OUTPUT_CHARS", defaults.max_output_chars),

            log_level: env_or("LOG_LEVEL", || defaults.log_level.clone()),
            log_file: env_opt("LOG_FILE").map(PathBuf::from),
            log_structured: env_bool("LOG_STRUCTURED", false),
        };

        config.validate()?;
        debug!(work_root = %config.work_root.display(), "Runner configuration loaded");
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.pull_max_attempts == 0 {
            return Err(DockyardError::Config(
                "PULL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.pull_backoff_max_ms < self.pull_backoff_base_ms {
            return Err(DockyardError::Config(
                "PULL_BACKOFF_MAX_MS must not be lower than PULL_BACKOFF_BASE_MS".to_string(),
            ));
        }
        if self.max_output_chars < 2 {
            return Err(DockyardError::Config(
                "MAX_OUTPUT_CHARS must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Create required directories.
    pub fn create_directories(&self) -> Result<()> {
        let mut dirs = vec![self.work_root.clone()];
        if let Some(parent) = self.ledger_path.as_ref().and_then(|p| p.parent()) {
            dirs.push(parent.to_path_buf());
        }

        for dir in &dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                DockyardError::Config(format!(
                    "Failed to create directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        Ok(())
    }

    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout)
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| default())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path_or(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default)
}
