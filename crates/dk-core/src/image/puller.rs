use std::sync::Arc;
use std::time::Duration;

use dk_config::RunnerConfig;
use dk_types::{DockyardError, ImageSpecification, PulledImage, RegistryLogin, Result};
use tracing::{debug, info, warn};

use super::builder::ImageBuilder;
use crate::output_filter::OutputFilter;
use crate::process::{run_captured, ProcessOutput, ProcessRunner, ProcessSpec};
use crate::utils::retry::{with_retry, RetryConfig};

/// Registry responses meaning the credentials (or their absence) were rejected.
const AUTH_DENIED_MARKERS: &[&str] = &[
    "403 Forbidden",
    "unauthorized: incorrect username or password",
    "unauthorized: authentication required",
    "no basic auth credentials",
    "denied: requested access",
    "pull access denied",
];

pub fn is_auth_denied(output: &str) -> bool {
    AUTH_DENIED_MARKERS.iter().any(|m| output.contains(m))
}

/// Pulls images through the docker CLI with bounded retry.
///
/// Every attempt runs against its own throw-away `--config` directory, so concurrent
/// jobs on one host never share a login session.
pub struct ImagePuller {
    runner: Arc<dyn ProcessRunner>,
    docker: String,
    retry: RetryConfig,
    attempt_timeout: Duration,
}

impl ImagePuller {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &RunnerConfig) -> Self {
        Self {
            runner,
            docker: config.docker_binary.clone(),
            retry: RetryConfig::for_pull(config),
            attempt_timeout: config.pull_timeout(),
        }
    }

    pub(crate) fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    pub(crate) fn docker(&self) -> &str {
        &self.docker
    }

    pub(crate) fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Make the image available locally: build plans are built, everything else pulled.
    pub async fn prepare(
        &self,
        spec: &ImageSpecification,
        job_id: &str,
        filter: &OutputFilter,
    ) -> Result<PulledImage> {
        match spec.build {
            Some(ref plan) => ImageBuilder::new(self).build(plan, job_id, filter).await,
            None => self.pull(spec, filter).await,
        }
    }

    /// Pull `spec.reference`, retrying transient failures.
    pub async fn pull(&self, spec: &ImageSpecification, filter: &OutputFilter) -> Result<PulledImage> {
        let reference = spec.reference.as_str();
        info!(image = %reference, kind = ?spec.kind, "Pulling image");

        let name = format!("Pull of {reference}");
        with_retry(&self.retry, &name, |attempt| {
            self.pull_attempt(spec, attempt, filter)
        })
        .await
        .map_err(|e| match e {
            DockyardError::Transient(msg) => DockyardError::Application(msg),
            other => other,
        })?;

        let pulled = self.inspect(reference).await;
        info!(
            image = %reference,
            image_id = pulled.image_id.as_deref().unwrap_or("unknown"),
            digests = ?pulled.digests,
            "Image pulled"
        );
        Ok(pulled)
    }

    /// login → pull → logout. Logout runs exactly once whenever login succeeded.
    async fn pull_attempt(
        &self,
        spec: &ImageSpecification,
        attempt: u32,
        filter: &OutputFilter,
    ) -> Result<()> {
        let config_dir = tempfile::tempdir()?;
        let config_path = config_dir.path().to_string_lossy().to_string();
        debug!(image = %spec.reference, attempt, "Pull attempt");

        let login = spec.auth.login();
        if let Some(login) = login {
            self.login(&config_path, login, filter).await?;
        }

        let result = self.docker_pull(&config_path, &spec.reference, filter).await;

        if let Some(login) = login {
            self.logout(&config_path, &login.server).await;
        }
        result
    }

    pub(crate) async fn login(
        &self,
        config_path: &str,
        login: &RegistryLogin,
        filter: &OutputFilter,
    ) -> Result<()> {
        let spec = ProcessSpec::new(&self.docker)
            .args(["--config", config_path, "login", "--username"])
            .arg(&login.username)
            .arg("--password-stdin")
            .arg(&login.server)
            .stdin(login.password.clone())
            .timeout(self.attempt_timeout);

        let out = match self.run(&spec).await {
            Ok(out) => out,
            Err(DockyardError::Timeout(msg)) => {
                return Err(DockyardError::Transient(format!(
                    "Login to {} timed out: {msg}",
                    login.server
                )))
            }
            Err(e) => return Err(e),
        };
        if out.success() {
            debug!(server = %login.server, "Registry login succeeded");
            return Ok(());
        }

        let combined = out.combined();
        let message = filter.filter(&combined);
        if is_auth_denied(&combined) {
            Err(DockyardError::LoginFailed(format!(
                "Login to {} failed: {message}",
                login.server
            )))
        } else {
            Err(DockyardError::Transient(format!(
                "Login to {} failed (exit code {}): {message}",
                login.server, out.exit_code
            )))
        }
    }

    pub(crate) async fn logout(&self, config_path: &str, server: &str) {
        let spec = ProcessSpec::new(&self.docker)
            .args(["--config", config_path, "logout", server])
            .timeout(self.attempt_timeout);
        match self.run(&spec).await {
            Ok(out) if out.success() => debug!(server, "Registry logout succeeded"),
            Ok(out) => warn!(server, exit_code = out.exit_code, "Registry logout failed"),
            Err(e) => warn!(server, error = %e, "Registry logout failed"),
        }
    }

    async fn docker_pull(&self, config_path: &str, reference: &str, filter: &OutputFilter) -> Result<()> {
        let spec = ProcessSpec::new(&self.docker)
            .args(["--config", config_path, "pull", reference])
            .timeout(self.attempt_timeout);

        let out = match self.run(&spec).await {
            Ok(out) => out,
            Err(DockyardError::Timeout(msg)) => {
                return Err(DockyardError::Transient(format!(
                    "Pulling image {reference} timed out: {msg}"
                )))
            }
            Err(e) => return Err(e),
        };
        if out.success() {
            return Ok(());
        }

        let combined = out.combined();
        let message = filter.filter(&combined);
        if is_auth_denied(&combined) {
            Err(DockyardError::LoginFailed(format!(
                "Access to image {reference} denied: {message}"
            )))
        } else {
            Err(DockyardError::Transient(format!(
                "Failed to pull image {reference} (exit code {}): {message}",
                out.exit_code
            )))
        }
    }

    /// Image id and repo digests. Failures only cost the metadata.
    pub(crate) async fn inspect(&self, reference: &str) -> PulledImage {
        let spec = ProcessSpec::new(&self.docker)
            .args([
                "image",
                "inspect",
                "--format",
                "{{.Id}} {{json .RepoDigests}}",
                reference,
            ])
            .timeout(Duration::from_secs(60));

        let mut pulled = PulledImage {
            reference: reference.to_string(),
            image_id: None,
            digests: Vec::new(),
        };
        match self.run(&spec).await {
            Ok(out) if out.success() => {
                let line = out.stdout.trim();
                let (id, digests) = line.split_once(' ').unwrap_or((line, "[]"));
                if !id.is_empty() {
                    pulled.image_id = Some(id.to_string());
                }
                pulled.digests = serde_json::from_str(digests).unwrap_or_default();
            }
            Ok(out) => warn!(image = %reference, exit_code = out.exit_code, "Image inspect failed"),
            Err(e) => warn!(image = %reference, error = %e, "Image inspect failed"),
        }
        pulled
    }

    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput> {
        run_captured(self.runner.as_ref(), spec).await
    }
}
