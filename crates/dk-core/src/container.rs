use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dk_config::RunnerConfig;
use dk_types::{
    ComponentDefinition, ContainerRunResult, DockyardError, LogLevel, LogRecord, NetworkMode,
    Output, PulledImage, Result,
};
use tracing::{debug, info, warn};

use crate::mounts::{validate_mounts, MountSpec};
use crate::output_filter::OutputFilter;
use crate::process::{run_captured, ProcessRunner, ProcessSpec, StreamKind};
use crate::security::{docker_name, validate_env_name};
use crate::sink::LogSink;

/// Label carrying the job id on every container and built image.
pub const JOB_LABEL: &str = "com.dockyard.job-id";
/// Label carrying the configuration row id.
pub const ROW_LABEL: &str = "com.dockyard.row-id";

const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything `docker run` needs besides the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOptions {
    pub name: String,
    pub job_id: String,
    pub component_id: String,
    pub hostname: Option<String>,
    pub cpu_shares: u32,
    /// Memory limit, also used as the memory+swap limit.
    pub memory: String,
    pub network: NetworkMode,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerOptions {
    /// Options carrying the component's limits and the job/row labels.
    pub fn for_component(component: &ComponentDefinition, job_id: &str, row_id: Option<&str>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}-{}",
            docker_name(&component.id),
            docker_name(job_id),
            &suffix[..8]
        );

        let mut labels = BTreeMap::new();
        labels.insert(JOB_LABEL.to_string(), job_id.to_string());
        if let Some(row) = row_id {
            labels.insert(ROW_LABEL.to_string(), row.to_string());
        }

        Self {
            name,
            job_id: job_id.to_string(),
            component_id: component.id.clone(),
            hostname: None,
            cpu_shares: component.cpu_shares,
            memory: component.memory.clone(),
            network: component.network,
            env: BTreeMap::new(),
            mounts: Vec::new(),
            labels,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<MountSpec>) -> Self {
        self.mounts = mounts;
        self
    }
}

/// Arguments of `docker run` (without the binary).
///
/// Environment values never appear in the argument vector: `--env NAME` makes docker
/// copy the value from its own environment, which the caller sets on the process.
pub fn build_run_args(image: &str, options: &ContainerOptions) -> Result<Vec<String>> {
    let mut args = vec![
        "run".to_string(),
        "--name".to_string(),
        options.name.clone(),
        "--cpu-shares".to_string(),
        options.cpu_shares.to_string(),
        "--memory".to_string(),
        options.memory.clone(),
        "--memory-swap".to_string(),
        options.memory.clone(),
        "--network".to_string(),
        options.network.as_docker_flag().to_string(),
    ];

    if let Some(ref hostname) = options.hostname {
        args.push("--hostname".to_string());
        args.push(hostname.clone());
    }

    for mount in &options.mounts {
        args.push("--volume".to_string());
        args.push(mount.to_docker_arg());
    }

    for name in options.env.keys() {
        validate_env_name(name)?;
        args.push("--env".to_string());
        args.push(name.clone());
    }

    for (key, value) in &options.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(image.to_string());
    Ok(args)
}

/// Runs component containers and streams their output to a [`LogSink`].
pub struct ContainerLauncher {
    runner: Arc<dyn ProcessRunner>,
    docker: String,
    work_root: PathBuf,
    sink: Arc<dyn LogSink>,
}

impl ContainerLauncher {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &RunnerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            runner,
            docker: config.docker_binary.clone(),
            work_root: config.work_root.clone(),
            sink,
        }
    }

    /// Run `image` to completion. The container is removed afterwards in every case.
    pub async fn run(
        &self,
        image: &PulledImage,
        options: &ContainerOptions,
        timeout: Duration,
        filter: &OutputFilter,
    ) -> Result<ContainerRunResult> {
        validate_mounts(&self.work_root, &options.mounts)?;
        let args = build_run_args(&image.reference, options)?;

        let mut spec = ProcessSpec::new(&self.docker).args(args).timeout(timeout);
        for (name, value) in &options.env {
            spec = spec.env(name, value);
        }

        info!(
            container = %options.name,
            command = %filter.filter(&spec.render()),
            "Starting container"
        );

        let sink = self.sink.as_ref();
        let component = options.component_id.as_str();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = {
            let mut on_line = |kind: StreamKind, line: &str| {
                let line = filter.filter(line);
                let level = match kind {
                    StreamKind::Stdout => LogLevel::Info,
                    StreamKind::Stderr => LogLevel::Error,
                };
                sink.log(LogRecord::new(level, component, line.clone()));
                match kind {
                    StreamKind::Stdout => stdout.push(line),
                    StreamKind::Stderr => stderr.push(line),
                }
            };
            self.runner.run(&spec, &mut on_line).await
        };

        let out = match result {
            Ok(out) => out,
            Err(DockyardError::Timeout(_)) => {
                warn!(container = %options.name, timeout_secs = timeout.as_secs(), "Container timed out");
                self.terminate_job(&options.job_id).await;
                return Err(DockyardError::Timeout(format!(
                    "Running container {} exceeded the timeout of {} seconds",
                    image.reference,
                    timeout.as_secs()
                )));
            }
            Err(e) => {
                self.remove(&options.name).await;
                return Err(e);
            }
        };

        let oom_killed = self.oom_killed(&options.name).await;
        self.remove(&options.name).await;

        let stdout = stdout.join("\n");
        let stderr = stderr.join("\n");
        let process_output = if stdout.trim().is_empty() {
            stderr.clone()
        } else {
            stdout.clone()
        };

        info!(
            container = %options.name,
            exit_code = out.exit_code,
            duration_secs = out.duration.as_secs_f64(),
            "Container finished"
        );

        if oom_killed {
            return Err(DockyardError::User(format!(
                "Component out of memory (exceeded {})",
                options.memory
            )));
        }
        if !out.success() {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            let message = if detail.trim().is_empty() {
                format!("Container exited with code {}", out.exit_code)
            } else {
                filter.truncate(detail.trim())
            };
            return Err(DockyardError::Component {
                exit_code: out.exit_code,
                message,
            });
        }

        Ok(ContainerRunResult {
            exit_code: out.exit_code,
            stdout,
            stderr,
            duration: out.duration,
            output: Output {
                images: vec![image.clone()],
                config_version: None,
                process_output: filter.truncate(process_output.trim()),
                state: None,
            },
        })
    }

    /// Force-remove every container labelled with `job_id`. Returns how many were removed.
    pub async fn terminate_job(&self, job_id: &str) -> usize {
        let spec = ProcessSpec::new(&self.docker)
            .args(["ps", "-aq", "--filter"])
            .arg(format!("label={JOB_LABEL}={job_id}"))
            .timeout(CONTROL_TIMEOUT);

        let ids = match run_captured(self.runner.as_ref(), &spec).await {
            Ok(out) if out.success() => out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Ok(out) => {
                warn!(job_id, exit_code = out.exit_code, "Listing job containers failed");
                return 0;
            }
            Err(e) => {
                warn!(job_id, error = %e, "Listing job containers failed");
                return 0;
            }
        };

        for id in &ids {
            self.remove(id).await;
        }
        if !ids.is_empty() {
            info!(job_id, count = ids.len(), "Job containers terminated");
        }
        ids.len()
    }

    async fn oom_killed(&self, name: &str) -> bool {
        let spec = ProcessSpec::new(&self.docker)
            .args(["inspect", "--format", "{{.State.OOMKilled}}", name])
            .timeout(CONTROL_TIMEOUT);
        match run_captured(self.runner.as_ref(), &spec).await {
            Ok(out) if out.success() => out.stdout.trim() == "true",
            _ => false,
        }
    }

    /// `docker rm -f`. A container that is already gone is not an error.
    async fn remove(&self, name: &str) {
        let spec = ProcessSpec::new(&self.docker)
            .args(["rm", "-f", name])
            .timeout(CONTROL_TIMEOUT);
        match run_captured(self.runner.as_ref(), &spec).await {
            Ok(out) if out.success() => debug!(container = name, "Container removed"),
            Ok(out) => {
                if !out.stderr.contains("No such container") {
                    warn!(container = name, stderr = %out.stderr.trim(), "Container cleanup warning");
                }
            }
            Err(e) => warn!(container = name, error = %e, "Container cleanup failed"),
        }
    }
}
