use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dk_types::{DockyardError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::security::render_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A command to spawn. Arguments are passed as a vector, never through a shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
    pub current_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-escaped rendering for logs. Never executed.
    pub fn render(&self) -> String {
        render_command(&self.program, &self.args)
    }
}

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, for error classification.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim(), self.stderr.trim()),
            (false, true) => self.stdout.trim().to_string(),
            (true, _) => self.stderr.trim().to_string(),
        }
    }
}

/// Spawns commands. Output lines are handed to `on_line` as they arrive, in order per stream.
///
/// A run exceeding `spec.timeout` is killed and reported as [`DockyardError::Timeout`].
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        spec: &ProcessSpec,
        on_line: &mut (dyn for<'l> FnMut(StreamKind, &'l str) + Send),
    ) -> Result<ProcessOutput>;
}

/// Run `spec` and only collect its output.
pub async fn run_captured(runner: &dyn ProcessRunner, spec: &ProcessSpec) -> Result<ProcessOutput> {
    runner.run(spec, &mut |_, _| {}).await
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        spec: &ProcessSpec,
        on_line: &mut (dyn for<'l> FnMut(StreamKind, &'l str) + Send),
    ) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.current_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            DockyardError::Application(format!("Failed to spawn {}: {e}", spec.program))
        })?;

        // Write input to stdin
        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await.map_err(|e| {
                DockyardError::Application(format!("Failed to write to process stdin: {e}"))
            })?;
            drop(stdin);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<(StreamKind, String)>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone()));
        }
        drop(tx);

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            while let Some((kind, line)) = rx.recv().await {
                on_line(kind, &line);
                let buf = match kind {
                    StreamKind::Stdout => &mut stdout,
                    StreamKind::Stderr => &mut stderr,
                };
                buf.push_str(&line);
                buf.push('\n');
            }
            let status = child.wait().await.map_err(|e| {
                DockyardError::Application(format!("Process wait failed: {e}"))
            })?;
            Ok::<_, DockyardError>((status, stdout, stderr))
        };

        let finished = match spec.timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, collect).await;
                match outcome {
                    Ok(res) => res?,
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            warn!(program = %spec.program, error = %e, "Failed to kill timed out process");
                        }
                        return Err(DockyardError::Timeout(format!(
                            "Process exceeded the timeout of {}s",
                            limit.as_secs()
                        )));
                    }
                }
            }
            None => collect.await?,
        };

        let (status, stdout, stderr) = finished;
        let exit_code = status.code().unwrap_or(-1);
        debug!(program = %spec.program, exit_code, "Process finished");

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
            duration: start.elapsed(),
        })
    }
}

async fn pump<R>(reader: R, kind: StreamKind, tx: mpsc::UnboundedSender<(StreamKind, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send((kind, line)).is_err() {
                    break;
                }
            }
        }
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_process_and_streams_lines() {
        let spec = ProcessSpec::new("sh")
            .arg("-c")
            .arg("echo one; echo two 1>&2; echo three");

        let mut seen = Vec::new();
        let out = TokioProcessRunner
            .run(&spec, &mut |kind, line| seen.push((kind, line.to_string())))
            .await
            .unwrap();

        assert!(out.success());
        assert_eq!(out.stdout, "one\nthree\n");
        assert_eq!(out.stderr, "two\n");
        let stdout_lines: Vec<_> = seen
            .iter()
            .filter(|(k, _)| *k == StreamKind::Stdout)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(stdout_lines, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn passes_stdin_and_env() {
        let spec = ProcessSpec::new("sh")
            .args(["-c", "read line; echo \"$line-$GREETING\""])
            .env("GREETING", "hi")
            .stdin("secret\n");

        let out = run_captured(&TokioProcessRunner, &spec).await.unwrap();
        assert_eq!(out.stdout.trim(), "secret-hi");
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let spec = ProcessSpec::new("sh").args(["-c", "exit 3"]);
        let out = run_captured(&TokioProcessRunner, &spec).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let spec = ProcessSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        let err = run_captured(&TokioProcessRunner, &spec).await.unwrap_err();
        assert!(matches!(err, DockyardError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_application_error() {
        let spec = ProcessSpec::new("/nonexistent/dockyard-binary");
        let err = run_captured(&TokioProcessRunner, &spec).await.unwrap_err();
        assert!(matches!(err, DockyardError::Application(_)));
    }

    #[test]
    fn render_is_escaped() {
        let spec = ProcessSpec::new("docker").args(["run", "--env", "A=$B"]);
        assert_eq!(spec.render(), "docker run --env 'A=$B'");
    }

    #[test]
    fn combined_output() {
        let out = ProcessOutput {
            exit_code: 1,
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            duration: Duration::ZERO,
        };
        assert_eq!(out.combined(), "out\nerr");
    }
}
