mod encryptor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dk_config::RunnerConfig;
use dk_core::{
    init_logging, AwsCliTokenProvider, CancellationSignal, ImagePuller, ImageResolver, JobExecutor,
    LocalStorage, OutputFilter, ProcessRunner, ResolveOptions, TokioProcessRunner,
};
use dk_db::{Database, RunRepository};
use dk_types::{ActionRequest, ComponentDefinition, ErrorClass, JobRequest, JobStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::encryptor::LocalEncryptor;

#[derive(Parser)]
#[command(name = "dockyard", about = "Dockyard - component container runner", version)]
struct Cli {
    /// Local project directory standing in for the storage service
    #[arg(long, global = true, default_value = "./storage")]
    storage_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job described by a JSON or YAML file
    Run {
        #[arg(long)]
        job: PathBuf,
    },
    /// Invoke a synchronous action and print its JSON response
    Action {
        #[arg(long)]
        request: PathBuf,
    },
    /// Resolve and pull (or build) the image of a component
    Pull {
        #[arg(long)]
        component: PathBuf,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Remove leftover containers of a job
    Cleanup {
        #[arg(long)]
        job_id: String,
    },
    /// Show container run statistics from the ledger
    Stats {
        #[arg(long)]
        component: Option<String>,
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load config
    let config = RunnerConfig::load().context("Failed to load configuration")?;

    // 2. Init logging
    init_logging(&config.log_level, config.log_file.as_deref(), config.log_structured);
    config
        .create_directories()
        .context("Failed to create working directories")?;

    match cli.command {
        Commands::Run { job } => run(config, &cli.storage_dir, &job).await,
        Commands::Action { request } => action(config, &cli.storage_dir, &request).await,
        Commands::Pull { component, tag } => pull(config, &component, tag).await,
        Commands::Cleanup { job_id } => cleanup(config, &cli.storage_dir, &job_id).await,
        Commands::Stats { component, days } => stats(config, component.as_deref(), days).await,
    }
}

async fn run(config: RunnerConfig, storage_dir: &Path, job: &Path) -> anyhow::Result<()> {
    let request: JobRequest = read_document(job)?;
    let ledger = open_ledger(&config).await?;
    let executor = executor(config, storage_dir, ledger.clone());

    let cancel = CancellationSignal::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { cancel.cancel_on_ctrl_c().await })
    };

    info!(job_id = %request.job_id, component = %request.component.id, "Starting job");
    let result = executor.run_job(&request, &cancel).await;
    watcher.abort();
    if let Some(db) = ledger {
        db.close().await;
    }

    print_json(&result)?;
    match result.status {
        JobStatus::Success | JobStatus::Warning => Ok(()),
        JobStatus::Failed => std::process::exit(1),
        JobStatus::Cancelled => std::process::exit(130),
    }
}

async fn action(config: RunnerConfig, storage_dir: &Path, request: &Path) -> anyhow::Result<()> {
    let request: ActionRequest = read_document(request)?;
    let executor = executor(config, storage_dir, None);

    match executor.run_action(&request).await {
        Ok(response) => print_json(&response),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(match e.class() {
                ErrorClass::User => 1,
                ErrorClass::Application => 2,
            })
        }
    }
}

async fn pull(config: RunnerConfig, component: &Path, tag: Option<String>) -> anyhow::Result<()> {
    let component: ComponentDefinition = read_document(component)?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let tokens = AwsCliTokenProvider::new(runner.clone());
    let options = ResolveOptions {
        job_id: "manual-pull".to_string(),
        tag_override: tag,
        ..Default::default()
    };

    let spec = ImageResolver::new(&config, &tokens)
        .resolve(&component, &options)
        .await
        .context("Failed to resolve image")?;
    let mut filter = OutputFilter::new(config.max_output_chars);
    if let Some(login) = spec.auth.login() {
        filter.add_value(&login.password);
    }
    let pulled = ImagePuller::new(runner, &config)
        .prepare(&spec, &options.job_id, &filter)
        .await
        .context("Failed to pull image")?;
    print_json(&pulled)
}

async fn cleanup(config: RunnerConfig, storage_dir: &Path, job_id: &str) -> anyhow::Result<()> {
    let executor = executor(config, storage_dir, None);
    let removed = executor.cleanup_job(job_id).await;
    info!(job_id, removed, "Cleanup finished");
    Ok(())
}

async fn stats(config: RunnerConfig, component: Option<&str>, days: i64) -> anyhow::Result<()> {
    let db = open_ledger(&config)
        .await?
        .context("LEDGER_PATH is not set")?;
    let stats = RunRepository::new(&db)
        .get_run_stats(component, days)
        .await
        .context("Failed to read run statistics")?;
    db.close().await;
    print_json(&stats)
}

fn executor(config: RunnerConfig, storage_dir: &Path, ledger: Option<Arc<Database>>) -> JobExecutor {
    let storage = Arc::new(LocalStorage::new(storage_dir));
    let executor = JobExecutor::new(
        config,
        Arc::new(TokioProcessRunner),
        Arc::new(LocalEncryptor),
        storage.clone(),
    )
    .with_workspaces(storage);
    match ledger {
        Some(db) => executor.with_ledger(db),
        None => executor,
    }
}

async fn open_ledger(config: &RunnerConfig) -> anyhow::Result<Option<Arc<Database>>> {
    let Some(ref path) = config.ledger_path else {
        return Ok(None);
    };
    let db = Database::new(path)
        .await
        .context("Failed to connect to database")?;
    db.initialize()
        .await
        .context("Failed to initialize database schema")?;
    Ok(Some(Arc::new(db)))
}

/// Parse a JSON or YAML document, chosen by file extension.
fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );
    if yaml {
        serde_yaml::from_str(&text).with_context(|| format!("Invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
