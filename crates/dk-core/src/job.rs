//! Job execution: configuration rows → image → input → container → output.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dk_config::RunnerConfig;
use dk_db::{Database, RunRepository, RunStart};
use dk_types::{
    ActionRequest, ComponentDefinition, ComponentFlag, ConfigurationPayload, ConfigurationSource,
    ContainerRunResult, DataFormat, DockyardError, InputFileStateList, InputTableStateList,
    JobDefinition, JobMode, JobRequest, JobResult, JobStatus, Output, ProjectContext, PulledImage,
    Result, RowOutcome, StagingMode, StorageMapping, WorkspaceBackend, WorkspaceCredentials,
};
use serde_json::{json, Value};
use tracing::{error, info, info_span, warn, Instrument};

use crate::container::{ContainerLauncher, ContainerOptions};
use crate::image::{AwsCliTokenProvider, ImagePuller, ImageResolver, RegistryTokenProvider, ResolveOptions};
use crate::mounts::WorkingDirectory;
use crate::output_filter::OutputFilter;
use crate::process::ProcessRunner;
use crate::secrets::{Encryptor, KeyScope, SecretResolver, WrapperKind};
use crate::security::docker_name;
use crate::sink::{LogSink, TracingSink};
use crate::staging::{DataLoader, StorageClient, WorkspaceManager, WorkspaceProvider};
use crate::utils::CancellationSignal;

const DATA_DIR: &str = "/data/";

/// Runs jobs and synchronous actions against one set of collaborators.
pub struct JobExecutor {
    config: RunnerConfig,
    runner: Arc<dyn ProcessRunner>,
    encryptor: Arc<dyn Encryptor>,
    storage: Arc<dyn StorageClient>,
    workspaces: Option<Arc<dyn WorkspaceProvider>>,
    tokens: Arc<dyn RegistryTokenProvider>,
    launcher: ContainerLauncher,
    ledger: Option<Arc<Database>>,
}

/// Things created for one definition that must be released afterwards.
#[derive(Default)]
struct Resources {
    dirs: Vec<WorkingDirectory>,
    workspaces: Vec<WorkspaceCredentials>,
}

/// Identity of one container run, as exposed to the component.
struct RunContext<'a> {
    job_id: &'a str,
    run_id: &'a str,
    project: &'a ProjectContext,
    config_id: Option<&'a str>,
    row_id: Option<&'a str>,
}

impl JobExecutor {
    pub fn new(
        config: RunnerConfig,
        runner: Arc<dyn ProcessRunner>,
        encryptor: Arc<dyn Encryptor>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let launcher = ContainerLauncher::new(runner.clone(), &config, Arc::new(TracingSink));
        let tokens = Arc::new(AwsCliTokenProvider::new(runner.clone()));
        Self {
            config,
            runner,
            encryptor,
            storage,
            workspaces: None,
            tokens,
            launcher,
            ledger: None,
        }
    }

    pub fn with_workspaces(mut self, provider: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspaces = Some(provider);
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn RegistryTokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.launcher = ContainerLauncher::new(self.runner.clone(), &self.config, sink);
        self
    }

    pub fn with_ledger(mut self, db: Arc<Database>) -> Self {
        self.ledger = Some(db);
        self
    }

    /// Force-remove every container of `job_id`.
    pub async fn cleanup_job(&self, job_id: &str) -> usize {
        self.launcher.terminate_job(job_id).await
    }

    /// Run every definition of `request` in order and aggregate the outcome.
    ///
    /// Errors never escape: they are filtered and reported in the returned [`JobResult`].
    pub async fn run_job(&self, request: &JobRequest, cancel: &CancellationSignal) -> JobResult {
        let span = info_span!("job", job_id = %request.job_id, component = %request.component.id);
        self.execute_job(request, cancel).instrument(span).await
    }

    async fn execute_job(&self, request: &JobRequest, cancel: &CancellationSignal) -> JobResult {
        let mut filter = OutputFilter::new(self.config.max_output_chars);
        info!(run_id = request.run_id(), mode = ?request.mode, "Job started");

        let definitions = match build_definitions(request) {
            Ok(definitions) => definitions,
            Err(e) => {
                let e = filter.redact_error(e);
                error!(error = %e, "Job configuration rejected");
                return job_result(request, JobStatus::Failed, e.to_string(), Vec::new());
            }
        };
        if definitions.is_empty() {
            warn!("No enabled configuration rows");
            return job_result(
                request,
                JobStatus::Success,
                "No enabled configuration rows".to_string(),
                Vec::new(),
            );
        }

        let mut rows = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            let span = info_span!(
                "row",
                config_id = definition.config_id.as_deref().unwrap_or(""),
                row_id = definition.row_id.as_deref().unwrap_or("")
            );
            let mut resources = Resources::default();
            let result = {
                let run = self
                    .run_definition(request, definition, &mut filter, &mut resources)
                    .instrument(span);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(DockyardError::Cancelled("Job was cancelled".to_string())),
                    result = run => result,
                }
            };

            if matches!(result, Err(DockyardError::Cancelled(_))) {
                let removed = self.launcher.terminate_job(&request.job_id).await;
                self.release(&mut resources).await;
                warn!(removed, "Job cancelled");
                rows.push(outcome(definition, None, Some("Job was cancelled".to_string())));
                return job_result(request, JobStatus::Cancelled, "Job was cancelled".to_string(), rows);
            }
            self.release(&mut resources).await;

            match result {
                Ok(output) => rows.push(outcome(definition, Some(output), None)),
                Err(e) => {
                    let e = filter.redact_error(e);
                    error!(error = %e, class = ?e.class(), label = %definition.label(), "Job definition failed");
                    rows.push(outcome(definition, None, Some(e.to_string())));
                    if !definition.continue_on_failure {
                        return job_result(request, JobStatus::Failed, e.to_string(), rows);
                    }
                    warn!(label = %definition.label(), "Row failed, continuing with the next one");
                }
            }
        }

        let failed = rows.iter().filter(|r| !r.succeeded).count();
        let (status, message) = if failed == 0 {
            (JobStatus::Success, "Job finished successfully".to_string())
        } else {
            (
                JobStatus::Warning,
                format!("{failed} of {} rows failed", rows.len()),
            )
        };
        info!(status = %status, rows = rows.len(), "Job finished");
        job_result(request, status, message, rows)
    }

    async fn run_definition(
        &self,
        request: &JobRequest,
        definition: &JobDefinition,
        filter: &mut OutputFilter,
        resources: &mut Resources,
    ) -> Result<Output> {
        let resolver = SecretResolver::new(
            self.encryptor.clone(),
            KeyScope {
                component_id: definition.component.id.clone(),
                project_id: request.project.id.clone(),
                stack_id: request.project.stack_id.clone(),
                config_id: definition.config_id.clone(),
            },
        );

        let component = decrypt_component(&definition.component, &resolver, filter)?;
        let mut configuration = decrypt_configuration(&definition.configuration, &resolver, filter)?;
        let state = resolver.decrypt_tree(&definition.state, filter)?;
        let (component_state, table_state, file_state) = split_state(&state)?;

        let context = RunContext {
            job_id: &request.job_id,
            run_id: request.run_id(),
            project: &request.project,
            config_id: definition.config_id.as_deref(),
            row_id: definition.row_id.as_deref(),
        };
        let mut env = self.container_env(&context, &component, filter);
        env.extend(oauth_env(&component, &configuration));

        let image = self.prepare_image(&component, &configuration, &request.job_id, filter).await?;

        let workdir = WorkingDirectory::new(&self.config.work_root, &request.job_id, &definition.label())?;
        resources.dirs.push(workdir.clone());
        workdir.create().await?;
        let data_dir = workdir.data_dir();

        let workspace = match workspace_backend(&component) {
            Some(backend) => {
                let workspace = self
                    .workspace_manager()?
                    .acquire(backend, &component.id, definition.config_id.as_deref())
                    .await?;
                filter.add_value(&workspace.password);
                resources.workspaces.push(workspace.clone());
                configuration.authorization.workspace = Some(workspace.to_authorization());
                env.extend(workspace.to_env());
                Some(workspace)
            }
            None => None,
        };

        if configuration.action.is_none() {
            configuration.action = Some("run".to_string());
        }
        for (key, value) in &component.image_parameters {
            configuration
                .image_parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        write_config(&data_dir, component.configuration_format, &configuration).await?;
        tokio::fs::write(
            data_dir.join("in/state.json"),
            serde_json::to_string_pretty(&component_state)?,
        )
        .await?;

        let loader = DataLoader::new(self.storage.clone(), &component, &configuration.storage, &data_dir)
            .with_config(definition.config_id.as_deref(), definition.row_id.as_deref())
            .with_workspace(workspace);
        let debug_tags = (request.mode == JobMode::Debug).then(|| archive_tags(&context, &component));
        if let Some(ref tags) = debug_tags {
            loader.store_data_archive("stage_0", tags, &resolver).await?;
        }

        let input = loader.load_input(&table_state, &file_state).await?;

        let options = ContainerOptions::for_component(&component, &request.job_id, definition.row_id.as_deref())
            .with_env(env)
            .with_mounts(workdir.mounts()?);
        let timeout = component
            .process_timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.container_timeout());

        let ledger_id = self.record_start(&context, &component, &image).await;
        let started = Instant::now();
        let run = self.launcher.run(&image, &options, timeout, filter).await;
        self.record_end(ledger_id, &run, started.elapsed(), filter).await;

        let run = match run {
            Ok(run) => run,
            Err(e) => {
                if let Some(ref tags) = debug_tags {
                    if let Err(archive_err) = loader.store_data_archive("stage_output", tags, &resolver).await {
                        warn!(error = %filter.redact_error(archive_err), "Failed to archive data directory");
                    }
                }
                return Err(e);
            }
        };

        let out_state = read_out_state(&data_dir).await?;
        let stored = loader.store_output().await?;
        loader.tag_processed_files(&input).await?;
        if let Some(ref tags) = debug_tags {
            loader.store_data_archive("stage_output", tags, &resolver).await?;
        }
        info!(
            tables = stored.tables.len(),
            files = stored.file_ids.len(),
            exit_code = run.exit_code,
            "Definition finished"
        );

        let component_state = resolver.encrypt_tree(&out_state, resolver.scope().preferred_wrapper())?;
        let mut output = run.output;
        output.config_version = definition.config_version;
        output.state = Some(json!({
            "component": component_state,
            "storage": {
                "input": {
                    "tables": input.table_state.tables,
                    "files": input.file_state.files,
                }
            }
        }));
        Ok(output)
    }

    /// Run a synchronous action and return the JSON the component printed.
    pub async fn run_action(&self, request: &ActionRequest) -> Result<Value> {
        let span = info_span!(
            "action",
            job_id = %request.job_id,
            component = %request.component.id,
            action = %request.action
        );
        let mut filter = OutputFilter::new(self.config.max_output_chars);
        let mut resources = Resources::default();
        let result = self
            .execute_action(request, &mut filter, &mut resources)
            .instrument(span)
            .await;
        self.release(&mut resources).await;
        result.map_err(|e| filter.redact_error(e))
    }

    async fn execute_action(
        &self,
        request: &ActionRequest,
        filter: &mut OutputFilter,
        resources: &mut Resources,
    ) -> Result<Value> {
        let action = request.action.as_str();
        if action == "run" || !request.component.allows_action(action) {
            return Err(DockyardError::User(format!(
                "Action \"{action}\" is not allowed for component {}",
                request.component.id
            )));
        }

        let resolver = SecretResolver::new(
            self.encryptor.clone(),
            KeyScope {
                component_id: request.component.id.clone(),
                project_id: request.project.id.clone(),
                stack_id: request.project.stack_id.clone(),
                config_id: None,
            },
        );
        let config_data = if request.component.has_flag(ComponentFlag::Encrypt) {
            resolver.encrypt_tree(&request.config_data, WrapperKind::Project)?
        } else {
            request.config_data.clone()
        };
        let config_data = resolver.decrypt_tree(&config_data, filter)?;
        let mut configuration = parse_configuration(&config_data)?;
        configuration.action = Some(action.to_string());
        configuration.storage = StorageMapping::default();

        let component = decrypt_component(&request.component, &resolver, filter)?;
        for (key, value) in &component.image_parameters {
            configuration
                .image_parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        let context = RunContext {
            job_id: &request.job_id,
            run_id: &request.job_id,
            project: &request.project,
            config_id: None,
            row_id: None,
        };
        let mut env = self.container_env(&context, &component, filter);
        env.extend(oauth_env(&component, &configuration));

        let image = self.prepare_image(&component, &configuration, &request.job_id, filter).await?;

        let label = format!("action-{}", docker_name(action));
        let workdir = WorkingDirectory::new(&self.config.work_root, &request.job_id, &label)?;
        resources.dirs.push(workdir.clone());
        workdir.create().await?;
        let data_dir = workdir.data_dir();
        write_config(&data_dir, component.configuration_format, &configuration).await?;
        tokio::fs::write(data_dir.join("in/state.json"), "{}").await?;

        let options = ContainerOptions::for_component(&component, &request.job_id, None)
            .with_env(env)
            .with_mounts(workdir.mounts()?);
        let run = self
            .launcher
            .run(&image, &options, self.config.action_timeout(), filter)
            .await?;

        serde_json::from_str(run.stdout.trim()).map_err(|e| {
            DockyardError::User(format!(
                "Decoding JSON response from component failed: {e}. Output: {}",
                run.output.process_output
            ))
        })
    }

    async fn prepare_image(
        &self,
        component: &ComponentDefinition,
        configuration: &ConfigurationPayload,
        job_id: &str,
        filter: &mut OutputFilter,
    ) -> Result<PulledImage> {
        let options = ResolveOptions {
            job_id: job_id.to_string(),
            tag_override: configuration.runtime.as_ref().and_then(|r| r.tag.clone()),
            parameters: configuration.parameters.clone(),
        };
        let spec = ImageResolver::new(&self.config, self.tokens.as_ref())
            .resolve(component, &options)
            .await?;

        if let Some(login) = spec.auth.login() {
            filter.add_value(&login.password);
        }
        if let Some(ref plan) = spec.build {
            if let Some(login) = plan.parent.auth.login() {
                filter.add_value(&login.password);
            }
            if let Some(ref login) = plan.repository_login {
                filter.add_value(&login.password);
            }
        }

        ImagePuller::new(self.runner.clone(), &self.config)
            .prepare(&spec, job_id, filter)
            .await
    }

    fn container_env(
        &self,
        context: &RunContext<'_>,
        component: &ComponentDefinition,
        filter: &mut OutputFilter,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("KBC_RUNID".to_string(), context.run_id.to_string());
        env.insert("KBC_JOBID".to_string(), context.job_id.to_string());
        env.insert("KBC_PROJECTID".to_string(), context.project.id.clone());
        env.insert("KBC_STACKID".to_string(), context.project.stack_id.clone());
        env.insert("KBC_COMPONENTID".to_string(), component.id.clone());
        env.insert("KBC_DATADIR".to_string(), DATA_DIR.to_string());
        if let Some(config_id) = context.config_id {
            env.insert("KBC_CONFIGID".to_string(), config_id.to_string());
        }
        if let Some(row_id) = context.row_id {
            env.insert("KBC_CONFIGROWID".to_string(), row_id.to_string());
        }

        let token = context.project.token.as_ref();
        if component.forward_token {
            match token {
                Some(token) => {
                    filter.add_value(&token.token);
                    env.insert("KBC_TOKEN".to_string(), token.token.clone());
                    env.insert("KBC_URL".to_string(), self.config.storage_api_url.clone());
                }
                None => warn!(component = %component.id, "Component asks for the storage token but none was provided"),
            }
        }
        if component.forward_token_details {
            env.insert("KBC_PROJECTNAME".to_string(), context.project.name.clone());
            if let Some(token) = token {
                env.insert("KBC_TOKENID".to_string(), token.id.clone());
                env.insert("KBC_TOKENDESC".to_string(), token.description.clone());
            }
        }
        env
    }

    fn workspace_manager(&self) -> Result<WorkspaceManager> {
        self.workspaces
            .clone()
            .map(WorkspaceManager::new)
            .ok_or_else(|| DockyardError::Application("No workspace provider configured".to_string()))
    }

    /// Remove working directories and ephemeral workspaces. Safe to call repeatedly.
    async fn release(&self, resources: &mut Resources) {
        for dir in resources.dirs.drain(..) {
            if self.config.keep_working_dirs {
                info!(path = %dir.root().display(), "Keeping working directory");
            } else {
                dir.remove().await;
            }
        }
        let workspaces: Vec<_> = resources.workspaces.drain(..).collect();
        if workspaces.is_empty() {
            return;
        }
        match self.workspace_manager() {
            Ok(manager) => {
                for workspace in &workspaces {
                    manager.release(workspace).await;
                }
            }
            Err(e) => warn!(error = %e, "Cannot release workspaces"),
        }
    }

    async fn record_start(
        &self,
        context: &RunContext<'_>,
        component: &ComponentDefinition,
        image: &PulledImage,
    ) -> Option<i64> {
        let db = self.ledger.as_ref()?;
        let run = RunStart {
            job_id: context.job_id,
            run_id: context.run_id,
            component_id: &component.id,
            config_id: context.config_id,
            row_id: context.row_id,
            image: Some(&image.reference),
        };
        match RunRepository::new(db).record_run_start(&run).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to record run start");
                None
            }
        }
    }

    async fn record_end(
        &self,
        id: Option<i64>,
        run: &Result<ContainerRunResult>,
        elapsed: Duration,
        filter: &OutputFilter,
    ) {
        let (Some(id), Some(db)) = (id, self.ledger.as_ref()) else {
            return;
        };
        let (status, exit_code, message) = match run {
            Ok(result) => ("success", Some(result.exit_code), None),
            Err(e) => {
                let exit_code = match e {
                    DockyardError::Component { exit_code, .. } => Some(*exit_code),
                    _ => None,
                };
                (e.status_label(), exit_code, Some(filter.filter(&e.to_string())))
            }
        };
        if let Err(e) = RunRepository::new(db)
            .record_run_end(id, status, Some(elapsed.as_secs_f64()), exit_code, message.as_deref())
            .await
        {
            warn!(error = %e, "Failed to record run end");
        }
    }
}

/// Expand a job request into the definitions to run, in order.
///
/// Rows overlay the root configuration. Disabled rows are skipped unless explicitly
/// selected through the request's row id.
pub fn build_definitions(request: &JobRequest) -> Result<Vec<JobDefinition>> {
    let component = &request.component;
    let no_rows = |config: &str| {
        request.row_id.as_ref().map_or(Ok(()), |row| {
            Err(DockyardError::User(format!(
                "Row {row} was requested but configuration {config} has no rows"
            )))
        })
    };

    match &request.configuration {
        ConfigurationSource::Inline(value) => {
            no_rows("inline")?;
            Ok(vec![definition(component, value, None, None, None, Value::Null, false)?])
        }
        ConfigurationSource::Stored(stored) if stored.rows.is_empty() => {
            no_rows(&stored.id)?;
            Ok(vec![definition(
                component,
                &stored.configuration,
                Some(stored.id.clone()),
                stored.version,
                None,
                stored.state.clone(),
                false,
            )?])
        }
        ConfigurationSource::Stored(stored) => {
            if let Some(ref row_id) = request.row_id {
                if !stored.rows.iter().any(|r| &r.id == row_id) {
                    return Err(DockyardError::User(format!(
                        "Row {row_id} not found in configuration {}",
                        stored.id
                    )));
                }
            }

            let mut definitions = Vec::new();
            for row in &stored.rows {
                let selected = request.row_id.as_deref() == Some(row.id.as_str());
                if request.row_id.is_some() && !selected {
                    continue;
                }
                if row.is_disabled && !selected {
                    info!(row_id = %row.id, "Skipping disabled row");
                    continue;
                }
                definitions.push(definition(
                    component,
                    &deep_merge(&stored.configuration, &row.configuration),
                    Some(stored.id.clone()),
                    stored.version,
                    Some(row.id.clone()),
                    row.state.clone(),
                    row.continue_on_failure,
                )?);
            }
            Ok(definitions)
        }
    }
}

fn definition(
    component: &ComponentDefinition,
    configuration: &Value,
    config_id: Option<String>,
    config_version: Option<u64>,
    row_id: Option<String>,
    state: Value,
    continue_on_failure: bool,
) -> Result<JobDefinition> {
    Ok(JobDefinition {
        component: component.clone(),
        configuration: parse_configuration(configuration)?,
        config_id,
        config_version,
        row_id,
        state,
        continue_on_failure,
    })
}

fn parse_configuration(value: &Value) -> Result<ConfigurationPayload> {
    if value.is_null() {
        return Ok(ConfigurationPayload::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| DockyardError::User(format!("Invalid configuration: {e}")))
}

/// Objects merge key by key; any other overlay value replaces the base.
fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match base_map.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}

/// Decrypt the `#` fields of the component's image section and image parameters.
fn decrypt_component(
    component: &ComponentDefinition,
    resolver: &SecretResolver,
    filter: &mut OutputFilter,
) -> Result<ComponentDefinition> {
    let tree = resolver.decrypt_tree(&serde_json::to_value(component)?, filter)?;
    Ok(serde_json::from_value(tree)?)
}

fn decrypt_configuration(
    configuration: &ConfigurationPayload,
    resolver: &SecretResolver,
    filter: &mut OutputFilter,
) -> Result<ConfigurationPayload> {
    let tree = resolver.decrypt_tree(&serde_json::to_value(configuration)?, filter)?;
    parse_configuration(&tree)
}

/// Component state plus the adaptive input marks stored under `storage.input`.
fn split_state(state: &Value) -> Result<(Value, InputTableStateList, InputFileStateList)> {
    let component = match state.get("component") {
        Some(value) if !value.is_null() => value.clone(),
        _ => json!({}),
    };
    let input = state
        .get("storage")
        .and_then(|s| s.get("input"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    let invalid = |e: serde_json::Error| DockyardError::User(format!("Invalid state: {e}"));
    let tables = serde_json::from_value(input.clone()).map_err(invalid)?;
    let files = serde_json::from_value(input).map_err(invalid)?;
    Ok((component, tables, files))
}

fn workspace_backend(component: &ComponentDefinition) -> Option<WorkspaceBackend> {
    let staging = component.staging_storage;
    [staging.input, staging.output].into_iter().find_map(|mode| match mode {
        StagingMode::Workspace(backend) => Some(backend),
        _ => None,
    })
}

fn oauth_env(component: &ComponentDefinition, configuration: &ConfigurationPayload) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if component.auth_provider.is_none() {
        return env;
    }
    let Some(api) = configuration.authorization.oauth_api.as_ref() else {
        return env;
    };
    let credentials = api.credentials.clone().unwrap_or_default();
    let fields = [
        ("KBC_OAUTH_ID", credentials.id.or_else(|| api.id.clone())),
        ("KBC_OAUTH_APP_KEY", credentials.app_key),
        ("KBC_OAUTH_APP_SECRET", credentials.app_secret),
        ("KBC_OAUTH_DATA", credentials.data),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            env.insert(name.to_string(), value);
        }
    }
    env
}

fn archive_tags(context: &RunContext<'_>, component: &ComponentDefinition) -> Vec<String> {
    let mut tags = vec![
        "debug".to_string(),
        component.id.clone(),
        format!("jobId: {}", context.job_id),
    ];
    if let Some(row_id) = context.row_id {
        tags.push(format!("rowId: {row_id}"));
    }
    tags
}

async fn write_config(
    data_dir: &Path,
    format: DataFormat,
    configuration: &ConfigurationPayload,
) -> Result<()> {
    let path = data_dir.join(format!("config.{}", format.extension()));
    tokio::fs::write(path, format.encode(configuration)?).await?;
    Ok(())
}

async fn read_out_state(data_dir: &Path) -> Result<Value> {
    let path = data_dir.join("out/state.json");
    if !tokio::fs::try_exists(&path).await? {
        return Ok(json!({}));
    }
    let text = tokio::fs::read_to_string(&path).await?;
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&text)
        .map_err(|e| DockyardError::User(format!("Invalid state file out/state.json: {e}")))
}

fn outcome(definition: &JobDefinition, output: Option<Output>, error: Option<String>) -> RowOutcome {
    RowOutcome {
        config_id: definition.config_id.clone(),
        row_id: definition.row_id.clone(),
        succeeded: error.is_none(),
        output,
        error,
    }
}

fn job_result(request: &JobRequest, status: JobStatus, message: String, rows: Vec<RowOutcome>) -> JobResult {
    JobResult {
        job_id: request.job_id.clone(),
        status,
        message,
        rows,
    }
}
