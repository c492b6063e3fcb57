//! Data staging between the storage service and a component's `/data` directory.

pub mod archive;
pub mod local;
pub mod reader;
pub mod workspace;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dk_types::{
    CloudLocation, ComponentDefinition, DataFormat, FileInfo, FileUpload, InputFileStateList,
    InputTableMapping, InputTableStateList, Result, StagingMode, StorageMapping, TableInfo,
    TableUpload, WhereOperator, WorkspaceCredentials, WorkspaceOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use local::LocalStorage;
pub use workspace::WorkspaceManager;

/// Selection of files by tags and/or query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    pub tags: Vec<String>,
    pub query: Option<String>,
    pub limit: Option<u64>,
    /// Only files with a greater id.
    pub since_id: Option<u64>,
}

/// Where the data of an output table comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    File(PathBuf),
    Workspace { workspace_id: String, table: String },
}

/// Remote storage service. Implementations report failures as `Storage` errors.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn get_table(&self, table_id: &str) -> Result<Option<TableInfo>>;

    /// Export a table as CSV into `destination`.
    async fn export_table(
        &self,
        mapping: &InputTableMapping,
        changed_since: Option<&str>,
        destination: &Path,
    ) -> Result<TableInfo>;

    /// Export a table to cloud staging storage (`s3` or `abs`).
    async fn export_table_to_cloud(
        &self,
        mapping: &InputTableMapping,
        changed_since: Option<&str>,
        staging: StagingMode,
    ) -> Result<(TableInfo, CloudLocation)>;

    /// Load tables into a workspace; returns the loaded tables in mapping order.
    async fn load_to_workspace(
        &self,
        workspace_id: &str,
        mappings: &[InputTableMapping],
    ) -> Result<Vec<TableInfo>>;

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<FileInfo>>;

    async fn download_file(&self, file: &FileInfo, destination: &Path) -> Result<()>;

    async fn bucket_exists(&self, bucket_id: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket_id: &str) -> Result<()>;

    async fn delete_table_rows(
        &self,
        table_id: &str,
        column: &str,
        values: &[String],
        operator: WhereOperator,
    ) -> Result<()>;

    /// Create a new table with the upload's primary key.
    async fn create_table(&self, upload: &TableUpload, source: &TableSource) -> Result<TableInfo>;

    /// Append (`incremental`) or fully replace the data of an existing table.
    async fn write_table(&self, upload: &TableUpload, source: &TableSource) -> Result<TableInfo>;

    async fn upload_file(&self, path: &Path, options: &FileUpload) -> Result<u64>;

    async fn add_file_tag(&self, file_id: u64, tag: &str) -> Result<()>;
}

/// Provisions workspaces.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn create(&self, options: &WorkspaceOptions) -> Result<WorkspaceCredentials>;

    /// Persistent workspaces of a configuration, oldest first.
    async fn list(&self, component_id: &str, config_id: &str) -> Result<Vec<WorkspaceCredentials>>;

    async fn delete(&self, workspace_id: &str) -> Result<()>;
}

/// Input files waiting for their processed tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTags {
    pub file_id: u64,
    pub tags: Vec<String>,
}

/// Outcome of the input phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputResult {
    pub tables: Vec<TableInfo>,
    pub files: Vec<FileInfo>,
    pub table_state: InputTableStateList,
    pub file_state: InputFileStateList,
    pub pending_tags: Vec<PendingTags>,
}

/// Outcome of the output phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputResult {
    pub tables: Vec<TableInfo>,
    pub file_ids: Vec<u64>,
}

/// Moves data of one job definition in and out of its working directory.
pub struct DataLoader {
    storage: Arc<dyn StorageClient>,
    component: ComponentDefinition,
    mapping: StorageMapping,
    data_dir: PathBuf,
    config_id: Option<String>,
    row_id: Option<String>,
    workspace: Option<WorkspaceCredentials>,
}

impl DataLoader {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        component: &ComponentDefinition,
        mapping: &StorageMapping,
        data_dir: &Path,
    ) -> Self {
        Self {
            storage,
            component: component.clone(),
            mapping: mapping.clone(),
            data_dir: data_dir.to_path_buf(),
            config_id: None,
            row_id: None,
            workspace: None,
        }
    }

    pub fn with_config(mut self, config_id: Option<&str>, row_id: Option<&str>) -> Self {
        self.config_id = config_id.map(str::to_string);
        self.row_id = row_id.map(str::to_string);
        self
    }

    pub fn with_workspace(mut self, workspace: Option<WorkspaceCredentials>) -> Self {
        self.workspace = workspace;
        self
    }

    fn format(&self) -> DataFormat {
        self.component.configuration_format
    }
}

/// Path of the sidecar manifest for `path`.
pub fn manifest_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".manifest");
    PathBuf::from(name)
}

pub(crate) async fn write_manifest<T: Serialize>(
    path: &Path,
    format: DataFormat,
    manifest: &T,
) -> Result<()> {
    let text = format.encode(manifest)?;
    tokio::fs::write(manifest_path(path), text).await?;
    Ok(())
}

/// Read the sidecar manifest of `path`, if the component wrote one.
pub(crate) async fn read_manifest<T: DeserializeOwned>(
    path: &Path,
    format: DataFormat,
) -> Result<Option<T>> {
    let manifest = manifest_path(path);
    if !tokio::fs::try_exists(&manifest).await? {
        return Ok(None);
    }
    let text = tokio::fs::read_to_string(&manifest).await?;
    format.decode(&text).map(Some).map_err(|e| {
        dk_types::DockyardError::User(format!(
            "Failed to parse manifest {}: {e}",
            manifest.display()
        ))
    })
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory doubles for storage and workspaces.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use dk_types::DockyardError;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum StorageCall {
        CreateBucket(String),
        DeleteRows(String, String),
        CreateTable(TableUpload),
        WriteTable(TableUpload),
        UploadFile(String, FileUpload),
        AddTag(u64, String),
        LoadWorkspace(String, Vec<String>),
    }

    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        pub(crate) tables: Mutex<BTreeMap<String, (TableInfo, String)>>,
        pub(crate) buckets: Mutex<Vec<String>>,
        pub(crate) files: Mutex<Vec<(FileInfo, Vec<u8>)>>,
        pub(crate) calls: Mutex<Vec<StorageCall>>,
    }

    impl MemoryStorage {
        pub(crate) fn with_table(self, id: &str, csv: &str) -> Self {
            let (bucket, name) = id.rsplit_once('.').unwrap();
            let info = TableInfo {
                id: id.to_string(),
                name: name.to_string(),
                last_import_date: Some("2024-03-01T10:00:00+00:00".to_string()),
                columns: csv.lines().next().unwrap_or("").split(',').map(str::to_string).collect(),
                ..Default::default()
            };
            self.tables.lock().unwrap().insert(id.to_string(), (info, csv.to_string()));
            self.buckets.lock().unwrap().push(bucket.to_string());
            self
        }

        pub(crate) fn with_file(self, id: u64, name: &str, tags: &[&str], body: &str) -> Self {
            let info = FileInfo {
                id,
                name: name.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                size_bytes: body.len() as u64,
                ..Default::default()
            };
            self.files.lock().unwrap().push((info, body.as_bytes().to_vec()));
            self
        }

        pub(crate) fn calls(&self) -> Vec<StorageCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: StorageCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn table(&self, table_id: &str) -> Result<TableInfo> {
            self.tables
                .lock()
                .unwrap()
                .get(table_id)
                .map(|(info, _)| info.clone())
                .ok_or_else(|| DockyardError::Storage(format!("Table {table_id} not found")))
        }
    }

    #[async_trait]
    impl StorageClient for MemoryStorage {
        async fn get_table(&self, table_id: &str) -> Result<Option<TableInfo>> {
            Ok(self.tables.lock().unwrap().get(table_id).map(|(i, _)| i.clone()))
        }

        async fn export_table(
            &self,
            mapping: &InputTableMapping,
            _changed_since: Option<&str>,
            destination: &Path,
        ) -> Result<TableInfo> {
            let csv = self
                .tables
                .lock()
                .unwrap()
                .get(&mapping.source)
                .map(|(_, csv)| csv.clone())
                .unwrap_or_default();
            tokio::fs::write(destination, csv).await?;
            self.table(&mapping.source)
        }

        async fn export_table_to_cloud(
            &self,
            mapping: &InputTableMapping,
            _changed_since: Option<&str>,
            _staging: StagingMode,
        ) -> Result<(TableInfo, CloudLocation)> {
            let info = self.table(&mapping.source)?;
            let location = CloudLocation {
                is_sliced: true,
                region: Some("eu-central-1".to_string()),
                bucket: "staging-bucket".to_string(),
                key: format!("exports/{}", mapping.source),
                credentials: BTreeMap::from([(
                    "session_token".to_string(),
                    "tok".to_string(),
                )]),
            };
            Ok((info, location))
        }

        async fn load_to_workspace(
            &self,
            workspace_id: &str,
            mappings: &[InputTableMapping],
        ) -> Result<Vec<TableInfo>> {
            self.record(StorageCall::LoadWorkspace(
                workspace_id.to_string(),
                mappings.iter().map(|m| m.source.clone()).collect(),
            ));
            mappings.iter().map(|m| self.table(&m.source)).collect()
        }

        async fn list_files(&self, query: &FileQuery) -> Result<Vec<FileInfo>> {
            let files = self.files.lock().unwrap();
            let mut found: Vec<FileInfo> = files
                .iter()
                .map(|(info, _)| info)
                .filter(|f| query.tags.iter().all(|t| f.tags.contains(t)))
                .filter(|f| query.since_id.map_or(true, |since| f.id > since))
                .cloned()
                .collect();
            found.sort_by_key(|f| f.id);
            if let Some(limit) = query.limit {
                found.truncate(limit as usize);
            }
            Ok(found)
        }

        async fn download_file(&self, file: &FileInfo, destination: &Path) -> Result<()> {
            let body = self
                .files
                .lock()
                .unwrap()
                .iter()
                .find(|(f, _)| f.id == file.id)
                .map(|(_, b)| b.clone())
                .unwrap_or_default();
            tokio::fs::write(destination, body).await?;
            Ok(())
        }

        async fn bucket_exists(&self, bucket_id: &str) -> Result<bool> {
            Ok(self.buckets.lock().unwrap().iter().any(|b| b == bucket_id))
        }

        async fn create_bucket(&self, bucket_id: &str) -> Result<()> {
            self.buckets.lock().unwrap().push(bucket_id.to_string());
            self.record(StorageCall::CreateBucket(bucket_id.to_string()));
            Ok(())
        }

        async fn delete_table_rows(
            &self,
            table_id: &str,
            column: &str,
            _values: &[String],
            _operator: WhereOperator,
        ) -> Result<()> {
            self.record(StorageCall::DeleteRows(table_id.to_string(), column.to_string()));
            Ok(())
        }

        async fn create_table(&self, upload: &TableUpload, _source: &TableSource) -> Result<TableInfo> {
            self.record(StorageCall::CreateTable(upload.clone()));
            let info = TableInfo {
                id: upload.destination.clone(),
                name: upload.destination.rsplit('.').next().unwrap_or("").to_string(),
                primary_key: upload.primary_key.clone(),
                ..Default::default()
            };
            self.tables
                .lock()
                .unwrap()
                .insert(upload.destination.clone(), (info.clone(), String::new()));
            Ok(info)
        }

        async fn write_table(&self, upload: &TableUpload, _source: &TableSource) -> Result<TableInfo> {
            self.record(StorageCall::WriteTable(upload.clone()));
            self.table(&upload.destination)
        }

        async fn upload_file(&self, path: &Path, options: &FileUpload) -> Result<u64> {
            let body = tokio::fs::read(path).await?;
            let mut files = self.files.lock().unwrap();
            let id = files.iter().map(|(f, _)| f.id).max().unwrap_or(0) + 1;
            files.push((
                FileInfo {
                    id,
                    name: options.name.clone(),
                    tags: options.tags.clone(),
                    is_public: options.is_public,
                    is_permanent: options.is_permanent,
                    is_encrypted: options.is_encrypted,
                    size_bytes: body.len() as u64,
                    ..Default::default()
                },
                body,
            ));
            drop(files);
            self.record(StorageCall::UploadFile(options.name.clone(), options.clone()));
            Ok(id)
        }

        async fn add_file_tag(&self, file_id: u64, tag: &str) -> Result<()> {
            self.record(StorageCall::AddTag(file_id, tag.to_string()));
            Ok(())
        }
    }

    /// Workspace provider keeping workspaces in creation order.
    #[derive(Default)]
    pub(crate) struct MemoryWorkspaces {
        pub(crate) existing: Mutex<Vec<WorkspaceCredentials>>,
        pub(crate) deleted: Mutex<Vec<String>>,
        pub(crate) created: Mutex<Vec<WorkspaceOptions>>,
    }

    impl MemoryWorkspaces {
        pub(crate) fn with_existing(self, ids: &[&str]) -> Self {
            for id in ids {
                self.existing.lock().unwrap().push(credentials(id, true));
            }
            self
        }
    }

    pub(crate) fn credentials(id: &str, persistent: bool) -> WorkspaceCredentials {
        WorkspaceCredentials {
            id: id.to_string(),
            backend: "snowflake".to_string(),
            host: "acme.snowflakecomputing.com".to_string(),
            port: None,
            database: Some("KEBOOLA_1".to_string()),
            schema: format!("WORKSPACE_{id}"),
            warehouse: Some("WH".to_string()),
            user: format!("user_{id}"),
            password: format!("pwd-{id}"),
            persistent,
        }
    }

    #[async_trait]
    impl WorkspaceProvider for MemoryWorkspaces {
        async fn create(&self, options: &WorkspaceOptions) -> Result<WorkspaceCredentials> {
            let mut created = self.created.lock().unwrap();
            created.push(options.clone());
            Ok(credentials(&format!("new-{}", created.len()), options.persistent))
        }

        async fn list(&self, _component_id: &str, _config_id: &str) -> Result<Vec<WorkspaceCredentials>> {
            Ok(self.existing.lock().unwrap().clone())
        }

        async fn delete(&self, workspace_id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(workspace_id.to_string());
            Ok(())
        }
    }
}
