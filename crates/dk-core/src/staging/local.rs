//! Filesystem-backed storage for local runs.
//!
//! ```text
//! <root>/buckets/<bucket>/<table>.csv   table data (header + rows)
//! <root>/buckets/<bucket>/<table>.json  table info
//! <root>/files/<id>/<name>              file data
//! <root>/files/<id>.json                file info
//! <root>/workspaces/<id>/               workspace tables + workspace.json
//! <root>/staging/<uuid>/                cloud staging exports
//! ```
//!
//! CSV handling is line based: quoted fields are understood, embedded newlines are not.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use dk_types::{
    CloudLocation, DockyardError, FileInfo, FileUpload, InputTableMapping, MetadataEntry, Result,
    StagingMode, TableInfo, TableUpload, WhereOperator, WorkspaceCredentials, WorkspaceOptions,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FileQuery, StorageClient, TableSource, WorkspaceProvider};
use crate::security::{ensure_within, sanitize_filename};

const METADATA_PROVIDER: &str = "dockyard";

/// Storage service emulated on a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceRecord {
    component_id: String,
    config_id: Option<String>,
    created: String,
    credentials: WorkspaceCredentials,
}

/// Parsed CSV: header plus rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Csv {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a table from CSV text. Used to seed a local project.
    pub async fn seed_table(&self, table_id: &str, csv: &str) -> Result<TableInfo> {
        let (bucket, _) = split_table_id(table_id)?;
        self.create_bucket(bucket).await?;
        let parsed = Csv::parse(csv);
        let info = new_table_info(table_id, &parsed.header, &[])?;
        self.save_table(&info, &parsed).await?;
        Ok(info)
    }

    fn bucket_dir(&self, bucket_id: &str) -> Result<PathBuf> {
        ensure_within(&self.root.join("buckets"), Path::new(bucket_id))
    }

    fn table_paths(&self, table_id: &str) -> Result<(PathBuf, PathBuf)> {
        let (bucket, name) = split_table_id(table_id)?;
        let dir = self.bucket_dir(bucket)?;
        Ok((dir.join(format!("{name}.csv")), dir.join(format!("{name}.json"))))
    }

    fn workspace_dir(&self, workspace_id: &str) -> Result<PathBuf> {
        ensure_within(&self.root.join("workspaces"), Path::new(workspace_id))
    }

    async fn load_table(&self, table_id: &str) -> Result<Option<(TableInfo, Csv)>> {
        let (data, meta) = self.table_paths(table_id)?;
        if !tokio::fs::try_exists(&meta).await? {
            return Ok(None);
        }
        let info: TableInfo = serde_json::from_str(&tokio::fs::read_to_string(&meta).await?)?;
        let csv = Csv::parse(&tokio::fs::read_to_string(&data).await.unwrap_or_default());
        Ok(Some((info, csv)))
    }

    async fn require_table(&self, table_id: &str) -> Result<(TableInfo, Csv)> {
        self.load_table(table_id)
            .await?
            .ok_or_else(|| DockyardError::Storage(format!("Table {table_id} not found")))
    }

    async fn save_table(&self, info: &TableInfo, csv: &Csv) -> Result<()> {
        let (data, meta) = self.table_paths(&info.id)?;
        if let Some(parent) = data.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&data, csv.render()).await?;
        tokio::fs::write(&meta, serde_json::to_string_pretty(info)?).await?;
        Ok(())
    }

    /// Table rows after applying the mapping's column, where and limit settings.
    async fn filtered_export(
        &self,
        mapping: &InputTableMapping,
        changed_since: Option<&str>,
    ) -> Result<(TableInfo, Csv)> {
        let (info, csv) = self.require_table(&mapping.source).await?;
        let unchanged = match (changed_since, info.last_change_date.as_deref()) {
            (Some(since), Some(changed)) => changed <= since,
            _ => false,
        };
        let mut out = csv.filter(mapping)?;
        if unchanged {
            out.rows.clear();
        }
        Ok((info, out))
    }

    async fn read_source(&self, upload: &TableUpload, source: &TableSource) -> Result<Csv> {
        match source {
            TableSource::File(path) => {
                let metadata = tokio::fs::metadata(path).await?;
                if !metadata.is_dir() {
                    return Ok(Csv::parse(&tokio::fs::read_to_string(path).await?));
                }
                // Sliced table: headerless slices, columns come from the upload.
                if upload.columns.is_empty() {
                    return Err(DockyardError::User(format!(
                        "Sliced table \"{}\" needs columns in its manifest",
                        upload.source
                    )));
                }
                let mut slices = Vec::new();
                let mut entries = tokio::fs::read_dir(path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_file() {
                        slices.push(entry.path());
                    }
                }
                slices.sort();
                let mut csv = Csv {
                    header: upload.columns.clone(),
                    rows: Vec::new(),
                };
                for slice in slices {
                    let text = tokio::fs::read_to_string(&slice).await?;
                    csv.rows.extend(text.lines().filter(|l| !l.is_empty()).map(parse_line));
                }
                Ok(csv)
            }
            TableSource::Workspace {
                workspace_id,
                table,
            } => {
                let dir = self.workspace_dir(workspace_id)?;
                let path = ensure_within(&dir, Path::new(&format!("{}.csv", table_stem(table))))?;
                let text = tokio::fs::read_to_string(&path).await.map_err(|_| {
                    DockyardError::User(format!(
                        "Table \"{table}\" not found in workspace {workspace_id}"
                    ))
                })?;
                Ok(Csv::parse(&text))
            }
        }
    }

    async fn read_workspace(&self, workspace_id: &str) -> Result<WorkspaceRecord> {
        let path = self.workspace_dir(workspace_id)?.join("workspace.json");
        Ok(serde_json::from_str(&tokio::fs::read_to_string(path).await?)?)
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn get_table(&self, table_id: &str) -> Result<Option<TableInfo>> {
        if split_table_id(table_id).is_err() {
            return Ok(None);
        }
        storage(self.load_table(table_id).await).map(|t| t.map(|(info, _)| info))
    }

    async fn export_table(
        &self,
        mapping: &InputTableMapping,
        changed_since: Option<&str>,
        destination: &Path,
    ) -> Result<TableInfo> {
        storage(
            async {
                let (info, csv) = self.filtered_export(mapping, changed_since).await?;
                tokio::fs::write(destination, csv.render()).await?;
                debug!(table = %info.id, rows = csv.rows.len(), "Table exported");
                Ok(info)
            }
            .await,
        )
    }

    async fn export_table_to_cloud(
        &self,
        mapping: &InputTableMapping,
        changed_since: Option<&str>,
        staging: StagingMode,
    ) -> Result<(TableInfo, CloudLocation)> {
        storage(
            async {
                let (info, csv) = self.filtered_export(mapping, changed_since).await?;
                let bucket_dir = self
                    .root
                    .join("staging")
                    .join(uuid::Uuid::new_v4().simple().to_string());
                tokio::fs::create_dir_all(&bucket_dir).await?;
                let key = format!("{}.csv", info.id);
                tokio::fs::write(bucket_dir.join(&key), csv.render()).await?;
                let location = CloudLocation {
                    is_sliced: false,
                    region: None,
                    bucket: bucket_dir.to_string_lossy().to_string(),
                    key,
                    credentials: Default::default(),
                };
                debug!(table = %info.id, staging = %staging, "Table exported to staging");
                Ok((info, location))
            }
            .await,
        )
    }

    async fn load_to_workspace(
        &self,
        workspace_id: &str,
        mappings: &[InputTableMapping],
    ) -> Result<Vec<TableInfo>> {
        storage(
            async {
                let dir = self.workspace_dir(workspace_id)?;
                tokio::fs::create_dir_all(&dir).await?;
                let mut loaded = Vec::with_capacity(mappings.len());
                for mapping in mappings {
                    let (info, csv) = self.filtered_export(mapping, mapping.changed_since.as_deref()).await?;
                    let name = format!("{}.csv", table_stem(&mapping.destination_name()));
                    tokio::fs::write(ensure_within(&dir, Path::new(&name))?, csv.render()).await?;
                    loaded.push(info);
                }
                Ok(loaded)
            }
            .await,
        )
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<FileInfo>> {
        storage(
            async {
                let dir = self.root.join("files");
                let mut found = Vec::new();
                if !tokio::fs::try_exists(&dir).await? {
                    return Ok(found);
                }
                let mut entries = tokio::fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let info: FileInfo = serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?;
                    let tags_match = query.tags.iter().all(|t| info.tags.contains(t));
                    let query_match = query.query.as_deref().map_or(true, |q| info.name.contains(q));
                    let newer = query.since_id.map_or(true, |since| info.id > since);
                    if tags_match && query_match && newer {
                        found.push(info);
                    }
                }
                found.sort_by_key(|f| f.id);
                if let Some(limit) = query.limit {
                    found.truncate(limit as usize);
                }
                Ok(found)
            }
            .await,
        )
    }

    async fn download_file(&self, file: &FileInfo, destination: &Path) -> Result<()> {
        let source = self
            .root
            .join("files")
            .join(file.id.to_string())
            .join(sanitize_filename(&file.name));
        storage(tokio::fs::copy(&source, destination).await.map(|_| ()).map_err(Into::into))
    }

    async fn bucket_exists(&self, bucket_id: &str) -> Result<bool> {
        let dir = self.bucket_dir(bucket_id)?;
        storage(tokio::fs::try_exists(&dir).await.map_err(Into::into))
    }

    async fn create_bucket(&self, bucket_id: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket_id)?;
        storage(tokio::fs::create_dir_all(&dir).await.map_err(Into::into))
    }

    async fn delete_table_rows(
        &self,
        table_id: &str,
        column: &str,
        values: &[String],
        operator: WhereOperator,
    ) -> Result<()> {
        storage(
            async {
                let (info, mut csv) = self.require_table(table_id).await?;
                let index = csv.column_index(column)?;
                let before = csv.rows.len();
                csv.rows.retain(|row| {
                    let value = row.get(index).map(String::as_str).unwrap_or("");
                    let matches = values.iter().any(|v| v == value);
                    match operator {
                        WhereOperator::Eq => !matches,
                        WhereOperator::Ne => matches,
                    }
                });
                debug!(table = table_id, deleted = before - csv.rows.len(), "Rows deleted");
                self.save_table(&info, &csv).await
            }
            .await,
        )
    }

    async fn create_table(&self, upload: &TableUpload, source: &TableSource) -> Result<TableInfo> {
        storage(
            async {
                let csv = self.read_source(upload, source).await?;
                for key in &upload.primary_key {
                    csv.column_index(key)?;
                }
                let mut info = new_table_info(&upload.destination, &csv.header, &upload.primary_key)?;
                info.metadata = metadata_entries(upload);
                self.save_table(&info, &csv).await?;
                Ok(info)
            }
            .await,
        )
    }

    async fn write_table(&self, upload: &TableUpload, source: &TableSource) -> Result<TableInfo> {
        storage(
            async {
                let (mut info, mut existing) = self.require_table(&upload.destination).await?;
                let incoming = self.read_source(upload, source).await?;
                if upload.incremental {
                    if existing.header != incoming.header {
                        return Err(DockyardError::User(format!(
                            "Columns of {} do not match table {}",
                            upload.source, upload.destination
                        )));
                    }
                    existing.rows.extend(incoming.rows);
                } else {
                    existing = incoming;
                }
                let now = Utc::now().to_rfc3339();
                info.columns = existing.header.clone();
                info.last_import_date = Some(now.clone());
                info.last_change_date = Some(now);
                for entry in metadata_entries(upload) {
                    info.metadata.retain(|m| m.key != entry.key);
                    info.metadata.push(entry);
                }
                self.save_table(&info, &existing).await?;
                Ok(info)
            }
            .await,
        )
    }

    async fn upload_file(&self, path: &Path, options: &FileUpload) -> Result<u64> {
        storage(
            async {
                let dir = self.root.join("files");
                tokio::fs::create_dir_all(&dir).await?;
                let mut next_id = 1;
                let mut entries = tokio::fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if let Ok(id) = entry.file_name().to_string_lossy().trim_end_matches(".json").parse::<u64>() {
                        next_id = next_id.max(id + 1);
                    }
                }

                let name = sanitize_filename(&options.name);
                let data_dir = dir.join(next_id.to_string());
                tokio::fs::create_dir_all(&data_dir).await?;
                let size = tokio::fs::copy(path, data_dir.join(&name)).await?;
                let info = FileInfo {
                    id: next_id,
                    name,
                    created: Some(Utc::now().to_rfc3339()),
                    is_public: options.is_public,
                    is_encrypted: options.is_encrypted,
                    is_permanent: options.is_permanent,
                    tags: options.tags.clone(),
                    max_age_days: (!options.is_permanent).then_some(15),
                    size_bytes: size,
                };
                tokio::fs::write(dir.join(format!("{next_id}.json")), serde_json::to_string_pretty(&info)?).await?;
                Ok(next_id)
            }
            .await,
        )
    }

    async fn add_file_tag(&self, file_id: u64, tag: &str) -> Result<()> {
        storage(
            async {
                let path = self.root.join("files").join(format!("{file_id}.json"));
                let mut info: FileInfo = serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?;
                if !info.tags.iter().any(|t| t == tag) {
                    info.tags.push(tag.to_string());
                }
                tokio::fs::write(&path, serde_json::to_string_pretty(&info)?).await?;
                Ok(())
            }
            .await,
        )
    }
}

#[async_trait]
impl WorkspaceProvider for LocalStorage {
    async fn create(&self, options: &WorkspaceOptions) -> Result<WorkspaceCredentials> {
        storage(
            async {
                let id = uuid::Uuid::new_v4().simple().to_string();
                let dir = self.workspace_dir(&id)?;
                tokio::fs::create_dir_all(&dir).await?;
                let credentials = WorkspaceCredentials {
                    id: id.clone(),
                    backend: options.backend.as_str().to_string(),
                    host: dir.to_string_lossy().to_string(),
                    port: None,
                    database: None,
                    schema: format!("WORKSPACE_{id}"),
                    warehouse: None,
                    user: format!("user_{id}"),
                    password: uuid::Uuid::new_v4().simple().to_string(),
                    persistent: options.persistent,
                };
                let record = WorkspaceRecord {
                    component_id: options.component_id.clone(),
                    config_id: options.config_id.clone(),
                    created: Utc::now().to_rfc3339(),
                    credentials: credentials.clone(),
                };
                tokio::fs::write(dir.join("workspace.json"), serde_json::to_string_pretty(&record)?).await?;
                Ok(credentials)
            }
            .await,
        )
    }

    async fn list(&self, component_id: &str, config_id: &str) -> Result<Vec<WorkspaceCredentials>> {
        storage(
            async {
                let dir = self.root.join("workspaces");
                let mut records = Vec::new();
                if !tokio::fs::try_exists(&dir).await? {
                    return Ok(Vec::new());
                }
                let mut entries = tokio::fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let id = entry.file_name().to_string_lossy().to_string();
                    let Ok(record) = self.read_workspace(&id).await else {
                        continue;
                    };
                    if record.credentials.persistent
                        && record.component_id == component_id
                        && record.config_id.as_deref() == Some(config_id)
                    {
                        records.push(record);
                    }
                }
                records.sort_by(|a, b| (&a.created, &a.credentials.id).cmp(&(&b.created, &b.credentials.id)));
                Ok(records.into_iter().map(|r| r.credentials).collect())
            }
            .await,
        )
    }

    async fn delete(&self, workspace_id: &str) -> Result<()> {
        let dir = self.workspace_dir(workspace_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DockyardError::Storage(e.to_string())),
        }
    }
}

/// Report filesystem failures as storage errors.
fn storage<T>(result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        DockyardError::Io(e) => DockyardError::Storage(e.to_string()),
        DockyardError::Json(e) => DockyardError::Storage(e.to_string()),
        other => other,
    })
}

fn split_table_id(table_id: &str) -> Result<(&str, &str)> {
    table_id
        .rsplit_once('.')
        .filter(|(bucket, name)| !bucket.is_empty() && !name.is_empty())
        .ok_or_else(|| DockyardError::User(format!("Invalid table id \"{table_id}\"")))
}

fn table_stem(name: &str) -> &str {
    name.strip_suffix(".csv").unwrap_or(name)
}

fn new_table_info(table_id: &str, header: &[String], primary_key: &[String]) -> Result<TableInfo> {
    let (_, name) = split_table_id(table_id)?;
    let now = Utc::now().to_rfc3339();
    Ok(TableInfo {
        id: table_id.to_string(),
        name: name.to_string(),
        created: Some(now.clone()),
        last_import_date: Some(now.clone()),
        last_change_date: Some(now),
        primary_key: primary_key.to_vec(),
        columns: header.to_vec(),
        ..Default::default()
    })
}

fn metadata_entries(upload: &TableUpload) -> Vec<MetadataEntry> {
    upload
        .metadata
        .iter()
        .map(|(key, value)| MetadataEntry {
            key: key.clone(),
            value: value.clone(),
            provider: Some(METADATA_PROVIDER.to_string()),
        })
        .collect()
}

impl Csv {
    fn parse(text: &str) -> Self {
        let mut lines = text.lines().filter(|l| !l.is_empty());
        let header = lines.next().map(parse_line).unwrap_or_default();
        Self {
            header,
            rows: lines.map(parse_line).collect(),
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if self.header.is_empty() {
            return out;
        }
        out.push_str(&render_line(&self.header));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&render_line(row));
            out.push('\n');
        }
        out
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.header
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DockyardError::User(format!("Column \"{column}\" not found")))
    }

    fn filter(&self, mapping: &InputTableMapping) -> Result<Csv> {
        let mut rows: Vec<&Vec<String>> = self.rows.iter().collect();
        if let Some(ref column) = mapping.where_column {
            let index = self.column_index(column)?;
            rows.retain(|row| {
                let value = row.get(index).map(String::as_str).unwrap_or("");
                let matches = mapping.where_values.iter().any(|v| v == value);
                match mapping.where_operator {
                    WhereOperator::Eq => matches,
                    WhereOperator::Ne => !matches,
                }
            });
        }
        if let Some(limit) = mapping.limit {
            rows.truncate(limit as usize);
        }

        let indexes: Vec<usize> = if mapping.columns.is_empty() {
            (0..self.header.len()).collect()
        } else {
            mapping
                .columns
                .iter()
                .map(|c| self.column_index(c))
                .collect::<Result<_>>()?
        };
        Ok(Csv {
            header: indexes.iter().map(|&i| self.header[i].clone()).collect(),
            rows: rows
                .into_iter()
                .map(|row| indexes.iter().map(|&i| row.get(i).cloned().unwrap_or_default()).collect())
                .collect(),
        })
    }
}

fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn render_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains([',', '"']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dk_types::WorkspaceBackend;

    use super::*;

    fn upload(destination: &str, incremental: bool) -> TableUpload {
        TableUpload {
            source: "users.csv".to_string(),
            destination: destination.to_string(),
            incremental,
            primary_key: vec!["id".to_string()],
            columns: Vec::new(),
            delete_where_column: None,
            delete_where_values: Vec::new(),
            delete_where_operator: WhereOperator::Eq,
            delimiter: ",".to_string(),
            enclosure: "\"".to_string(),
            metadata: BTreeMap::from([("KBC.createdBy.component.id".to_string(), "c".to_string())]),
        }
    }

    #[test]
    fn csv_lines_with_quotes() {
        assert_eq!(parse_line(r#"1,"Doe, John","say ""hi""""#), vec!["1", "Doe, John", "say \"hi\""]);
        let fields = vec!["1".to_string(), "Doe, John".to_string()];
        assert_eq!(render_line(&fields), "1,\"Doe, John\"");
    }

    #[tokio::test]
    async fn export_applies_columns_where_and_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage
            .seed_table("in.c-main.users", "id,name,status\n1,ann,active\n2,bob,closed\n3,cid,active\n")
            .await
            .unwrap();

        let mapping = InputTableMapping {
            source: "in.c-main.users".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            where_column: Some("status".to_string()),
            where_values: vec!["active".to_string()],
            limit: Some(1),
            ..Default::default()
        };
        let dest = tmp.path().join("users.csv");
        let info = storage.export_table(&mapping, None, &dest).await.unwrap();

        assert_eq!(info.id, "in.c-main.users");
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "id,name\n1,ann\n");
    }

    #[tokio::test]
    async fn create_append_replace_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source_path = tmp.path().join("out.csv");
        std::fs::write(&source_path, "id,status\n1,open\n2,closed\n").unwrap();
        let source = TableSource::File(source_path.clone());

        storage.create_bucket("out.c-main").await.unwrap();
        let info = storage.create_table(&upload("out.c-main.users", false), &source).await.unwrap();
        assert_eq!(info.primary_key, vec!["id".to_string()]);
        assert_eq!(info.metadata[0].key, "KBC.createdBy.component.id");

        storage.write_table(&upload("out.c-main.users", true), &source).await.unwrap();
        let (_, csv) = storage.require_table("out.c-main.users").await.unwrap();
        assert_eq!(csv.rows.len(), 4);

        storage
            .delete_table_rows("out.c-main.users", "status", &["closed".to_string()], WhereOperator::Eq)
            .await
            .unwrap();
        let (_, csv) = storage.require_table("out.c-main.users").await.unwrap();
        assert_eq!(csv.rows.len(), 2);

        storage.write_table(&upload("out.c-main.users", false), &source).await.unwrap();
        let (_, csv) = storage.require_table("out.c-main.users").await.unwrap();
        assert_eq!(csv.rows.len(), 2);
    }

    #[tokio::test]
    async fn missing_table_is_storage_error() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(storage.get_table("in.c-main.none").await.unwrap().is_none());
        let err = storage
            .write_table(&upload("out.c-main.none", true), &TableSource::File(tmp.path().join("x.csv")))
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Storage(_)));
    }

    #[tokio::test]
    async fn files_upload_list_download_and_tag() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path().join("storage"));
        let local = tmp.path().join("report.txt");
        std::fs::write(&local, "hello").unwrap();

        let options = FileUpload {
            name: "report.txt".to_string(),
            tags: vec!["export".to_string()],
            is_public: false,
            is_permanent: false,
            is_encrypted: true,
            notify: false,
        };
        let first = storage.upload_file(&local, &options).await.unwrap();
        let second = storage.upload_file(&local, &options).await.unwrap();
        assert_eq!((first, second), (1, 2));

        let query = FileQuery {
            tags: vec!["export".to_string()],
            since_id: Some(1),
            ..Default::default()
        };
        let files = storage.list_files(&query).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, 2);
        assert_eq!(files[0].size_bytes, 5);

        let dest = tmp.path().join("downloaded.txt");
        storage.download_file(&files[0], &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "hello");

        storage.add_file_tag(2, "processed").await.unwrap();
        storage.add_file_tag(2, "processed").await.unwrap();
        let tagged = storage
            .list_files(&FileQuery {
                tags: vec!["processed".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].tags, vec!["export".to_string(), "processed".to_string()]);
    }

    #[tokio::test]
    async fn workspaces_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let options = WorkspaceOptions {
            backend: WorkspaceBackend::Snowflake,
            component_id: "c".to_string(),
            config_id: Some("1".to_string()),
            persistent: true,
        };
        let ws = storage.create(&options).await.unwrap();
        storage
            .create(&WorkspaceOptions {
                persistent: false,
                config_id: None,
                ..options.clone()
            })
            .await
            .unwrap();

        let listed = storage.list("c", "1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ws.id);

        storage.seed_table("in.c-main.users", "id\n1\n").await.unwrap();
        let mapping = InputTableMapping {
            source: "in.c-main.users".to_string(),
            destination: Some("users".to_string()),
            ..Default::default()
        };
        storage.load_to_workspace(&ws.id, &[mapping]).await.unwrap();
        let source = TableSource::Workspace {
            workspace_id: ws.id.clone(),
            table: "users".to_string(),
        };
        let csv = storage.read_source(&upload("out.c-main.users", false), &source).await.unwrap();
        assert_eq!(csv.rows, vec![vec!["1".to_string()]]);

        storage.delete(&ws.id).await.unwrap();
        storage.delete(&ws.id).await.unwrap();
        assert!(storage.list("c", "1").await.unwrap().is_empty());
    }
}
