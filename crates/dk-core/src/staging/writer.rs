use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use dk_types::{
    ComponentFlag, DockyardError, FileUpload, OutputFileManifest, OutputTableManifest, Result,
    StagingMode, TableUpload,
};
use regex::Regex;
use tracing::{debug, info};

use super::{read_manifest, DataLoader, InputResult, OutputResult, TableSource};

const MANIFEST_SUFFIX: &str = ".manifest";

fn table_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(in|out)\.c-[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+$").expect("valid regex")
    })
}

/// `stage.c-bucket.table`
pub fn is_valid_table_id(id: &str) -> bool {
    table_id_regex().is_match(id)
}

impl DataLoader {
    /// Upload everything the component produced in `out/tables` and `out/files`.
    pub async fn store_output(&self) -> Result<OutputResult> {
        let staging = self.component.staging_storage.output;
        let output = &self.mapping.output;
        if staging == StagingMode::None {
            if !output.tables.is_empty() || !output.files.is_empty() {
                return Err(DockyardError::User(format!(
                    "Component {} does not accept output mapping",
                    self.component.id
                )));
            }
            return Ok(OutputResult::default());
        }

        let mut result = OutputResult::default();
        self.store_tables(staging, &mut result).await?;
        self.store_files(&mut result).await?;
        info!(
            tables = result.tables.len(),
            files = result.file_ids.len(),
            "Output stored"
        );
        Ok(result)
    }

    /// Add the configured processed tags to every staged input file.
    pub async fn tag_processed_files(&self, input: &InputResult) -> Result<()> {
        for pending in &input.pending_tags {
            for tag in &pending.tags {
                self.storage.add_file_tag(pending.file_id, tag).await?;
            }
        }
        if !input.pending_tags.is_empty() {
            debug!(files = input.pending_tags.len(), "Input files tagged as processed");
        }
        Ok(())
    }

    async fn store_tables(&self, staging: StagingMode, result: &mut OutputResult) -> Result<()> {
        let tables_dir = self.data_dir.join("out/tables");
        let (data_entries, manifest_only) = scan_dir(&tables_dir, true).await?;

        let sources: Vec<(String, TableSource)> = match staging {
            StagingMode::Workspace(_) => {
                let workspace = self.workspace.as_ref().ok_or_else(|| {
                    DockyardError::Application("Workspace staging requested without a workspace".to_string())
                })?;
                let mut names: Vec<String> = self
                    .mapping
                    .output
                    .tables
                    .iter()
                    .map(|m| m.source.clone())
                    .collect();
                for name in manifest_only.into_iter().chain(data_entries) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                names
                    .into_iter()
                    .map(|name| {
                        let source = TableSource::Workspace {
                            workspace_id: workspace.id.clone(),
                            table: name.clone(),
                        };
                        (name, source)
                    })
                    .collect()
            }
            _ => {
                let missing: Vec<&str> = self
                    .mapping
                    .output
                    .tables
                    .iter()
                    .map(|m| m.source.as_str())
                    .filter(|s| !data_entries.iter().any(|e| e == s))
                    .collect();
                if !missing.is_empty() {
                    return Err(DockyardError::User(format!(
                        "Table sources not found: \"{}\"",
                        missing.join("\", \"")
                    )));
                }
                data_entries
                    .into_iter()
                    .map(|name| {
                        let source = TableSource::File(tables_dir.join(&name));
                        (name, source)
                    })
                    .collect()
            }
        };

        for (name, source) in sources {
            let declared = self.mapping.output.tables.iter().find(|m| m.source == name);
            let manifest: OutputTableManifest = read_manifest(&tables_dir.join(&name), self.format())
                .await?
                .unwrap_or_default();
            let merged = manifest.merge_over(declared);
            let destination = self.resolve_destination(&name, merged.destination.clone())?;

            let bucket = destination
                .rsplit_once('.')
                .map(|(bucket, _)| bucket.to_string())
                .unwrap_or_default();
            if !self.storage.bucket_exists(&bucket).await? {
                info!(bucket = %bucket, "Creating bucket");
                self.storage.create_bucket(&bucket).await?;
            }

            let existing = self.storage.get_table(&destination).await?;
            let mut upload = TableUpload {
                source: name.clone(),
                destination: destination.clone(),
                incremental: merged.incremental.unwrap_or(false),
                primary_key: merged.primary_key.unwrap_or_default(),
                columns: merged.columns.unwrap_or_default(),
                delete_where_column: merged.delete_where_column,
                delete_where_values: merged.delete_where_values.unwrap_or_default(),
                delete_where_operator: merged.delete_where_operator.unwrap_or_default(),
                delimiter: merged.delimiter.unwrap_or_else(|| ",".to_string()),
                enclosure: merged.enclosure.unwrap_or_else(|| "\"".to_string()),
                metadata: merged.metadata.unwrap_or_default(),
            };
            upload
                .metadata
                .extend(self.system_metadata("lastUpdatedBy"));

            let info = match existing {
                Some(_) => {
                    if let Some(ref column) = upload.delete_where_column {
                        self.storage
                            .delete_table_rows(
                                &destination,
                                column,
                                &upload.delete_where_values,
                                upload.delete_where_operator,
                            )
                            .await?;
                    }
                    self.storage.write_table(&upload, &source).await?
                }
                None => {
                    upload.metadata.extend(self.system_metadata("createdBy"));
                    self.storage.create_table(&upload, &source).await?
                }
            };
            debug!(
                source = %name,
                destination = %destination,
                incremental = upload.incremental,
                "Table stored"
            );
            result.tables.push(info);
        }
        Ok(())
    }

    async fn store_files(&self, result: &mut OutputResult) -> Result<()> {
        let files_dir = self.data_dir.join("out/files");
        let (entries, _) = scan_dir(&files_dir, false).await?;

        let missing: Vec<&str> = self
            .mapping
            .output
            .files
            .iter()
            .map(|m| m.source.as_str())
            .filter(|s| !entries.iter().any(|e| e == s))
            .collect();
        if !missing.is_empty() {
            return Err(DockyardError::User(format!(
                "File sources not found: \"{}\"",
                missing.join("\", \"")
            )));
        }

        for name in entries {
            let path = files_dir.join(&name);
            let declared = self.mapping.output.files.iter().find(|m| m.source == name);
            let manifest: OutputFileManifest = read_manifest(&path, self.format())
                .await?
                .unwrap_or_default();
            let merged = manifest.merge_over(declared);

            let mut tags = merged.tags.unwrap_or_default();
            for tag in self.system_tags() {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            let upload = FileUpload {
                name: name.clone(),
                tags,
                is_public: merged.is_public.unwrap_or(false),
                is_permanent: merged.is_permanent.unwrap_or(false),
                is_encrypted: merged.is_encrypted.unwrap_or(true),
                notify: merged.notify.unwrap_or(false),
            };
            let id = self.storage.upload_file(&path, &upload).await?;
            debug!(file = %name, file_id = id, "File stored");
            result.file_ids.push(id);
        }
        Ok(())
    }

    fn resolve_destination(&self, source: &str, declared: Option<String>) -> Result<String> {
        let destination = match declared {
            Some(d) => d,
            None => match self.config_id {
                Some(ref config_id) if self.component.has_flag(ComponentFlag::DefaultBucket) => {
                    let table = Path::new(source)
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| source.to_string());
                    format!("{}.{}", self.component.default_bucket(config_id), table)
                }
                _ => {
                    return Err(DockyardError::User(format!(
                        "Failed to resolve destination for output table \"{source}\""
                    )))
                }
            },
        };
        if !is_valid_table_id(&destination) {
            return Err(DockyardError::User(format!(
                "Failed to resolve valid destination. \"{destination}\" is not a valid table ID"
            )));
        }
        Ok(destination)
    }

    fn system_metadata(&self, kind: &str) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert(format!("KBC.{kind}.component.id"), self.component.id.clone());
        if let Some(ref config_id) = self.config_id {
            metadata.insert(format!("KBC.{kind}.configuration.id"), config_id.clone());
        }
        if let Some(ref row_id) = self.row_id {
            metadata.insert(format!("KBC.{kind}.configurationRow.id"), row_id.clone());
        }
        metadata
    }

    fn system_tags(&self) -> Vec<String> {
        let mut tags = vec![format!("componentId: {}", self.component.id)];
        if let Some(ref config_id) = self.config_id {
            tags.push(format!("configurationId: {config_id}"));
        }
        if let Some(ref row_id) = self.row_id {
            tags.push(format!("configurationRowId: {row_id}"));
        }
        tags
    }
}

/// Sorted entry names of `dir`, split into data entries and manifests without data.
/// Directories count as data (sliced tables) only when `allow_dirs` is set.
async fn scan_dir(dir: &Path, allow_dirs: bool) -> Result<(Vec<String>, Vec<String>)> {
    let mut data = Vec::new();
    let mut manifests = Vec::new();
    if !tokio::fs::try_exists(dir).await? {
        return Ok((data, manifests));
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type().await?;
        if let Some(stem) = name.strip_suffix(MANIFEST_SUFFIX) {
            manifests.push(stem.to_string());
        } else if file_type.is_file() || (allow_dirs && file_type.is_dir()) {
            data.push(name);
        }
    }
    data.sort();
    manifests.retain(|m| !data.contains(m));
    manifests.sort();
    Ok((data, manifests))
}
