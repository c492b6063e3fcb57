use dk_types::{
    DockyardError, FileInfo, InputFileStateList, InputTableManifest, InputTableMapping,
    InputTableStateList, Result, StagingMode,
};
use tracing::{debug, info};

use super::{write_manifest, DataLoader, FileQuery, InputResult, PendingTags};
use crate::security::{ensure_within, sanitize_filename};

impl DataLoader {
    /// Stage every input mapping into `in/tables` and `in/files`.
    ///
    /// Adaptive mappings read their starting point from the given states; the returned
    /// states carry the new high-water marks.
    pub async fn load_input(
        &self,
        table_state: &InputTableStateList,
        file_state: &InputFileStateList,
    ) -> Result<InputResult> {
        let input = &self.mapping.input;
        let staging = self.component.staging_storage.input;
        let mut result = InputResult {
            table_state: table_state.clone(),
            file_state: file_state.clone(),
            ..Default::default()
        };

        if staging == StagingMode::None {
            if !input.tables.is_empty() || !input.files.is_empty() {
                return Err(DockyardError::User(format!(
                    "Component {} does not accept input mapping",
                    self.component.id
                )));
            }
            return Ok(result);
        }

        self.load_tables(&input.tables, staging, table_state, &mut result)
            .await?;
        self.load_files(file_state, &mut result).await?;

        info!(
            tables = result.tables.len(),
            files = result.files.len(),
            staging = %staging,
            "Input staged"
        );
        Ok(result)
    }

    async fn load_tables(
        &self,
        mappings: &[InputTableMapping],
        staging: StagingMode,
        table_state: &InputTableStateList,
        result: &mut InputResult,
    ) -> Result<()> {
        let tables_dir = self.data_dir.join("in/tables");
        let mut workspace_batch = Vec::new();

        for mapping in mappings {
            let changed_since = if mapping.is_adaptive() {
                table_state.last_import_date(&mapping.source).map(str::to_string)
            } else {
                mapping.changed_since.clone()
            };

            if self.storage.get_table(&mapping.source).await?.is_none() {
                return Err(DockyardError::User(format!(
                    "Table \"{}\" not found",
                    mapping.source
                )));
            }

            let destination = ensure_within(&tables_dir, std::path::Path::new(&mapping.destination_name()))?;
            let info = match staging {
                StagingMode::Local => {
                    let info = self
                        .storage
                        .export_table(mapping, changed_since.as_deref(), &destination)
                        .await?;
                    let manifest = InputTableManifest {
                        table: info.clone(),
                        s3: None,
                        abs: None,
                    };
                    write_manifest(&destination, self.format(), &manifest).await?;
                    info
                }
                StagingMode::S3 | StagingMode::Abs => {
                    let (info, location) = self
                        .storage
                        .export_table_to_cloud(mapping, changed_since.as_deref(), staging)
                        .await?;
                    let manifest = InputTableManifest {
                        table: info.clone(),
                        s3: (staging == StagingMode::S3).then(|| location.clone()),
                        abs: (staging == StagingMode::Abs).then_some(location),
                    };
                    write_manifest(&destination, self.format(), &manifest).await?;
                    info
                }
                StagingMode::Workspace(_) => {
                    workspace_batch.push(mapping.clone());
                    continue;
                }
                StagingMode::None => continue,
            };
            debug!(source = %mapping.source, destination = %destination.display(), "Table staged");

            if mapping.is_adaptive() {
                if let Some(ref date) = info.last_import_date {
                    result.table_state.upsert(&mapping.source, date);
                }
            }
            result.tables.push(info);
        }

        if !workspace_batch.is_empty() {
            let workspace = self.workspace.as_ref().ok_or_else(|| {
                DockyardError::Application("Workspace staging requested without a workspace".to_string())
            })?;
            let loaded = self
                .storage
                .load_to_workspace(&workspace.id, &workspace_batch)
                .await?;
            for (mapping, info) in workspace_batch.iter().zip(loaded) {
                let destination = ensure_within(&tables_dir, std::path::Path::new(&mapping.destination_name()))?;
                let manifest = InputTableManifest {
                    table: info.clone(),
                    s3: None,
                    abs: None,
                };
                write_manifest(&destination, self.format(), &manifest).await?;
                if mapping.is_adaptive() {
                    if let Some(ref date) = info.last_import_date {
                        result.table_state.upsert(&mapping.source, date);
                    }
                }
                result.tables.push(info);
            }
            info!(workspace_id = %workspace.id, tables = workspace_batch.len(), "Tables loaded to workspace");
        }
        Ok(())
    }

    async fn load_files(&self, file_state: &InputFileStateList, result: &mut InputResult) -> Result<()> {
        let files_dir = self.data_dir.join("in/files");

        for mapping in &self.mapping.input.files {
            if mapping.tags.is_empty() && mapping.query.is_none() {
                return Err(DockyardError::User(
                    "File input mapping needs tags or a query".to_string(),
                ));
            }
            let since_id = if mapping.is_adaptive() {
                file_state.last_imported_id(&mapping.tags)
            } else {
                None
            };
            let query = FileQuery {
                tags: mapping.tags.clone(),
                query: mapping.query.clone(),
                limit: mapping.limit,
                since_id,
            };

            let files = self.storage.list_files(&query).await?;
            for file in &files {
                let destination = files_dir.join(file_name(file));
                self.storage.download_file(file, &destination).await?;
                write_manifest(&destination, self.format(), file).await?;
                if !mapping.processed_tags.is_empty() {
                    result.pending_tags.push(PendingTags {
                        file_id: file.id,
                        tags: mapping.processed_tags.clone(),
                    });
                }
            }

            if mapping.is_adaptive() {
                if let Some(max_id) = files.iter().map(|f| f.id).max() {
                    result.file_state.upsert(&mapping.tags, max_id);
                }
            }
            debug!(tags = ?mapping.tags, count = files.len(), "Files staged");
            result.files.extend(files);
        }
        Ok(())
    }
}

/// `<id>_<name>` inside `in/files`.
fn file_name(file: &FileInfo) -> String {
    format!("{}_{}", file.id, sanitize_filename(&file.name))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dk_types::{
        ComponentDefinition, DataFormat, ImageDefinition, ImageType, InputFileMapping,
        InputMapping, StagingStorage, StorageMapping, WorkspaceBackend,
    };

    use super::super::memory::{credentials, MemoryStorage, StorageCall};
    use super::*;
    use crate::mounts::WorkingDirectory;

    fn component(input: StagingMode) -> ComponentDefinition {
        serde_json::from_value::<ComponentDefinition>(serde_json::json!({
            "id": "keboola.python-transformation",
            "image": {"type": "dockerhub", "uri": "keboola/python"},
        }))
        .map(|mut c| {
            c.staging_storage = StagingStorage {
                input,
                output: StagingMode::Local,
            };
            c
        })
        .unwrap()
    }

    fn mapping(tables: Vec<InputTableMapping>, files: Vec<InputFileMapping>) -> StorageMapping {
        StorageMapping {
            input: InputMapping { tables, files },
            ..Default::default()
        }
    }

    async fn workdir() -> (tempfile::TempDir, WorkingDirectory) {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::new(tmp.path(), "job-1", "cfg").unwrap();
        wd.create().await.unwrap();
        (tmp, wd)
    }

    #[tokio::test]
    async fn local_tables_get_data_and_manifest() {
        let (_tmp, wd) = workdir().await;
        let storage = Arc::new(MemoryStorage::default().with_table("in.c-main.users", "id,name\n1,ann\n"));
        let tables = vec![InputTableMapping {
            source: "in.c-main.users".to_string(),
            destination: Some("users.csv".to_string()),
            changed_since: Some("adaptive".to_string()),
            ..Default::default()
        }];
        let loader = DataLoader::new(storage, &component(StagingMode::Local), &mapping(tables, vec![]), &wd.data_dir());

        let result = loader
            .load_input(&InputTableStateList::default(), &InputFileStateList::default())
            .await
            .unwrap();

        let data = std::fs::read_to_string(wd.data_dir().join("in/tables/users.csv")).unwrap();
        assert_eq!(data, "id,name\n1,ann\n");
        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(wd.data_dir().join("in/tables/users.csv.manifest")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["id"], "in.c-main.users");
        assert!(manifest.get("s3").is_none());
        assert_eq!(
            result.table_state.last_import_date("in.c-main.users"),
            Some("2024-03-01T10:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn missing_table_is_user_error() {
        let (_tmp, wd) = workdir().await;
        let storage = Arc::new(MemoryStorage::default());
        let tables = vec![InputTableMapping {
            source: "in.c-main.missing".to_string(),
            ..Default::default()
        }];
        let loader = DataLoader::new(storage, &component(StagingMode::Local), &mapping(tables, vec![]), &wd.data_dir());

        let err = loader
            .load_input(&Default::default(), &Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::User(_)));
    }

    #[tokio::test]
    async fn s3_staging_writes_location_manifest_only() {
        let (_tmp, wd) = workdir().await;
        let storage = Arc::new(MemoryStorage::default().with_table("in.c-main.users", "id\n1\n"));
        let tables = vec![InputTableMapping {
            source: "in.c-main.users".to_string(),
            ..Default::default()
        }];
        let mut comp = component(StagingMode::S3);
        comp.configuration_format = DataFormat::Yaml;
        let loader = DataLoader::new(storage, &comp, &mapping(tables, vec![]), &wd.data_dir());

        loader.load_input(&Default::default(), &Default::default()).await.unwrap();

        let tables_dir = wd.data_dir().join("in/tables");
        assert!(!tables_dir.join("in.c-main.users.csv").exists());
        let manifest: serde_yaml::Value = serde_yaml::from_str(
            &std::fs::read_to_string(tables_dir.join("in.c-main.users.csv.manifest")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["s3"]["bucket"].as_str(), Some("staging-bucket"));
        assert!(manifest.get("abs").is_none());
    }

    #[tokio::test]
    async fn workspace_staging_loads_in_one_batch() {
        let (_tmp, wd) = workdir().await;
        let storage = Arc::new(
            MemoryStorage::default()
                .with_table("in.c-main.a", "id\n")
                .with_table("in.c-main.b", "id\n"),
        );
        let tables = vec![
            InputTableMapping {
                source: "in.c-main.a".to_string(),
                ..Default::default()
            },
            InputTableMapping {
                source: "in.c-main.b".to_string(),
                ..Default::default()
            },
        ];
        let loader = DataLoader::new(
            storage.clone(),
            &component(StagingMode::Workspace(WorkspaceBackend::Snowflake)),
            &mapping(tables, vec![]),
            &wd.data_dir(),
        )
        .with_workspace(Some(credentials("ws-1", true)));

        let result = loader.load_input(&Default::default(), &Default::default()).await.unwrap();
        assert_eq!(result.tables.len(), 2);
        assert_eq!(
            storage.calls(),
            vec![StorageCall::LoadWorkspace(
                "ws-1".to_string(),
                vec!["in.c-main.a".to_string(), "in.c-main.b".to_string()]
            )]
        );
        assert!(wd.data_dir().join("in/tables/in.c-main.a.csv.manifest").exists());
    }

    #[tokio::test]
    async fn adaptive_files_skip_already_imported() {
        let (_tmp, wd) = workdir().await;
        let storage = Arc::new(
            MemoryStorage::default()
                .with_file(10, "old.txt", &["export"], "old")
                .with_file(11, "new report.txt", &["export"], "new")
                .with_file(12, "other.txt", &["other"], "x"),
        );
        let files = vec![InputFileMapping {
            tags: vec!["export".to_string()],
            processed_tags: vec!["processed".to_string()],
            changed_since: Some("adaptive".to_string()),
            ..Default::default()
        }];
        let loader = DataLoader::new(storage, &component(StagingMode::Local), &mapping(vec![], files), &wd.data_dir());
        let mut state = InputFileStateList::default();
        state.upsert(&["export".to_string()], 10);

        let result = loader.load_input(&Default::default(), &state).await.unwrap();

        assert_eq!(result.files.len(), 1);
        let files_dir = wd.data_dir().join("in/files");
        assert_eq!(std::fs::read_to_string(files_dir.join("11_new report.txt")).unwrap(), "new");
        assert!(files_dir.join("11_new report.txt.manifest").exists());
        assert!(!files_dir.join("10_old.txt").exists());
        assert_eq!(result.file_state.last_imported_id(&["export".to_string()]), Some(11));
        assert_eq!(
            result.pending_tags,
            vec![PendingTags {
                file_id: 11,
                tags: vec!["processed".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn no_staging_rejects_mappings() {
        let (_tmp, wd) = workdir().await;
        let tables = vec![InputTableMapping {
            source: "in.c-main.a".to_string(),
            ..Default::default()
        }];
        let loader = DataLoader::new(
            Arc::new(MemoryStorage::default()),
            &component(StagingMode::None),
            &mapping(tables, vec![]),
            &wd.data_dir(),
        );
        assert!(loader.load_input(&Default::default(), &Default::default()).await.is_err());
    }
}
