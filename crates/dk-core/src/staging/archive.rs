use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use dk_types::{DataFormat, DockyardError, FileUpload, Result};
use serde_json::Value;
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::DataLoader;
use crate::secrets::SecretResolver;

impl DataLoader {
    /// Zip the data directory and upload it as a private, temporary file.
    ///
    /// Secrets in the configuration and state files are encrypted again before they are
    /// packed; the working copy on disk is left untouched.
    pub async fn store_data_archive(
        &self,
        name: &str,
        tags: &[String],
        resolver: &SecretResolver,
    ) -> Result<u64> {
        let mut overrides = BTreeMap::new();
        let config_name = format!("config.{}", self.format().extension());
        for (relative, format) in [
            (config_name.as_str(), self.format()),
            ("in/state.json", DataFormat::Json),
            ("out/state.json", DataFormat::Json),
        ] {
            let path = self.data_dir.join(relative);
            if !tokio::fs::try_exists(&path).await? {
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            let tree: Value = format.decode(&text)?;
            let encrypted = resolver.encrypt_tree(&tree, resolver.scope().preferred_wrapper())?;
            overrides.insert(PathBuf::from(relative), format.encode(&encrypted)?.into_bytes());
        }

        let target_dir = tempfile::tempdir()?;
        let target = target_dir.path().join(format!("{name}.zip"));
        let root = self.data_dir.clone();
        let zip_path = target.clone();
        let entries = tokio::task::spawn_blocking(move || write_zip(&root, &zip_path, &overrides))
            .await
            .map_err(|e| DockyardError::Application(format!("Archive task failed: {e}")))??;

        let upload = FileUpload {
            name: format!("{name}.zip"),
            tags: tags.to_vec(),
            is_public: false,
            is_permanent: false,
            is_encrypted: true,
            notify: false,
        };
        let file_id = self.storage.upload_file(&target, &upload).await?;
        info!(archive = %upload.name, file_id, entries, "Data directory archived");
        Ok(file_id)
    }
}

fn zip_error(e: zip::result::ZipError) -> DockyardError {
    DockyardError::Application(format!("Failed to write archive: {e}"))
}

/// Pack `root` into `target`. Files listed in `overrides` (relative to `root`) are
/// stored with the given contents instead of what is on disk.
fn write_zip(root: &Path, target: &Path, overrides: &BTreeMap<PathBuf, Vec<u8>>) -> Result<usize> {
    let file = std::fs::File::create(target)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut count = 0;

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| DockyardError::Application(format!("Failed to read data directory: {e}")))?;
        if entry.path() == target {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| DockyardError::Application(e.to_string()))?;
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(zip_error)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(zip_error)?;
            match overrides.get(relative) {
                Some(contents) => zip.write_all(contents)?,
                None => {
                    let mut source = std::fs::File::open(entry.path())?;
                    std::io::copy(&mut source, &mut zip)?;
                }
            }
            count += 1;
        }
    }

    zip.finish().map_err(zip_error)?;
    Ok(count)
}
