use std::path::{Path, PathBuf};

use dk_types::{DockyardError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::security::ensure_within;

/// Container path the data directory is mounted at.
pub const DATA_MOUNT: &str = "/data";
/// Container path the scratch directory is mounted at.
pub const TMP_MOUNT: &str = "/tmp";

/// Mount permission mode for Docker volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    /// Docker volume suffix string.
    pub fn as_docker_flag(&self) -> &str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

/// A validated Docker bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
}

impl MountSpec {
    /// Format as Docker `--volume` argument value: `host:container:mode`.
    pub fn to_docker_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode.as_docker_flag()
        )
    }
}

/// Host-side directory tree of one job definition.
///
/// ```text
/// <work_root>/<job_id>/<label>/
///   data/   -> /data  (config, in/, out/)
///   tmp/    -> /tmp
/// ```
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    work_root: PathBuf,
    root: PathBuf,
}

impl WorkingDirectory {
    pub fn new(work_root: &Path, job_id: &str, label: &str) -> Result<Self> {
        let root = ensure_within(work_root, &Path::new(job_id).join(label))?;
        Ok(Self {
            work_root: work_root.to_path_buf(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create the data layout expected by components. Leftovers of a previous attempt are wiped.
    pub async fn create(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.root).await? {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        let data = self.data_dir();
        for dir in [
            data.join("in/tables"),
            data.join("in/files"),
            data.join("in/user"),
            data.join("out/tables"),
            data.join("out/files"),
            self.tmp_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        debug!(path = %self.root.display(), "Working directory created");
        Ok(())
    }

    /// Bind mounts for the container, validated against the work root.
    pub fn mounts(&self) -> Result<Vec<MountSpec>> {
        let data = ensure_within(&self.work_root, &self.data_dir())?;
        let tmp = ensure_within(&self.work_root, &self.tmp_dir())?;
        Ok(vec![
            MountSpec {
                host_path: data,
                container_path: DATA_MOUNT.to_string(),
                mode: MountMode::ReadWrite,
            },
            MountSpec {
                host_path: tmp,
                container_path: TMP_MOUNT.to_string(),
                mode: MountMode::ReadWrite,
            },
        ])
    }

    /// Remove the tree. Safe to call more than once.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "Working directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove working directory"),
        }
    }
}

/// Reject mounts whose host side leaves `work_root`.
pub fn validate_mounts(work_root: &Path, mounts: &[MountSpec]) -> Result<()> {
    for mount in mounts {
        ensure_within(work_root, &mount.host_path).map_err(|_| {
            DockyardError::Application(format!(
                "Mount host path not in work root: {}",
                mount.host_path.display()
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_spec_docker_arg() {
        let spec = MountSpec {
            host_path: PathBuf::from("/srv/work/job/data"),
            container_path: DATA_MOUNT.to_string(),
            mode: MountMode::ReadWrite,
        };
        assert_eq!(spec.to_docker_arg(), "/srv/work/job/data:/data:rw");
        assert_eq!(MountMode::ReadOnly.as_docker_flag(), "ro");
    }

    #[test]
    fn working_directory_rejects_traversal() {
        let root = Path::new("/srv/work");
        assert!(WorkingDirectory::new(root, "../escape", "c").is_err());
        assert!(WorkingDirectory::new(root, "job-1", "cfg-1").is_ok());
    }

    #[tokio::test]
    async fn working_directory_layout_and_mounts() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::new(tmp.path(), "job-1", "cfg-1").unwrap();
        wd.create().await.unwrap();

        assert!(wd.data_dir().join("in/tables").is_dir());
        assert!(wd.data_dir().join("out/files").is_dir());
        assert!(wd.tmp_dir().is_dir());

        let mounts = wd.mounts().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].container_path, "/data");
        assert_eq!(mounts[1].container_path, "/tmp");
        validate_mounts(tmp.path(), &mounts).unwrap();

        wd.remove().await;
        assert!(!wd.root().exists());
        // Idempotent
        wd.remove().await;
    }

    #[test]
    fn validate_mounts_outside_root() {
        let mounts = vec![MountSpec {
            host_path: PathBuf::from("/etc"),
            container_path: DATA_MOUNT.to_string(),
            mode: MountMode::ReadOnly,
        }];
        assert!(validate_mounts(Path::new("/srv/work"), &mounts).is_err());
    }
}
