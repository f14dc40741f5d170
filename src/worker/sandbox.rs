//! Per-job workspaces and their tar snapshots.
//!
//! Layout under the sandbox root:
//! `workspaces/{job_id}/` holds a job's files and
//! `snapshots/{job_id}.tar` archives that directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use uuid::Uuid;

use crate::error::SandboxError;

/// Name of the file holding the raw generation output.
pub const RESULT_FILE: &str = "result.txt";

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workspaces(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    fn snapshots(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn workspace_path(&self, job_id: Uuid) -> PathBuf {
        self.workspaces().join(job_id.to_string())
    }

    pub fn snapshot_path(&self, job_id: Uuid) -> PathBuf {
        self.snapshots().join(format!("{job_id}.tar"))
    }

    /// Create (or reuse) the job's workspace directory.
    pub async fn create_workspace(&self, job_id: Uuid) -> Result<PathBuf, SandboxError> {
        let path = self.workspace_path(job_id);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Write the generation output into the workspace.
    pub async fn write_result(&self, workspace: &Path, output: &str) -> Result<PathBuf, SandboxError> {
        let path = workspace.join(RESULT_FILE);
        tokio::fs::write(&path, output).await?;
        Ok(path)
    }

    /// Archive the job's workspace with `tar`. Returns the archive path.
    pub async fn snapshot(&self, job_id: Uuid) -> Result<PathBuf, SandboxError> {
        tokio::fs::create_dir_all(self.snapshots()).await?;
        let archive = self.snapshot_path(job_id);

        let child = Command::new("tar")
            .arg("-cf")
            .arg(&archive)
            .arg("-C")
            .arg(self.workspaces())
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(SNAPSHOT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| SandboxError::SnapshotFailed {
                job_id,
                reason: format!("tar timed out after {SNAPSHOT_TIMEOUT:?}"),
            })??;

        if !output.status.success() {
            return Err(SandboxError::SnapshotFailed {
                job_id,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspace_result_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path());
        let job_id = Uuid::new_v4();

        let ws = sandbox.create_workspace(job_id).await.unwrap();
        assert!(ws.is_dir());
        let result = sandbox.write_result(&ws, "hello").await.unwrap();
        assert_eq!(std::fs::read_to_string(result).unwrap(), "hello");

        let archive = sandbox.snapshot(job_id).await.unwrap();
        assert_eq!(archive, sandbox.snapshot_path(job_id));
        assert!(std::fs::metadata(&archive).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn snapshot_of_missing_workspace_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path());
        let err = sandbox.snapshot(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SandboxError::SnapshotFailed { .. }));
    }
}
