//! Per-user batch session.
//!
//! A [`BatchSession`] owns the scratch workspace for exactly one batch and
//! the flag used to cancel it. The workspace is a [`TempDir`] under
//! `<temp_root>/<user_id>`, so it is removed when the session drops, whether
//! the batch finished, failed or was cancelled. The user directory goes with
//! it once nothing else lives there. Two batches never share a session.

use crate::config::PipelineConfig;
use crate::error::BatchError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

const UPLOADS_DIR: &str = "uploads";
const CORRECTED_DIR: &str = "corrected";

/// Cloneable handle that cancels a running batch from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Workspace and cancellation state of one batch.
#[derive(Debug)]
pub struct BatchSession {
    user_id: u64,
    user_root: PathBuf,
    workspace: TempDir,
    cancelled: CancelHandle,
}

impl BatchSession {
    /// Create the workspace for a new batch of `user_id`.
    pub fn begin(user_id: u64, config: &PipelineConfig) -> Result<Self, BatchError> {
        let user_root = config.temp_root.join(user_id.to_string());
        std::fs::create_dir_all(&user_root).map_err(|source| BatchError::Workspace {
            path: user_root.clone(),
            source,
        })?;

        let workspace = tempfile::Builder::new()
            .prefix("batch-")
            .tempdir_in(&user_root)
            .map_err(|source| BatchError::Workspace {
                path: user_root.clone(),
                source,
            })?;

        for sub in [UPLOADS_DIR, CORRECTED_DIR] {
            let dir = workspace.path().join(sub);
            std::fs::create_dir(&dir)
                .map_err(|source| BatchError::Workspace { path: dir, source })?;
        }

        info!(
            "Session started for user {} at {}",
            user_id,
            workspace.path().display()
        );
        Ok(Self {
            user_id,
            user_root,
            workspace,
            cancelled: CancelHandle(Arc::new(AtomicBool::new(false))),
        })
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Where staged uploads are written.
    pub fn uploads_dir(&self) -> PathBuf {
        self.workspace.path().join(UPLOADS_DIR)
    }

    /// Where `_corrected` derived files are written.
    pub fn corrected_dir(&self) -> PathBuf {
        self.workspace.path().join(CORRECTED_DIR)
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancelled.clone()
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) was called.
    pub fn check_cancelled(&self) -> Result<(), BatchError> {
        if self.is_cancelled() {
            debug!("Batch for user {} observed cancellation", self.user_id);
            return Err(BatchError::Cancelled {
                user_id: self.user_id,
            });
        }
        Ok(())
    }
}

impl Drop for BatchSession {
    fn drop(&mut self) {
        // The TempDir's own cleanup finds nothing left to do.
        if let Err(e) = std::fs::remove_dir_all(self.workspace.path()) {
            debug!("Workspace {} not removed: {}", self.workspace.path().display(), e);
        }
        remove_if_empty(&self.user_root);
    }
}

/// Remove `dir` if it is empty. A directory still in use is left alone.
pub(crate) fn remove_if_empty(dir: &Path) {
    if std::fs::remove_dir(dir).is_ok() {
        debug!("Removed empty directory {}", dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig::builder().temp_root(dir).build().unwrap()
    }

    #[test]
    fn test_workspace_lives_under_user_dir() {
        let root = tempfile::tempdir().unwrap();
        let session = BatchSession::begin(42, &config_in(root.path())).unwrap();
        assert!(session.workspace().starts_with(root.path().join("42")));
        assert!(session.uploads_dir().is_dir());
        assert!(session.corrected_dir().is_dir());
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let session = BatchSession::begin(7, &config_in(root.path())).unwrap();
        let ws = session.workspace().to_path_buf();
        std::fs::write(session.uploads_dir().join("x.pdf"), b"%PDF").unwrap();
        drop(session);
        assert!(!ws.exists());
    }

    #[test]
    fn test_user_dir_removed_with_last_session() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        let user_dir = root.path().join("3");

        let first = BatchSession::begin(3, &config).unwrap();
        let second = BatchSession::begin(3, &config).unwrap();
        drop(first);
        assert!(user_dir.is_dir(), "still used by the second session");
        drop(second);
        assert!(!user_dir.exists());
    }

    #[test]
    fn test_sessions_do_not_share_workspace() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        let a = BatchSession::begin(1, &config).unwrap();
        let b = BatchSession::begin(1, &config).unwrap();
        assert_ne!(a.workspace(), b.workspace());
    }

    #[test]
    fn test_cancel_from_handle() {
        let root = tempfile::tempdir().unwrap();
        let session = BatchSession::begin(9, &config_in(root.path())).unwrap();
        assert!(session.check_cancelled().is_ok());
        session.cancel_handle().cancel();
        assert!(session.is_cancelled());
        assert!(matches!(
            session.check_cancelled(),
            Err(BatchError::Cancelled { user_id: 9 })
        ));
    }

    #[test]
    fn test_unwritable_root_is_workspace_error() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let err = BatchSession::begin(1, &config_in(&file)).unwrap_err();
        assert!(matches!(err, BatchError::Workspace { .. }));
    }
}
