//! Backup, restore and transfer runs.
//!
//! Each run implements [`ProgressTask`]. [`execute`] drives a task and turns
//! its `Result` into the completion state of the run's [`ProgressHandle`],
//! which is what callers observe.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::archive::TenantDataSource;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ArchiveError, StorageError, TaskError};
use crate::progress::{ProgressHandle, TaskKind};
use crate::replay::Replayer;
use crate::services::{Notification, Notifier, TenantDirectory, TenantId};
use crate::storage::StorageFactory;

pub mod backup;
pub mod restore;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::{BackupRequest, BackupTask};
pub use restore::{RestoreRequest, RestoreTask};
pub use transfer::{RegionReplayers, RegionTransfer, TransferRequest, TransferTask};

/// Collaborators shared by all runs.
#[derive(Clone)]
pub struct TaskServices {
    pub config: Arc<Config>,
    pub db: Database,
    pub tenants: Arc<dyn TenantDirectory>,
    pub source: Arc<dyn TenantDataSource>,
    pub replayer: Arc<dyn Replayer>,
    pub regions: Arc<dyn RegionTransfer>,
    pub notifier: Arc<dyn Notifier>,
    pub storage: StorageFactory,
}

/// One cancellable, progress-reporting run.
#[async_trait]
pub trait ProgressTask: Send + Sync {
    fn kind(&self) -> TaskKind;

    fn tenant_id(&self) -> TenantId;

    /// Runs all steps. Errors are returned, never stored by the task itself.
    async fn run(&self, progress: &ProgressHandle, cancel: &CancellationToken)
        -> Result<(), TaskError>;
}

/// Runs `task` and completes `progress` with its outcome.
pub async fn execute(
    task: &dyn ProgressTask,
    progress: &ProgressHandle,
    cancel: &CancellationToken,
) -> Result<(), TaskError> {
    let result = task.run(progress, cancel).await.map_err(normalize);
    match &result {
        Ok(()) => {
            progress.set_percentage(100.0);
            progress.complete(None);
        }
        Err(e) => {
            tracing::error!(
                kind = %task.kind(),
                tenant_id = task.tenant_id(),
                error = %e,
                "Task failed"
            );
            progress.complete(Some(e.to_string()));
        }
    }
    result
}

fn normalize(error: TaskError) -> TaskError {
    match error {
        TaskError::Storage(StorageError::Canceled) | TaskError::Archive(ArchiveError::Canceled) => {
            TaskError::Canceled
        }
        other => other,
    }
}

pub(crate) fn check_canceled(cancel: &CancellationToken) -> Result<(), TaskError> {
    if cancel.is_cancelled() {
        Err(TaskError::Canceled)
    } else {
        Ok(())
    }
}

/// Sends a notification. Delivery failures are logged only.
pub(crate) async fn notify(notifier: &dyn Notifier, notification: Notification) {
    let event = notification.event.clone();
    if let Err(e) = notifier.send(notification).await {
        tracing::warn!(event = ?event, error = %e, "Failed to send notification");
    }
}

/// Removes a temp artifact, logging failures.
pub(crate) async fn remove_temp(path: &Path) {
    let result = if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed temp artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp artifact"),
    }
}

pub(crate) fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TaskError + '_ {
    move |source| TaskError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoopPublisher, ProgressState};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Scripted {
        fail_with: Option<fn() -> TaskError>,
        ran: AtomicBool,
    }

    #[async_trait]
    impl ProgressTask for Scripted {
        fn kind(&self) -> TaskKind {
            TaskKind::Backup
        }

        fn tenant_id(&self) -> TenantId {
            1
        }

        async fn run(
            &self,
            progress: &ProgressHandle,
            _cancel: &CancellationToken,
        ) -> Result<(), TaskError> {
            self.ran.store(true, Ordering::SeqCst);
            progress.set_percentage(40.0);
            match self.fail_with {
                Some(f) => Err(f()),
                None => Ok(()),
            }
        }
    }

    fn handle() -> ProgressHandle {
        ProgressHandle::new(
            ProgressState::new(TaskKind::Backup, 1),
            Arc::new(NoopPublisher),
        )
    }

    #[tokio::test]
    async fn test_success_completes_at_hundred() {
        let task = Scripted {
            fail_with: None,
            ran: AtomicBool::new(false),
        };
        let progress = handle();
        execute(&task, &progress, &CancellationToken::new())
            .await
            .unwrap();

        let state = progress.snapshot();
        assert!(task.ran.load(Ordering::SeqCst));
        assert!(state.is_completed);
        assert_eq!(state.percentage, 100.0);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_stored_in_state() {
        let task = Scripted {
            fail_with: Some(|| TaskError::BackupNotFound),
            ran: AtomicBool::new(false),
        };
        let progress = handle();
        let result = execute(&task, &progress, &CancellationToken::new()).await;

        assert!(matches!(result, Err(TaskError::BackupNotFound)));
        let state = progress.snapshot();
        assert!(state.is_completed);
        assert_eq!(state.error.as_deref(), Some("backup not found"));
        assert_eq!(state.percentage, 40.0);
    }

    #[tokio::test]
    async fn test_storage_cancel_is_reported_as_cancel() {
        let task = Scripted {
            fail_with: Some(|| TaskError::Storage(StorageError::Canceled)),
            ran: AtomicBool::new(false),
        };
        let result = execute(&task, &handle(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(TaskError::Canceled)));
    }
}
