//! Runtime for backup, restore and transfer runs.
//!
//! At most one run per tenant and task kind is live at a time. Runs are
//! spawned on tokio and limited by a semaphore; their states are mirrored
//! into the [`ProgressStore`] and a broadcast channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::progress::{
    BroadcastPublisher, ProgressHandle, ProgressPublisher, ProgressState, ProgressStore,
    PublisherSet, TaskKind,
};
use crate::services::TenantId;
use crate::tasks::{execute, ProgressTask};

type Key = (TenantId, TaskKind);

/// Error recorded for runs a previous process left unfinished.
pub const INTERRUPTED: &str = "operation interrupted";

struct LiveTask {
    progress: ProgressHandle,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

pub struct BackupWorker {
    tasks: Mutex<HashMap<Key, LiveTask>>,
    store: Arc<ProgressStore>,
    broadcast: Arc<BroadcastPublisher>,
    publisher: Arc<dyn ProgressPublisher>,
    limiter: Arc<Semaphore>,
}

impl BackupWorker {
    /// Runs the store still records as going are marked failed, since no
    /// process drives them any more.
    pub fn new(store: Arc<ProgressStore>, max_concurrent: usize) -> Self {
        for mut state in store.unfinished() {
            state.complete(Some(INTERRUPTED.to_string()));
            warn!("{} {} of tenant {} was interrupted", state.kind, state.id, state.tenant_id);
            if let Err(e) = store.publish(&state) {
                warn!(
                    "Failed to record interrupted {} of tenant {}: {}",
                    state.kind, state.tenant_id, e
                );
            }
        }

        let broadcast = Arc::new(BroadcastPublisher::default());
        let publisher = PublisherSet::new()
            .with(store.clone())
            .with(broadcast.clone());
        Self {
            tasks: Mutex::new(HashMap::new()),
            store,
            broadcast,
            publisher: Arc::new(publisher),
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, LiveTask>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Worker task table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Receives every published state of every run.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressState> {
        self.broadcast.subscribe()
    }

    /// Starts `task` unless a run of the same tenant and kind is still
    /// going, in which case that run's state is returned instead.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, task: Arc<dyn ProgressTask>) -> ProgressState {
        let key = (task.tenant_id(), task.kind());
        let mut tasks = self.lock();
        if let Some(live) = tasks.get(&key) {
            if !live.progress.is_completed() {
                debug!("{} of tenant {} already running", key.1, key.0);
                return live.progress.snapshot();
            }
        }

        let progress = ProgressHandle::new(
            ProgressState::new(key.1, key.0),
            self.publisher.clone(),
        );
        progress.publish_current();
        let cancel = CancellationToken::new();
        let state = progress.snapshot();
        info!("Starting {} {} of tenant {}", key.1, state.id, key.0);

        let join = tokio::spawn({
            let progress = progress.clone();
            let cancel = cancel.clone();
            let limiter = self.limiter.clone();
            async move {
                let permit = tokio::select! {
                    permit = limiter.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                if permit.is_none() {
                    progress.complete(Some(TaskError::Canceled.to_string()));
                    return;
                }
                // Failures are stored in the progress state.
                let _ = execute(task.as_ref(), &progress, &cancel).await;
            }
        });

        tasks.insert(
            key,
            LiveTask {
                progress,
                cancel,
                join: Some(join),
            },
        );
        state
    }

    /// Latest state of the tenant's run. A completed run is forgotten once
    /// its state has been returned.
    pub fn progress(&self, tenant_id: TenantId, kind: TaskKind) -> Option<ProgressState> {
        let key = (tenant_id, kind);
        let live = self.lock().get(&key).map(|live| live.progress.snapshot());
        let state = match live {
            Some(state) => {
                if state.is_completed {
                    self.lock().remove(&key);
                }
                state
            }
            None => self.store.get(tenant_id, kind)?,
        };
        if state.is_completed {
            self.forget(tenant_id, kind);
        }
        Some(state)
    }

    fn forget(&self, tenant_id: TenantId, kind: TaskKind) {
        if let Err(e) = self.store.remove(tenant_id, kind) {
            warn!("Failed to forget {} of tenant {}: {}", kind, tenant_id, e);
        }
    }

    pub fn is_running(&self, tenant_id: TenantId, kind: TaskKind) -> bool {
        self.lock()
            .get(&(tenant_id, kind))
            .is_some_and(|live| !live.progress.is_completed())
    }

    /// Requests cancellation. Returns false when nothing is running.
    pub fn cancel(&self, tenant_id: TenantId, kind: TaskKind) -> bool {
        match self.lock().get(&(tenant_id, kind)) {
            Some(live) if !live.progress.is_completed() => {
                live.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Waits for the tenant's run to finish and returns its final state
    /// without forgetting it.
    pub async fn wait(&self, tenant_id: TenantId, kind: TaskKind) -> Option<ProgressState> {
        let (join, progress) = {
            let mut tasks = self.lock();
            let live = tasks.get_mut(&(tenant_id, kind))?;
            (live.join.take(), live.progress.clone())
        };
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!("{} of tenant {} panicked: {}", kind, tenant_id, e);
                progress.complete(Some(e.to_string()));
            }
        }
        Some(progress.snapshot())
    }

    /// Cancels every live run.
    pub fn shutdown(&self) {
        for live in self.lock().values() {
            live.cancel.cancel();
        }
    }
}
