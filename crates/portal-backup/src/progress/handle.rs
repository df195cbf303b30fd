use std::sync::{Arc, Mutex, MutexGuard};

use super::publisher::ProgressPublisher;
use super::reporter::ProgressReporter;
use super::state::ProgressState;
use crate::services::TenantId;

/// Shared, publishing view of a run's [`ProgressState`].
///
/// Every change is pushed to the publisher. Once the run is completed the
/// handle ignores further updates.
#[derive(Clone)]
pub struct ProgressHandle {
    state: Arc<Mutex<ProgressState>>,
    publisher: Arc<dyn ProgressPublisher>,
}

impl ProgressHandle {
    pub fn new(state: ProgressState, publisher: Arc<dyn ProgressPublisher>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            publisher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Progress state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.lock().is_completed
    }

    pub fn set_percentage(&self, percentage: f64) {
        let changed = {
            let mut state = self.lock();
            state.advance(percentage).then(|| state.clone())
        };
        if let Some(state) = changed {
            self.publish(&state);
        }
    }

    pub fn set_link(&self, link: impl Into<String>) {
        self.update(|s| s.link = Some(link.into()));
    }

    pub fn set_new_tenant(&self, tenant_id: TenantId) {
        self.update(|s| s.new_tenant_id = Some(tenant_id));
    }

    pub fn set_dump(&self, dump: bool) {
        self.update(|s| s.dump = dump);
    }

    /// Marks the run completed, storing the error message of a failure.
    pub fn complete(&self, error: Option<String>) {
        let changed = {
            let mut state = self.lock();
            state.complete(error).then(|| state.clone())
        };
        if let Some(state) = changed {
            self.publish(&state);
        }
    }

    /// Re-publishes the current state.
    pub fn publish_current(&self) {
        let state = self.snapshot();
        self.publish(&state);
    }

    fn update(&self, f: impl FnOnce(&mut ProgressState)) {
        let changed = {
            let mut state = self.lock();
            if state.is_completed {
                None
            } else {
                f(&mut state);
                Some(state.clone())
            }
        };
        if let Some(state) = changed {
            self.publish(&state);
        }
    }

    fn publish(&self, state: &ProgressState) {
        if let Err(e) = self.publisher.publish(state) {
            tracing::warn!(
                run_id = %state.id,
                tenant_id = state.tenant_id,
                error = %e,
                "Failed to publish progress"
            );
        }
    }
}

impl ProgressReporter for ProgressHandle {
    fn report(&self, percentage: f64) {
        self.set_percentage(percentage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{BroadcastPublisher, PublishError, TaskKind};

    struct Failing;

    impl ProgressPublisher for Failing {
        fn publish(&self, _state: &ProgressState) -> Result<(), PublishError> {
            Err(PublishError::Channel("unreachable".to_string()))
        }
    }

    #[test]
    fn test_updates_are_published() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();
        let handle = ProgressHandle::new(
            ProgressState::new(TaskKind::Backup, 5),
            Arc::new(publisher),
        );

        handle.set_percentage(10.0);
        handle.set_percentage(5.0);
        handle.set_link("https://files/1");

        assert_eq!(rx.try_recv().unwrap().percentage, 10.0);
        assert_eq!(
            rx.try_recv().unwrap().link.as_deref(),
            Some("https://files/1")
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_nothing_published_after_completion() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();
        let handle = ProgressHandle::new(
            ProgressState::new(TaskKind::Restore, 5),
            Arc::new(publisher),
        );

        handle.complete(None);
        handle.set_percentage(50.0);
        handle.set_new_tenant(8);
        handle.complete(Some("late".to_string()));

        let completed = rx.try_recv().unwrap();
        assert!(completed.is_completed);
        assert!(rx.try_recv().is_err());
        assert!(handle.snapshot().error.is_none());
    }

    #[test]
    fn test_publish_failure_does_not_interrupt() {
        let handle = ProgressHandle::new(
            ProgressState::new(TaskKind::Transfer, 1),
            Arc::new(Failing),
        );
        handle.set_percentage(30.0);
        handle.complete(None);

        let state = handle.snapshot();
        assert_eq!(state.percentage, 30.0);
        assert!(state.is_completed);
    }
}
