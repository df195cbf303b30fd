use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use super::state::ProgressState;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to persist progress: {0}")]
    Store(#[from] DatabaseError),

    #[error("Failed to publish progress: {0}")]
    Channel(String),
}

/// Side channel that makes progress visible outside the running task.
///
/// Implementations must not block; a failure is logged by the caller and
/// never aborts the task.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, state: &ProgressState) -> Result<(), PublishError>;
}

/// Publisher that drops every state.
pub struct NoopPublisher;

impl ProgressPublisher for NoopPublisher {
    fn publish(&self, _state: &ProgressState) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Broadcasts progress states to in-process subscribers.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: Arc<broadcast::Sender<ProgressState>>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressState> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, state: &ProgressState) -> Result<(), PublishError> {
        // Ignore errors - no active receivers
        let _ = self.sender.send(state.clone());
        Ok(())
    }
}

/// Fans a state out to several publishers. Every publisher is tried; the
/// first failure is returned.
#[derive(Default, Clone)]
pub struct PublisherSet {
    publishers: Vec<Arc<dyn ProgressPublisher>>,
}

impl PublisherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn ProgressPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

impl ProgressPublisher for PublisherSet {
    fn publish(&self, state: &ProgressState) -> Result<(), PublishError> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(state) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TaskKind;

    struct Failing;

    impl ProgressPublisher for Failing {
        fn publish(&self, _state: &ProgressState) -> Result<(), PublishError> {
            Err(PublishError::Channel("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_broadcast_publisher() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        let state = ProgressState::new(TaskKind::Backup, 3);

        publisher.publish(&state).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, state.id);
    }

    #[test]
    fn test_broadcast_without_receivers() {
        let publisher = BroadcastPublisher::default();
        assert!(publisher
            .publish(&ProgressState::new(TaskKind::Backup, 1))
            .is_ok());
    }

    #[tokio::test]
    async fn test_publisher_set_tries_all() {
        let broadcast = BroadcastPublisher::new(8);
        let mut rx = broadcast.subscribe();
        let set = PublisherSet::new()
            .with(Arc::new(Failing))
            .with(Arc::new(broadcast.clone()));

        let result = set.publish(&ProgressState::new(TaskKind::Restore, 1));
        assert!(result.is_err());
        assert!(rx.recv().await.is_ok());
    }
}
