use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::error::ServiceError;
use crate::services::{Notification, Notifier};

/// Notifier that keeps every notification it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent, "Notifier").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), ServiceError> {
        lock(&self.sent, "Notifier").push(notification);
        Ok(())
    }
}
