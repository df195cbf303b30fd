use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;
use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyEvent {
    BackupCompleted,
    RestoreStarted,
    RestoreCompleted,
    TransferStarted { region: String },
    TransferCompleted { region: String },
    TransferError { region: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub user_id: Option<Uuid>,
    pub event: NotifyEvent,
    pub link: Option<String>,
}

impl Notification {
    pub fn new(tenant_id: TenantId, event: NotifyEvent) -> Self {
        Self {
            tenant_id,
            user_id: None,
            event,
            link: None,
        }
    }

    pub fn to_user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), ServiceError>;
}

/// Notifier that only writes the notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), ServiceError> {
        tracing::info!(
            tenant_id = notification.tenant_id,
            user_id = ?notification.user_id,
            event = ?notification.event,
            link = notification.link.as_deref().unwrap_or(""),
            "Notification"
        );
        Ok(())
    }
}
