use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backup,
    Restore,
    Transfer,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Backup => "backup",
            TaskKind::Restore => "restore",
            TaskKind::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "backup" => Some(TaskKind::Backup),
            "restore" => Some(TaskKind::Restore),
            "transfer" => Some(TaskKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one backup, restore or transfer run.
///
/// Serialized wholesale when it crosses a process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// Run id.
    pub id: Uuid,
    pub kind: TaskKind,
    pub tenant_id: TenantId,
    /// 0 to 100, never decreasing within a run.
    pub percentage: f64,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Artifact link of a backup, or redirect link of a transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_tenant_id: Option<TenantId>,
    #[serde(default)]
    pub dump: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgressState {
    pub fn new(kind: TaskKind, tenant_id: TenantId) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            tenant_id,
            percentage: 0.0,
            is_completed: false,
            error: None,
            link: None,
            new_tenant_id: None,
            dump: false,
            updated_at: Utc::now(),
        }
    }

    /// Raises the percentage. Returns whether the state changed.
    pub fn advance(&mut self, percentage: f64) -> bool {
        if self.is_completed || !percentage.is_finite() {
            return false;
        }
        let percentage = percentage.clamp(0.0, 100.0);
        if percentage <= self.percentage {
            return false;
        }
        self.percentage = percentage;
        self.updated_at = Utc::now();
        true
    }

    /// Marks the run finished. Returns false if it already was.
    pub fn complete(&mut self, error: Option<String>) -> bool {
        if self.is_completed {
            return false;
        }
        self.is_completed = true;
        self.error = error;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_failed(&self) -> bool {
        self.is_completed && self.error.is_some()
    }
}
