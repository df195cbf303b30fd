use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;
use crate::error::ServiceError;

/// Plan-gated features of the backup surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanOption {
    Backup,
    Restore,
    AutoBackup,
    Migration,
}

impl PlanOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "Backup",
            Self::Restore => "Restore",
            Self::AutoBackup => "AutoBackup",
            Self::Migration => "Migration",
        }
    }
}

/// Permission checks for the calling user.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn can_edit_portal_settings(
        &self,
        tenant_id: TenantId,
        user_id: Uuid,
    ) -> Result<bool, ServiceError>;
}

/// Licensing and quota features of a tenant's plan.
#[async_trait]
pub trait PlanQuota: Send + Sync {
    async fn is_visible(&self, tenant_id: TenantId, option: PlanOption)
        -> Result<bool, ServiceError>;

    async fn auto_backup_restore_enabled(&self, tenant_id: TenantId) -> Result<bool, ServiceError>;
}
