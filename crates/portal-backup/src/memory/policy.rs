use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::lock;
use crate::error::ServiceError;
use crate::services::{AccessControl, PlanOption, PlanQuota, TenantId};

struct PolicyState {
    settings_editors_allowed: bool,
    hidden: HashSet<PlanOption>,
    auto_backup_restore: bool,
}

/// Access and plan policy with switchable answers.
///
/// Starts permissive: every caller may edit settings, every option is
/// visible and the auto backup/restore quota feature is on.
pub struct MemoryPolicy {
    state: Mutex<PolicyState>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            state: Mutex::new(PolicyState {
                settings_editors_allowed: true,
                hidden: HashSet::new(),
                auto_backup_restore: true,
            }),
        }
    }
}

impl MemoryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_settings(&self) {
        lock(&self.state, "Policy").settings_editors_allowed = false;
    }

    pub fn hide(&self, option: PlanOption) {
        lock(&self.state, "Policy").hidden.insert(option);
    }

    pub fn set_auto_backup_restore(&self, enabled: bool) {
        lock(&self.state, "Policy").auto_backup_restore = enabled;
    }
}

#[async_trait]
impl AccessControl for MemoryPolicy {
    async fn can_edit_portal_settings(
        &self,
        _tenant_id: TenantId,
        _user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(lock(&self.state, "Policy").settings_editors_allowed)
    }
}

#[async_trait]
impl PlanQuota for MemoryPolicy {
    async fn is_visible(
        &self,
        _tenant_id: TenantId,
        option: PlanOption,
    ) -> Result<bool, ServiceError> {
        Ok(!lock(&self.state, "Policy").hidden.contains(&option))
    }

    async fn auto_backup_restore_enabled(&self, _tenant_id: TenantId) -> Result<bool, ServiceError> {
        Ok(lock(&self.state, "Policy").auto_backup_restore)
    }
}
