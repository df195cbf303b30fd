use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

pub type TenantId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenantStatus {
    Active,
    Restoring,
    Suspended,
    RemovePending,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Restoring => "restoring",
            Self::Suspended => "suspended",
            Self::RemovePending => "remove_pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub alias: String,
    pub name: String,
    pub status: TenantStatus,
    pub owner_id: Uuid,
    /// Custom domain bound to the portal, if any.
    pub mapped_domain: Option<String>,
    pub payment_id: Option<String>,
}

impl Tenant {
    pub fn new(id: TenantId, alias: impl Into<String>, owner_id: Uuid) -> Self {
        let alias = alias.into();
        Self {
            id,
            name: alias.clone(),
            alias,
            status: TenantStatus::Active,
            owner_id,
            mapped_domain: None,
            payment_id: None,
        }
    }

    pub fn is_operable(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Tenant registry of the platform.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, ServiceError>;

    /// Looks a tenant up by alias. Tenants pending removal are not returned.
    async fn get_tenant_by_alias(&self, alias: &str) -> Result<Option<Tenant>, ServiceError>;

    async fn save_tenant(&self, tenant: &Tenant) -> Result<Tenant, ServiceError>;

    async fn set_status(&self, id: TenantId, status: TenantStatus) -> Result<(), ServiceError>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>, ServiceError>;

    /// Marks the tenant for removal and releases its alias.
    async fn remove_tenant(&self, id: TenantId) -> Result<(), ServiceError>;

    /// Drops any cached tenant data after a whole-instance restore.
    async fn clear_cache(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
