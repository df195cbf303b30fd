use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::lock;
use crate::archive::{BlobRef, Row, Scope, TableSchema, TenantDataSource};
use crate::column_mapper::{ColumnValue, TENANTS_TABLE};
use crate::error::ServiceError;
use crate::replay::{text_column, TenantDataSink};
use crate::services::{Tenant, TenantDirectory, TenantId, TenantStatus};

/// Tables of a portal, parents before children.
pub fn portal_schema() -> Vec<TableSchema> {
    vec![
        TableSchema::new("tenants", TENANTS_TABLE).with_id("id"),
        TableSchema::new("tenants", "tenants_tariff")
            .with_id("id")
            .with_tenant("tenant"),
        TableSchema::new("core", "core_user").with_tenant("tenant"),
        TableSchema::new("core", "core_group").with_tenant("tenant"),
        TableSchema::new("core", "core_usergroup").with_tenant("tenant"),
        TableSchema::new("files", "files_folder")
            .with_id("id")
            .with_tenant("tenant_id")
            .with_ref("parent_id", "files_folder", "id"),
        TableSchema::new("files", "files_file")
            .with_id("id")
            .with_tenant("tenant_id")
            .with_ref("folder_id", "files_folder", "id"),
        TableSchema::new("files", "files_security")
            .with_tenant("tenant_id")
            .with_typed_ref(
                "entry_id",
                "entry_type",
                &[(1, "files_folder", "id"), (2, "files_file", "id")],
            ),
    ]
}

#[derive(Default)]
struct PortalData {
    tenants: BTreeMap<TenantId, Tenant>,
    tables: BTreeMap<String, Vec<Row>>,
    blobs: BTreeMap<(i64, i32), (BlobRef, Vec<u8>)>,
    cache_clears: usize,
}

impl PortalData {
    fn next_tenant_id(&self) -> TenantId {
        self.tenants.keys().next_back().copied().unwrap_or(0) + 1
    }

    fn next_row_id(&self, table: &str, column: &str) -> i64 {
        self.tables
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|r| r.get(column).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn push(&mut self, table: &str, row: Value) -> i64 {
        let id = row.get("id").and_then(Value::as_i64).unwrap_or(0);
        if let Value::Object(row) = row {
            self.tables.entry(table.to_string()).or_default().push(row);
        }
        id
    }
}

fn tenant_row(tenant: &Tenant) -> Row {
    let value = json!({
        "id": tenant.id,
        "alias": tenant.alias,
        "name": tenant.name,
        "status": tenant.status.as_str(),
        "owner_id": tenant.owner_id.to_string(),
        "mapped_domain": tenant.mapped_domain,
        "payment_id": tenant.payment_id,
    });
    match value {
        Value::Object(row) => row,
        _ => Row::new(),
    }
}

fn tenant_from_row(id: TenantId, row: &Row) -> Result<Tenant, ServiceError> {
    let alias = text_column(row, "alias")
        .ok_or_else(|| ServiceError::Rejected("tenant row without alias".to_string()))?;
    let status = match text_column(row, "status").as_deref() {
        Some("restoring") => TenantStatus::Restoring,
        Some("suspended") => TenantStatus::Suspended,
        Some("remove_pending") => TenantStatus::RemovePending,
        _ => TenantStatus::Active,
    };
    Ok(Tenant {
        id,
        name: text_column(row, "name").unwrap_or_else(|| alias.clone()),
        alias,
        status,
        owner_id: text_column(row, "owner_id")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_default(),
        mapped_domain: text_column(row, "mapped_domain"),
        payment_id: text_column(row, "payment_id"),
    })
}

/// A whole portal database in memory: tenant registry, relational tables
/// and file blobs.
#[derive(Default)]
pub struct MemoryPortal {
    data: Mutex<PortalData>,
}

impl MemoryPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an active tenant with a fresh owner.
    pub fn seed_tenant(&self, id: TenantId, alias: &str) -> Tenant {
        let tenant = Tenant::new(id, alias, Uuid::new_v4());
        lock(&self.data, "Portal").tenants.insert(id, tenant.clone());
        tenant
    }

    /// Portal with one tenant owning a tariff, a user, two folders, two
    /// files with content and one share.
    pub fn with_sample_tenant(id: TenantId, alias: &str) -> Self {
        let portal = Self::new();
        portal.add_sample_tenant(id, alias);
        portal
    }

    pub fn add_sample_tenant(&self, id: TenantId, alias: &str) -> Tenant {
        let tenant = self.seed_tenant(id, alias);
        let owner = tenant.owner_id.to_string();
        let mut data = lock(&self.data, "Portal");

        let tariff_id = data.next_row_id("tenants_tariff", "id");
        data.push(
            "tenants_tariff",
            json!({ "id": tariff_id, "tenant": id, "tariff": 1, "quantity": 1 }),
        );
        data.push(
            "core_user",
            json!({
                "id": owner,
                "tenant": id,
                "username": "owner",
                "email": format!("owner@{}.example", alias),
            }),
        );

        let root = data.next_row_id("files_folder", "id");
        data.push(
            "files_folder",
            json!({ "id": root, "tenant_id": id, "parent_id": 0, "title": "My documents", "create_by": owner }),
        );
        let child = data.push(
            "files_folder",
            json!({ "id": root + 1, "tenant_id": id, "parent_id": root, "title": "Reports", "create_by": owner }),
        );

        let first = data.next_row_id("files_file", "id");
        for (file_id, folder_id, title, content) in [
            (first, root, "readme.txt", &b"hello"[..]),
            (first + 1, child, "q3.docx", &b"quarterly report"[..]),
        ] {
            data.push(
                "files_file",
                json!({
                    "id": file_id,
                    "version": 1,
                    "tenant_id": id,
                    "folder_id": folder_id,
                    "title": title,
                    "content_length": content.len(),
                    "create_by": owner,
                }),
            );
            let ext = title.rfind('.').map(|i| &title[i..]).unwrap_or("");
            let mut blob = BlobRef::new(file_id, 1, ext);
            blob.tenant_id = Some(id);
            data.blobs.insert((file_id, 1), (blob, content.to_vec()));
        }

        data.push(
            "files_security",
            json!({
                "tenant_id": id,
                "entry_id": child,
                "entry_type": 1,
                "subject": owner,
                "security": 2,
                "owner": owner,
            }),
        );
        tenant
    }

    /// Rows of a table, restricted to one tenant when given.
    pub fn table_rows(&self, table: &str, tenant_id: Option<TenantId>) -> Vec<Row> {
        let data = lock(&self.data, "Portal");
        if table == TENANTS_TABLE {
            return data
                .tenants
                .values()
                .filter(|t| tenant_id.map_or(true, |id| t.id == id))
                .map(tenant_row)
                .collect();
        }
        let tenant_column = portal_schema()
            .into_iter()
            .find(|s| s.name == table)
            .and_then(|s| s.tenant_column);
        data.tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| match (tenant_id, &tenant_column) {
                (Some(id), Some(column)) => row.get(column).and_then(Value::as_i64) == Some(id),
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn blob_count(&self, tenant_id: Option<TenantId>) -> usize {
        lock(&self.data, "Portal")
            .blobs
            .values()
            .filter(|(b, _)| tenant_id.is_none() || b.tenant_id == tenant_id)
            .count()
    }

    /// Number of cache flushes requested by whole-instance restores.
    pub fn cache_clears(&self) -> usize {
        lock(&self.data, "Portal").cache_clears
    }

    fn in_scope(row: &Row, schema: &TableSchema, scope: Scope) -> bool {
        match (scope, &schema.tenant_column) {
            (Scope::Tenant(id), Some(column)) => row.get(column).and_then(Value::as_i64) == Some(id),
            _ => true,
        }
    }
}

#[async_trait]
impl TenantDirectory for MemoryPortal {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, ServiceError> {
        Ok(lock(&self.data, "Portal").tenants.get(&id).cloned())
    }

    async fn get_tenant_by_alias(&self, alias: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(lock(&self.data, "Portal")
            .tenants
            .values()
            .find(|t| t.status != TenantStatus::RemovePending && t.alias.eq_ignore_ascii_case(alias))
            .cloned())
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<Tenant, ServiceError> {
        let mut data = lock(&self.data, "Portal");
        let clash = data.tenants.values().any(|t| {
            t.id != tenant.id
                && t.status != TenantStatus::RemovePending
                && t.alias.eq_ignore_ascii_case(&tenant.alias)
        });
        if clash {
            return Err(ServiceError::Rejected(format!(
                "alias '{}' is already taken",
                tenant.alias
            )));
        }
        data.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant.clone())
    }

    async fn set_status(&self, id: TenantId, status: TenantStatus) -> Result<(), ServiceError> {
        let mut data = lock(&self.data, "Portal");
        let tenant = data
            .tenants
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("tenant {}", id)))?;
        tenant.status = status;
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, ServiceError> {
        Ok(lock(&self.data, "Portal").tenants.values().cloned().collect())
    }

    async fn remove_tenant(&self, id: TenantId) -> Result<(), ServiceError> {
        let mut data = lock(&self.data, "Portal");
        let tenant = data
            .tenants
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("tenant {}", id)))?;
        tenant.status = TenantStatus::RemovePending;
        tenant.alias = format!("{}_deleted", tenant.alias);
        Ok(())
    }

    async fn clear_cache(&self) -> Result<(), ServiceError> {
        lock(&self.data, "Portal").cache_clears += 1;
        Ok(())
    }
}

#[async_trait]
impl TenantDataSource for MemoryPortal {
    async fn tables(&self) -> Result<Vec<TableSchema>, ServiceError> {
        Ok(portal_schema())
    }

    async fn rows(&self, table: &TableSchema, scope: Scope) -> Result<Vec<Row>, ServiceError> {
        if table.name == TENANTS_TABLE {
            let id = match scope {
                Scope::Tenant(id) => Some(id),
                Scope::Instance => None,
            };
            return Ok(self.table_rows(TENANTS_TABLE, id));
        }
        let data = lock(&self.data, "Portal");
        Ok(data
            .tables
            .get(&table.name)
            .into_iter()
            .flatten()
            .filter(|row| Self::in_scope(row, table, scope))
            .cloned()
            .collect())
    }

    async fn blobs(&self, scope: Scope) -> Result<Vec<BlobRef>, ServiceError> {
        Ok(lock(&self.data, "Portal")
            .blobs
            .values()
            .filter(|(b, _)| match scope {
                Scope::Tenant(id) => b.tenant_id == Some(id),
                Scope::Instance => true,
            })
            .map(|(b, _)| b.clone())
            .collect())
    }

    async fn read_blob(&self, blob: &BlobRef) -> Result<Vec<u8>, ServiceError> {
        lock(&self.data, "Portal")
            .blobs
            .get(&(blob.file_id, blob.version))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| ServiceError::NotFound(blob.entry_name()))
    }
}

#[async_trait]
impl TenantDataSink for MemoryPortal {
    async fn insert_row(
        &self,
        table: &TableSchema,
        mut row: Row,
    ) -> Result<Option<ColumnValue>, ServiceError> {
        let mut data = lock(&self.data, "Portal");

        if table.name == TENANTS_TABLE {
            let id = data.next_tenant_id();
            let tenant = tenant_from_row(id, &row)?;
            data.tenants.insert(id, tenant);
            return Ok(Some(ColumnValue::Int(id)));
        }

        let generated = match &table.id_column {
            Some(column) => {
                let id = data.next_row_id(&table.name, column);
                row.insert(column.clone(), Value::from(id));
                Some(ColumnValue::Int(id))
            }
            None => None,
        };
        data.tables.entry(table.name.clone()).or_default().push(row);
        Ok(generated)
    }

    async fn write_blob(&self, blob: &BlobRef, content: Vec<u8>) -> Result<(), ServiceError> {
        lock(&self.data, "Portal")
            .blobs
            .insert((blob.file_id, blob.version), (blob.clone(), content));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_tenant_rows() {
        let portal = MemoryPortal::with_sample_tenant(7, "acme");
        portal.add_sample_tenant(8, "beta");

        assert_eq!(portal.table_rows("files_folder", Some(7)).len(), 2);
        assert_eq!(portal.table_rows("files_folder", None).len(), 4);
        assert_eq!(portal.blob_count(Some(8)), 2);

        let rows = portal
            .rows(&portal_schema()[6], Scope::Tenant(8))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_alias_lookup_skips_removed() {
        let portal = MemoryPortal::new();
        portal.seed_tenant(1, "acme");
        portal.remove_tenant(1).await.unwrap();

        assert!(portal.get_tenant_by_alias("acme").await.unwrap().is_none());
        let removed = portal.get_tenant(1).await.unwrap().unwrap();
        assert_eq!(removed.status, TenantStatus::RemovePending);
    }

    #[tokio::test]
    async fn test_save_rejects_alias_clash() {
        let portal = MemoryPortal::new();
        portal.seed_tenant(1, "acme");
        let mut other = portal.seed_tenant(2, "beta");
        other.alias = "ACME".to_string();

        assert!(portal.save_tenant(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_sink_generates_ids() {
        let portal = MemoryPortal::with_sample_tenant(1, "acme");
        let schema = &portal_schema()[5];
        let mut row = Row::new();
        row.insert("tenant_id".to_string(), json!(1));
        row.insert("title".to_string(), json!("New"));

        let id = portal.insert_row(schema, row).await.unwrap();
        assert_eq!(id, Some(ColumnValue::Int(3)));
    }
}
