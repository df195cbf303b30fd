use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::layout::BlobRef;
use crate::error::ServiceError;
use crate::services::TenantId;

/// One table row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// What a dump covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Tenant(TenantId),
    /// Every tenant of the installation.
    Instance,
}

impl Scope {
    pub fn is_dump(&self) -> bool {
        matches!(self, Scope::Instance)
    }
}

/// Column holding a value of another table's column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub column: String,
    pub table: String,
    pub target_column: String,
}

impl ColumnRef {
    pub fn new(column: &str, table: &str, target_column: &str) -> Self {
        Self {
            column: column.to_string(),
            table: table.to_string(),
            target_column: target_column.to_string(),
        }
    }
}

/// Target of a [`TypedColumnRef`] for one discriminator value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedTarget {
    pub type_code: i64,
    pub table: String,
    pub target_column: String,
}

/// Column whose referenced table depends on the value of another column of
/// the same row, like the entry id of a security row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedColumnRef {
    pub column: String,
    pub type_column: String,
    pub targets: Vec<TypedTarget>,
}

impl TypedColumnRef {
    /// Target selected by the row's discriminator, if it names one.
    pub fn target_for(&self, row: &Row) -> Option<&TypedTarget> {
        let code = row.get(&self.type_column).and_then(serde_json::Value::as_i64)?;
        self.targets.iter().find(|t| t.type_code == code)
    }
}

/// Replay metadata of a dumped table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub module: String,
    pub name: String,
    /// Column whose values the target database generates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_column: Option<String>,
    /// Column holding the owning tenant id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_column: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ColumnRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub typed_references: Vec<TypedColumnRef>,
}

impl TableSchema {
    pub fn new(module: &str, name: &str) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            id_column: None,
            tenant_column: None,
            references: Vec::new(),
            typed_references: Vec::new(),
        }
    }

    pub fn with_id(mut self, column: &str) -> Self {
        self.id_column = Some(column.to_string());
        self
    }

    pub fn with_tenant(mut self, column: &str) -> Self {
        self.tenant_column = Some(column.to_string());
        self
    }

    pub fn with_ref(mut self, column: &str, table: &str, target_column: &str) -> Self {
        self.references.push(ColumnRef::new(column, table, target_column));
        self
    }

    /// Adds a reference whose table is picked by `type_column`, given as
    /// `(type code, table, target column)` triples.
    pub fn with_typed_ref(
        mut self,
        column: &str,
        type_column: &str,
        targets: &[(i64, &str, &str)],
    ) -> Self {
        self.typed_references.push(TypedColumnRef {
            column: column.to_string(),
            type_column: type_column.to_string(),
            targets: targets
                .iter()
                .map(|&(type_code, table, target_column)| TypedTarget {
                    type_code,
                    table: table.to_string(),
                    target_column: target_column.to_string(),
                })
                .collect(),
        });
        self
    }
}

/// Read access to the relational data and file blobs of the platform.
#[async_trait]
pub trait TenantDataSource: Send + Sync {
    /// Tables to dump, parents before children.
    async fn tables(&self) -> Result<Vec<TableSchema>, ServiceError>;

    async fn rows(&self, table: &TableSchema, scope: Scope) -> Result<Vec<Row>, ServiceError>;

    async fn blobs(&self, scope: Scope) -> Result<Vec<BlobRef>, ServiceError>;

    async fn read_blob(&self, blob: &BlobRef) -> Result<Vec<u8>, ServiceError>;
}
