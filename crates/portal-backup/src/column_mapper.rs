//! Old-to-new identifier translation used while replaying an archive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::TenantId;

pub const TENANTS_TABLE: &str = "tenants_tenants";

/// Hashable scalar a column can be mapped on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ColumnValue {
    /// Converts a JSON scalar. Arrays, objects and non-integer numbers have
    /// no key form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

type Key = (String, String, ColumnValue);

fn key(table: &str, column: &str, old: ColumnValue) -> Key {
    (table.to_ascii_lowercase(), column.to_ascii_lowercase(), old)
}

/// Maps `(table, column, old value)` to a new value.
///
/// Mappings are staged by [`set_mapping`](Self::set_mapping) and only become
/// visible to lookups after [`commit`](Self::commit). A key that was never
/// committed reads back as its original value.
#[derive(Debug, Default, Clone)]
pub struct ColumnMapper {
    staged: HashMap<Key, ColumnValue>,
    committed: HashMap<Key, ColumnValue>,
}

impl ColumnMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mapping(
        &mut self,
        table: &str,
        column: &str,
        old: impl Into<ColumnValue>,
        new: impl Into<ColumnValue>,
    ) {
        self.staged
            .insert(key(table, column, old.into()), new.into());
    }

    /// Makes every staged mapping visible to lookups.
    pub fn commit(&mut self) {
        self.committed.extend(self.staged.drain());
    }

    /// Drops staged mappings that were not committed.
    pub fn rollback(&mut self) {
        self.staged.clear();
    }

    pub fn get_mapping(&self, table: &str, column: &str, old: &ColumnValue) -> ColumnValue {
        self.committed
            .get(&key(table, column, old.clone()))
            .cloned()
            .unwrap_or_else(|| old.clone())
    }

    pub fn has_mapping(&self, table: &str, column: &str, old: &ColumnValue) -> bool {
        self.committed
            .contains_key(&key(table, column, old.clone()))
    }

    /// Rewrites a JSON value through the committed mappings.
    pub fn map_json(&self, table: &str, column: &str, value: &Value) -> Value {
        match ColumnValue::from_json(value) {
            Some(old) if self.has_mapping(table, column, &old) => {
                self.get_mapping(table, column, &old).to_json()
            }
            _ => value.clone(),
        }
    }

    /// New id of the tenant created by this run, if one was committed.
    pub fn tenant_mapping(&self) -> Option<TenantId> {
        self.committed
            .iter()
            .find(|((table, column, _), _)| table == TENANTS_TABLE && column == "id")
            .and_then(|(_, new)| new.as_i64())
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
