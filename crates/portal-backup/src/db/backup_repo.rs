//! Backup history — CRUD operations for the `backup_records` table.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::services::TenantId;
use crate::storage::{StorageParams, StorageType};

/// Metadata of one completed backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub is_scheduled: bool,
    pub name: String,
    pub storage_type: StorageType,
    pub storage_base_path: Option<String>,
    pub storage_path: String,
    pub created_on: DateTime<Utc>,
    /// Only set for transient data-store backups.
    pub expires_on: Option<DateTime<Utc>>,
    pub storage_params: StorageParams,
    /// Content hash of the archive.
    pub hash: String,
    pub removed: bool,
}

impl BackupRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let id: String = row.get("id")?;
        let storage_type: i64 = row.get("storage_type")?;
        let created_on: String = row.get("created_on")?;
        let expires_on: Option<String> = row.get("expires_on")?;
        let storage_params: String = row.get("storage_params")?;

        Ok(Self {
            id: Uuid::parse_str(&id)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
            tenant_id: row.get("tenant_id")?,
            is_scheduled: row.get("is_scheduled")?,
            name: row.get("name")?,
            storage_type: StorageType::from_code(storage_type).ok_or(
                rusqlite::Error::IntegralValueOutOfRange(4, storage_type),
            )?,
            storage_base_path: row.get("storage_base_path")?,
            storage_path: row.get("storage_path")?,
            created_on: parse_timestamp(7, &created_on)?,
            expires_on: expires_on.map(|s| parse_timestamp(8, &s)).transpose()?,
            storage_params: serde_json::from_str(&storage_params).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e))
            })?,
            hash: row.get("hash")?,
            removed: row.get("removed")?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|e| e <= now)
    }
}

/// Inserts a new backup record.
pub fn insert(db: &Database, record: &BackupRecord) -> Result<(), DatabaseError> {
    let storage_params =
        serde_json::to_string(&record.storage_params).map_err(|e| DatabaseError::Json {
            column: "storage_params",
            source: e,
        })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO backup_records (id, tenant_id, is_scheduled, name, storage_type,
             storage_base_path, storage_path, created_on, expires_on, storage_params, hash, removed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.to_string(),
                record.tenant_id,
                record.is_scheduled,
                record.name,
                record.storage_type.code(),
                record.storage_base_path,
                record.storage_path,
                format_timestamp(&record.created_on),
                record.expires_on.as_ref().map(format_timestamp),
                storage_params,
                record.hash,
                record.removed,
            ],
        )?;
        Ok(())
    })
}

/// Finds a record by its ID, including removed ones.
pub fn find_by_id(db: &Database, id: Uuid) -> Result<Option<BackupRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM backup_records WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id.to_string()], BackupRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a live record of the tenant with the given archive hash.
pub fn find_by_hash(
    db: &Database,
    tenant_id: TenantId,
    hash: &str,
) -> Result<Option<BackupRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_records WHERE tenant_id = ?1 AND hash = ?2 AND removed = 0
             ORDER BY created_on DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![tenant_id, hash], BackupRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists live records of a tenant, newest first.
pub fn list_by_tenant(db: &Database, tenant_id: TenantId) -> Result<Vec<BackupRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_records WHERE tenant_id = ?1 AND removed = 0
             ORDER BY created_on DESC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], BackupRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists live scheduled records of a tenant, oldest first.
pub fn list_scheduled(db: &Database, tenant_id: TenantId) -> Result<Vec<BackupRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_records WHERE tenant_id = ?1 AND is_scheduled = 1 AND removed = 0
             ORDER BY created_on ASC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], BackupRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists live records of all tenants that expired at or before `now`.
pub fn list_expired(db: &Database, now: DateTime<Utc>) -> Result<Vec<BackupRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_records
             WHERE expires_on IS NOT NULL AND expires_on <= ?1 AND removed = 0",
        )?;
        let rows = stmt
            .query_map(params![format_timestamp(&now)], BackupRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Soft-deletes a record.
pub fn mark_removed(db: &Database, id: Uuid) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE backup_records SET removed = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    })
}

/// Deletes a record permanently.
pub fn delete(db: &Database, id: Uuid) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM backup_records WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    })
}
