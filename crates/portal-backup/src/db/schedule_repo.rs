//! Backup schedules — one row per tenant in `backup_schedules`.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::services::TenantId;
use crate::storage::{StorageParams, StorageType};

/// Recurring backup policy of a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub tenant_id: TenantId,
    pub cron: String,
    pub storage_type: StorageType,
    pub storage_base_path: Option<String>,
    pub storage_params: StorageParams,
    /// Retention count of scheduled backups.
    pub backups_stored: u32,
    /// Whole-instance backup instead of a single tenant.
    pub dump: bool,
    pub last_backup_time: Option<DateTime<Utc>>,
}

impl BackupSchedule {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let storage_type: i64 = row.get("storage_type")?;
        let storage_params: String = row.get("storage_params")?;
        let last_backup_time: Option<String> = row.get("last_backup_time")?;

        Ok(Self {
            tenant_id: row.get("tenant_id")?,
            cron: row.get("cron")?,
            storage_type: StorageType::from_code(storage_type).ok_or(
                rusqlite::Error::IntegralValueOutOfRange(2, storage_type),
            )?,
            storage_base_path: row.get("storage_base_path")?,
            storage_params: serde_json::from_str(&storage_params).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
            })?,
            backups_stored: row.get("backups_stored")?,
            dump: row.get("dump")?,
            last_backup_time: last_backup_time
                .map(|s| parse_timestamp(7, &s))
                .transpose()?,
        })
    }
}

/// Creates or replaces the schedule of a tenant.
pub fn upsert(db: &Database, schedule: &BackupSchedule) -> Result<(), DatabaseError> {
    let storage_params =
        serde_json::to_string(&schedule.storage_params).map_err(|e| DatabaseError::Json {
            column: "storage_params",
            source: e,
        })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO backup_schedules (tenant_id, cron, storage_type, storage_base_path,
             storage_params, backups_stored, dump, last_backup_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_id) DO UPDATE SET cron=?2, storage_type=?3,
             storage_base_path=?4, storage_params=?5, backups_stored=?6, dump=?7,
             last_backup_time=?8",
            params![
                schedule.tenant_id,
                schedule.cron,
                schedule.storage_type.code(),
                schedule.storage_base_path,
                storage_params,
                schedule.backups_stored,
                schedule.dump,
                schedule.last_backup_time.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

pub fn find(db: &Database, tenant_id: TenantId) -> Result<Option<BackupSchedule>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM backup_schedules WHERE tenant_id = ?1")?;
        let mut rows = stmt.query_map(params![tenant_id], BackupSchedule::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

pub fn list_all(db: &Database) -> Result<Vec<BackupSchedule>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM backup_schedules ORDER BY tenant_id")?;
        let rows = stmt
            .query_map([], BackupSchedule::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Stamps the time the schedule last produced a backup.
pub fn update_last_backup_time(
    db: &Database,
    tenant_id: TenantId,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE backup_schedules SET last_backup_time = ?2 WHERE tenant_id = ?1",
            params![tenant_id, format_timestamp(&at)],
        )?;
        Ok(())
    })
}

/// Deletes the schedule of a tenant. Returns whether one existed.
pub fn delete(db: &Database, tenant_id: TenantId) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM backup_schedules WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        Ok(affected > 0)
    })
}
