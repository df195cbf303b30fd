//! Task progress snapshots — the `task_progress` table.
//!
//! One row per tenant and task kind, holding the serialized state of the
//! latest run so other processes can observe it.

use chrono::Utc;
use rusqlite::params;

use super::{format_timestamp, Database, DatabaseError};
use crate::progress::{ProgressState, TaskKind};
use crate::services::TenantId;

/// Creates or replaces the snapshot for the state's tenant and kind.
pub fn upsert(db: &Database, state: &ProgressState) -> Result<(), DatabaseError> {
    let json = serde_json::to_string(state).map_err(|e| DatabaseError::Json {
        column: "state",
        source: e,
    })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO task_progress (tenant_id, kind, state, is_completed, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id, kind) DO UPDATE SET state=?3, is_completed=?4, updated_at=?5",
            params![
                state.tenant_id,
                state.kind.as_str(),
                json,
                state.is_completed,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    })
}

pub fn find(
    db: &Database,
    tenant_id: TenantId,
    kind: TaskKind,
) -> Result<Option<ProgressState>, DatabaseError> {
    let json: Option<String> = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT state FROM task_progress WHERE tenant_id = ?1 AND kind = ?2")?;
        let mut rows = stmt.query_map(params![tenant_id, kind.as_str()], |r| r.get(0))?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;

    json.map(|s| {
        serde_json::from_str(&s).map_err(|e| DatabaseError::Json {
            column: "state",
            source: e,
        })
    })
    .transpose()
}

/// Lists snapshots of runs that have not completed.
pub fn list_running(db: &Database) -> Result<Vec<ProgressState>, DatabaseError> {
    let rows: Vec<String> = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT state FROM task_progress WHERE is_completed = 0")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut states = Vec::with_capacity(rows.len());
    for json in rows {
        match serde_json::from_str(&json) {
            Ok(state) => states.push(state),
            Err(e) => log::warn!("Skipping unreadable progress snapshot: {}", e),
        }
    }
    Ok(states)
}

pub fn delete(db: &Database, tenant_id: TenantId, kind: TaskKind) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM task_progress WHERE tenant_id = ?1 AND kind = ?2",
            params![tenant_id, kind.as_str()],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let mut state = ProgressState::new(TaskKind::Backup, 4);
        state.advance(35.0);
        upsert(&db, &state).unwrap();

        let found = find(&db, 4, TaskKind::Backup).unwrap().unwrap();
        assert_eq!(found, state);
        assert!(find(&db, 4, TaskKind::Restore).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_and_list_running() {
        let db = Database::open_in_memory().unwrap();
        let mut state = ProgressState::new(TaskKind::Restore, 4);
        upsert(&db, &state).unwrap();
        assert_eq!(list_running(&db).unwrap().len(), 1);

        state.complete(None);
        upsert(&db, &state).unwrap();
        assert!(list_running(&db).unwrap().is_empty());
        assert!(find(&db, 4, TaskKind::Restore).unwrap().unwrap().is_completed);
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, &ProgressState::new(TaskKind::Transfer, 9)).unwrap();
        delete(&db, 9, TaskKind::Transfer).unwrap();
        assert!(find(&db, 9, TaskKind::Transfer).unwrap().is_none());
    }
}
