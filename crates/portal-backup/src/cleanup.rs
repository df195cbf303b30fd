//! Retention of stored backups and of the temp folder.

use std::time::{Duration as StdDuration, SystemTime};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::{backup_repo, schedule_repo, BackupRecord, DatabaseError};
use crate::error::StorageError;
use crate::tasks::TaskServices;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub trimmed: usize,
    pub temp_files: usize,
}

pub struct BackupCleaner {
    services: TaskServices,
}

impl BackupCleaner {
    pub fn new(services: TaskServices) -> Self {
        Self { services }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CleanupReport, DatabaseError> {
        let report = CleanupReport {
            expired: self.delete_expired(now).await?,
            trimmed: self.trim_scheduled().await?,
            temp_files: self.sweep_temp(now),
        };
        if report != CleanupReport::default() {
            info!(
                "Cleanup removed {} expired, {} surplus backups and {} temp files",
                report.expired, report.trimmed, report.temp_files
            );
        }
        Ok(report)
    }

    /// Deletes data-store backups past their expiry.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let mut deleted = 0;
        for record in backup_repo::list_expired(&self.services.db, now)? {
            if self.delete_record(&record).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Keeps only the newest `backups_stored` scheduled backups of each
    /// schedule. A count of zero keeps everything.
    pub async fn trim_scheduled(&self) -> Result<usize, DatabaseError> {
        let mut deleted = 0;
        for schedule in schedule_repo::list_all(&self.services.db)? {
            if schedule.backups_stored == 0 {
                continue;
            }
            let records = backup_repo::list_scheduled(&self.services.db, schedule.tenant_id)?;
            let surplus = records
                .len()
                .saturating_sub(schedule.backups_stored as usize);
            for record in records.iter().take(surplus) {
                if self.delete_record(record).await? {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    /// Deletes the artifact, then the record. An artifact that cannot be
    /// deleted leaves the record soft-deleted.
    async fn delete_record(&self, record: &BackupRecord) -> Result<bool, DatabaseError> {
        let deleted = match self.services.storage.resolve(
            record.storage_type,
            record.tenant_id,
            &record.storage_params,
        ) {
            Ok(backend) => backend.delete(&record.storage_path).await,
            Err(e) => Err(e),
        };
        match deleted {
            Ok(()) | Err(StorageError::NotFound(_)) => {
                backup_repo::delete(&self.services.db, record.id)?;
                debug!("Deleted backup {} of tenant {}", record.id, record.tenant_id);
                Ok(true)
            }
            Err(e) => {
                warn!("Failed to delete backup artifact {}: {}", record.storage_path, e);
                backup_repo::mark_removed(&self.services.db, record.id)?;
                Ok(false)
            }
        }
    }

    /// Removes temp files older than the configured age.
    pub fn sweep_temp(&self, now: DateTime<Utc>) -> usize {
        let backup = &self.services.config.backup;
        let max_age = StdDuration::from_secs(backup.temp_max_age_hours.max(0) as u64 * 3600);
        let now: SystemTime = now.into();
        let mut removed = 0;

        for entry in WalkDir::new(&backup.temp_folder)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);
            if !stale {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove temp file {}: {}", entry.path().display(), e),
            }
        }
        removed
    }
}
