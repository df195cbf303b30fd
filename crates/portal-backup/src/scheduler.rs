//! Starts scheduled backups when their cron expression comes due.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::cleanup::BackupCleaner;
use crate::db::{schedule_repo, DatabaseError};
use crate::orchestrator::schedule;
use crate::progress::TaskKind;
use crate::services::{TenantId, TenantStatus};
use crate::tasks::{BackupRequest, BackupTask, TaskServices};
use crate::worker::BackupWorker;

pub struct BackupScheduler {
    services: TaskServices,
    worker: Arc<BackupWorker>,
    cleaner: Option<BackupCleaner>,
}

impl BackupScheduler {
    pub fn new(services: TaskServices, worker: Arc<BackupWorker>) -> Self {
        Self {
            services,
            worker,
            cleaner: None,
        }
    }

    /// Runs retention after every tick.
    pub fn with_cleaner(mut self, cleaner: BackupCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    /// Starts every backup that is due at `now` and returns the tenants it
    /// started backups for.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TenantId>, DatabaseError> {
        let db = &self.services.db;
        let mut started = Vec::new();

        for entry in schedule_repo::list_all(db)? {
            let Some(last) = entry.last_backup_time else {
                schedule_repo::update_last_backup_time(db, entry.tenant_id, now)?;
                continue;
            };
            let cron = match schedule::parse(&entry.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!("Skipping schedule of tenant {}: {}", entry.tenant_id, e);
                    continue;
                }
            };
            let due = schedule::next_after(&cron, last).is_some_and(|next| next <= now);
            if !due || self.worker.is_running(entry.tenant_id, TaskKind::Backup) {
                continue;
            }
            if entry.dump && !self.services.config.core.standalone {
                warn!("Skipping instance dump of tenant {} outside standalone mode", entry.tenant_id);
                continue;
            }

            match self.services.tenants.get_tenant(entry.tenant_id).await {
                Ok(Some(tenant)) if tenant.status == TenantStatus::Active => {}
                Ok(_) => {
                    info!("Tenant {} is not active, skipping scheduled backup", entry.tenant_id);
                    continue;
                }
                Err(e) => {
                    warn!("Cannot load tenant {}: {}", entry.tenant_id, e);
                    continue;
                }
            }

            let task = BackupTask::new(
                self.services.clone(),
                BackupRequest {
                    tenant_id: entry.tenant_id,
                    user_id: None,
                    storage_type: entry.storage_type,
                    storage_params: entry.storage_params.clone(),
                    is_scheduled: true,
                    dump: entry.dump,
                },
            );
            self.worker.start(Arc::new(task));
            schedule_repo::update_last_backup_time(db, entry.tenant_id, now)?;
            info!("Started scheduled backup of tenant {}", entry.tenant_id);
            started.push(entry.tenant_id);
        }

        Ok(started)
    }

    /// Ticks every `interval` until `shutdown` is cancelled.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {},
                _ = shutdown.cancelled() => break,
            }

            let now = Utc::now();
            if let Err(e) = self.tick(now).await {
                error!("Backup schedule tick failed: {}", e);
            }
            if let Some(cleaner) = &self.cleaner {
                if let Err(e) = cleaner.run_once(now).await {
                    error!("Backup cleanup failed: {}", e);
                }
            }
        }
        info!("Backup scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{backup_repo, BackupSchedule};
    use crate::progress::ProgressStore;
    use crate::services::TenantDirectory;
    use crate::storage::{StorageParams, StorageType};
    use crate::tasks::testing::Fixture;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn schedule_for(fixture: &Fixture, last: Option<DateTime<Utc>>) {
        schedule_repo::upsert(
            &fixture.db,
            &BackupSchedule {
                tenant_id: 7,
                cron: "0 0 3 * * *".to_string(),
                storage_type: StorageType::DataStore,
                storage_base_path: None,
                storage_params: StorageParams::new(),
                backups_stored: 3,
                dump: false,
                last_backup_time: last,
            },
        )
        .unwrap();
    }

    fn scheduler(fixture: &Fixture) -> (BackupScheduler, Arc<BackupWorker>) {
        let worker = Arc::new(BackupWorker::new(Arc::new(ProgressStore::default()), 2));
        (BackupScheduler::new(fixture.services(), worker.clone()), worker)
    }

    #[tokio::test]
    async fn test_due_schedule_starts_backup() {
        let fixture = Fixture::new(7, "acme");
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        schedule_for(&fixture, Some(last));
        let (scheduler, worker) = scheduler(&fixture);

        let before = last + ChronoDuration::hours(10);
        assert!(scheduler.tick(before).await.unwrap().is_empty());

        let after = last + ChronoDuration::hours(16);
        assert_eq!(scheduler.tick(after).await.unwrap(), vec![7]);
        let state = worker.wait(7, TaskKind::Backup).await.unwrap();
        assert!(state.error.is_none(), "{:?}", state.error);

        let records = backup_repo::list_by_tenant(&fixture.db, 7).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_scheduled);
        assert_eq!(
            schedule_repo::find(&fixture.db, 7).unwrap().unwrap().last_backup_time,
            Some(after)
        );
    }

    #[tokio::test]
    async fn test_first_tick_only_stamps() {
        let fixture = Fixture::new(7, "acme");
        schedule_for(&fixture, None);
        let (scheduler, _) = scheduler(&fixture);

        let now = Utc::now();
        assert!(scheduler.tick(now).await.unwrap().is_empty());
        assert!(schedule_repo::find(&fixture.db, 7).unwrap().unwrap().last_backup_time.is_some());
    }

    #[tokio::test]
    async fn test_suspended_tenant_is_skipped() {
        let fixture = Fixture::new(7, "acme");
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        schedule_for(&fixture, Some(last));
        fixture.portal.set_status(7, TenantStatus::Suspended).await.unwrap();
        let (scheduler, _) = scheduler(&fixture);

        assert!(scheduler
            .tick(last + ChronoDuration::days(2))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fixture = Fixture::new(7, "acme");
        let (scheduler, _) = scheduler(&fixture);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        scheduler.run(Duration::from_millis(10), shutdown).await;
    }
}
