//! Permission-gated control surface over backups, restores, transfers and
//! backup schedules.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{backup_repo, schedule_repo, BackupRecord, BackupSchedule};
use crate::error::{OrchestratorError, StorageError};
use crate::progress::{ProgressState, TaskKind};
use crate::services::{AccessControl, PlanOption, PlanQuota, TenantId};
use crate::storage::factory::LEGACY_CLOUD_MODULE;
use crate::storage::{StorageParams, StorageType, PARAM_FILE_PATH, PARAM_MODULE};
use crate::tasks::{
    BackupRequest, BackupTask, RestoreRequest, RestoreTask, TaskServices, TransferRequest,
    TransferTask,
};
use crate::worker::BackupWorker;

pub mod schedule;

pub use schedule::{CronParams, CronSpec, Period};

/// Quota feature required for backup operations outside standalone
/// installations.
pub const AUTO_BACKUP_RESTORE_FEATURE: &str = "AutoBackupRestore";

/// Tenant and user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: TenantId,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub storage_type: StorageType,
    pub storage_params: StorageParams,
    pub cron: CronSpec,
    pub backups_stored: u32,
    pub dump: bool,
}

/// Archive to restore from.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreSource {
    /// A recorded backup of the caller's tenant.
    Backup(Uuid),
    /// An archive at `filePath` of the given storage.
    Storage {
        storage_type: StorageType,
        storage_params: StorageParams,
    },
}

pub struct BackupOrchestrator {
    services: TaskServices,
    worker: Arc<BackupWorker>,
    access: Arc<dyn AccessControl>,
    quota: Arc<dyn PlanQuota>,
}

impl BackupOrchestrator {
    pub fn new(
        services: TaskServices,
        worker: Arc<BackupWorker>,
        access: Arc<dyn AccessControl>,
        quota: Arc<dyn PlanQuota>,
    ) -> Self {
        Self {
            services,
            worker,
            access,
            quota,
        }
    }

    fn standalone(&self) -> bool {
        self.services.config.core.standalone
    }

    async fn demand_settings(&self, caller: &Caller) -> Result<(), OrchestratorError> {
        if self
            .access
            .can_edit_portal_settings(caller.tenant_id, caller.user_id)
            .await?
        {
            Ok(())
        } else {
            Err(OrchestratorError::AccessDenied)
        }
    }

    async fn demand_option(
        &self,
        caller: &Caller,
        option: PlanOption,
    ) -> Result<(), OrchestratorError> {
        self.demand_settings(caller).await?;
        if !self.quota.is_visible(caller.tenant_id, option).await? {
            return Err(OrchestratorError::Billing {
                option: option.as_str().to_string(),
            });
        }
        if !self.standalone()
            && !self
                .quota
                .auto_backup_restore_enabled(caller.tenant_id)
                .await?
        {
            return Err(OrchestratorError::Billing {
                option: AUTO_BACKUP_RESTORE_FEATURE.to_string(),
            });
        }
        Ok(())
    }

    fn check_storage(
        &self,
        storage_type: StorageType,
        params: &StorageParams,
    ) -> Result<(), OrchestratorError> {
        match storage_type {
            StorageType::Local if !self.standalone() => Err(OrchestratorError::AccessDenied),
            StorageType::Local | StorageType::Documents | StorageType::ThirdPartyDocuments => {
                storage_type.base_path(params).map(|_| ()).ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "storage {:?} needs a target folder",
                        storage_type
                    ))
                })
            }
            StorageType::ThirdPartyConsumer if !params.contains_key(PARAM_MODULE) => Err(
                OrchestratorError::Storage(StorageError::MissingParam(PARAM_MODULE.to_string())),
            ),
            _ => Ok(()),
        }
    }

    /// Whole-instance archives hold every tenant, so only a standalone
    /// installation may take them.
    fn check_dump(&self, dump: bool) -> Result<(), OrchestratorError> {
        if dump && !self.standalone() {
            return Err(OrchestratorError::Validation(
                "instance dumps are only available in standalone mode".to_string(),
            ));
        }
        Ok(())
    }

    // Backup

    pub async fn start_backup(
        &self,
        caller: &Caller,
        storage_type: StorageType,
        storage_params: StorageParams,
        dump: bool,
    ) -> Result<ProgressState, OrchestratorError> {
        self.demand_option(caller, PlanOption::Backup).await?;
        self.check_storage(storage_type, &storage_params)?;
        self.check_dump(dump)?;

        let task = BackupTask::new(
            self.services.clone(),
            BackupRequest {
                tenant_id: caller.tenant_id,
                user_id: Some(caller.user_id),
                storage_type,
                storage_params,
                is_scheduled: false,
                dump,
            },
        );
        Ok(self.worker.start(Arc::new(task)))
    }

    pub async fn backup_progress(
        &self,
        caller: &Caller,
    ) -> Result<Option<ProgressState>, OrchestratorError> {
        self.demand_option(caller, PlanOption::Backup).await?;
        Ok(self.worker.progress(caller.tenant_id, TaskKind::Backup))
    }

    /// Backups of the caller's tenant whose artifacts still exist, newest
    /// first. Records of vanished artifacts are deleted.
    pub async fn backup_history(
        &self,
        caller: &Caller,
    ) -> Result<Vec<BackupRecord>, OrchestratorError> {
        self.demand_option(caller, PlanOption::Backup).await?;

        let mut history = Vec::new();
        for record in backup_repo::list_by_tenant(&self.services.db, caller.tenant_id)? {
            let exists = match self.services.storage.resolve(
                record.storage_type,
                record.tenant_id,
                &record.storage_params,
            ) {
                Ok(backend) => backend.exists(&record.storage_path).await,
                Err(e) => Err(e),
            };
            match exists {
                Ok(true) => history.push(record),
                Ok(false) => {
                    info!(backup_id = %record.id, "Backup artifact is gone, dropping record");
                    backup_repo::delete(&self.services.db, record.id)?;
                }
                Err(e) => {
                    warn!(backup_id = %record.id, error = %e, "Cannot check backup artifact");
                    history.push(record);
                }
            }
        }
        Ok(history)
    }

    pub async fn delete_backup(&self, caller: &Caller, id: Uuid) -> Result<(), OrchestratorError> {
        self.demand_option(caller, PlanOption::Backup).await?;
        let record = self.own_record(caller, id)?;
        self.remove_backup(&record).await
    }

    /// Deletes every backup of the caller's tenant. Failures are logged and
    /// skipped.
    pub async fn delete_all_backups(&self, caller: &Caller) -> Result<(), OrchestratorError> {
        self.demand_option(caller, PlanOption::Backup).await?;
        for record in backup_repo::list_by_tenant(&self.services.db, caller.tenant_id)? {
            if let Err(e) = self.remove_backup(&record).await {
                warn!(backup_id = %record.id, error = %e, "Failed to delete backup");
            }
        }
        Ok(())
    }

    fn own_record(&self, caller: &Caller, id: Uuid) -> Result<BackupRecord, OrchestratorError> {
        backup_repo::find_by_id(&self.services.db, id)?
            .filter(|r| r.tenant_id == caller.tenant_id && !r.removed)
            .ok_or_else(|| OrchestratorError::Validation(format!("backup {} not found", id)))
    }

    async fn remove_backup(&self, record: &BackupRecord) -> Result<(), OrchestratorError> {
        let backend = self.services.storage.resolve(
            record.storage_type,
            record.tenant_id,
            &record.storage_params,
        )?;
        match backend.delete(&record.storage_path).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        backup_repo::delete(&self.services.db, record.id)?;
        info!(backup_id = %record.id, "Backup deleted");
        Ok(())
    }

    // Schedule

    pub async fn create_schedule(
        &self,
        caller: &Caller,
        request: ScheduleRequest,
    ) -> Result<BackupSchedule, OrchestratorError> {
        self.demand_option(caller, PlanOption::AutoBackup).await?;
        self.check_storage(request.storage_type, &request.storage_params)?;
        self.check_dump(request.dump)?;
        let cron = request.cron.to_expression()?;

        let schedule = BackupSchedule {
            tenant_id: caller.tenant_id,
            cron,
            storage_type: request.storage_type,
            storage_base_path: request.storage_type.base_path(&request.storage_params),
            storage_params: request.storage_params,
            backups_stored: request.backups_stored,
            dump: request.dump,
            last_backup_time: Some(Utc::now()),
        };
        schedule_repo::upsert(&self.services.db, &schedule)?;
        info!(tenant_id = caller.tenant_id, cron = %schedule.cron, "Backup schedule saved");
        Ok(schedule)
    }

    /// Schedule of the caller's tenant. Legacy CustomCloud schedules are
    /// rewritten to the consumer storage they map to.
    pub async fn get_schedule(
        &self,
        caller: &Caller,
    ) -> Result<Option<BackupSchedule>, OrchestratorError> {
        self.demand_option(caller, PlanOption::AutoBackup).await?;
        let Some(mut schedule) = schedule_repo::find(&self.services.db, caller.tenant_id)? else {
            return Ok(None);
        };

        if schedule.storage_type == StorageType::CustomCloud {
            schedule.storage_type = StorageType::ThirdPartyConsumer;
            schedule
                .storage_params
                .insert(PARAM_MODULE.to_string(), LEGACY_CLOUD_MODULE.to_string());
            schedule_repo::upsert(&self.services.db, &schedule)?;
            info!(tenant_id = caller.tenant_id, "Migrated CustomCloud schedule");
        }
        Ok(Some(schedule))
    }

    pub async fn delete_schedule(&self, caller: &Caller) -> Result<bool, OrchestratorError> {
        self.demand_option(caller, PlanOption::AutoBackup).await?;
        Ok(schedule_repo::delete(&self.services.db, caller.tenant_id)?)
    }

    // Restore

    pub async fn start_restore(
        &self,
        caller: &Caller,
        source: RestoreSource,
        notify: bool,
    ) -> Result<ProgressState, OrchestratorError> {
        self.demand_option(caller, PlanOption::Restore).await?;
        if self.worker.is_running(caller.tenant_id, TaskKind::Backup)
            || self.worker.is_running(caller.tenant_id, TaskKind::Transfer)
        {
            return Err(OrchestratorError::InvalidOperation(
                "another operation is running for this portal".to_string(),
            ));
        }

        let (storage_type, storage_params, storage_path) = match source {
            RestoreSource::Backup(id) => {
                let record = self.own_record(caller, id)?;
                (record.storage_type, record.storage_params, record.storage_path)
            }
            RestoreSource::Storage {
                storage_type,
                storage_params,
            } => {
                self.check_storage(storage_type, &storage_params)?;
                let path = storage_params
                    .get(PARAM_FILE_PATH)
                    .filter(|p| !p.trim().is_empty())
                    .cloned()
                    .ok_or_else(|| {
                        OrchestratorError::Validation("restore needs a file path".to_string())
                    })?;
                (storage_type, storage_params, path)
            }
        };

        let task = RestoreTask::new(
            self.services.clone(),
            RestoreRequest {
                tenant_id: caller.tenant_id,
                user_id: Some(caller.user_id),
                storage_type,
                storage_params,
                storage_path,
                notify,
            },
        );
        Ok(self.worker.start(Arc::new(task)))
    }

    pub async fn restore_progress(
        &self,
        caller: &Caller,
    ) -> Result<Option<ProgressState>, OrchestratorError> {
        self.demand_settings(caller).await?;
        Ok(self.worker.progress(caller.tenant_id, TaskKind::Restore))
    }

    // Transfer

    pub async fn start_transfer(
        &self,
        caller: &Caller,
        target_region: &str,
        notify: bool,
    ) -> Result<ProgressState, OrchestratorError> {
        self.demand_settings(caller).await?;
        let tenant = self
            .services
            .tenants
            .get_tenant(caller.tenant_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("tenant {} not found", caller.tenant_id))
            })?;
        if tenant.owner_id != caller.user_id {
            return Err(OrchestratorError::AccessDenied);
        }
        if !self.services.config.regions.contains_key(target_region) {
            return Err(OrchestratorError::Validation(format!(
                "unknown region '{}'",
                target_region
            )));
        }

        let task = TransferTask::new(
            self.services.clone(),
            TransferRequest {
                tenant_id: caller.tenant_id,
                user_id: Some(caller.user_id),
                target_region: target_region.to_string(),
                notify,
            },
        );
        Ok(self.worker.start(Arc::new(task)))
    }

    pub async fn transfer_progress(
        &self,
        caller: &Caller,
    ) -> Result<Option<ProgressState>, OrchestratorError> {
        self.demand_settings(caller).await?;
        Ok(self.worker.progress(caller.tenant_id, TaskKind::Transfer))
    }

    pub async fn get_tmp_folder(&self, caller: &Caller) -> Result<PathBuf, OrchestratorError> {
        self.demand_settings(caller).await?;
        Ok(self.services.config.backup.temp_folder.clone())
    }
}
