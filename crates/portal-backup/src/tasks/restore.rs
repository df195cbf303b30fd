use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{check_canceled, io_err, notify, remove_temp, ProgressTask, TaskServices};
use crate::checksum;
use crate::column_mapper::{ColumnMapper, TENANTS_TABLE};
use crate::db::{backup_repo, BackupRecord};
use crate::error::TaskError;
use crate::progress::{ProgressHandle, ScaledProgress, TaskKind};
use crate::replay::RestoredTenant;
use crate::services::{Notification, NotifyEvent, Tenant, TenantId, TenantStatus};
use crate::storage::{StorageParams, StorageType};

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub tenant_id: TenantId,
    pub user_id: Option<Uuid>,
    pub storage_type: StorageType,
    pub storage_params: StorageParams,
    /// Storage path of the archive.
    pub storage_path: String,
    /// Notify users once the portal is back.
    pub notify: bool,
}

/// Alias the restored tenant carries until the replay is finished.
pub fn private_alias(run_id: Uuid) -> String {
    format!("restore{}", run_id.simple())
}

/// Downloads an archive, verifies it and replays it into a new tenant.
pub struct RestoreTask {
    services: TaskServices,
    request: RestoreRequest,
}

impl RestoreTask {
    pub fn new(services: TaskServices, request: RestoreRequest) -> Self {
        Self { services, request }
    }

    /// Finds the backup record matching the archive, trying the current
    /// hash first and the legacy multipart hash second.
    async fn find_record(
        &self,
        tenant_id: TenantId,
        archive: &Path,
    ) -> Result<BackupRecord, TaskError> {
        let db = &self.services.db;
        let hash = checksum::sha256_file_async(archive)
            .await
            .map_err(io_err(archive))?;
        if let Some(record) = backup_repo::find_by_hash(db, tenant_id, &hash)? {
            return Ok(record);
        }

        let chunk_size = self.services.config.backup.legacy_chunk_size;
        let legacy = checksum::chunked_md5_file_async(archive, chunk_size)
            .await
            .map_err(io_err(archive))?;
        backup_repo::find_by_hash(db, tenant_id, &legacy)?.ok_or(TaskError::BackupNotFound)
    }

    async fn run_steps(
        &self,
        tenant: &Tenant,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Result<(), TaskError> {
        let services = &self.services;
        let request = &self.request;
        let run_id = progress.snapshot().id;

        if request.notify {
            notify(
                services.notifier.as_ref(),
                Notification::new(tenant.id, NotifyEvent::RestoreStarted).to_user(request.user_id),
            )
            .await;
        }

        // Download
        let backend = services.storage.resolve(
            request.storage_type,
            tenant.id,
            &request.storage_params,
        )?;
        let archive = backend
            .download(&request.storage_path, work_dir)
            .instrument(info_span!("download"))
            .await?;
        progress.set_percentage(5.0);
        check_canceled(cancel)?;

        // Validate
        if !services.config.core.standalone {
            let record = self
                .find_record(tenant.id, &archive)
                .instrument(info_span!("validate"))
                .await?;
            info!(backup_id = %record.id, "Archive matches backup record");
        }
        progress.set_percentage(10.0);
        check_canceled(cancel)?;

        // Replay
        let mut mapper = ColumnMapper::new();
        mapper.set_mapping(TENANTS_TABLE, "alias", tenant.alias.as_str(), private_alias(run_id));
        mapper.commit();
        let outcome = services
            .replayer
            .replay(
                &archive,
                &mut mapper,
                &ScaledProgress::new(progress, 10.0, 0.65),
                cancel,
            )
            .instrument(info_span!("replay"))
            .await?;
        progress.set_dump(outcome.dump);
        progress.set_percentage(75.0);
        check_canceled(cancel)?;

        // Finalize
        if outcome.dump {
            let replaced_self = self.activate_dump(tenant, &outcome.tenants).await?;
            services.tenants.clear_cache().await?;
            if !replaced_self {
                services.tenants.set_status(tenant.id, TenantStatus::Active).await?;
            }
            progress.set_percentage(90.0);
            if request.notify {
                for other in services.tenants.list_tenants().await? {
                    if other.status == TenantStatus::Active {
                        notify(
                            services.notifier.as_ref(),
                            Notification::new(other.id, NotifyEvent::RestoreCompleted)
                                .to_user(Some(other.owner_id)),
                        )
                        .await;
                    }
                }
            }
        } else {
            let new_id = outcome
                .tenant_id
                .ok_or_else(|| TaskError::Replay("archive contains no tenant".to_string()))?;
            let restored = self.activate(Some(tenant), new_id, &tenant.alias).await?;
            progress.set_new_tenant(restored.id);
            progress.set_percentage(90.0);
            if request.notify {
                notify(
                    services.notifier.as_ref(),
                    Notification::new(restored.id, NotifyEvent::RestoreCompleted)
                        .to_user(Some(restored.owner_id)),
                )
                .await;
            }
        }

        Ok(())
    }

    /// Replaces every tenant of a whole-instance archive with its restored
    /// copy under the archived alias. Returns whether the restoring tenant
    /// itself was replaced.
    async fn activate_dump(
        &self,
        restoring: &Tenant,
        restored: &[RestoredTenant],
    ) -> Result<bool, TaskError> {
        let tenants = &self.services.tenants;
        let mut replaced_self = false;
        for entry in restored {
            let old = tenants.get_tenant(entry.old_id).await?;
            let alias = match (&entry.alias, &old) {
                (_, Some(old)) if old.id == restoring.id => restoring.alias.clone(),
                (Some(alias), _) => alias.clone(),
                (None, Some(old)) => old.alias.clone(),
                (None, None) => {
                    warn!(old_tenant = entry.old_id, "Restored tenant has no alias");
                    continue;
                }
            };
            if entry.old_id == restoring.id && old.is_some() {
                replaced_self = true;
            }
            self.activate(old.as_ref(), entry.new_id, &alias).await?;
        }
        Ok(replaced_self)
    }

    /// Retires the replaced tenant and gives the restored one its identity.
    async fn activate(
        &self,
        old: Option<&Tenant>,
        new_id: TenantId,
        alias: &str,
    ) -> Result<Tenant, TaskError> {
        let tenants = &self.services.tenants;
        if let Some(old) = old.filter(|old| old.id != new_id) {
            tenants.remove_tenant(old.id).await?;
        }

        let mut restored = tenants
            .get_tenant(new_id)
            .await?
            .ok_or(TaskError::TenantNotFound(new_id))?;
        restored.alias = alias.to_string();
        if let Some(old) = old {
            restored.mapped_domain = old.mapped_domain.clone();
            if restored.payment_id.is_none() {
                restored.payment_id = old.payment_id.clone();
            }
        }
        restored.status = TenantStatus::Active;
        let restored = tenants.save_tenant(&restored).await?;
        info!(
            old_tenant = old.map(|t| t.id),
            new_tenant = restored.id,
            "Tenant restored"
        );
        Ok(restored)
    }
}

#[async_trait]
impl ProgressTask for RestoreTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Restore
    }

    fn tenant_id(&self) -> TenantId {
        self.request.tenant_id
    }

    async fn run(
        &self,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        let run_id = progress.snapshot().id;
        let span = info_span!("restore", tenant_id = self.request.tenant_id, run_id = %run_id);
        async {
            let tenants = &self.services.tenants;
            let tenant = tenants
                .get_tenant(self.request.tenant_id)
                .await?
                .ok_or(TaskError::TenantNotFound(self.request.tenant_id))?;
            tenants
                .set_status(tenant.id, TenantStatus::Restoring)
                .await?;

            let work_dir: PathBuf = self
                .services
                .config
                .backup
                .temp_folder
                .join(format!("restore_{}", run_id.simple()));
            let result = match tokio::fs::create_dir_all(&work_dir).await {
                Ok(()) => self.run_steps(&tenant, progress, cancel, &work_dir).await,
                Err(e) => Err(io_err(&work_dir)(e)),
            };

            if result.is_err() {
                if let Err(e) = tenants.set_status(tenant.id, TenantStatus::Active).await {
                    warn!(error = %e, "Failed to reactivate tenant after failed restore");
                }
            }
            remove_temp(&work_dir).await;
            result
        }
        .instrument(span)
        .await
    }
}
