use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::{check_canceled, io_err, notify, remove_temp, ProgressTask, TaskServices};
use crate::archive::{ArchiveWriter, Scope};
use crate::checksum;
use crate::db::{backup_repo, BackupRecord};
use crate::error::TaskError;
use crate::progress::{ProgressHandle, ScaledProgress, TaskKind};
use crate::services::{Notification, NotifyEvent, TenantId};
use crate::storage::{StorageParams, StorageType};

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub tenant_id: TenantId,
    /// Requesting user; `None` for scheduled runs.
    pub user_id: Option<Uuid>,
    pub storage_type: StorageType,
    pub storage_params: StorageParams,
    pub is_scheduled: bool,
    /// Back up every tenant of the installation.
    pub dump: bool,
}

/// `{alias}_{yyyy-MM-dd_HH-mm-ss}.{ext}`
pub fn backup_file_name(alias: &str, at: DateTime<Utc>, ext: &str) -> String {
    format!("{}_{}.{}", alias, at.format("%Y-%m-%d_%H-%M-%S"), ext)
}

/// Writes an archive, stores it and records it.
pub struct BackupTask {
    services: TaskServices,
    request: BackupRequest,
}

impl BackupTask {
    pub fn new(services: TaskServices, request: BackupRequest) -> Self {
        Self { services, request }
    }

    async fn run_steps(
        &self,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
        temp: &mut Option<std::path::PathBuf>,
    ) -> Result<(), TaskError> {
        let services = &self.services;
        let request = &self.request;

        // Step 1: resolve storage
        let tenant = services
            .tenants
            .get_tenant(request.tenant_id)
            .await?
            .ok_or(TaskError::TenantNotFound(request.tenant_id))?;
        let backend = services.storage.resolve(
            request.storage_type,
            request.tenant_id,
            &request.storage_params,
        )?;
        let base_path = request
            .storage_type
            .base_path(&request.storage_params)
            .unwrap_or_default();
        progress.set_dump(request.dump);
        progress.set_percentage(0.0);
        check_canceled(cancel)?;

        // Step 2: write the archive
        let now = Utc::now();
        let ext = backend.backup_extension(&base_path).await?;
        let name = backup_file_name(&tenant.alias, now, &ext);
        let in_place = backend.in_place_dir(&base_path)?;
        let dir = in_place
            .clone()
            .unwrap_or_else(|| services.config.backup.temp_folder.clone());
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        let dest = dir.join(&name);
        // Removed on failure even when written in place.
        *temp = Some(dest.clone());

        let scope = if request.dump {
            Scope::Instance
        } else {
            Scope::Tenant(tenant.id)
        };
        let written = ArchiveWriter::new(services.config.backup.compress)
            .write(
                services.source.as_ref(),
                scope,
                Some(&tenant.alias),
                &dest,
                &ScaledProgress::new(progress, 0.0, 0.9),
                cancel,
            )
            .instrument(info_span!("write_archive"))
            .await?;
        check_canceled(cancel)?;

        // Step 3: upload unless written in place
        let (storage_path, hash) = if in_place.is_some() {
            (written.path.to_string_lossy().into_owned(), written.hash)
        } else {
            let storage_path = backend
                .upload(&base_path, &dest, request.user_id, cancel)
                .instrument(info_span!("upload"))
                .await?;
            let hash = checksum::sha256_file_async(&dest).await.map_err(io_err(&dest))?;
            (storage_path, hash)
        };
        progress.set_percentage(95.0);
        check_canceled(cancel)?;

        // Step 4: public link
        let link = backend.public_link(&storage_path).await?;
        progress.set_link(link.clone());

        // Step 5: record
        let expires_on = (request.storage_type == StorageType::DataStore)
            .then(|| now + Duration::hours(services.config.backup.data_store_expiry_hours));
        let record = BackupRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            is_scheduled: request.is_scheduled,
            name,
            storage_type: request.storage_type,
            storage_base_path: (!base_path.is_empty()).then_some(base_path),
            storage_path,
            created_on: now,
            expires_on,
            storage_params: request.storage_params.clone(),
            hash,
            removed: false,
        };
        backup_repo::insert(&services.db, &record)?;
        if in_place.is_some() {
            // The artifact now belongs to the record.
            temp.take();
        }
        info!(backup_id = %record.id, path = %record.storage_path, "Backup stored");
        progress.set_percentage(100.0);

        // Step 6: notify interactive callers
        if !request.is_scheduled {
            notify(
                services.notifier.as_ref(),
                Notification::new(tenant.id, NotifyEvent::BackupCompleted)
                    .to_user(request.user_id)
                    .with_link(link),
            )
            .await;
        }

        Ok(())
    }
}

#[async_trait]
impl ProgressTask for BackupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Backup
    }

    fn tenant_id(&self) -> TenantId {
        self.request.tenant_id
    }

    async fn run(
        &self,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        let span = info_span!(
            "backup",
            tenant_id = self.request.tenant_id,
            run_id = %progress.snapshot().id,
            storage = ?self.request.storage_type,
        );
        async {
            let mut temp = None;
            let result = self.run_steps(progress, cancel, &mut temp).await;
            if let Some(path) = temp {
                remove_temp(&path).await;
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::archive::{ArchiveReader, BlobRef, Row, TableSchema, TenantDataSource};
    use crate::error::ServiceError;
    use crate::memory::MemoryPortal;
    use crate::storage::PARAM_FILE_PATH;
    use crate::tasks::execute;
    use crate::tasks::testing::Fixture;
    use chrono::TimeZone;

    #[test]
    fn test_backup_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            backup_file_name("acme", at, "zip"),
            "acme_2024-03-09_14-05-07.zip"
        );
    }

    #[tokio::test]
    async fn test_local_backup_is_written_in_place() {
        let fixture = Fixture::new(7, "acme");
        let target = fixture.dir.path().join("backups");
        let mut params = StorageParams::new();
        params.insert(
            PARAM_FILE_PATH.to_string(),
            target.to_string_lossy().into_owned(),
        );

        let task = BackupTask::new(
            fixture.services(),
            BackupRequest {
                tenant_id: 7,
                user_id: None,
                storage_type: StorageType::Local,
                storage_params: params,
                is_scheduled: true,
                dump: false,
            },
        );
        let progress = fixture.handle(TaskKind::Backup, 7);
        execute(&task, &progress, &CancellationToken::new())
            .await
            .unwrap();

        let records = backup_repo::list_by_tenant(&fixture.db, 7).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.storage_path.starts_with(&*target.to_string_lossy()));
        assert_eq!(
            checksum::sha256_file(std::path::Path::new(&record.storage_path)).unwrap(),
            record.hash
        );
        let reader = ArchiveReader::open(std::path::Path::new(&record.storage_path)).unwrap();
        assert_eq!(reader.manifest().tenant_alias.as_deref(), Some("acme"));

        // Scheduled runs do not notify.
        assert!(fixture.notifier.sent().is_empty());
        // Nothing is left in the temp folder.
        assert!(fixture.temp_is_empty());
    }

    #[tokio::test]
    async fn test_data_store_backup_expires_and_notifies() {
        let fixture = Fixture::new(7, "acme");
        let user = Uuid::new_v4();
        let task = BackupTask::new(
            fixture.services(),
            BackupRequest {
                tenant_id: 7,
                user_id: Some(user),
                storage_type: StorageType::DataStore,
                storage_params: StorageParams::new(),
                is_scheduled: false,
                dump: false,
            },
        );
        let progress = fixture.handle(TaskKind::Backup, 7);
        execute(&task, &progress, &CancellationToken::new())
            .await
            .unwrap();

        let record = backup_repo::list_by_tenant(&fixture.db, 7).unwrap().remove(0);
        assert!(record.expires_on.is_some());
        assert!(record.storage_path.starts_with("backup/7/"));

        let state = progress.snapshot();
        assert!(state.link.as_deref().unwrap().contains("backup/7/"));

        let sent = fixture.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, NotifyEvent::BackupCompleted);
        assert_eq!(sent[0].user_id, Some(user));
        assert_eq!(sent[0].link, state.link);
        assert!(fixture.temp_is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails() {
        let fixture = Fixture::new(7, "acme");
        let task = BackupTask::new(
            fixture.services(),
            BackupRequest {
                tenant_id: 99,
                user_id: None,
                storage_type: StorageType::DataStore,
                storage_params: StorageParams::new(),
                is_scheduled: false,
                dump: false,
            },
        );
        let progress = fixture.handle(TaskKind::Backup, 99);
        let result = execute(&task, &progress, &CancellationToken::new()).await;

        assert!(matches!(result, Err(TaskError::TenantNotFound(99))));
        assert!(progress.snapshot().is_completed);
    }

    #[tokio::test]
    async fn test_canceled_backup_leaves_no_record() {
        let fixture = Fixture::new(7, "acme");
        let task = BackupTask::new(
            fixture.services(),
            BackupRequest {
                tenant_id: 7,
                user_id: None,
                storage_type: StorageType::DataStore,
                storage_params: StorageParams::new(),
                is_scheduled: false,
                dump: false,
            },
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let progress = fixture.handle(TaskKind::Backup, 7);
        let result = execute(&task, &progress, &cancel).await;

        assert!(matches!(result, Err(TaskError::Canceled)));
        assert_eq!(
            progress.snapshot().error.as_deref(),
            Some("operation canceled")
        );
        assert!(backup_repo::list_by_tenant(&fixture.db, 7).unwrap().is_empty());
    }

    /// Source whose file content cannot be read.
    struct UnreadableBlobs(Arc<MemoryPortal>);

    #[async_trait]
    impl TenantDataSource for UnreadableBlobs {
        async fn tables(&self) -> Result<Vec<TableSchema>, ServiceError> {
            self.0.tables().await
        }

        async fn rows(&self, table: &TableSchema, scope: Scope) -> Result<Vec<Row>, ServiceError> {
            self.0.rows(table, scope).await
        }

        async fn blobs(&self, scope: Scope) -> Result<Vec<BlobRef>, ServiceError> {
            self.0.blobs(scope).await
        }

        async fn read_blob(&self, blob: &BlobRef) -> Result<Vec<u8>, ServiceError> {
            Err(ServiceError::Unavailable(format!("blob {}", blob.file_id)))
        }
    }

    #[tokio::test]
    async fn test_failed_local_backup_leaves_no_partial_archive() {
        let fixture = Fixture::new(7, "acme");
        let target = fixture.dir.path().join("backups");
        let mut params = StorageParams::new();
        params.insert(
            PARAM_FILE_PATH.to_string(),
            target.to_string_lossy().into_owned(),
        );
        let mut services = fixture.services();
        services.source = Arc::new(UnreadableBlobs(fixture.portal.clone()));

        let task = BackupTask::new(
            services,
            BackupRequest {
                tenant_id: 7,
                user_id: None,
                storage_type: StorageType::Local,
                storage_params: params,
                is_scheduled: false,
                dump: false,
            },
        );
        let progress = fixture.handle(TaskKind::Backup, 7);
        let result = execute(&task, &progress, &CancellationToken::new()).await;

        assert!(result.is_err());
        assert!(progress.snapshot().error.is_some());
        assert!(backup_repo::list_by_tenant(&fixture.db, 7).unwrap().is_empty());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }
}
