use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::backup::backup_file_name;
use super::{check_canceled, io_err, notify, remove_temp, ProgressTask, TaskServices};
use crate::archive::{ArchiveWriter, Scope};
use crate::column_mapper::ColumnMapper;
use crate::error::TaskError;
use crate::progress::{ProgressHandle, ProgressReporter, ScaledProgress, TaskKind};
use crate::replay::{ReplayOutcome, Replayer};
use crate::services::{Notification, NotifyEvent, Tenant, TenantId, TenantStatus};

/// Table that stays with the source region.
pub const TARIFF_TABLE: &str = "tenants_tariff";

/// Replays a tenant package inside another region.
#[async_trait]
pub trait RegionTransfer: Send + Sync {
    async fn replay_in_region(
        &self,
        region: &str,
        archive: &Path,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ReplayOutcome, TaskError>;
}

/// Region name to the replayer writing into that region.
#[derive(Default, Clone)]
pub struct RegionReplayers {
    regions: HashMap<String, Arc<dyn Replayer>>,
}

impl RegionReplayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: impl Into<String>, replayer: Arc<dyn Replayer>) -> Self {
        self.regions.insert(region.into(), replayer);
        self
    }

    pub fn contains(&self, region: &str) -> bool {
        self.regions.contains_key(region)
    }
}

#[async_trait]
impl RegionTransfer for RegionReplayers {
    async fn replay_in_region(
        &self,
        region: &str,
        archive: &Path,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ReplayOutcome, TaskError> {
        let replayer = self
            .regions
            .get(region)
            .ok_or_else(|| TaskError::Replay(format!("unknown region '{}'", region)))?;
        let mut mapper = ColumnMapper::new();
        replayer.replay(archive, &mut mapper, progress, cancel).await
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub tenant_id: TenantId,
    pub user_id: Option<Uuid>,
    pub target_region: String,
    pub notify: bool,
}

/// Moves a tenant into another region.
pub struct TransferTask {
    services: TaskServices,
    request: TransferRequest,
}

impl TransferTask {
    pub fn new(services: TaskServices, request: TransferRequest) -> Self {
        Self { services, request }
    }

    fn portal_link(&self, alias: &str, region: Option<&str>) -> String {
        format!(
            "https://{}.{}",
            alias,
            self.services.config.base_domain_for(region)
        )
    }

    async fn run_steps(
        &self,
        tenant: &Tenant,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
        temp: &mut Option<std::path::PathBuf>,
    ) -> Result<(), TaskError> {
        let services = &self.services;
        let region = self.request.target_region.as_str();

        // Package
        let dir = services.config.backup.temp_folder.clone();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        let dest = dir.join(backup_file_name(&tenant.alias, Utc::now(), "zip"));
        *temp = Some(dest.clone());
        ArchiveWriter::new(services.config.backup.compress)
            .exclude_table(TARIFF_TABLE)
            .write(
                services.source.as_ref(),
                Scope::Tenant(tenant.id),
                Some(&tenant.alias),
                &dest,
                &ScaledProgress::new(progress, 0.0, 0.5),
                cancel,
            )
            .instrument(info_span!("package"))
            .await?;
        check_canceled(cancel)?;

        // Replay in the target region
        let outcome = services
            .regions
            .replay_in_region(
                region,
                &dest,
                &ScaledProgress::new(progress, 50.0, 0.45),
                cancel,
            )
            .instrument(info_span!("replay", region))
            .await?;
        if let Some(new_id) = outcome.tenant_id {
            progress.set_new_tenant(new_id);
        }

        services
            .tenants
            .set_status(tenant.id, TenantStatus::RemovePending)
            .await?;
        info!(region, rows = outcome.rows, blobs = outcome.blobs, "Tenant transferred");
        Ok(())
    }
}

#[async_trait]
impl ProgressTask for TransferTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Transfer
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
            "transfer",
            tenant_id = self.request.tenant_id,
            run_id = %progress.snapshot().id,
            region = %self.request.target_region,
        );
        async {
            let services = &self.services;
            let region = self.request.target_region.clone();
            let tenant = services
                .tenants
                .get_tenant(self.request.tenant_id)
                .await?
                .ok_or(TaskError::TenantNotFound(self.request.tenant_id))?;

            if self.request.notify {
                notify(
                    services.notifier.as_ref(),
                    Notification::new(tenant.id, NotifyEvent::TransferStarted { region: region.clone() })
                        .to_user(Some(tenant.owner_id)),
                )
                .await;
            }
            services
                .tenants
                .set_status(tenant.id, TenantStatus::Suspended)
                .await?;

            let mut temp = None;
            let result = self.run_steps(&tenant, progress, cancel, &mut temp).await;

            let (event, link) = match &result {
                Ok(()) => (
                    NotifyEvent::TransferCompleted { region: region.clone() },
                    self.portal_link(&tenant.alias, Some(&region)),
                ),
                Err(_) => {
                    if let Err(e) = services
                        .tenants
                        .set_status(tenant.id, TenantStatus::Active)
                        .await
                    {
                        warn!(error = %e, "Failed to reactivate tenant after failed transfer");
                    }
                    (
                        NotifyEvent::TransferError { region: region.clone() },
                        self.portal_link(&tenant.alias, None),
                    )
                }
            };
            progress.set_link(link.clone());
            if self.request.notify {
                notify(
                    services.notifier.as_ref(),
                    Notification::new(tenant.id, event)
                        .to_user(Some(tenant.owner_id))
                        .with_link(link),
                )
                .await;
            }

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
    use crate::services::TenantDirectory;
    use crate::tasks::execute;
    use crate::tasks::testing::Fixture;

    fn transfer(fixture: &Fixture, region: &str) -> TransferTask {
        TransferTask::new(
            fixture.services(),
            TransferRequest {
                tenant_id: 9,
                user_id: None,
                target_region: region.to_string(),
                notify: true,
            },
        )
    }

    #[tokio::test]
    async fn test_transfer_links_new_region() {
        let fixture = Fixture::new(9, "nine");
        let progress = fixture.handle(TaskKind::Transfer, 9);
        execute(&transfer(&fixture, "eu"), &progress, &CancellationToken::new())
            .await
            .unwrap();

        let state = progress.snapshot();
        assert_eq!(state.link.as_deref(), Some("https://nine.eu.portal.example"));
        assert!(state.new_tenant_id.is_some());

        let moved = fixture.eu.get_tenant_by_alias("nine").await.unwrap().unwrap();
        assert_eq!(Some(moved.id), state.new_tenant_id);
        assert!(fixture.eu.table_rows(TARIFF_TABLE, Some(moved.id)).is_empty());
        assert!(!fixture.eu.table_rows("files_file", Some(moved.id)).is_empty());

        let source = fixture.portal.get_tenant(9).await.unwrap().unwrap();
        assert_eq!(source.status, TenantStatus::RemovePending);

        let last = fixture.notifier.sent().pop().unwrap();
        assert_eq!(last.event, NotifyEvent::TransferCompleted { region: "eu".to_string() });
        assert!(fixture.temp_is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_links_origin() {
        let fixture = Fixture::new(9, "nine");
        let progress = fixture.handle(TaskKind::Transfer, 9);
        let result = execute(&transfer(&fixture, "ap"), &progress, &CancellationToken::new()).await;
        assert!(matches!(result, Err(TaskError::Replay(_))));

        let state = progress.snapshot();
        assert_eq!(state.link.as_deref(), Some("https://nine.portal.local"));
        assert!(state.error.is_some());

        let source = fixture.portal.get_tenant(9).await.unwrap().unwrap();
        assert_eq!(source.status, TenantStatus::Active);

        let last = fixture.notifier.sent().pop().unwrap();
        assert_eq!(last.event, NotifyEvent::TransferError { region: "ap".to_string() });
        assert_eq!(last.link.as_deref(), Some("https://nine.portal.local"));
    }
}
