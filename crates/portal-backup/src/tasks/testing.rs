use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use super::{RegionReplayers, TaskServices};
use crate::config::{Config, RegionConfig};
use crate::db::Database;
use crate::memory::{MemoryFiles, MemoryPortal, RecordingNotifier};
use crate::progress::{NoopPublisher, ProgressHandle, ProgressState, TaskKind};
use crate::replay::ArchiveReplayer;
use crate::services::TenantId;
use crate::storage::factory::DATA_STORE_MODULE;
use crate::storage::{FsObjectStore, StorageFactory};

/// In-memory collaborators around one sample tenant, plus an empty `eu`
/// region.
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub portal: Arc<MemoryPortal>,
    pub eu: Arc<MemoryPortal>,
    pub files: Arc<MemoryFiles>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    pub fn new(tenant_id: TenantId, alias: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.core.base_domain = "portal.local".to_string();
        config.regions.insert(
            "eu".to_string(),
            RegionConfig {
                base_domain: "eu.portal.example".to_string(),
            },
        );
        config.backup.temp_folder = dir.path().join("tmp");

        Self {
            config,
            db: Database::open_in_memory().unwrap(),
            portal: Arc::new(MemoryPortal::with_sample_tenant(tenant_id, alias)),
            eu: Arc::new(MemoryPortal::new()),
            files: Arc::new(MemoryFiles::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            dir,
        }
    }

    pub fn temp_folder(&self) -> PathBuf {
        self.config.backup.temp_folder.clone()
    }

    pub fn temp_is_empty(&self) -> bool {
        match std::fs::read_dir(self.temp_folder()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    pub fn services(&self) -> TaskServices {
        let store = FsObjectStore::new(self.dir.path().join("store"), "https://store.local");
        TaskServices {
            config: Arc::new(self.config.clone()),
            db: self.db.clone(),
            tenants: self.portal.clone(),
            source: self.portal.clone(),
            replayer: Arc::new(ArchiveReplayer::new(self.portal.clone())),
            regions: Arc::new(
                RegionReplayers::new()
                    .with_region("eu", Arc::new(ArchiveReplayer::new(self.eu.clone()))),
            ),
            notifier: self.notifier.clone(),
            storage: StorageFactory::new(self.files.clone(), vec![])
                .with_object_store(DATA_STORE_MODULE, Arc::new(store)),
        }
    }

    pub fn handle(&self, kind: TaskKind, tenant_id: TenantId) -> ProgressHandle {
        ProgressHandle::new(ProgressState::new(kind, tenant_id), Arc::new(NoopPublisher))
    }
}
