//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct wires a complete engine over in-memory
//! collaborators:
//! - One portal with a sample tenant, plus an empty `eu` region portal
//! - A file service, a data-store object store and a recording notifier
//! - Worker, orchestrator and scheduler sharing one in-memory database

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use portal_backup::config::{Config, RegionConfig};
use portal_backup::memory::{
    MemoryFiles, MemoryPolicy, MemoryPortal, MemoryUsers, RecordingNotifier,
};
use portal_backup::migration::Migrator;
use portal_backup::progress::ProgressStore;
use portal_backup::services::{TenantDirectory, TenantId};
use portal_backup::storage::factory::DATA_STORE_MODULE;
use portal_backup::storage::FsObjectStore;
use portal_backup::tasks::RegionReplayers;
use portal_backup::{
    ArchiveReplayer, BackupOrchestrator, BackupScheduler, BackupWorker, Caller, Database,
    StorageFactory, TaskServices,
};

/// Test harness providing an isolated engine for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub tenant_id: TenantId,
    pub portal: Arc<MemoryPortal>,
    pub eu: Arc<MemoryPortal>,
    pub files: Arc<MemoryFiles>,
    pub users: Arc<MemoryUsers>,
    pub notifier: Arc<RecordingNotifier>,
    pub policy: Arc<MemoryPolicy>,
    pub worker: Arc<BackupWorker>,
}

impl TestHarness {
    /// Harness around tenant `tenant_id` with alias `alias`.
    pub fn new(tenant_id: TenantId, alias: &str, standalone: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = Config::default();
        config.core.standalone = standalone;
        config.core.base_domain = "portal.local".to_string();
        config.regions.insert(
            "eu".to_string(),
            RegionConfig {
                base_domain: "eu.portal.example".to_string(),
            },
        );
        config.backup.temp_folder = temp_dir.path().join("tmp");

        let db = Database::open_in_memory().expect("Failed to open database");
        let store = Arc::new(ProgressStore::new(Some(db.clone())));

        Self {
            config,
            tenant_id,
            portal: Arc::new(MemoryPortal::with_sample_tenant(tenant_id, alias)),
            eu: Arc::new(MemoryPortal::new()),
            files: Arc::new(MemoryFiles::new()),
            users: Arc::new(MemoryUsers::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            policy: Arc::new(MemoryPolicy::new()),
            worker: Arc::new(BackupWorker::new(store, 2)),
            db,
            temp_dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.temp_dir.path().join("backups")
    }

    pub fn services(&self) -> TaskServices {
        let store = FsObjectStore::new(self.store_dir(), "https://store.local");
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

    pub fn orchestrator(&self) -> BackupOrchestrator {
        BackupOrchestrator::new(
            self.services(),
            self.worker.clone(),
            self.policy.clone(),
            self.policy.clone(),
        )
    }

    pub fn scheduler(&self) -> BackupScheduler {
        BackupScheduler::new(self.services(), self.worker.clone())
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.users.clone(), self.files.clone())
    }

    /// The tenant owner, allowed to do everything.
    pub async fn owner(&self) -> Caller {
        let tenant = self
            .portal
            .get_tenant(self.tenant_id)
            .await
            .expect("Tenant lookup failed")
            .expect("Tenant missing");
        Caller {
            tenant_id: self.tenant_id,
            user_id: tenant.owner_id,
        }
    }

    pub fn stranger(&self) -> Caller {
        Caller {
            tenant_id: self.tenant_id,
            user_id: Uuid::new_v4(),
        }
    }

    /// Every file below the data-store directory.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.store_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }
}
