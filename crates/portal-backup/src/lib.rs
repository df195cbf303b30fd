pub mod archive;
pub mod checksum;
pub mod cleanup;
pub mod column_mapper;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod memory;
pub mod migration;
pub mod orchestrator;
pub mod progress;
pub mod replay;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod tasks;
pub mod worker;

pub use archive::{ArchiveReader, ArchiveWriter, Manifest, TenantDataSource};
pub use cleanup::{BackupCleaner, CleanupReport};
pub use column_mapper::ColumnMapper;
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ArchiveError, ConfigError, MigrationError, OrchestratorError, PortalBackupError, Result,
    ServiceError, StorageError, TaskError,
};
pub use migration::{MigrationApiInfo, MigrationOutcome, Migrator, WorkspaceParser};
pub use orchestrator::{BackupOrchestrator, Caller, RestoreSource, ScheduleRequest};
pub use progress::{ProgressState, ProgressStore, TaskKind};
pub use replay::{ArchiveReplayer, Replayer, TenantDataSink};
pub use scheduler::BackupScheduler;
pub use storage::{StorageBackend, StorageFactory, StorageType};
pub use tasks::TaskServices;
pub use worker::BackupWorker;
