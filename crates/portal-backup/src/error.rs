use std::path::PathBuf;
use thiserror::Error;

use crate::services::TenantId;
use crate::storage::StorageType;

#[derive(Error, Debug)]
pub enum PortalBackupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised while writing or reading a portable archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Zip container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid JSON in archive entry '{entry}': {source}")]
    Json {
        entry: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed archive: {0}")]
    Malformed(String),

    #[error("Archive entry not found: {0}")]
    MissingEntry(String),

    #[error("Tenant data source failed: {0}")]
    Source(#[from] ServiceError),

    #[error("operation canceled")]
    Canceled,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage object not found: {0}")]
    NotFound(String),

    #[error("Missing storage parameter '{0}'")]
    MissingParam(String),

    #[error("Storage type {0:?} is not available")]
    Unsupported(StorageType),

    #[error("Storage path escapes its root: {0}")]
    OutsideRoot(PathBuf),

    #[error("Storage backend failed: {0}")]
    Backend(String),

    #[error("operation canceled")]
    Canceled,

    #[error("Storage service failed: {0}")]
    Service(#[from] ServiceError),
}

/// Failure reported by an external collaborator (tenant directory, user
/// directory, file service, notification sender, data source or sink).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Task-fatal errors of the backup, restore and transfer runs.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("operation canceled")]
    Canceled,

    #[error("backup not found")]
    BackupNotFound,

    #[error("Tenant {0} not found")]
    TenantNotFound(TenantId),

    #[error("Task I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Replay failed: {0}")]
    Replay(String),
}

/// Errors raised synchronously by the orchestration facade, before any task
/// is created.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Access denied")]
    AccessDenied,

    #[error("The option '{option}' is not available on the current plan")]
    Billing { option: String },

    #[error("Operation is not allowed: {0}")]
    InvalidOperation(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Migration I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Invalid export: {0}")]
    InvalidExport(String),

    #[error("operation canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, PortalBackupError>;
