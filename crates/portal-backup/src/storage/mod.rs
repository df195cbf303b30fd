//! Storage targets for backup archives.
//!
//! Every target implements [`StorageBackend`]; [`StorageFactory`] builds the
//! backend for a storage type and its parameters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StorageError;

pub mod consumer;
pub mod documents;
pub mod factory;
pub mod local;

pub use consumer::{ConsumerStorage, FsObjectStore, ObjectStore};
pub use documents::DocumentsStorage;
pub use factory::StorageFactory;
pub use local::LocalStorage;

/// Opaque key/value settings of a storage target (`folderId`, `filePath`,
/// `module`, consumer credentials, ...).
pub type StorageParams = BTreeMap<String, String>;

pub const PARAM_FOLDER_ID: &str = "folderId";
pub const PARAM_FILE_PATH: &str = "filePath";
pub const PARAM_MODULE: &str = "module";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    Documents,
    ThirdPartyDocuments,
    /// Legacy S3 settings, read back as [`StorageType::ThirdPartyConsumer`].
    CustomCloud,
    Local,
    /// Transient tenant data store; backups there expire.
    DataStore,
    ThirdPartyConsumer,
}

impl StorageType {
    pub fn code(&self) -> i64 {
        match self {
            Self::Documents => 0,
            Self::ThirdPartyDocuments => 1,
            Self::CustomCloud => 2,
            Self::Local => 3,
            Self::DataStore => 4,
            Self::ThirdPartyConsumer => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Documents),
            1 => Some(Self::ThirdPartyDocuments),
            2 => Some(Self::CustomCloud),
            3 => Some(Self::Local),
            4 => Some(Self::DataStore),
            5 => Some(Self::ThirdPartyConsumer),
            _ => None,
        }
    }

    /// Storage base path encoded in the target's parameters.
    pub fn base_path(&self, params: &StorageParams) -> Option<String> {
        let key = match self {
            Self::Documents | Self::ThirdPartyDocuments => PARAM_FOLDER_ID,
            Self::Local => PARAM_FILE_PATH,
            _ => return None,
        };
        params.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Uniform access to one storage target.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Directory the archive writer may write into directly. When this
    /// returns a directory the written file is already the stored artifact.
    fn in_place_dir(&self, _base_path: &str) -> Result<Option<PathBuf>, StorageError> {
        Ok(None)
    }

    /// Uploads `local_file` under `base_path` and returns its storage path.
    async fn upload(
        &self,
        base_path: &str,
        local_file: &Path,
        actor: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<String, StorageError>;

    /// Downloads the artifact into `dest_dir` and returns the local file.
    async fn download(&self, storage_path: &str, dest_dir: &Path) -> Result<PathBuf, StorageError>;

    async fn public_link(&self, storage_path: &str) -> Result<String, StorageError>;

    /// File extension (without dot) for archives stored under `base_path`.
    async fn backup_extension(&self, _base_path: &str) -> Result<String, StorageError> {
        Ok("zip".to_string())
    }

    async fn exists(&self, storage_path: &str) -> Result<bool, StorageError>;

    async fn delete(&self, storage_path: &str) -> Result<(), StorageError>;
}

/// Final path component of a storage path or key.
pub(crate) fn file_name_of(storage_path: &str) -> &str {
    storage_path
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(storage_path)
}
