use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{
    ConsumerStorage, DocumentsStorage, LocalStorage, ObjectStore, StorageBackend, StorageParams,
    StorageType, PARAM_MODULE,
};
use crate::error::StorageError;
use crate::services::{FileStorageService, TenantId};

/// Object store module backing DataStore backups.
pub const DATA_STORE_MODULE: &str = "DataStore";
/// Module legacy CustomCloud settings map to.
pub const LEGACY_CLOUD_MODULE: &str = "S3";

/// Builds the storage backend for a storage type and its parameters.
#[derive(Clone)]
pub struct StorageFactory {
    files: Arc<dyn FileStorageService>,
    local_roots: Vec<PathBuf>,
    object_stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StorageFactory {
    pub fn new(files: Arc<dyn FileStorageService>, local_roots: Vec<PathBuf>) -> Self {
        Self {
            files,
            local_roots,
            object_stores: HashMap::new(),
        }
    }

    /// Registers an object store under a consumer module name.
    pub fn with_object_store(mut self, module: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.object_stores.insert(module.into(), store);
        self
    }

    pub fn resolve(
        &self,
        storage_type: StorageType,
        tenant_id: TenantId,
        params: &StorageParams,
    ) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let backend: Arc<dyn StorageBackend> = match storage_type {
            StorageType::Local => Arc::new(LocalStorage::new(self.local_roots.clone())),
            StorageType::Documents => Arc::new(DocumentsStorage::new(self.files.clone(), false)),
            StorageType::ThirdPartyDocuments => {
                Arc::new(DocumentsStorage::new(self.files.clone(), true))
            }
            StorageType::DataStore => Arc::new(ConsumerStorage::new(
                self.object_store(DATA_STORE_MODULE)?,
                storage_type,
                tenant_id,
            )),
            StorageType::CustomCloud => Arc::new(ConsumerStorage::new(
                self.object_store(LEGACY_CLOUD_MODULE)?,
                storage_type,
                tenant_id,
            )),
            StorageType::ThirdPartyConsumer => {
                let module = params
                    .get(PARAM_MODULE)
                    .ok_or_else(|| StorageError::MissingParam(PARAM_MODULE.to_string()))?;
                Arc::new(ConsumerStorage::new(
                    self.object_store(module)?,
                    storage_type,
                    tenant_id,
                ))
            }
        };

        Ok(backend)
    }

    fn object_store(&self, module: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        self.object_stores
            .get(module)
            .cloned()
            .ok_or_else(|| StorageError::Backend(format!("consumer '{}' is not configured", module)))
    }
}
