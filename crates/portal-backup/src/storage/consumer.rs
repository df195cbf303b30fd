use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{file_name_of, StorageBackend, StorageType};
use crate::error::StorageError;
use crate::services::TenantId;

/// Key/value object storage of a cloud consumer (S3, GCS, ...).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, local_file: &Path) -> Result<(), StorageError>;

    async fn get(&self, key: &str, dest: &Path) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn public_url(&self, key: &str) -> Result<String, StorageError>;
}

/// Object store laid out on a local directory, one file per key.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." || segment == "." {
                return Err(StorageError::OutsideRoot(PathBuf::from(key)));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, local_file: &Path) -> Result<(), StorageError> {
        let target = self.path_for(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        tokio::fs::copy(local_file, &target)
            .await
            .map_err(|e| io_err(&target, e))?;
        Ok(())
    }

    async fn get(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let source = self.path_for(key)?;
        match tokio::fs::copy(&source, dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(io_err(dest, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path).await.map_err(|e| io_err(&path, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn public_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        ))
    }
}

/// Archives kept in an object store under a per-tenant key prefix.
pub struct ConsumerStorage {
    store: Arc<dyn ObjectStore>,
    storage_type: StorageType,
    tenant_id: TenantId,
}

impl ConsumerStorage {
    pub fn new(store: Arc<dyn ObjectStore>, storage_type: StorageType, tenant_id: TenantId) -> Self {
        Self {
            store,
            storage_type,
            tenant_id,
        }
    }

    fn key_for(&self, base_path: &str, file_name: &str) -> String {
        let prefix = base_path.trim_matches('/');
        if prefix.is_empty() {
            format!("backup/{}/{}", self.tenant_id, file_name)
        } else {
            format!("{}/{}", prefix, file_name)
        }
    }
}

#[async_trait]
impl StorageBackend for ConsumerStorage {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    async fn upload(
        &self,
        base_path: &str,
        local_file: &Path,
        _actor: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<String, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        let file_name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::NotFound(local_file.display().to_string()))?;
        let key = self.key_for(base_path, file_name);
        self.store.put(&key, local_file).await?;
        Ok(key)
    }

    async fn download(&self, storage_path: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| io_err(dest_dir, e))?;
        let target = dest_dir.join(file_name_of(storage_path));
        self.store.get(storage_path, &target).await?;
        Ok(target)
    }

    async fn public_link(&self, storage_path: &str) -> Result<String, StorageError> {
        self.store.public_url(storage_path).await
    }

    async fn exists(&self, storage_path: &str) -> Result<bool, StorageError> {
        self.store.exists(storage_path).await
    }

    async fn delete(&self, storage_path: &str) -> Result<(), StorageError> {
        self.store.delete(storage_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(root: &Path) -> ConsumerStorage {
        let store = Arc::new(FsObjectStore::new(root, "https://cdn.example/backups/"));
        ConsumerStorage::new(store, StorageType::DataStore, 7)
    }

    #[tokio::test]
    async fn test_upload_uses_tenant_prefix() {
        let store_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = work.path().join("portal.zip");
        std::fs::write(&file, b"data").unwrap();

        let storage = consumer(store_dir.path());
        let key = storage
            .upload("", &file, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(key, "backup/7/portal.zip");
        assert!(storage.exists(&key).await.unwrap());
        assert_eq!(
            storage.public_link(&key).await.unwrap(),
            "https://cdn.example/backups/backup/7/portal.zip"
        );
    }

    #[tokio::test]
    async fn test_download_round_trip() {
        let store_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = work.path().join("portal.zip");
        std::fs::write(&file, b"payload").unwrap();

        let storage = consumer(store_dir.path());
        let key = storage
            .upload("archives", &file, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(key, "archives/portal.zip");

        let dest = work.path().join("restore");
        let downloaded = storage.download(&key, &dest).await.unwrap();
        assert_eq!(std::fs::read(downloaded).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let storage = consumer(store_dir.path());

        let result = storage.download("backup/7/none.zip", work.path()).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!storage.exists("backup/7/none.zip").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_traversal_rejected() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(store_dir.path(), "https://cdn.example");
        assert!(matches!(
            store.exists("../etc/passwd").await,
            Err(StorageError::OutsideRoot(_))
        ));
    }
}
