use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{StorageBackend, StorageType};
use crate::error::StorageError;
use crate::services::{EntryId, FileStorageService};

/// Archives stored as files in a folder of the portal's own document
/// storage, or of a connected third-party provider folder.
pub struct DocumentsStorage {
    files: Arc<dyn FileStorageService>,
    third_party: bool,
}

impl DocumentsStorage {
    pub fn new(files: Arc<dyn FileStorageService>, third_party: bool) -> Self {
        Self { files, third_party }
    }
}

fn parse_id(value: &str) -> Result<EntryId, StorageError> {
    value
        .trim()
        .parse()
        .map_err(|_| StorageError::NotFound(value.to_string()))
}

#[async_trait]
impl StorageBackend for DocumentsStorage {
    fn storage_type(&self) -> StorageType {
        if self.third_party {
            StorageType::ThirdPartyDocuments
        } else {
            StorageType::Documents
        }
    }

    async fn upload(
        &self,
        base_path: &str,
        local_file: &Path,
        actor: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<String, StorageError> {
        let folder_id = parse_id(base_path)?;
        let title = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::NotFound(local_file.display().to_string()))?;
        let content = tokio::fs::read(local_file)
            .await
            .map_err(|source| StorageError::Io {
                path: local_file.to_path_buf(),
                source,
            })?;

        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }

        let file = self.files.save_file(folder_id, title, content, actor).await?;
        Ok(file.id.to_string())
    }

    async fn download(&self, storage_path: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        let file_id = parse_id(storage_path)?;
        let content = self.files.read_file(file_id).await?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| StorageError::Io {
                path: dest_dir.to_path_buf(),
                source,
            })?;
        let target = dest_dir.join(format!("{}.{}", file_id, self.backup_extension("").await?));
        tokio::fs::write(&target, content)
            .await
            .map_err(|source| StorageError::Io {
                path: target.clone(),
                source,
            })?;
        Ok(target)
    }

    async fn public_link(&self, storage_path: &str) -> Result<String, StorageError> {
        Ok(self.files.file_link(parse_id(storage_path)?).await?)
    }

    async fn exists(&self, storage_path: &str) -> Result<bool, StorageError> {
        match parse_id(storage_path) {
            Ok(id) => Ok(self.files.file_exists(id).await?),
            Err(_) => Ok(false),
        }
    }

    async fn delete(&self, storage_path: &str) -> Result<(), StorageError> {
        let file_id = parse_id(storage_path)?;
        if self.files.file_exists(file_id).await? {
            self.files.delete_file(file_id).await?;
        }
        Ok(())
    }
}
