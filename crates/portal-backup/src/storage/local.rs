use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{file_name_of, StorageBackend, StorageType};
use crate::error::StorageError;

/// Archives kept in a directory on the local file system.
///
/// Only available in standalone deployments. When `roots` is non-empty every
/// path must lie under one of them.
pub struct LocalStorage {
    roots: Vec<PathBuf>,
}

impl LocalStorage {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.iter().map(|r| normalize(r)).collect(),
        }
    }

    fn checked(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let normalized = normalize(path);
        if normalized.as_os_str().is_empty() || !normalized.is_absolute() {
            return Err(StorageError::MissingParam(super::PARAM_FILE_PATH.to_string()));
        }
        if !self.roots.is_empty() && !self.roots.iter().any(|r| normalized.starts_with(r)) {
            return Err(StorageError::OutsideRoot(normalized));
        }
        Ok(normalized)
    }
}

/// Lexically resolves `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }

    fn in_place_dir(&self, base_path: &str) -> Result<Option<PathBuf>, StorageError> {
        self.checked(Path::new(base_path)).map(Some)
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
        let dir = self.checked(Path::new(base_path))?;
        let file_name = local_file
            .file_name()
            .ok_or_else(|| StorageError::NotFound(local_file.display().to_string()))?;
        let target = dir.join(file_name);

        if normalize(local_file) != target {
            tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
            tokio::fs::copy(local_file, &target)
                .await
                .map_err(io_err(&target))?;
        }

        Ok(target.to_string_lossy().into_owned())
    }

    async fn download(&self, storage_path: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        let source = self.checked(Path::new(storage_path))?;
        if !tokio::fs::try_exists(&source).await.map_err(io_err(&source))? {
            return Err(StorageError::NotFound(storage_path.to_string()));
        }
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(io_err(dest_dir))?;
        let target = dest_dir.join(file_name_of(storage_path));
        if target != source {
            tokio::fs::copy(&source, &target)
                .await
                .map_err(io_err(&target))?;
        }
        Ok(target)
    }

    async fn public_link(&self, storage_path: &str) -> Result<String, StorageError> {
        Ok(self.checked(Path::new(storage_path))?.to_string_lossy().into_owned())
    }

    async fn exists(&self, storage_path: &str) -> Result<bool, StorageError> {
        let path = self.checked(Path::new(storage_path))?;
        tokio::fs::try_exists(&path).await.map_err(io_err(&path))
    }

    async fn delete(&self, storage_path: &str) -> Result<(), StorageError> {
        let path = self.checked(Path::new(storage_path))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_copies_into_base_path() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let file = source_dir.path().join("portal_backup.zip");
        std::fs::write(&file, b"archive").unwrap();

        let storage = LocalStorage::new(vec![]);
        let stored = storage
            .upload(
                target_dir.path().to_str().unwrap(),
                &file,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            PathBuf::from(&stored),
            target_dir.path().join("portal_backup.zip")
        );
        assert!(storage.exists(&stored).await.unwrap());
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_upload_in_place_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.zip");
        std::fs::write(&file, b"archive").unwrap();

        let storage = LocalStorage::new(vec![]);
        let stored = storage
            .upload(
                dir.path().to_str().unwrap(),
                &file,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(PathBuf::from(stored), file);
        assert_eq!(std::fs::read(&file).unwrap(), b"archive");
    }

    #[tokio::test]
    async fn test_path_outside_roots_rejected() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(vec![root.path().to_path_buf()]);

        let escape = root.path().join("..").join("elsewhere");
        let result = storage.in_place_dir(escape.to_str().unwrap());
        assert!(matches!(result, Err(StorageError::OutsideRoot(_))));

        let inside = root.path().join("backups");
        assert_eq!(
            storage.in_place_dir(inside.to_str().unwrap()).unwrap(),
            Some(inside)
        );
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(vec![]);
        let missing = dir.path().join("missing.zip");
        let result = storage
            .download(missing.to_str().unwrap(), dir.path())
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.zip");
        std::fs::write(&file, b"x").unwrap();

        let storage = LocalStorage::new(vec![]);
        let path = file.to_str().unwrap();
        storage.delete(path).await.unwrap();
        storage.delete(path).await.unwrap();
        assert!(!storage.exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_canceled_upload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.zip");
        std::fs::write(&file, b"x").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let storage = LocalStorage::new(vec![]);
        let result = storage
            .upload(dir.path().to_str().unwrap(), &file, None, &cancel)
            .await;
        assert!(matches!(result, Err(StorageError::Canceled)));
    }
}
