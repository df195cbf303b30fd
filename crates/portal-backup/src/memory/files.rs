use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::lock;
use crate::error::ServiceError;
use crate::services::{
    Access, AceGrant, EntryId, EntryType, FileRef, FileStorageService, FolderRef, RoomType,
};

#[derive(Debug, Clone)]
struct StoredFolder {
    folder: FolderRef,
    owner: Option<Uuid>,
    room_type: Option<RoomType>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    file: FileRef,
    owner: Option<Uuid>,
    content: Vec<u8>,
}

/// A granted share, as recorded by [`MemoryFiles`].
#[derive(Debug, Clone, PartialEq)]
pub enum Share {
    ExternalLink {
        entry_id: EntryId,
        entry_type: EntryType,
        access: Access,
    },
    Ace {
        entry_id: EntryId,
        entry_type: EntryType,
        grant: AceGrant,
    },
}

#[derive(Default)]
struct FilesData {
    next_id: EntryId,
    folders: BTreeMap<EntryId, StoredFolder>,
    files: BTreeMap<EntryId, StoredFile>,
    user_roots: HashMap<Uuid, EntryId>,
    common_root: Option<EntryId>,
    shares: Vec<Share>,
    failing_titles: HashSet<String>,
}

impl FilesData {
    fn next_id(&mut self) -> EntryId {
        self.next_id += 1;
        self.next_id
    }

    fn add_folder(
        &mut self,
        parent_id: Option<EntryId>,
        title: &str,
        owner: Option<Uuid>,
        room_type: Option<RoomType>,
    ) -> FolderRef {
        let folder = FolderRef {
            id: self.next_id(),
            title: title.to_string(),
            parent_id,
            is_room: room_type.is_some(),
        };
        self.folders.insert(
            folder.id,
            StoredFolder {
                folder: folder.clone(),
                owner,
                room_type,
            },
        );
        folder
    }
}

/// File and folder service kept in memory.
#[derive(Default)]
pub struct MemoryFiles {
    data: Mutex<FilesData>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `save_file` with this title fail.
    pub fn fail_saving(&self, title: &str) {
        lock(&self.data, "Files")
            .failing_titles
            .insert(title.to_string());
    }

    pub fn folders(&self) -> Vec<FolderRef> {
        lock(&self.data, "Files")
            .folders
            .values()
            .map(|f| f.folder.clone())
            .collect()
    }

    pub fn files(&self) -> Vec<FileRef> {
        lock(&self.data, "Files")
            .files
            .values()
            .map(|f| f.file.clone())
            .collect()
    }

    pub fn folder_by_title(&self, title: &str) -> Option<FolderRef> {
        self.folders().into_iter().find(|f| f.title == title)
    }

    pub fn file_by_title(&self, title: &str) -> Option<FileRef> {
        self.files().into_iter().find(|f| f.title == title)
    }

    pub fn file_owner(&self, file_id: EntryId) -> Option<Uuid> {
        lock(&self.data, "Files")
            .files
            .get(&file_id)
            .and_then(|f| f.owner)
    }

    pub fn folder_owner(&self, folder_id: EntryId) -> Option<Uuid> {
        lock(&self.data, "Files")
            .folders
            .get(&folder_id)
            .and_then(|f| f.owner)
    }

    pub fn room_type(&self, folder_id: EntryId) -> Option<RoomType> {
        lock(&self.data, "Files")
            .folders
            .get(&folder_id)
            .and_then(|f| f.room_type)
    }

    pub fn shares(&self) -> Vec<Share> {
        lock(&self.data, "Files").shares.clone()
    }

    pub fn user_root(&self, user_id: Uuid) -> Option<EntryId> {
        lock(&self.data, "Files").user_roots.get(&user_id).copied()
    }
}

#[async_trait]
impl FileStorageService for MemoryFiles {
    async fn user_root_folder(&self, user_id: Uuid) -> Result<FolderRef, ServiceError> {
        let mut data = lock(&self.data, "Files");
        if let Some(id) = data.user_roots.get(&user_id).copied() {
            if let Some(existing) = data.folders.get(&id) {
                return Ok(existing.folder.clone());
            }
        }
        let folder = data.add_folder(None, "My documents", Some(user_id), None);
        data.user_roots.insert(user_id, folder.id);
        Ok(folder)
    }

    async fn common_root_folder(&self) -> Result<FolderRef, ServiceError> {
        let mut data = lock(&self.data, "Files");
        if let Some(id) = data.common_root {
            if let Some(existing) = data.folders.get(&id) {
                return Ok(existing.folder.clone());
            }
        }
        let folder = data.add_folder(None, "Common", None, None);
        data.common_root = Some(folder.id);
        Ok(folder)
    }

    async fn create_folder(
        &self,
        parent_id: EntryId,
        title: &str,
        actor: Option<Uuid>,
    ) -> Result<FolderRef, ServiceError> {
        let mut data = lock(&self.data, "Files");
        if !data.folders.contains_key(&parent_id) {
            return Err(ServiceError::NotFound(format!("folder {}", parent_id)));
        }
        Ok(data.add_folder(Some(parent_id), title, actor, None))
    }

    async fn create_room(
        &self,
        title: &str,
        room_type: RoomType,
        actor: Option<Uuid>,
    ) -> Result<FolderRef, ServiceError> {
        Ok(lock(&self.data, "Files").add_folder(None, title, actor, Some(room_type)))
    }

    async fn save_file(
        &self,
        folder_id: EntryId,
        title: &str,
        content: Vec<u8>,
        actor: Option<Uuid>,
    ) -> Result<FileRef, ServiceError> {
        let mut data = lock(&self.data, "Files");
        if data.failing_titles.contains(title) {
            return Err(ServiceError::Rejected(format!("cannot save '{}'", title)));
        }
        if !data.folders.contains_key(&folder_id) {
            return Err(ServiceError::NotFound(format!("folder {}", folder_id)));
        }
        let file = FileRef {
            id: data.next_id(),
            title: title.to_string(),
            folder_id,
            version: 1,
            content_length: content.len() as u64,
        };
        data.files.insert(
            file.id,
            StoredFile {
                file: file.clone(),
                owner: actor,
                content,
            },
        );
        Ok(file)
    }

    async fn read_file(&self, file_id: EntryId) -> Result<Vec<u8>, ServiceError> {
        lock(&self.data, "Files")
            .files
            .get(&file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("file {}", file_id)))
    }

    async fn file_exists(&self, file_id: EntryId) -> Result<bool, ServiceError> {
        Ok(lock(&self.data, "Files").files.contains_key(&file_id))
    }

    async fn delete_file(&self, file_id: EntryId) -> Result<(), ServiceError> {
        lock(&self.data, "Files")
            .files
            .remove(&file_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("file {}", file_id)))
    }

    async fn file_link(&self, file_id: EntryId) -> Result<String, ServiceError> {
        if !lock(&self.data, "Files").files.contains_key(&file_id) {
            return Err(ServiceError::NotFound(format!("file {}", file_id)));
        }
        Ok(format!("/files/{}/download", file_id))
    }

    async fn set_external_link(
        &self,
        entry_id: EntryId,
        entry_type: EntryType,
        access: Access,
    ) -> Result<String, ServiceError> {
        lock(&self.data, "Files").shares.push(Share::ExternalLink {
            entry_id,
            entry_type,
            access,
        });
        Ok(format!("/s/{}", Uuid::new_v4().simple()))
    }

    async fn set_aces(
        &self,
        entry_id: EntryId,
        entry_type: EntryType,
        aces: Vec<AceGrant>,
    ) -> Result<(), ServiceError> {
        let mut data = lock(&self.data, "Files");
        for grant in aces {
            data.shares.push(Share::Ace {
                entry_id,
                entry_type,
                grant,
            });
        }
        Ok(())
    }
}
