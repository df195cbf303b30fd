use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

pub type EntryId = i64;

/// Kind of a file-system entry as stored in security rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryType {
    Folder = 1,
    File = 2,
}

impl EntryType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Folder),
            2 => Some(Self::File),
            _ => None,
        }
    }
}

/// Share level granted by an ACE or an external link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    None = 0,
    ReadWrite = 1,
    Read = 2,
    Restrict = 3,
    Review = 5,
    Comment = 6,
    FillForms = 7,
    RoomAdmin = 9,
    Editing = 10,
    Collaborator = 11,
}

impl Access {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::ReadWrite,
            2 => Self::Read,
            3 => Self::Restrict,
            5 => Self::Review,
            6 => Self::Comment,
            7 => Self::FillForms,
            9 => Self::RoomAdmin,
            10 => Self::Editing,
            11 => Self::Collaborator,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomType {
    Editing,
    Custom,
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: EntryId,
    pub title: String,
    pub parent_id: Option<EntryId>,
    pub is_room: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: EntryId,
    pub title: String,
    pub folder_id: EntryId,
    pub version: i32,
    pub content_length: u64,
}

/// One access grant for a user or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AceGrant {
    pub subject: Uuid,
    pub access: Access,
}

/// File and folder service of a tenant. `actor` is the user the operation
/// is performed on behalf of; `None` acts as the system.
#[async_trait]
pub trait FileStorageService: Send + Sync {
    /// Personal root folder of a user.
    async fn user_root_folder(&self, user_id: Uuid) -> Result<FolderRef, ServiceError>;

    /// Root folder shared by the whole tenant.
    async fn common_root_folder(&self) -> Result<FolderRef, ServiceError>;

    async fn create_folder(
        &self,
        parent_id: EntryId,
        title: &str,
        actor: Option<Uuid>,
    ) -> Result<FolderRef, ServiceError>;

    async fn create_room(
        &self,
        title: &str,
        room_type: RoomType,
        actor: Option<Uuid>,
    ) -> Result<FolderRef, ServiceError>;

    async fn save_file(
        &self,
        folder_id: EntryId,
        title: &str,
        content: Vec<u8>,
        actor: Option<Uuid>,
    ) -> Result<FileRef, ServiceError>;

    async fn read_file(&self, file_id: EntryId) -> Result<Vec<u8>, ServiceError>;

    async fn file_exists(&self, file_id: EntryId) -> Result<bool, ServiceError>;

    async fn delete_file(&self, file_id: EntryId) -> Result<(), ServiceError>;

    async fn file_link(&self, file_id: EntryId) -> Result<String, ServiceError>;

    /// Creates an anonymous link to an entry with the given access.
    async fn set_external_link(
        &self,
        entry_id: EntryId,
        entry_type: EntryType,
        access: Access,
    ) -> Result<String, ServiceError>;

    async fn set_aces(
        &self,
        entry_id: EntryId,
        entry_type: EntryType,
        aces: Vec<AceGrant>,
    ) -> Result<(), ServiceError>;
}
