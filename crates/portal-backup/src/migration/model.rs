//! Staging representation of a foreign export.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::{Access, EmployeeType, EntryType};

/// Subject that stands for "anyone with the link".
pub const EVERYONE: Uuid = Uuid::from_u128(0xc5cc67d1_c3e8_43c0_a3ad_3928ae3e5b5e);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationApiInfo {
    pub users: Vec<MigrationUser>,
    pub groups: Vec<MigrationGroup>,
    pub common_storage: Option<MigrationStorage>,
    pub project_storages: Vec<MigrationStorage>,
    /// Problems found while parsing the export.
    pub warnings: Vec<String>,
}

impl MigrationApiInfo {
    pub fn users_to_import(&self) -> usize {
        self.users.iter().filter(|u| u.should_import).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUser {
    /// Id of the user in the export.
    pub key: String,
    pub email: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: EmployeeType,
    pub avatar: Option<PathBuf>,
    pub should_import: bool,
    pub storage: MigrationStorage,
}

impl MigrationUser {
    pub fn new(key: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            key: key.into(),
            user_name: email.split('@').next().unwrap_or_default().to_string(),
            email,
            first_name: String::new(),
            last_name: String::new(),
            user_type: EmployeeType::Collaborator,
            avatar: None,
            should_import: true,
            storage: MigrationStorage::new(StorageKind::User),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationGroup {
    pub key: String,
    pub name: String,
    pub member_keys: Vec<String>,
    pub manager_key: Option<String>,
    pub should_import: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Personal documents of a user.
    User,
    Common,
    /// Project space, imported as a room.
    Project,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStorage {
    pub kind: StorageKind,
    /// Room title of a project storage.
    pub title: String,
    pub folders: Vec<MigrationFolder>,
    pub files: Vec<MigrationFile>,
    pub securities: Vec<MigrationSecurity>,
    pub should_import: bool,
    pub should_import_shared_files: bool,
    pub should_import_shared_folders: bool,
}

impl MigrationStorage {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            title: String::new(),
            folders: Vec::new(),
            files: Vec::new(),
            securities: Vec::new(),
            should_import: true,
            should_import_shared_files: true,
            should_import_shared_folders: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn folder(&self, id: i64) -> Option<&MigrationFolder> {
        self.folders.iter().find(|f| f.id == id)
    }
}

/// A folder of a storage. Folders at level 0 are the storage root itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFolder {
    pub id: i64,
    /// 0 for a root folder.
    pub parent_id: i64,
    pub title: String,
    /// Depth below the storage root.
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFile {
    pub id: i64,
    pub folder_id: i64,
    pub title: String,
    /// Extracted content on disk.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSecurity {
    pub entry_id: i64,
    pub entry_type: EntryType,
    /// User or group key, or [`EVERYONE`].
    pub subject: String,
    pub access: Access,
}

impl MigrationSecurity {
    pub fn is_anonymous(&self) -> bool {
        Uuid::parse_str(&self.subject).is_ok_and(|id| id == EVERYONE)
    }
}

/// Sorts grants so that shares of shallow folders come first, folders
/// before files at the same depth.
pub fn order_securities(storage: &MigrationStorage) -> Vec<MigrationSecurity> {
    let depth = |s: &MigrationSecurity| -> u32 {
        match s.entry_type {
            EntryType::Folder => storage.folder(s.entry_id).map_or(0, |f| f.level),
            EntryType::File => storage
                .files
                .iter()
                .find(|f| f.id == s.entry_id)
                .and_then(|f| storage.folder(f.folder_id))
                .map_or(0, |f| f.level + 1),
        }
    };
    let mut ordered = storage.securities.clone();
    ordered.sort_by_key(|s| (depth(s), s.entry_type));
    ordered
}

/// Folders parents first.
pub fn order_folders(storage: &MigrationStorage) -> Vec<&MigrationFolder> {
    let mut ordered: Vec<_> = storage.folders.iter().collect();
    ordered.sort_by_key(|f| (f.level, f.id));
    ordered
}
