//! Builders for storage parameters and migration exports.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use portal_backup::migration::{
    MigrationFile, MigrationFolder, MigrationGroup, MigrationSecurity, MigrationUser,
};
use portal_backup::services::{Access, EmployeeType, EntryType};
use portal_backup::storage::{StorageParams, PARAM_FILE_PATH, PARAM_FOLDER_ID, PARAM_MODULE};

/// Local storage writing into `dir`.
pub fn local_params(dir: &Path) -> StorageParams {
    let mut params = StorageParams::new();
    params.insert(PARAM_FILE_PATH.to_string(), dir.to_string_lossy().into_owned());
    params
}

pub fn documents_params(folder_id: i64) -> StorageParams {
    let mut params = StorageParams::new();
    params.insert(PARAM_FOLDER_ID.to_string(), folder_id.to_string());
    params
}

pub fn consumer_params(module: &str) -> StorageParams {
    let mut params = StorageParams::new();
    params.insert(PARAM_MODULE.to_string(), module.to_string());
    params
}

/// Builder for an export user.
pub struct UserBuilder {
    user: MigrationUser,
}

impl UserBuilder {
    pub fn new(key: &str, email: &str) -> Self {
        Self {
            user: MigrationUser::new(key, email),
        }
    }

    pub fn user_type(mut self, user_type: EmployeeType) -> Self {
        self.user.user_type = user_type;
        self
    }

    pub fn avatar(mut self, path: PathBuf) -> Self {
        self.user.avatar = Some(path);
        self
    }

    pub fn folder(mut self, id: i64, parent_id: i64, title: &str, level: u32) -> Self {
        self.user.storage.folders.push(MigrationFolder {
            id,
            parent_id,
            title: title.to_string(),
            level,
        });
        self
    }

    /// Adds a file whose content is written to `dir`.
    pub fn file(mut self, dir: &Path, id: i64, folder_id: i64, title: &str) -> Self {
        let path = dir.join(format!("{}-{}", id, title));
        std::fs::write(&path, title.as_bytes()).expect("Failed to write export file");
        self.user.storage.files.push(MigrationFile {
            id,
            folder_id,
            title: title.to_string(),
            path,
        });
        self
    }

    /// Shares a folder or file with the user or group keyed `subject`.
    pub fn share(mut self, entry_id: i64, entry_type: EntryType, subject: &str, access: Access) -> Self {
        self.user.storage.securities.push(MigrationSecurity {
            entry_id,
            entry_type,
            subject: subject.to_string(),
            access,
        });
        self
    }

    pub fn build(self) -> MigrationUser {
        self.user
    }
}

pub fn group(key: &str, name: &str, members: &[&str], manager: Option<&str>) -> MigrationGroup {
    MigrationGroup {
        key: key.to_string(),
        name: name.to_string(),
        member_keys: members.iter().map(|m| m.to_string()).collect(),
        manager_key: manager.map(str::to_string),
        should_import: true,
    }
}
