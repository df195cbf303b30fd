//! Reads a workspace export (a portal archive) into a [`MigrationApiInfo`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::model::{
    MigrationApiInfo, MigrationFile, MigrationFolder, MigrationGroup, MigrationSecurity,
    MigrationStorage, MigrationUser, StorageKind,
};
use crate::archive::{ArchiveReader, BlobRef, Row};
use crate::error::MigrationError;
use crate::replay::text_column;
use crate::services::users::groups;
use crate::services::{Access, EmployeeType, EntryType};

fn int_column(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn bool_column(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn is_system_group(key: &str) -> bool {
    [groups::ADMINS, groups::ROOM_ADMINS, groups::COLLABORATORS]
        .iter()
        .any(|g| g.to_string().eq_ignore_ascii_case(key))
}

struct ParsedFolder {
    folder: MigrationFolder,
    owner: Option<String>,
}

/// Parses workspace exports, extracting file content into a work directory.
pub struct WorkspaceParser {
    work_dir: PathBuf,
}

impl WorkspaceParser {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn parse(&self, archive: &Path) -> Result<MigrationApiInfo, MigrationError> {
        let mut reader = ArchiveReader::open(archive)?;
        let mut info = MigrationApiInfo::default();

        let user_rows = read_rows(&mut reader, "core_user")?;
        let membership_rows = read_rows(&mut reader, "core_usergroup")?;
        let group_rows = read_rows(&mut reader, "core_group")?;

        let mut memberships: Vec<(String, String)> = Vec::new();
        for row in &membership_rows {
            if bool_column(row, "removed") {
                continue;
            }
            if let (Some(user), Some(group)) =
                (text_column(row, "userid"), text_column(row, "groupid"))
            {
                memberships.push((user, group));
            }
        }

        for row in &user_rows {
            let Some(key) = text_column(row, "id") else {
                continue;
            };
            if bool_column(row, "removed") {
                continue;
            }
            let Some(email) = text_column(row, "email").filter(|e| !e.trim().is_empty()) else {
                info.warnings
                    .push(format!("user {} has no email and was skipped", key));
                continue;
            };

            let mut user = MigrationUser::new(key.clone(), email);
            if let Some(name) = text_column(row, "username").filter(|n| !n.is_empty()) {
                user.user_name = name;
            }
            user.first_name = text_column(row, "firstname").unwrap_or_default();
            user.last_name = text_column(row, "lastname").unwrap_or_default();
            user.user_type = user_type(&key, &memberships);
            info.users.push(user);
        }

        for row in &group_rows {
            let (Some(key), Some(name)) = (text_column(row, "id"), text_column(row, "name")) else {
                continue;
            };
            if bool_column(row, "removed") || is_system_group(&key) {
                continue;
            }
            info.groups.push(MigrationGroup {
                member_keys: memberships
                    .iter()
                    .filter(|(_, g)| g.eq_ignore_ascii_case(&key))
                    .map(|(u, _)| u.clone())
                    .collect(),
                manager_key: text_column(row, "manager"),
                key,
                name,
                should_import: true,
            });
        }

        self.parse_storages(&mut reader, &mut info)?;

        info!(
            archive = %archive.display(),
            users = info.users.len(),
            groups = info.groups.len(),
            warnings = info.warnings.len(),
            "Parsed workspace export"
        );
        Ok(info)
    }

    fn parse_storages(
        &self,
        reader: &mut ArchiveReader,
        info: &mut MigrationApiInfo,
    ) -> Result<(), MigrationError> {
        let folder_rows = read_rows(reader, "files_folder")?;
        let file_rows = read_rows(reader, "files_file")?;
        let security_rows = read_rows(reader, "files_security")?;

        let mut folders: BTreeMap<i64, ParsedFolder> = BTreeMap::new();
        for row in &folder_rows {
            let Some(id) = int_column(row, "id") else {
                continue;
            };
            folders.insert(
                id,
                ParsedFolder {
                    folder: MigrationFolder {
                        id,
                        parent_id: int_column(row, "parent_id").unwrap_or(0),
                        title: text_column(row, "title").unwrap_or_else(|| format!("folder {}", id)),
                        level: 0,
                    },
                    owner: text_column(row, "create_by"),
                },
            );
        }

        // Root ancestor and depth of every folder.
        let mut roots: HashMap<i64, i64> = HashMap::new();
        let ids: Vec<i64> = folders.keys().copied().collect();
        for id in ids {
            let mut current = id;
            let mut level = 0u32;
            while let Some(parent) = folders
                .get(&current)
                .map(|f| f.folder.parent_id)
                .filter(|p| *p != 0 && folders.contains_key(p))
            {
                current = parent;
                level += 1;
                if level as usize > folders.len() {
                    return Err(MigrationError::InvalidExport(format!(
                        "folder {} has a cyclic parent chain",
                        id
                    )));
                }
            }
            roots.insert(id, current);
            if let Some(folder) = folders.get_mut(&id) {
                folder.folder.level = level;
                if level == 0 {
                    folder.folder.parent_id = 0;
                }
            }
        }

        let user_index: HashMap<String, usize> = info
            .users
            .iter()
            .enumerate()
            .map(|(i, u)| (u.key.to_ascii_lowercase(), i))
            .collect();
        let mut common = MigrationStorage::new(StorageKind::Common);

        // Storage owning a folder: the creator of its root, or the common one.
        let owner_of = |folder_id: i64| -> Option<usize> {
            let root = roots.get(&folder_id)?;
            let owner = folders.get(root)?.owner.as_ref()?;
            user_index.get(&owner.to_ascii_lowercase()).copied()
        };

        macro_rules! storage_for {
            ($folder_id:expr) => {
                match owner_of($folder_id) {
                    Some(index) => &mut info.users[index].storage,
                    None => &mut common,
                }
            };
        }

        for (id, parsed) in &folders {
            storage_for!(*id).folders.push(parsed.folder.clone());
        }

        let mut latest: BTreeMap<i64, (i32, &Row)> = BTreeMap::new();
        for row in &file_rows {
            let Some(id) = int_column(row, "id") else {
                continue;
            };
            let version = int_column(row, "version").unwrap_or(1) as i32;
            if latest.get(&id).map_or(true, |(v, _)| *v < version) {
                latest.insert(id, (version, row));
            }
        }

        let blobs: HashMap<(i64, i32), BlobRef> = reader
            .blobs()
            .into_iter()
            .map(|b| ((b.file_id, b.version), b))
            .collect();
        let files_dir = self.work_dir.join("files");
        std::fs::create_dir_all(&files_dir).map_err(|e| MigrationError::Io {
            path: files_dir.clone(),
            source: e,
        })?;

        let mut file_folders: HashMap<i64, i64> = HashMap::new();
        for (id, (version, row)) in latest {
            let title = text_column(row, "title").unwrap_or_else(|| format!("file {}", id));
            let Some(folder_id) = int_column(row, "folder_id").filter(|f| folders.contains_key(f))
            else {
                info.warnings
                    .push(format!("file '{}' has no folder and was skipped", title));
                continue;
            };
            let Some(blob) = blobs.get(&(id, version)) else {
                warn!(file_id = id, title = %title, "File content missing from export");
                info.warnings
                    .push(format!("file '{}' has no content in the export", title));
                continue;
            };

            let content = reader.read_blob(blob)?;
            let path = files_dir.join(format!("{}{}", id, blob.ext));
            std::fs::write(&path, content).map_err(|e| MigrationError::Io {
                path: path.clone(),
                source: e,
            })?;
            debug!(file_id = id, path = %path.display(), "Extracted file");

            file_folders.insert(id, folder_id);
            storage_for!(folder_id).files.push(MigrationFile {
                id,
                folder_id,
                title,
                path,
            });
        }

        for row in &security_rows {
            let (Some(entry_id), Some(entry_type), Some(subject), Some(access)) = (
                int_column(row, "entry_id"),
                int_column(row, "entry_type").and_then(EntryType::from_code),
                text_column(row, "subject"),
                int_column(row, "security").and_then(Access::from_code),
            ) else {
                continue;
            };
            let folder_id = match entry_type {
                EntryType::Folder => Some(entry_id).filter(|id| folders.contains_key(id)),
                EntryType::File => file_folders.get(&entry_id).copied(),
            };
            let Some(folder_id) = folder_id else {
                continue;
            };
            storage_for!(folder_id).securities.push(MigrationSecurity {
                entry_id,
                entry_type,
                subject,
                access,
            });
        }

        if !common.is_empty() {
            info.common_storage = Some(common);
        }
        Ok(())
    }
}

fn user_type(key: &str, memberships: &[(String, String)]) -> EmployeeType {
    let in_group = |group: uuid::Uuid| {
        memberships
            .iter()
            .any(|(u, g)| u.eq_ignore_ascii_case(key) && g.eq_ignore_ascii_case(&group.to_string()))
    };
    if in_group(groups::ADMINS) {
        EmployeeType::DocSpaceAdmin
    } else if in_group(groups::ROOM_ADMINS) {
        EmployeeType::RoomAdmin
    } else {
        EmployeeType::Collaborator
    }
}

fn read_rows(reader: &mut ArchiveReader, name: &str) -> Result<Vec<Row>, MigrationError> {
    let Some(table) = reader.table(name).cloned() else {
        return Ok(Vec::new());
    };
    Ok(reader.read_table(&table)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveWriter, Manifest, Scope, TableSchema, FORMAT_VERSION};
    use crate::memory::MemoryPortal;
    use crate::progress::NoopProgress;
    use std::io::Write;
    use tokio_util::sync::CancellationToken;
    use zip::write::SimpleFileOptions;

    #[tokio::test]
    async fn test_parse_portal_archive() {
        let dir = tempfile::tempdir().unwrap();
        let portal = MemoryPortal::with_sample_tenant(3, "acme");
        let archive = dir.path().join("acme.zip");
        ArchiveWriter::new(true)
            .write(
                &portal,
                Scope::Tenant(3),
                Some("acme"),
                &archive,
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let parser = WorkspaceParser::new(dir.path().join("work"));
        let info = parser.parse(&archive).unwrap();

        assert_eq!(info.users.len(), 1);
        let user = &info.users[0];
        assert_eq!(user.email, "owner@acme.example");
        assert_eq!(user.user_name, "owner");
        assert_eq!(user.user_type, EmployeeType::Collaborator);

        let storage = &user.storage;
        assert_eq!(storage.folders.len(), 2);
        let reports = storage.folders.iter().find(|f| f.title == "Reports").unwrap();
        assert_eq!(reports.level, 1);
        assert_eq!(storage.files.len(), 2);
        let q3 = storage.files.iter().find(|f| f.title == "q3.docx").unwrap();
        assert_eq!(q3.folder_id, reports.id);
        assert_eq!(std::fs::read(&q3.path).unwrap(), b"quarterly report");
        assert_eq!(storage.securities.len(), 1);
        assert_eq!(storage.securities[0].access, Access::Read);

        assert!(info.common_storage.is_none());
        assert!(info.warnings.is_empty());
    }

    fn write_export(path: &Path, tables: &[(&str, &str, Vec<Value>)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            tenant_id: Some(1),
            tenant_alias: Some("ws".to_string()),
            dump: false,
            created_on: chrono::Utc::now(),
            tables: tables
                .iter()
                .map(|(module, name, _)| TableSchema::new(module, name))
                .collect(),
            blob_count: 0,
        };
        zip.start_file("manifest.json", options).unwrap();
        zip.write_all(&serde_json::to_vec(&manifest).unwrap()).unwrap();
        for (module, name, rows) in tables {
            zip.start_file(format!("databases/{}/{}", module, name), options)
                .unwrap();
            for row in rows {
                zip.write_all(row.to_string().as_bytes()).unwrap();
                zip.write_all(b"\n").unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_missing_blob_becomes_warning() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ws.zip");
        let admin = groups::ADMINS.to_string();
        write_export(
            &archive,
            &[
                (
                    "core",
                    "core_user",
                    vec![
                        serde_json::json!({ "id": "u1", "email": "ann@ws.example", "username": "ann" }),
                        serde_json::json!({ "id": "u2", "email": "", "username": "ghost" }),
                    ],
                ),
                (
                    "core",
                    "core_group",
                    vec![
                        serde_json::json!({ "id": "g1", "name": "Sales", "manager": "u1" }),
                        serde_json::json!({ "id": admin, "name": "Admins" }),
                    ],
                ),
                (
                    "core",
                    "core_usergroup",
                    vec![
                        serde_json::json!({ "userid": "u1", "groupid": "g1" }),
                        serde_json::json!({ "userid": "u1", "groupid": admin }),
                    ],
                ),
                (
                    "files",
                    "files_folder",
                    vec![
                        serde_json::json!({ "id": 1, "parent_id": 0, "title": "Shared" }),
                        serde_json::json!({ "id": 2, "parent_id": 1, "title": "Docs" }),
                    ],
                ),
                (
                    "files",
                    "files_file",
                    vec![serde_json::json!({ "id": 5, "version": 1, "folder_id": 2, "title": "lost.txt" })],
                ),
            ],
        );

        let info = WorkspaceParser::new(dir.path().join("work"))
            .parse(&archive)
            .unwrap();

        assert_eq!(info.users.len(), 1);
        assert_eq!(info.users[0].user_type, EmployeeType::DocSpaceAdmin);
        assert_eq!(info.groups.len(), 1);
        assert_eq!(info.groups[0].member_keys, vec!["u1".to_string()]);
        assert_eq!(info.groups[0].manager_key.as_deref(), Some("u1"));

        let common = info.common_storage.as_ref().unwrap();
        assert_eq!(common.folders.len(), 2);
        assert!(common.files.is_empty());
        assert_eq!(info.warnings.len(), 2);
        assert!(info.warnings.iter().any(|w| w.contains("lost.txt")));
    }

    #[test]
    fn test_rejects_non_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        let result = WorkspaceParser::new(dir.path()).parse(&path);
        assert!(matches!(result, Err(MigrationError::Archive(_))));
    }
}
