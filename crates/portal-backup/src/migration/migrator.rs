use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::id_map::{IdMap, Kind};
use super::model::{
    order_folders, order_securities, MigrationApiInfo, MigrationGroup, MigrationSecurity,
    MigrationStorage, MigrationUser, StorageKind,
};
use crate::error::{MigrationError, ServiceError};
use crate::progress::ProgressReporter;
use crate::services::{
    Access, AceGrant, ActivationStatus, EmployeeType, EntryId, EntryType, FileStorageService,
    GroupInfo, RoomType, UserDirectory, UserInfo,
};

/// An item that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub successed_users: usize,
    pub failed_users: usize,
    pub errors: Vec<FailedItem>,
    pub warnings: Vec<String>,
}

impl MigrationOutcome {
    fn fail(&mut self, item: impl Into<String>, error: impl ToString) {
        let item = item.into();
        let error = error.to_string();
        warn!(item = %item, error = %error, "Migration item failed");
        self.errors.push(FailedItem { item, error });
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// State of one run: id remapping plus the accumulated outcome.
#[derive(Default)]
struct Session {
    principals: IdMap<Uuid>,
    entries: IdMap<EntryId>,
    user_types: HashMap<Uuid, EmployeeType>,
    outcome: MigrationOutcome,
}

fn check_canceled(cancel: &CancellationToken) -> Result<(), MigrationError> {
    if cancel.is_cancelled() {
        Err(MigrationError::Canceled)
    } else {
        Ok(())
    }
}

/// Materializes a parsed export into the live tenant.
pub struct Migrator {
    users: Arc<dyn UserDirectory>,
    files: Arc<dyn FileStorageService>,
}

impl Migrator {
    pub fn new(users: Arc<dyn UserDirectory>, files: Arc<dyn FileStorageService>) -> Self {
        Self { users, files }
    }

    /// Imports users, groups and storages. Item failures are collected in the
    /// outcome; only cancellation aborts the run.
    pub async fn migrate(
        &self,
        info: &MigrationApiInfo,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<MigrationOutcome, MigrationError> {
        let span = info_span!("migration", users = info.users.len(), groups = info.groups.len());
        self.migrate_inner(info, progress, cancel)
            .instrument(span)
            .await
    }

    async fn migrate_inner(
        &self,
        info: &MigrationApiInfo,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<MigrationOutcome, MigrationError> {
        let mut session = Session::default();
        session.outcome.warnings.extend(info.warnings.iter().cloned());
        progress.report(0.0);

        let users: Vec<&MigrationUser> = info.users.iter().filter(|u| u.should_import).collect();
        for (i, user) in users.iter().enumerate() {
            check_canceled(cancel)?;
            match self.migrate_user(user, &mut session).await {
                Ok(id) => {
                    session.principals.insert(Kind::User, &user.key, id);
                    session.outcome.successed_users += 1;
                }
                Err(e) => {
                    session.outcome.failed_users += 1;
                    session.outcome.fail(format!("user {}", user.email), e);
                }
            }
            progress.report(30.0 * (i + 1) as f64 / users.len() as f64);
        }
        progress.report(30.0);

        let groups: Vec<&MigrationGroup> = info.groups.iter().filter(|g| g.should_import).collect();
        if !groups.is_empty() {
            match self.users.get_groups().await {
                Ok(mut existing) => {
                    for (i, group) in groups.iter().enumerate() {
                        check_canceled(cancel)?;
                        self.migrate_group(group, &mut existing, &mut session).await;
                        progress.report(30.0 + 20.0 * (i + 1) as f64 / groups.len() as f64);
                    }
                }
                Err(e) => session.outcome.fail("groups", e),
            }
        }
        progress.report(50.0);

        let owners: Vec<(&MigrationUser, Uuid)> = users
            .iter()
            .filter_map(|u| {
                session
                    .principals
                    .get(Kind::User, &u.key)
                    .map(|id| (*u, id))
            })
            .collect();
        for (i, (user, owner)) in owners.iter().enumerate() {
            check_canceled(cancel)?;
            if user.storage.should_import && !user.storage.is_empty() {
                self.migrate_storage(&user.storage, Some(*owner), &user.email, &mut session)
                    .await;
            }
            progress.report(50.0 + 30.0 * (i + 1) as f64 / owners.len() as f64);
        }
        progress.report(80.0);

        if let Some(common) = info.common_storage.as_ref().filter(|s| s.should_import) {
            check_canceled(cancel)?;
            self.migrate_storage(common, None, "common", &mut session)
                .await;
        }
        progress.report(90.0);

        for project in info.project_storages.iter().filter(|s| s.should_import) {
            check_canceled(cancel)?;
            self.migrate_storage(project, None, &project.title, &mut session)
                .await;
        }
        progress.report(95.0);

        let outcome = session.outcome;
        info!(
            successed = outcome.successed_users,
            failed = outcome.failed_users,
            errors = outcome.errors.len(),
            warnings = outcome.warnings.len(),
            "Migration completed"
        );
        progress.report(100.0);
        Ok(outcome)
    }

    async fn migrate_user(
        &self,
        user: &MigrationUser,
        session: &mut Session,
    ) -> Result<Uuid, ServiceError> {
        if let Some(existing) = self.users.get_user_by_email(&user.email).await? {
            if !existing.removed {
                debug!(email = %user.email, "User already exists");
                session.user_types.insert(existing.id, user.user_type);
                return Ok(existing.id);
            }
        }

        let user_name = self.unique_user_name(&user.user_name).await?;
        let saved = self
            .users
            .save_user(
                UserInfo {
                    id: Uuid::nil(),
                    user_name,
                    email: user.email.clone(),
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    activation: ActivationStatus::Pending,
                    removed: false,
                },
                user.user_type,
            )
            .await?;
        if let Some(group) = user.user_type.system_group() {
            self.users.add_user_to_group(saved.id, group).await?;
        }
        session.user_types.insert(saved.id, user.user_type);

        if let Some(avatar) = &user.avatar {
            match tokio::fs::read(avatar).await {
                Ok(content) => {
                    if let Err(e) = self.users.save_photo(saved.id, content).await {
                        session
                            .outcome
                            .warn(format!("avatar of {} was not saved: {}", user.email, e));
                    }
                }
                Err(e) => session.outcome.warn(format!(
                    "avatar of {} could not be read from '{}': {}",
                    user.email,
                    avatar.display(),
                    e
                )),
            }
        }

        debug!(email = %user.email, id = %saved.id, "User created");
        Ok(saved.id)
    }

    async fn unique_user_name(&self, wanted: &str) -> Result<String, ServiceError> {
        let base = if wanted.trim().is_empty() { "user" } else { wanted.trim() };
        let mut candidate = base.to_string();
        let mut suffix = 1;
        while self.users.is_user_name_taken(&candidate).await? {
            candidate = format!("{}{}", base, suffix);
            suffix += 1;
        }
        Ok(candidate)
    }

    async fn migrate_group(
        &self,
        group: &MigrationGroup,
        existing: &mut Vec<GroupInfo>,
        session: &mut Session,
    ) {
        let id = match existing
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(&group.name))
        {
            Some(found) => found.id,
            None => {
                let created = self
                    .users
                    .save_group(GroupInfo {
                        id: Uuid::nil(),
                        name: group.name.clone(),
                        manager: None,
                    })
                    .await;
                match created {
                    Ok(created) => {
                        existing.push(created.clone());
                        created.id
                    }
                    Err(e) => {
                        session.outcome.fail(format!("group {}", group.name), e);
                        return;
                    }
                }
            }
        };
        session.principals.insert(Kind::Group, &group.key, id);

        for member in &group.member_keys {
            let Some(user_id) = session.principals.get(Kind::User, member) else {
                continue;
            };
            if let Err(e) = self.users.add_user_to_group(user_id, id).await {
                session
                    .outcome
                    .fail(format!("group {} member {}", group.name, member), e);
            }
        }

        if let Some(manager) = group
            .manager_key
            .as_ref()
            .and_then(|key| session.principals.get(Kind::User, key))
        {
            if let Err(e) = self.users.set_department_manager(id, manager).await {
                session
                    .outcome
                    .fail(format!("group {} manager", group.name), e);
            }
        }
    }

    async fn migrate_storage(
        &self,
        storage: &MigrationStorage,
        owner: Option<Uuid>,
        label: &str,
        session: &mut Session,
    ) {
        let root = match storage.kind {
            StorageKind::User => match owner {
                Some(owner) => self.files.user_root_folder(owner).await,
                None => Err(ServiceError::NotFound("storage owner".to_string())),
            },
            StorageKind::Common => self.files.common_root_folder().await,
            StorageKind::Project => {
                self.files
                    .create_room(&storage.title, RoomType::Custom, owner)
                    .await
            }
        };
        let root = match root {
            Ok(root) => root,
            Err(e) => {
                session.outcome.fail(format!("storage {}", label), e);
                return;
            }
        };

        // Folders shared with a named subject become rooms holding their content.
        let shared: HashSet<i64> = if storage.should_import_shared_folders {
            storage
                .securities
                .iter()
                .filter(|s| s.entry_type == EntryType::Folder && !s.is_anonymous())
                .map(|s| s.entry_id)
                .collect()
        } else {
            HashSet::new()
        };

        for folder in order_folders(storage) {
            if shared.contains(&folder.id) {
                let room = if folder.level == 0 && storage.kind == StorageKind::Project {
                    Ok(root.id)
                } else {
                    self.create_shared_room(&folder.title, owner, session).await
                };
                match room {
                    Ok(room) => {
                        session.entries.insert(Kind::Folder, folder.id, room);
                        session.entries.insert(Kind::Room, folder.id, room);
                        continue;
                    }
                    Err(e) => session.outcome.fail(format!("room {}", folder.title), e),
                }
            }
            if folder.level == 0 {
                session.entries.insert(Kind::Folder, folder.id, root.id);
                continue;
            }
            let item = format!("folder {}", folder.title);
            let Some(parent) = session.entries.get(Kind::Folder, folder.parent_id) else {
                session.outcome.fail(item, "parent folder was not imported");
                continue;
            };
            match self.files.create_folder(parent, &folder.title, owner).await {
                Ok(created) => session.entries.insert(Kind::Folder, folder.id, created.id),
                Err(e) => session.outcome.fail(item, e),
            }
        }

        for file in &storage.files {
            let item = format!("file {}", file.title);
            let Some(folder) = session.entries.get(Kind::Folder, file.folder_id) else {
                session.outcome.fail(item, "folder was not imported");
                continue;
            };
            let content = match tokio::fs::read(&file.path).await {
                Ok(content) => content,
                Err(e) => {
                    session.outcome.fail(item, e);
                    continue;
                }
            };
            match self.files.save_file(folder, &file.title, content, owner).await {
                Ok(saved) => session.entries.insert(Kind::File, file.id, saved.id),
                Err(e) => session.outcome.fail(item, e),
            }
        }

        for security in order_securities(storage) {
            let wanted = match security.entry_type {
                EntryType::Folder => storage.should_import_shared_folders,
                EntryType::File => storage.should_import_shared_files,
            };
            if !wanted {
                continue;
            }
            if let Err(e) = self.migrate_security(&security, session).await {
                session.outcome.fail(
                    format!(
                        "share of {:?} {} with {}",
                        security.entry_type, security.entry_id, security.subject
                    ),
                    e,
                );
            }
        }
    }

    /// Creates the room a shared folder is imported into.
    async fn create_shared_room(
        &self,
        title: &str,
        owner: Option<Uuid>,
        session: &mut Session,
    ) -> Result<EntryId, ServiceError> {
        let room = self.files.create_room(title, RoomType::Custom, owner).await?;

        // Collaborators keep collaborator access to rooms they create.
        if let Some(owner) =
            owner.filter(|o| session.user_types.get(o) == Some(&EmployeeType::Collaborator))
        {
            let grant = vec![AceGrant {
                subject: owner,
                access: Access::Collaborator,
            }];
            if let Err(e) = self.files.set_aces(room.id, EntryType::Folder, grant).await {
                session.outcome.fail(format!("room {} owner access", title), e);
            }
        }
        Ok(room.id)
    }

    async fn migrate_security(
        &self,
        security: &MigrationSecurity,
        session: &mut Session,
    ) -> Result<(), ServiceError> {
        let kind = match security.entry_type {
            EntryType::Folder => Kind::Folder,
            EntryType::File => Kind::File,
        };
        let entry = session
            .entries
            .get(kind, security.entry_id)
            .ok_or_else(|| ServiceError::NotFound(format!("entry {}", security.entry_id)))?;

        if security.is_anonymous() {
            self.files
                .set_external_link(entry, security.entry_type, security.access)
                .await?;
            return Ok(());
        }

        let subject = session
            .principals
            .get(Kind::User, &security.subject)
            .or_else(|| session.principals.get(Kind::Group, &security.subject))
            .ok_or_else(|| ServiceError::NotFound(format!("subject {}", security.subject)))?;
        let grant = vec![AceGrant {
            subject,
            access: security.access,
        }];

        let entry = match security.entry_type {
            EntryType::Folder => session
                .entries
                .get(Kind::Room, security.entry_id)
                .unwrap_or(entry),
            EntryType::File => entry,
        };
        self.files.set_aces(entry, security.entry_type, grant).await
    }
}
