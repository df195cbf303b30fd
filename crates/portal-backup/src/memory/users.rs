use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::lock;
use crate::error::ServiceError;
use crate::services::{EmployeeType, GroupInfo, UserDirectory, UserInfo};

#[derive(Default)]
struct UsersData {
    users: Vec<UserInfo>,
    types: HashMap<Uuid, EmployeeType>,
    groups: Vec<GroupInfo>,
    memberships: Vec<(Uuid, Uuid)>,
    photos: HashMap<Uuid, Vec<u8>>,
    failing_emails: HashSet<String>,
}

/// User and group directory kept in memory.
#[derive(Default)]
pub struct MemoryUsers {
    data: Mutex<UsersData>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing account.
    pub fn add_user(&self, user: UserInfo, user_type: EmployeeType) {
        let mut data = lock(&self.data, "Users");
        data.types.insert(user.id, user_type);
        data.users.push(user);
    }

    pub fn add_group(&self, group: GroupInfo) {
        lock(&self.data, "Users").groups.push(group);
    }

    /// Makes every later `save_user` for this email fail.
    pub fn fail_saving(&self, email: &str) {
        lock(&self.data, "Users")
            .failing_emails
            .insert(email.to_ascii_lowercase());
    }

    pub fn users(&self) -> Vec<UserInfo> {
        lock(&self.data, "Users").users.clone()
    }

    pub fn user_type(&self, user_id: Uuid) -> Option<EmployeeType> {
        lock(&self.data, "Users").types.get(&user_id).copied()
    }

    pub fn groups(&self) -> Vec<GroupInfo> {
        lock(&self.data, "Users").groups.clone()
    }

    pub fn group_members(&self, group_id: Uuid) -> Vec<Uuid> {
        lock(&self.data, "Users")
            .memberships
            .iter()
            .filter(|(_, g)| *g == group_id)
            .map(|(u, _)| *u)
            .collect()
    }

    pub fn photo(&self, user_id: Uuid) -> Option<Vec<u8>> {
        lock(&self.data, "Users").photos.get(&user_id).cloned()
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserInfo>, ServiceError> {
        Ok(lock(&self.data, "Users")
            .users
            .iter()
            .rev()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn is_user_name_taken(&self, user_name: &str) -> Result<bool, ServiceError> {
        Ok(lock(&self.data, "Users")
            .users
            .iter()
            .any(|u| !u.removed && u.user_name.eq_ignore_ascii_case(user_name)))
    }

    async fn save_user(
        &self,
        mut user: UserInfo,
        user_type: EmployeeType,
    ) -> Result<UserInfo, ServiceError> {
        let mut data = lock(&self.data, "Users");
        if data
            .failing_emails
            .contains(&user.email.to_ascii_lowercase())
        {
            return Err(ServiceError::Rejected(format!(
                "cannot save user '{}'",
                user.email
            )));
        }
        if user.id.is_nil() {
            user.id = Uuid::new_v4();
        }
        match data.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user.clone(),
            None => data.users.push(user.clone()),
        }
        data.types.insert(user.id, user_type);
        Ok(user)
    }

    async fn save_photo(&self, user_id: Uuid, content: Vec<u8>) -> Result<(), ServiceError> {
        lock(&self.data, "Users").photos.insert(user_id, content);
        Ok(())
    }

    async fn get_groups(&self) -> Result<Vec<GroupInfo>, ServiceError> {
        Ok(self.groups())
    }

    async fn save_group(&self, mut group: GroupInfo) -> Result<GroupInfo, ServiceError> {
        let mut data = lock(&self.data, "Users");
        if group.id.is_nil() {
            group.id = Uuid::new_v4();
        }
        match data.groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group.clone(),
            None => data.groups.push(group.clone()),
        }
        Ok(group)
    }

    async fn add_user_to_group(&self, user_id: Uuid, group_id: Uuid) -> Result<(), ServiceError> {
        let mut data = lock(&self.data, "Users");
        if !data.memberships.contains(&(user_id, group_id)) {
            data.memberships.push((user_id, group_id));
        }
        Ok(())
    }

    async fn set_department_manager(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let mut data = lock(&self.data, "Users");
        let group = data
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| ServiceError::NotFound(format!("group {}", group_id)))?;
        group.manager = Some(user_id);
        if !data.memberships.contains(&(user_id, group_id)) {
            data.memberships.push((user_id, group_id));
        }
        Ok(())
    }

    async fn get_users_by_group(&self, group_id: Uuid) -> Result<Vec<UserInfo>, ServiceError> {
        let data = lock(&self.data, "Users");
        Ok(data
            .users
            .iter()
            .filter(|u| data.memberships.contains(&(u.id, group_id)))
            .cloned()
            .collect())
    }
}
