use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Well-known system groups.
pub mod groups {
    use uuid::Uuid;

    pub const ADMINS: Uuid = Uuid::from_u128(0xcd84e66b_b803_40fc_99f9_b2969a54a1de);
    pub const ROOM_ADMINS: Uuid = Uuid::from_u128(0xabef62db_11a8_4673_9d32_ef1d8af19dc0);
    pub const COLLABORATORS: Uuid = Uuid::from_u128(0x88f11e7c_7407_4bea_b4cb_070010cdbb6b);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmployeeType {
    DocSpaceAdmin,
    RoomAdmin,
    Collaborator,
    Guest,
}

impl EmployeeType {
    /// System group a user of this type is placed in, if any.
    pub fn system_group(&self) -> Option<Uuid> {
        match self {
            Self::DocSpaceAdmin => Some(groups::ADMINS),
            Self::RoomAdmin => Some(groups::ROOM_ADMINS),
            Self::Collaborator => Some(groups::COLLABORATORS),
            Self::Guest => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationStatus {
    Activated,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub activation: ActivationStatus,
    /// Soft-removed accounts are recreated on import.
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: Uuid,
    pub name: String,
    pub manager: Option<Uuid>,
}

/// User and group registry of a tenant.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserInfo>, ServiceError>;

    async fn is_user_name_taken(&self, user_name: &str) -> Result<bool, ServiceError>;

    /// Creates or updates a user. A nil id asks the directory to assign one.
    async fn save_user(
        &self,
        user: UserInfo,
        user_type: EmployeeType,
    ) -> Result<UserInfo, ServiceError>;

    async fn save_photo(&self, user_id: Uuid, content: Vec<u8>) -> Result<(), ServiceError>;

    async fn get_groups(&self) -> Result<Vec<GroupInfo>, ServiceError>;

    /// Creates or updates a group. A nil id asks the directory to assign one.
    async fn save_group(&self, group: GroupInfo) -> Result<GroupInfo, ServiceError>;

    async fn add_user_to_group(&self, user_id: Uuid, group_id: Uuid) -> Result<(), ServiceError>;

    async fn set_department_manager(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError>;

    async fn get_users_by_group(&self, group_id: Uuid) -> Result<Vec<UserInfo>, ServiceError>;
}
