//! Contracts of the platform collaborators the backup engine drives.
//!
//! Tenant and user directories, the file/folder service, notification
//! delivery and access policy live outside this crate. They are consumed
//! through the traits below; in-memory implementations live in
//! [`crate::memory`].

pub mod access;
pub mod files;
pub mod notify;
pub mod tenant;
pub mod users;

pub use access::{AccessControl, PlanOption, PlanQuota};
pub use files::{Access, AceGrant, EntryId, EntryType, FileRef, FileStorageService, FolderRef, RoomType};
pub use notify::{LogNotifier, Notification, NotifyEvent, Notifier};
pub use tenant::{Tenant, TenantDirectory, TenantId, TenantStatus};
pub use users::{ActivationStatus, EmployeeType, GroupInfo, UserDirectory, UserInfo};
