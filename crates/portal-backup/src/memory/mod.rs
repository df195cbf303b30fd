//! In-memory implementations of the platform collaborators.
//!
//! Used by the test suites and for embedding the engine without a live
//! platform behind it.

pub mod files;
pub mod notify;
pub mod policy;
pub mod portal;
pub mod users;

pub use files::MemoryFiles;
pub use notify::RecordingNotifier;
pub use policy::MemoryPolicy;
pub use portal::MemoryPortal;
pub use users::MemoryUsers;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{} lock was poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}
