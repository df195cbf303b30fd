//! Import of foreign exports into a live tenant.
//!
//! A parser (see [`WorkspaceParser`]) builds a [`MigrationApiInfo`] staging
//! model; the [`Migrator`] walks it once, remapping every original id and
//! collecting per-item failures instead of aborting.

pub mod id_map;
pub mod migrator;
pub mod model;
pub mod workspace;

pub use id_map::{IdMap, Kind, OriginalId};
pub use migrator::{FailedItem, MigrationOutcome, Migrator};
pub use model::{
    MigrationApiInfo, MigrationFile, MigrationFolder, MigrationGroup, MigrationSecurity,
    MigrationStorage, MigrationUser, StorageKind, EVERYONE,
};
pub use workspace::WorkspaceParser;
