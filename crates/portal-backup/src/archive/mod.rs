//! Portable tenant archive.
//!
//! A zip container holding `manifest.json`, one JSON-lines dump per table
//! under `databases/<module>/<table>`, and file blobs under
//! `files_<bucket>/file_<id>/v<version>/content<ext>`.

pub mod layout;
pub mod reader;
pub mod source;
pub mod writer;

pub use layout::{BlobRef, Manifest, FORMAT_VERSION};
pub use reader::ArchiveReader;
pub use source::{ColumnRef, Row, Scope, TableSchema, TenantDataSource, TypedColumnRef, TypedTarget};
pub use writer::{ArchiveWriter, WriteOutcome};
