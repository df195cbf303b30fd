use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::TableSchema;
use crate::services::TenantId;

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const DATABASES_DIR: &str = "databases";

/// Header of an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub format_version: u32,
    pub tenant_id: Option<TenantId>,
    pub tenant_alias: Option<String>,
    pub dump: bool,
    pub created_on: DateTime<Utc>,
    pub tables: Vec<TableSchema>,
    pub blob_count: usize,
}

/// A stored file version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub file_id: i64,
    pub version: i32,
    /// Extension including the leading dot, or empty.
    pub ext: String,
    /// Owning tenant; only meaningful to the data source and sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl BlobRef {
    pub fn new(file_id: i64, version: i32, ext: &str) -> Self {
        Self {
            file_id,
            version,
            ext: ext.to_string(),
            tenant_id: None,
        }
    }

    pub fn entry_name(&self) -> String {
        blob_entry(self.file_id, self.version, &self.ext)
    }
}

/// Blob directories group a thousand file ids each.
pub fn bucket(file_id: i64) -> i64 {
    (file_id / 1000 + 1) * 1000
}

pub fn table_entry(module: &str, table: &str) -> String {
    format!("{}/{}/{}", DATABASES_DIR, module, table)
}

pub fn blob_entry(file_id: i64, version: i32, ext: &str) -> String {
    format!(
        "files_{}/file_{}/v{}/content{}",
        bucket(file_id),
        file_id,
        version,
        ext
    )
}

/// Parses `files_<bucket>/file_<id>/v<version>/content<ext>`.
pub fn parse_blob_entry(name: &str) -> Option<BlobRef> {
    let mut parts = name.split('/');
    let bucket_part = parts.next()?.strip_prefix("files_")?;
    let file_id: i64 = parts.next()?.strip_prefix("file_")?.parse().ok()?;
    let version: i32 = parts.next()?.strip_prefix('v')?.parse().ok()?;
    let ext = parts.next()?.strip_prefix("content")?;
    if parts.next().is_some() || bucket_part.parse::<i64>().ok()? != bucket(file_id) {
        return None;
    }
    Some(BlobRef::new(file_id, version, ext))
}

/// Whether an entry name fits the archive layout.
pub fn is_known_entry(name: &str) -> bool {
    if name == MANIFEST_ENTRY || name.ends_with('/') {
        return true;
    }
    if let Some(rest) = name.strip_prefix(DATABASES_DIR).and_then(|r| r.strip_prefix('/')) {
        return rest.split('/').filter(|s| !s.is_empty()).count() == 2;
    }
    parse_blob_entry(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket() {
        assert_eq!(bucket(0), 1000);
        assert_eq!(bucket(999), 1000);
        assert_eq!(bucket(1000), 2000);
        assert_eq!(bucket(12345), 13000);
    }

    #[test]
    fn test_blob_entry() {
        assert_eq!(blob_entry(1234, 2, ".docx"), "files_2000/file_1234/v2/content.docx");
        assert_eq!(
            parse_blob_entry("files_2000/file_1234/v2/content.docx"),
            Some(BlobRef::new(1234, 2, ".docx"))
        );
        assert_eq!(
            parse_blob_entry("files_1000/file_5/v1/content"),
            Some(BlobRef::new(5, 1, ""))
        );
    }

    #[test]
    fn test_parse_rejects_wrong_layout() {
        assert_eq!(parse_blob_entry("files_1000/file_1234/v2/content.docx"), None);
        assert_eq!(parse_blob_entry("files_1000/file_x/v2/content"), None);
        assert_eq!(parse_blob_entry("files_1000/file_5/v1/content/extra"), None);
        assert_eq!(parse_blob_entry("blobs/file_5/v1/content"), None);
    }

    #[test]
    fn test_known_entries() {
        assert!(is_known_entry("manifest.json"));
        assert!(is_known_entry("databases/files/files_folder"));
        assert!(is_known_entry("files_1000/file_5/v1/content.txt"));
        assert!(!is_known_entry("databases/files_folder"));
        assert!(!is_known_entry("readme.txt"));
    }
}
