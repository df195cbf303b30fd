use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::ZipArchive;

use super::layout::{is_known_entry, parse_blob_entry, table_entry, BlobRef, Manifest, MANIFEST_ENTRY};
use super::source::{Row, TableSchema};
use crate::error::ArchiveError;

/// Read access to an archive produced by [`ArchiveWriter`](super::ArchiveWriter).
pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<File>,
    manifest: Manifest,
}

impl ArchiveReader {
    /// Opens an archive and validates its layout.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|e| ArchiveError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| ArchiveError::Malformed(format!("not a zip container: {}", e)))?;

        if let Some(unknown) = archive.file_names().find(|n| !is_known_entry(n)) {
            return Err(ArchiveError::Malformed(format!(
                "unexpected entry '{}'",
                unknown
            )));
        }

        let manifest: Manifest = {
            let entry = match archive.by_name(MANIFEST_ENTRY) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => {
                    return Err(ArchiveError::Malformed("missing manifest".to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            serde_json::from_reader(entry).map_err(|e| ArchiveError::Json {
                entry: MANIFEST_ENTRY.to_string(),
                source: e,
            })?
        };

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.manifest.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.manifest
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Rows of a dumped table, in dump order.
    pub fn read_table(&mut self, table: &TableSchema) -> Result<Vec<Row>, ArchiveError> {
        let entry_name = table_entry(&table.module, &table.name);
        let entry = self.archive.by_name(&entry_name).map_err(|e| match e {
            ZipError::FileNotFound => ArchiveError::MissingEntry(entry_name.clone()),
            other => other.into(),
        })?;

        let mut rows = Vec::new();
        for line in BufReader::new(entry).lines() {
            let line = line.map_err(|e| ArchiveError::Io {
                path: self.path.join(&entry_name),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let row: Row = serde_json::from_str(&line).map_err(|e| ArchiveError::Json {
                entry: entry_name.clone(),
                source: e,
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Every blob stored in the archive, ordered by file id and version.
    pub fn blobs(&self) -> Vec<BlobRef> {
        let mut blobs: Vec<BlobRef> = self.archive.file_names().filter_map(parse_blob_entry).collect();
        blobs.sort_by_key(|b| (b.file_id, b.version));
        blobs
    }

    pub fn read_blob(&mut self, blob: &BlobRef) -> Result<Vec<u8>, ArchiveError> {
        self.read_entry(&blob.entry_name())
    }

    /// Raw content of an entry by its relative path.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry = self.archive.by_name(name).map_err(|e| match e {
            ZipError::FileNotFound => ArchiveError::MissingEntry(name.to_string()),
            other => other.into(),
        })?;
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content).map_err(|e| ArchiveError::Io {
            path: self.path.join(name),
            source: e,
        })?;
        Ok(content)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }
}
