use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::layout::{table_entry, Manifest, FORMAT_VERSION, MANIFEST_ENTRY};
use super::source::{Scope, TenantDataSource};
use crate::checksum;
use crate::error::ArchiveError;
use crate::progress::ProgressReporter;

/// Entries buffered between the data source and the zip thread.
const ENTRY_QUEUE: usize = 8;

enum Chunk {
    Entry { name: String, content: Vec<u8> },
    Finish,
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Zips entries as they arrive. Returns the archive hash, or `None` when
/// the sender went away without finishing.
fn zip_entries(
    dest: &Path,
    options: SimpleFileOptions,
    mut rx: mpsc::Receiver<Chunk>,
) -> Result<Option<String>, ArchiveError> {
    let io_err = io_error(dest);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(&io_err)?;
    }
    let file = File::create(dest).map_err(&io_err)?;
    let mut zip = ZipWriter::new(file);

    loop {
        match rx.blocking_recv() {
            Some(Chunk::Entry { name, content }) => {
                zip.start_file(name.as_str(), options)?;
                zip.write_all(&content).map_err(&io_err)?;
            }
            Some(Chunk::Finish) => break,
            None => return Ok(None),
        }
    }

    zip.finish()?;
    checksum::sha256_file(dest).map(Some).map_err(io_err)
}

/// Result of writing an archive.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub path: PathBuf,
    /// SHA-256 of the archive file.
    pub hash: String,
    pub tables: usize,
    pub blobs: usize,
}

/// Writes a tenant (or the whole instance) into one archive file.
pub struct ArchiveWriter {
    compress: bool,
    excluded_tables: HashSet<String>,
}

impl ArchiveWriter {
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            excluded_tables: HashSet::new(),
        }
    }

    /// Leaves a table out of the dump.
    pub fn exclude_table(mut self, table: &str) -> Self {
        self.excluded_tables.insert(table.to_ascii_lowercase());
        self
    }

    fn options(&self) -> SimpleFileOptions {
        let method = if self.compress {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        SimpleFileOptions::default().compression_method(method)
    }

    /// Dumps `scope` from `source` into `dest`, reporting 0 to 100. The
    /// zip container is written on the blocking pool.
    pub async fn write(
        &self,
        source: &dyn TenantDataSource,
        scope: Scope,
        tenant_alias: Option<&str>,
        dest: &Path,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome, ArchiveError> {
        let (tx, rx) = mpsc::channel(ENTRY_QUEUE);
        let zip_dest = dest.to_path_buf();
        let options = self.options();
        let zipper = tokio::task::spawn_blocking(move || zip_entries(&zip_dest, options, rx));

        let produced = self
            .produce(source, scope, tenant_alias, &tx, progress, cancel)
            .await;
        if produced.is_ok() {
            // A closed channel surfaces as the zip thread's own error.
            let _ = tx.send(Chunk::Finish).await;
        }
        drop(tx);

        let zipped = zipper.await.map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        let (tables, blobs, hash) = match (produced, zipped) {
            (_, Err(e)) => return Err(e),
            (Err(e), Ok(_)) => return Err(e),
            (Ok((tables, blobs)), Ok(Some(hash))) => (tables, blobs, hash),
            (Ok(_), Ok(None)) => {
                return Err(ArchiveError::Malformed(
                    "archive was not finished".to_string(),
                ))
            }
        };
        progress.report(100.0);

        Ok(WriteOutcome {
            path: dest.to_path_buf(),
            hash,
            tables,
            blobs,
        })
    }

    /// Feeds the manifest, every table and every blob to the zip thread.
    /// Returns the table and blob counts.
    async fn produce(
        &self,
        source: &dyn TenantDataSource,
        scope: Scope,
        tenant_alias: Option<&str>,
        tx: &mpsc::Sender<Chunk>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize), ArchiveError> {
        let send = |name: String, content: Vec<u8>| async move {
            tx.send(Chunk::Entry { name, content })
                .await
                .map_err(|_| ArchiveError::Malformed("archive writer stopped".to_string()))
        };

        let tables: Vec<_> = source
            .tables()
            .await?
            .into_iter()
            .filter(|t| !self.excluded_tables.contains(&t.name.to_ascii_lowercase()))
            .collect();
        let blobs = source.blobs(scope).await?;
        let total = (tables.len() + blobs.len()).max(1) as f64;
        let mut done = 0usize;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            tenant_id: match scope {
                Scope::Tenant(id) => Some(id),
                Scope::Instance => None,
            },
            tenant_alias: tenant_alias.map(str::to_string),
            dump: scope.is_dump(),
            created_on: Utc::now(),
            tables: tables.clone(),
            blob_count: blobs.len(),
        };
        let content = serde_json::to_vec_pretty(&manifest).map_err(|e| ArchiveError::Json {
            entry: MANIFEST_ENTRY.to_string(),
            source: e,
        })?;
        send(MANIFEST_ENTRY.to_string(), content).await?;

        for table in &tables {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Canceled);
            }
            let rows = source.rows(table, scope).await?;
            let entry = table_entry(&table.module, &table.name);
            debug!(table = %table.name, rows = rows.len(), "Writing table");

            let mut content = Vec::new();
            for row in &rows {
                serde_json::to_writer(&mut content, row).map_err(|e| ArchiveError::Json {
                    entry: entry.clone(),
                    source: e,
                })?;
                content.push(b'\n');
            }
            send(entry, content).await?;

            done += 1;
            progress.report(done as f64 * 100.0 / total);
        }

        for blob in &blobs {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Canceled);
            }
            let content = source.read_blob(blob).await?;
            send(blob.entry_name(), content).await?;

            done += 1;
            progress.report(done as f64 * 100.0 / total);
        }

        Ok((tables.len(), blobs.len()))
    }
}
