//! Replays an archive into a tenant database with remapped identifiers.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::archive::{ArchiveReader, BlobRef, Row, TableSchema};
use crate::column_mapper::{ColumnMapper, ColumnValue, TENANTS_TABLE};
use crate::error::{ArchiveError, ServiceError, TaskError};
use crate::progress::ProgressReporter;
use crate::services::TenantId;

pub const FILES_TABLE: &str = "files_file";

/// Write access to the relational data and blobs of a tenant database.
#[async_trait]
pub trait TenantDataSink: Send + Sync {
    /// Inserts a row. Returns the generated value of the table's id column,
    /// if it has one.
    async fn insert_row(
        &self,
        table: &TableSchema,
        row: Row,
    ) -> Result<Option<ColumnValue>, ServiceError>;

    async fn write_blob(&self, blob: &BlobRef, content: Vec<u8>) -> Result<(), ServiceError>;
}

/// A tenant row written by a replay.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredTenant {
    /// Id the tenant had in the archive.
    pub old_id: TenantId,
    pub new_id: TenantId,
    /// Alias stored in the archive, before any mapping.
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayOutcome {
    /// Tenant created by the replay; `None` for a whole-instance dump.
    pub tenant_id: Option<TenantId>,
    pub dump: bool,
    /// Every tenant row of the archive, in replay order.
    pub tenants: Vec<RestoredTenant>,
    pub rows: usize,
    pub blobs: usize,
}

/// Replays an archive file, reporting 0 to 100.
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(
        &self,
        archive: &Path,
        mapper: &mut ColumnMapper,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ReplayOutcome, TaskError>;
}

/// Replays tables in manifest order, then blobs, into a [`TenantDataSink`].
///
/// The id generated for each inserted row is staged in the mapper and
/// committed right away, so later rows see the ids of the rows they
/// reference. Blobs are written for the tenant owning their file row.
pub struct ArchiveReplayer {
    sink: Arc<dyn TenantDataSink>,
    ignored_tables: HashSet<String>,
}

impl ArchiveReplayer {
    pub fn new(sink: Arc<dyn TenantDataSink>) -> Self {
        Self {
            sink,
            ignored_tables: HashSet::new(),
        }
    }

    pub fn ignore_table(mut self, table: &str) -> Self {
        self.ignored_tables.insert(table.to_ascii_lowercase());
        self
    }

    fn remap_row(table: &TableSchema, row: &Row, mapper: &ColumnMapper) -> Row {
        let mut mapped = Row::with_capacity(row.len());
        for (column, value) in row {
            if table
                .id_column
                .as_deref()
                .is_some_and(|id| id.eq_ignore_ascii_case(column))
            {
                continue;
            }

            let typed_target = table
                .typed_references
                .iter()
                .find(|r| r.column.eq_ignore_ascii_case(column))
                .and_then(|r| r.target_for(row));
            let value = if let Some(reference) = table
                .references
                .iter()
                .find(|r| r.column.eq_ignore_ascii_case(column))
            {
                mapper.map_json(&reference.table, &reference.target_column, value)
            } else if let Some(target) = typed_target {
                mapper.map_json(&target.table, &target.target_column, value)
            } else if table
                .tenant_column
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(column))
            {
                mapper.map_json(TENANTS_TABLE, "id", value)
            } else {
                mapper.map_json(&table.name, column, value)
            };
            mapped.insert(column.clone(), value);
        }
        mapped
    }

    fn row_tenant(table: &TableSchema, row: &Row) -> Option<TenantId> {
        let column = table.tenant_column.as_deref()?;
        row.get(column).and_then(Value::as_i64)
    }
}

#[async_trait]
impl Replayer for ArchiveReplayer {
    async fn replay(
        &self,
        archive: &Path,
        mapper: &mut ColumnMapper,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ReplayOutcome, TaskError> {
        let path = archive.to_path_buf();
        let mut reader = tokio::task::spawn_blocking(move || ArchiveReader::open(&path))
            .await
            .map_err(join_error(archive))??;
        let manifest = reader.manifest().clone();
        let tables: Vec<TableSchema> = manifest
            .tables
            .iter()
            .filter(|t| !self.ignored_tables.contains(&t.name.to_ascii_lowercase()))
            .cloned()
            .collect();
        let blobs = reader.blobs();
        let total = (tables.len() + blobs.len()).max(1) as f64;
        let mut done = 0usize;
        let mut outcome = ReplayOutcome {
            dump: manifest.dump,
            ..Default::default()
        };
        // New file id to the tenant owning it.
        let mut file_tenants: HashMap<i64, TenantId> = HashMap::new();

        for table in &tables {
            if cancel.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            let (next, rows) = read_blocking(reader, {
                let table = table.clone();
                move |r| r.read_table(&table)
            })
            .await?;
            reader = next;
            debug!(table = %table.name, rows = rows.len(), "Replaying table");
            let is_tenants = table.name.eq_ignore_ascii_case(TENANTS_TABLE);
            let is_files = table.name.eq_ignore_ascii_case(FILES_TABLE);

            for row in rows {
                let old_id = table
                    .id_column
                    .as_deref()
                    .and_then(|c| row.get(c))
                    .and_then(ColumnValue::from_json);
                let mapped = Self::remap_row(table, &row, mapper);
                let owner = Self::row_tenant(table, &mapped);
                let new_id = self.sink.insert_row(table, mapped).await?;

                if let (Some(column), Some(old), Some(new)) =
                    (&table.id_column, old_id.clone(), new_id.clone())
                {
                    mapper.set_mapping(&table.name, column, old, new);
                    mapper.commit();
                }
                match (old_id.and_then(|v| v.as_i64()), new_id.and_then(|v| v.as_i64())) {
                    (Some(old), Some(new)) if is_tenants => {
                        outcome.tenants.push(RestoredTenant {
                            old_id: old,
                            new_id: new,
                            alias: text_column(&row, "alias"),
                        });
                    }
                    (_, Some(new)) if is_files => {
                        if let Some(owner) = owner {
                            file_tenants.insert(new, owner);
                        }
                    }
                    _ => {}
                }
                outcome.rows += 1;
            }

            done += 1;
            progress.report(done as f64 * 100.0 / total);
        }

        let tenant_id = if manifest.dump {
            None
        } else {
            mapper.tenant_mapping().or(manifest.tenant_id)
        };

        for blob in &blobs {
            if cancel.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            let (next, content) = read_blocking(reader, {
                let blob = blob.clone();
                move |r| r.read_blob(&blob)
            })
            .await?;
            reader = next;
            let file_id = mapper
                .get_mapping(FILES_TABLE, "id", &ColumnValue::Int(blob.file_id))
                .as_i64()
                .unwrap_or(blob.file_id);
            let target = BlobRef {
                file_id,
                tenant_id: file_tenants.get(&file_id).copied().or(tenant_id),
                ..blob.clone()
            };
            self.sink.write_blob(&target, content).await?;
            outcome.blobs += 1;

            done += 1;
            progress.report(done as f64 * 100.0 / total);
        }

        outcome.tenant_id = tenant_id;
        progress.report(100.0);
        Ok(outcome)
    }
}

fn join_error(path: &Path) -> impl FnOnce(tokio::task::JoinError) -> TaskError + '_ {
    move |e| TaskError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    }
}

/// Runs one read against the archive on the blocking pool, handing the
/// reader back afterwards.
async fn read_blocking<T, F>(
    mut reader: ArchiveReader,
    read: F,
) -> Result<(ArchiveReader, T), TaskError>
where
    T: Send + 'static,
    F: FnOnce(&mut ArchiveReader) -> Result<T, ArchiveError> + Send + 'static,
{
    let path = reader.path().to_path_buf();
    let read = tokio::task::spawn_blocking(move || -> Result<_, ArchiveError> {
        let value = read(&mut reader)?;
        Ok((reader, value))
    })
    .await
    .map_err(join_error(&path))?;
    Ok(read?)
}

/// Reads a JSON column as text.
pub(crate) fn text_column(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
