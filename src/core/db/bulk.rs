/// Bulk Loader
///
/// Inserts go through a staging file: rows are aligned to the catalog column
/// order, written tab-separated to a uniquely named file the server can
/// read, loaded with one server-side statement and the file is removed.

use super::handle::DbHandle;
use super::session::{BulkLoad, Connector, Session};
use super::value::{TabularResult, Value};
use crate::core::{EtlDbError, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const FIELD_TERMINATOR: char = '\t';
pub const ROW_TERMINATOR: char = '\n';

/// A staging file, removed from disk when dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Writes `rows` to a new file in `dir`.
    ///
    /// The name combines the table, a timestamp and a random UUID, and the
    /// file is created exclusively, so handles sharing a folder never write
    /// to the same file.
    pub fn create(dir: &Path, table: &str, rows: &[Vec<Value>]) -> Result<Self> {
        let name = format!(
            "{}_{}_{}.tsv",
            file_stem(table),
            Local::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = dir.join(name);
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let staged = StagedFile { path };

        let mut writer = BufWriter::new(file);
        write_rows(&mut writer, rows)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        debug!(path = %staged.path.display(), rows = rows.len(), "Staged rows");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staging file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Could not remove staging file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

/// Writes rows tab-separated, one per line, with no header.
pub fn write_rows<W: Write>(writer: &mut W, rows: &[Vec<Value>]) -> Result<()> {
    let mut field = [0u8; 4];
    let mut row_end = [0u8; 4];
    let field_terminator = FIELD_TERMINATOR.encode_utf8(&mut field).as_bytes();
    let row_terminator = ROW_TERMINATOR.encode_utf8(&mut row_end).as_bytes();

    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                writer.write_all(field_terminator)?;
            }
            writer.write_all(value.staging_field()?.as_bytes())?;
        }
        writer.write_all(row_terminator)?;
    }
    Ok(())
}

/// Table name reduced to characters safe in a file name.
fn file_stem(table: &str) -> String {
    table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl<C: Connector> DbHandle<C> {
    /// Bulk-inserts `rows` into `table`.
    ///
    /// Columns are matched to the catalog columns of `table` ignoring case
    /// and put in catalog order; any missing, extra or duplicated column
    /// fails the call before anything is staged. When an insert limit is
    /// configured the rows are staged in files of at most that many rows,
    /// all loaded inside one transaction. Either way the insert is all or
    /// nothing.
    ///
    /// # Returns
    ///
    /// The number of rows loaded.
    pub fn insert(&mut self, rows: &TabularResult, table: &str) -> Result<u64> {
        let columns = self.column_names(table)?;
        if columns.is_empty() {
            return Err(EtlDbError::Schema(format!(
                "table {} has no columns in the catalog",
                table
            )));
        }
        let aligned = rows.reorder_to(table, &columns)?;
        if aligned.is_empty() {
            debug!(table, "Nothing to insert");
            return Ok(0);
        }

        let dir = self.staging_dir.clone().ok_or_else(|| {
            EtlDbError::Config(
                "no staging directory: set bulk_insert_folder or staging_dir".to_string(),
            )
        })?;
        let chunk_size = self
            .insert_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(aligned.len());

        let chunks: Vec<&[Vec<Value>]> = aligned.rows().chunks(chunk_size).collect();
        let loaded = if chunks.len() == 1 {
            self.load_chunk(&dir, table, &columns, chunks[0])?
        } else {
            self.load_chunks_atomically(&dir, table, &columns, &chunks)?
        };
        info!(table, rows = loaded, "Bulk insert finished");
        Ok(loaded)
    }

    /// Loads several chunks inside one transaction: all of them or none.
    fn load_chunks_atomically(
        &mut self,
        dir: &Path,
        table: &str,
        columns: &[String],
        chunks: &[&[Vec<Value>]],
    ) -> Result<u64> {
        self.run_statement(self.dialect.begin_transaction())?;
        debug!(table, chunks = chunks.len(), "Loading chunks in one transaction");

        let mut loaded = 0;
        for chunk in chunks {
            match self.load_chunk(dir, table, columns, chunk) {
                Ok(count) => loaded += count,
                Err(err) => {
                    self.rollback();
                    return Err(err);
                }
            }
        }
        self.run_statement(self.dialect.commit_transaction())?;
        Ok(loaded)
    }

    /// Rolls back the open transaction. A discarded connection took the
    /// transaction with it, so there is nothing to roll back then.
    fn rollback(&mut self) {
        if !self.connection.is_connected() {
            return;
        }
        if let Err(err) = self.run_statement(self.dialect.rollback_transaction()) {
            warn!("Rollback failed: {}", err);
        }
    }

    fn load_chunk(
        &mut self,
        dir: &Path,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        let staged = StagedFile::create(dir, table, rows)?;
        let load = BulkLoad {
            schema: &self.schema,
            table,
            columns,
            path: staged.path(),
            field_terminator: FIELD_TERMINATOR,
            row_terminator: ROW_TERMINATOR,
            max_errors: self.max_errors,
        };
        let result = self
            .connection
            .with_session(|session| session.bulk_load(&load));
        drop(staged);

        match result {
            Ok(count) => Ok(count.unwrap_or(rows.len() as u64)),
            Err(err) => {
                warn!(table, "Bulk insert failed: {}", err);
                Err(err)
            }
        }
    }
}
