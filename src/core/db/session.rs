/// Engine Seam
///
/// `Connector` knows how to open a session against one engine and which SQL
/// dialect that engine speaks. `Session` is one live connection. Everything
/// above this module is engine-agnostic.
use super::dialect::Dialect;
use super::value::{TabularResult, Value};
use crate::core::Result;
use std::path::Path;

/// Describes one server-side load of a staged file.
#[derive(Debug, Clone)]
pub struct BulkLoad<'a> {
    /// Schema holding the target table
    pub schema: &'a str,
    /// Target table
    pub table: &'a str,
    /// Catalog columns of the table, in the order the file lists them
    pub columns: &'a [String],
    /// Staging file, as seen by the database server
    pub path: &'a Path,
    pub field_terminator: char,
    pub row_terminator: char,
    /// Rejected rows at which the whole load is aborted
    pub max_errors: u32,
}

/// Opens sessions against one database engine.
pub trait Connector {
    type Session: Session;

    /// SQL dialect spoken by sessions from this connector
    fn dialect(&self) -> Dialect;

    /// Opens a new session. Errors are either `EtlDbError::Database`
    /// (rejected by the server) or `EtlDbError::Transport`.
    fn connect(&self, host: &str, database: &str) -> Result<Self::Session>;
}

/// One live connection. Statements run strictly one after another.
pub trait Session {
    /// Runs a statement or a `;`-separated batch, stopping at the first
    /// failure. Returns the result set of the last statement, `None` when it
    /// produced none.
    fn execute(&mut self, sql: &str) -> Result<Option<TabularResult>>;

    /// Calls a stored procedure with positional arguments and returns its
    /// first result set (empty when it yields none).
    fn call_procedure(&mut self, name: &str, args: &[Value]) -> Result<TabularResult>;

    /// Loads a staged file into a table, all or nothing. Returns the number
    /// of rows loaded when the engine reports it.
    fn bulk_load(&mut self, load: &BulkLoad<'_>) -> Result<Option<u64>>;

    fn set_autocommit(&mut self, on: bool) -> Result<()>;

    fn close(self) -> Result<()>
    where
        Self: Sized;
}
