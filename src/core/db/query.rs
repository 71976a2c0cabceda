/// Query Execution Module
///
/// Runs SQL text and stored procedures on the handle's connection. Every
/// call connects first if needed; statement failures are returned as-is and
/// never retried.

use super::handle::DbHandle;
use super::session::{Connector, Session};
use super::value::{TabularResult, Value};
use crate::core::Result;
use tracing::debug;

impl<C: Connector> DbHandle<C> {
    /// Executes a SQL statement.
    ///
    /// # Returns
    ///
    /// `None` for statements without a result set (DDL, `SET`, ...).
    /// Otherwise every row with the column names of the result metadata. A
    /// result made of a single NULL cell comes back empty.
    ///
    /// # Errors
    ///
    /// `EtlDbError::NotConnected` when no connection can be made; otherwise
    /// whatever the engine reported.
    pub fn run_query(&mut self, sql: &str) -> Result<Option<TabularResult>> {
        Ok(self.execute(sql)?.map(TabularResult::normalize_single_null))
    }

    /// Calls a stored procedure with positional arguments.
    ///
    /// Returns the first result set the procedure yields, or an empty result
    /// if it yields none.
    pub fn exec_stored_procedure(&mut self, name: &str, args: &[Value]) -> Result<TabularResult> {
        debug!(procedure = name, args = args.len(), "Calling stored procedure");
        self.connection
            .with_session(|session| session.call_procedure(name, args))
    }

    /// Executes without the single-NULL normalization.
    pub(crate) fn execute(&mut self, sql: &str) -> Result<Option<TabularResult>> {
        debug!(sql, "Executing statement");
        self.connection.with_session(|session| session.execute(sql))
    }

    /// Executes a statement whose result set, if any, is of no interest.
    pub(crate) fn run_statement(&mut self, sql: &str) -> Result<()> {
        self.execute(sql).map(|_| ())
    }
}
