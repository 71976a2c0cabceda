/// Table Operations
///
/// Select, index and table-level DDL built from structured arguments.

use super::handle::DbHandle;
use super::predicate::Predicate;
use super::session::Connector;
use super::value::TabularResult;
use crate::core::{EtlDbError, Result, ServerErrorKind};
use tracing::{debug, info, warn};

impl<C: Connector> DbHandle<C> {
    /// Selects `columns` from `table` where every condition of `predicate`
    /// holds.
    ///
    /// With no `columns`, all catalog columns are selected in ordinal order.
    /// The result always has exactly the selected columns, even when no row
    /// matches.
    pub fn select(
        &mut self,
        table: &str,
        columns: &[&str],
        predicate: &Predicate,
    ) -> Result<TabularResult> {
        let columns: Vec<String> = if columns.is_empty() {
            self.column_names(table)?
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        };
        if columns.is_empty() {
            return Err(EtlDbError::Schema(format!(
                "table {} has no columns in the catalog",
                table
            )));
        }

        let sql = self.dialect.select(&self.schema, table, &columns, predicate);
        match self.execute(&sql)? {
            Some(result) => result.relabel(columns),
            None => Ok(TabularResult::with_columns(columns)),
        }
    }

    /// Creates an index on `columns`, clustered where the engine has those.
    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: &[&str],
        clustered: bool,
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(EtlDbError::Query(format!("index {} needs at least one column", name)));
        }
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let sql = self
            .dialect
            .create_index(&self.schema, name, table, &columns, clustered);
        self.run_statement(&sql)
    }

    /// Drops an index, falling back to dropping a constraint of that name.
    ///
    /// Unique and primary-key indexes belong to constraints and can only go
    /// through `DROP CONSTRAINT`. Best effort: when neither drop applies, a
    /// warning is logged and `Ok(false)` returned. Failures other than
    /// "not found" or "backs a constraint" are returned as errors.
    pub fn drop_index(&mut self, table: &str, index: &str) -> Result<bool> {
        // Index names are schema-wide here, so the table is checked up front
        if !self.dialect.drop_index_checks_table() && !self.index_exists(table, index)? {
            warn!("Index {} not found on {}", index, table);
            return Ok(false);
        }
        let sql = self.dialect.drop_index(&self.schema, table, index);
        match self.run_statement(&sql) {
            Ok(()) => return Ok(true),
            Err(err) if is_missing_or_constraint(&err) => {
                debug!(table, index, "DROP INDEX failed, trying DROP CONSTRAINT: {}", err);
            }
            Err(err) => return Err(err),
        }

        match self.drop_constraint(table, index) {
            Ok(()) => Ok(true),
            Err(err) if is_missing_or_constraint(&err) || matches!(err, EtlDbError::Unsupported(_)) => {
                warn!("Index {} on {} cannot be dropped: {}", index, table, err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn drop_constraint(&mut self, table: &str, constraint: &str) -> Result<()> {
        let sql = self.dialect.drop_constraint(&self.schema, table, constraint)?;
        self.run_statement(&sql)
    }

    /// Drops `table` if it exists; dropping a missing table is not an error.
    pub fn delete_table(&mut self, table: &str) -> Result<()> {
        let sql = self.dialect.drop_table_if_exists(&self.schema, table);
        self.run_statement(&sql)
    }

    /// Allows or forbids explicit values for the identity column of `table`.
    pub fn set_identity_insert(&mut self, table: &str, on: bool) -> Result<()> {
        match self.dialect.identity_insert(&self.schema, table, on) {
            Some(sql) => {
                self.run_statement(&sql)?;
                info!(table, on, "Identity insert toggled");
                Ok(())
            }
            None => {
                debug!(table, on, "Engine accepts explicit keys, nothing to toggle");
                Ok(())
            }
        }
    }
}

fn is_missing_or_constraint(err: &EtlDbError) -> bool {
    matches!(
        err.server_kind(),
        Some(ServerErrorKind::ObjectNotFound | ServerErrorKind::ConstraintBacked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Value;
    use crate::test_utils::{catalog_rows, scripted_handle, ScriptedConnector, SqliteFixture};

    fn server_error(kind: ServerErrorKind, code: i64, message: &str) -> EtlDbError {
        EtlDbError::Database {
            kind,
            code: Some(code),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_select_defaults_to_catalog_columns() {
        let connector = ScriptedConnector::new();
        connector.respond_columns(&["id", "name", "amount"]);
        let (_staging, mut handle) = scripted_handle(&connector);

        let result = handle
            .select("T", &[], &Predicate::new().eq("name", "a"))
            .unwrap();
        // The fake returns no result set: the columns still come back
        assert_eq!(result.columns(), &["id", "name", "amount"]);
        assert!(result.is_empty());
        assert_eq!(
            connector.statements()[1],
            "SELECT [id], [name], [amount] FROM [dbo].[T] WHERE [name] = N'a'"
        );
    }

    #[test]
    fn test_select_relabels_to_requested_columns() {
        let connector = ScriptedConnector::new();
        connector.respond("SELECT [ID]", Ok(Some(catalog_rows("id", &["x"]))));
        let (_staging, mut handle) = scripted_handle(&connector);

        let result = handle.select("T", &["ID"], &Predicate::new()).unwrap();
        assert_eq!(result.columns(), &["ID"]);
        assert_eq!(result.get(0, "ID"), Some(&Value::from("x")));
    }

    #[test]
    fn test_select_unknown_table() {
        let connector = ScriptedConnector::new();
        connector.respond_columns(&[]);
        let (_staging, mut handle) = scripted_handle(&connector);

        assert!(matches!(
            handle.select("missing", &[], &Predicate::new()),
            Err(EtlDbError::Schema(_))
        ));
    }

    #[test]
    fn test_drop_index_falls_back_to_constraint() {
        let connector = ScriptedConnector::new();
        connector.respond(
            "DROP INDEX",
            Err(server_error(
                ServerErrorKind::ConstraintBacked,
                3723,
                "An explicit DROP INDEX is not allowed on index 'dbo.T.uq_t'",
            )),
        );
        let (_staging, mut handle) = scripted_handle(&connector);

        assert!(handle.drop_index("T", "uq_t").unwrap());
        assert_eq!(
            connector.statements(),
            vec![
                "DROP INDEX [uq_t] ON [dbo].[T]",
                "ALTER TABLE [dbo].[T] DROP CONSTRAINT [uq_t]"
            ]
        );
    }

    #[test]
    fn test_drop_index_reports_unknown_name() {
        let connector = ScriptedConnector::new();
        connector.respond(
            "DROP INDEX",
            Err(server_error(ServerErrorKind::ObjectNotFound, 3701, "Cannot drop the index")),
        );
        connector.respond(
            "ALTER TABLE",
            Err(server_error(ServerErrorKind::ObjectNotFound, 3728, "'nope' is not a constraint")),
        );
        let (_staging, mut handle) = scripted_handle(&connector);

        assert!(!handle.drop_index("T", "nope").unwrap());
    }

    #[test]
    fn test_drop_index_propagates_unexpected_errors() {
        let connector = ScriptedConnector::new();
        connector.respond(
            "DROP INDEX",
            Err(server_error(ServerErrorKind::PermissionDenied, 229, "permission denied")),
        );
        let (_staging, mut handle) = scripted_handle(&connector);

        let err = handle.drop_index("T", "ix").unwrap_err();
        assert_eq!(err.server_kind(), Some(ServerErrorKind::PermissionDenied));
        // No fallback attempted
        assert_eq!(connector.statements().len(), 1);
    }

    #[test]
    fn test_ddl_statements() {
        let connector = ScriptedConnector::new();
        let (_staging, mut handle) = scripted_handle(&connector);

        handle.create_index("ix_t", "T", &["id"], true).unwrap();
        handle.delete_table("T").unwrap();
        handle.set_identity_insert("T", true).unwrap();
        handle.set_identity_insert("T", false).unwrap();
        assert!(handle.create_index("ix_t", "T", &[], false).is_err());

        assert_eq!(
            connector.statements(),
            vec![
                "CREATE CLUSTERED INDEX [ix_t] ON [dbo].[T] ([id])",
                "IF OBJECT_ID(N'dbo.T', 'U') IS NOT NULL DROP TABLE [dbo].[T]",
                "SET IDENTITY_INSERT [dbo].[T] ON",
                "SET IDENTITY_INSERT [dbo].[T] OFF",
            ]
        );
    }

    #[test]
    fn test_sqlite_select_and_delete() {
        let mut fixture = SqliteFixture::with_sample_schema();
        let handle = &mut fixture.handle;
        handle
            .run_query("INSERT INTO orders VALUES (1, 'EU', 10.0), (2, NULL, 5.5)")
            .unwrap();

        let all = handle.select("orders", &[], &Predicate::new()).unwrap();
        assert_eq!(all.columns(), &["order_id", "region", "total"]);
        assert_eq!(all.len(), 2);

        let no_region = handle
            .select("orders", &["order_id"], &Predicate::new().is_null("region"))
            .unwrap();
        assert_eq!(no_region.rows(), &[vec![Value::Integer(2)]]);

        let none = handle
            .select("orders", &[], &Predicate::new().eq("region", "US"))
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(none.columns(), &["order_id", "region", "total"]);

        handle.delete_table("orders").unwrap();
        handle.delete_table("orders").unwrap();
        assert!(!handle.table_exists("orders").unwrap());
    }

    #[test]
    fn test_sqlite_index_lifecycle() {
        let mut fixture = SqliteFixture::with_sample_schema();
        let handle = &mut fixture.handle;

        handle.create_index("ix_total", "orders", &["total"], true).unwrap();
        assert!(handle.index_exists("orders", "ix_total").unwrap());
        assert!(handle.drop_index("orders", "ix_total").unwrap());
        assert!(!handle.index_exists("orders", "ix_total").unwrap());

        // Neither an index nor a droppable constraint
        assert!(!handle.drop_index("orders", "ix_total").unwrap());
        // Identity insert is a no-op on SQLite
        handle.set_identity_insert("orders", true).unwrap();
    }

    #[test]
    fn test_sqlite_drop_index_on_other_table_keeps_it() {
        let mut fixture = SqliteFixture::with_sample_schema();
        let handle = &mut fixture.handle;

        handle.create_index("ix_region", "orders", &["region"], false).unwrap();
        assert!(!handle.drop_index("T", "ix_region").unwrap());
        assert!(handle.index_exists("orders", "ix_region").unwrap());

        assert!(handle.drop_index("orders", "ix_region").unwrap());
        assert!(!handle.index_exists("orders", "ix_region").unwrap());
    }
}
