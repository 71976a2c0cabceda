/// Schema Introspection Module
///
/// Catalog lookups, issued as ordinary queries through the query layer.
/// `column_names` drives both the default projection of `select` and the
/// column alignment of `insert`.

use super::handle::DbHandle;
use super::session::Connector;
use super::value::{TabularResult, Value};
use crate::core::{EtlDbError, Result};

impl<C: Connector> DbHandle<C> {
    /// Fully qualified (`schema.procedure`) names of all stored procedures.
    pub fn list_stored_procedures(&mut self) -> Result<Vec<String>> {
        let sql = self.dialect.list_procedures()?;
        text_column(self.run_query(&sql)?)
    }

    /// Column names of `table` in ordinal position order.
    ///
    /// Empty when the table does not exist.
    pub fn column_names(&mut self, table: &str) -> Result<Vec<String>> {
        let sql = self
            .dialect
            .column_names(self.connection.database(), &self.schema, table);
        text_column(self.run_query(&sql)?)
    }

    pub fn table_exists(&mut self, table: &str) -> Result<bool> {
        let sql = self.dialect.table_exists(&self.schema, table);
        Ok(has_rows(self.run_query(&sql)?))
    }

    pub fn index_exists(&mut self, table: &str, index: &str) -> Result<bool> {
        let sql = self.dialect.index_exists(&self.schema, table, index);
        Ok(has_rows(self.run_query(&sql)?))
    }
}

fn has_rows(result: Option<TabularResult>) -> bool {
    result.map_or(false, |r| !r.is_empty())
}

/// The first column of a catalog result, which must hold text.
fn text_column(result: Option<TabularResult>) -> Result<Vec<String>> {
    let Some(result) = result else {
        return Ok(Vec::new());
    };
    result
        .into_rows()
        .into_iter()
        .map(|row| match row.into_iter().next() {
            Some(Value::Text(name)) => Ok(name),
            other => Err(EtlDbError::Schema(format!(
                "catalog returned {:?} where a name was expected",
                other
            ))),
        })
        .collect()
}
