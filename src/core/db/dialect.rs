/// SQL Dialects
///
/// Renders every statement etldb issues: catalog lookups, table-level DDL,
/// the select builder and the bulk-load statement. Identifiers are always
/// quoted and literals always escaped, so table and column names are passed
/// through as plain names.
use super::predicate::{Condition, Predicate};
use super::session::BulkLoad;
use super::value::Value;
use crate::core::{EtlDbError, Result};

/// SQL dialect of the target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Microsoft SQL Server (T-SQL, `INFORMATION_SCHEMA` and `sys` catalogs)
    MsSql,
    /// SQLite (`sqlite_master` and pragma table functions)
    Sqlite,
}

impl Dialect {
    /// Schema used when the configuration names none.
    pub fn default_schema(self) -> &'static str {
        match self {
            Dialect::MsSql => "dbo",
            Dialect::Sqlite => "main",
        }
    }

    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Dialect::MsSql => format!("[{}]", name.replace(']', "]]")),
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// `schema.table`, both parts quoted.
    pub fn qualified(self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
    }

    pub fn string_literal(self, s: &str) -> String {
        let escaped = s.replace('\'', "''");
        match self {
            Dialect::MsSql => format!("N'{}'", escaped),
            Dialect::Sqlite => format!("'{}'", escaped),
        }
    }

    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Text(s) => self.string_literal(s),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Null => "NULL".to_string(),
        }
    }

    /// ` WHERE a = 1 AND b IS NULL`, or an empty string for no conditions.
    pub fn where_clause(self, predicate: &Predicate) -> String {
        if predicate.is_empty() {
            return String::new();
        }
        let conditions: Vec<String> = predicate
            .conditions()
            .iter()
            .map(|(column, condition)| match condition {
                Condition::Equals(value) => {
                    format!("{} = {}", self.quote_ident(column), self.literal(value))
                }
                Condition::IsNull => format!("{} IS NULL", self.quote_ident(column)),
            })
            .collect();
        format!(" WHERE {}", conditions.join(" AND "))
    }

    fn column_list(self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn select(
        self,
        schema: &str,
        table: &str,
        columns: &[String],
        predicate: &Predicate,
    ) -> String {
        format!(
            "SELECT {} FROM {}{}",
            self.column_list(columns),
            self.qualified(schema, table),
            self.where_clause(predicate)
        )
    }

    /// SQLite has no clustered indexes; the flag is ignored there.
    pub fn create_index(
        self,
        schema: &str,
        name: &str,
        table: &str,
        columns: &[String],
        clustered: bool,
    ) -> String {
        match self {
            Dialect::MsSql => format!(
                "CREATE {}INDEX {} ON {} ({})",
                if clustered { "CLUSTERED " } else { "" },
                self.quote_ident(name),
                self.qualified(schema, table),
                self.column_list(columns)
            ),
            Dialect::Sqlite => format!(
                "CREATE INDEX {} ON {} ({})",
                self.qualified(schema, name),
                self.quote_ident(table),
                self.column_list(columns)
            ),
        }
    }

    pub fn drop_index(self, schema: &str, table: &str, index: &str) -> String {
        match self {
            Dialect::MsSql => format!(
                "DROP INDEX {} ON {}",
                self.quote_ident(index),
                self.qualified(schema, table)
            ),
            Dialect::Sqlite => format!("DROP INDEX {}", self.qualified(schema, index)),
        }
    }

    pub fn drop_constraint(self, schema: &str, table: &str, constraint: &str) -> Result<String> {
        match self {
            Dialect::MsSql => Ok(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                self.qualified(schema, table),
                self.quote_ident(constraint)
            )),
            Dialect::Sqlite => Err(EtlDbError::Unsupported(format!(
                "SQLite cannot drop constraint {} from {}",
                constraint, table
            ))),
        }
    }

    /// Drops a table only if it exists.
    pub fn drop_table_if_exists(self, schema: &str, table: &str) -> String {
        match self {
            Dialect::MsSql => format!(
                "IF OBJECT_ID({}, 'U') IS NOT NULL DROP TABLE {}",
                self.string_literal(&format!("{}.{}", schema, table)),
                self.qualified(schema, table)
            ),
            Dialect::Sqlite => format!("DROP TABLE IF EXISTS {}", self.qualified(schema, table)),
        }
    }

    /// `None` where explicit key values are always accepted.
    pub fn identity_insert(self, schema: &str, table: &str, on: bool) -> Option<String> {
        match self {
            Dialect::MsSql => Some(format!(
                "SET IDENTITY_INSERT {} {}",
                self.qualified(schema, table),
                if on { "ON" } else { "OFF" }
            )),
            Dialect::Sqlite => None,
        }
    }

    pub fn begin_transaction(self) -> &'static str {
        match self {
            Dialect::MsSql => "BEGIN TRANSACTION",
            Dialect::Sqlite => "BEGIN",
        }
    }

    pub fn commit_transaction(self) -> &'static str {
        match self {
            Dialect::MsSql => "COMMIT TRANSACTION",
            Dialect::Sqlite => "COMMIT",
        }
    }

    pub fn rollback_transaction(self) -> &'static str {
        match self {
            Dialect::MsSql => "ROLLBACK TRANSACTION",
            Dialect::Sqlite => "ROLLBACK",
        }
    }

    /// Whether `DROP INDEX` is scoped to a table. SQLite index names are
    /// schema-wide, so its statement cannot refuse an index of another table.
    pub fn drop_index_checks_table(self) -> bool {
        matches!(self, Dialect::MsSql)
    }

    /// The server-side load statement for a staged file.
    pub fn bulk_insert(self, load: &BulkLoad<'_>) -> Result<String> {
        match self {
            Dialect::MsSql => Ok(format!(
                "BULK INSERT {} FROM {} WITH (FIELDTERMINATOR = '{}', ROWTERMINATOR = '{}', MAXERRORS = {}, CODEPAGE = '65001')",
                self.qualified(load.schema, load.table),
                format!("'{}'", load.path.display().to_string().replace('\'', "''")),
                terminator(load.field_terminator),
                terminator(load.row_terminator),
                load.max_errors
            )),
            Dialect::Sqlite => Err(EtlDbError::Unsupported(
                "SQLite has no bulk-load statement".to_string(),
            )),
        }
    }

    pub fn list_procedures(self) -> Result<String> {
        match self {
            Dialect::MsSql => Ok("SELECT s.name + '.' + p.name AS sproc_name_with_schema \
                 FROM sys.procedures AS p \
                 INNER JOIN sys.schemas AS s ON s.schema_id = p.schema_id"
                .to_string()),
            Dialect::Sqlite => Err(EtlDbError::Unsupported(
                "SQLite has no stored procedures".to_string(),
            )),
        }
    }

    /// Column names of a table in ordinal order, in a column `COLUMN_NAME`.
    pub fn column_names(self, database: &str, schema: &str, table: &str) -> String {
        match self {
            Dialect::MsSql => format!(
                "SELECT COLUMN_NAME FROM {}.INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} ORDER BY ORDINAL_POSITION ASC",
                self.quote_ident(database),
                self.string_literal(schema),
                self.string_literal(table)
            ),
            Dialect::Sqlite => format!(
                "SELECT name AS COLUMN_NAME FROM pragma_table_info({}) ORDER BY cid ASC",
                self.string_literal(table)
            ),
        }
    }

    pub fn table_exists(self, schema: &str, table: &str) -> String {
        match self {
            Dialect::MsSql => format!(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
                self.string_literal(schema),
                self.string_literal(table)
            ),
            Dialect::Sqlite => format!(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = {}",
                self.string_literal(table)
            ),
        }
    }

    pub fn index_exists(self, schema: &str, table: &str, index: &str) -> String {
        match self {
            Dialect::MsSql => format!(
                "SELECT name FROM sys.indexes WHERE name = {} AND object_id = OBJECT_ID({})",
                self.string_literal(index),
                self.string_literal(&format!("{}.{}", schema, table))
            ),
            Dialect::Sqlite => format!(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = {} AND name = {}",
                self.string_literal(table),
                self.string_literal(index)
            ),
        }
    }
}

/// How a terminator character is spelled inside `BULK INSERT ... WITH (...)`.
fn terminator(c: char) -> String {
    match c {
        '\t' => "\\t".to_string(),
        // '\n' is read as CRLF by BULK INSERT; the hex form means LF alone
        '\n' => "0x0a".to_string(),
        '\r' => "0x0d".to_string(),
        '\'' => "''".to_string(),
        c => c.to_string(),
    }
}
