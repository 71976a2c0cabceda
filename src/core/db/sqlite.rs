/// SQLite Backend
///
/// Embedded engine used for local runs and tests. SQLite has no server to
/// read staging files, so the session performs the load itself: it reads the
/// file and inserts every row under one savepoint, which nests inside an
/// enclosing transaction when there is one.

use super::dialect::Dialect;
use super::session::{BulkLoad, Connector, Session};
use super::value::{TabularResult, Value};
use crate::core::{EtlDbError, Result, ServerErrorKind};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Batch, Connection, ErrorCode, Statement};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Opens SQLite databases; the `database` argument is the file path.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new() -> Self {
        SqliteConnector {
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// How long a statement waits on a locked database before failing.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for SqliteConnector {
    fn default() -> Self {
        SqliteConnector::new()
    }
}

impl Connector for SqliteConnector {
    type Session = SqliteSession;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self, _host: &str, database: &str) -> Result<SqliteSession> {
        let conn = if database == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(database)?
        };
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(SqliteSession { conn })
    }
}

pub struct SqliteSession {
    conn: Connection,
}

impl Session for SqliteSession {
    /// Runs every statement of `sql` in order and returns the outcome of
    /// the last one.
    fn execute(&mut self, sql: &str) -> Result<Option<TabularResult>> {
        let mut batch = Batch::new(&self.conn, sql);
        let mut last = None;
        while let Some(mut stmt) = batch.next()? {
            last = run_prepared(&mut stmt)?;
        }
        Ok(last)
    }

    fn call_procedure(&mut self, name: &str, _args: &[Value]) -> Result<TabularResult> {
        Err(EtlDbError::Unsupported(format!(
            "SQLite has no stored procedures (called {})",
            name
        )))
    }

    /// Loads the staged file row by row under one savepoint.
    ///
    /// A line is rejected when its field count differs from the table's or
    /// when a field does not convert to an INTEGER or REAL column.
    /// Once `max_errors` lines are rejected everything is rolled back.
    /// Empty fields load as NULL.
    fn bulk_load(&mut self, load: &BulkLoad<'_>) -> Result<Option<u64>> {
        let content = fs::read_to_string(load.path)?;
        let affinities = self.column_affinities(load)?;
        let dialect = Dialect::Sqlite;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.qualified(load.schema, load.table),
            load.columns
                .iter()
                .map(|c| dialect.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; load.columns.len()].join(", ")
        );

        let threshold = load.max_errors.max(1) as usize;
        let mut rejected = 0;
        let mut loaded = 0;

        let savepoint = self.conn.savepoint()?;
        {
            let mut stmt = savepoint.prepare(&sql)?;
            for (line_no, line) in content.split_terminator(load.row_terminator).enumerate() {
                let fields: Vec<&str> = line.split(load.field_terminator).collect();
                if let Some(reason) = reject_reason(&fields, &affinities) {
                    rejected += 1;
                    warn!(line = line_no + 1, table = load.table, "Rejected row: {}", reason);
                    if rejected >= threshold {
                        return Err(EtlDbError::BulkLoadAborted {
                            table: load.table.to_string(),
                            rejected,
                        });
                    }
                    continue;
                }
                stmt.execute(params_from_iter(
                    fields.iter().map(|f| if f.is_empty() { None } else { Some(*f) }),
                ))?;
                loaded += 1;
            }
        }
        savepoint.commit()?;
        Ok(Some(loaded))
    }

    fn set_autocommit(&mut self, on: bool) -> Result<()> {
        if !on {
            return Err(EtlDbError::Unsupported(
                "SQLite sessions always autocommit".to_string(),
            ));
        }
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err.into())
    }
}

impl SqliteSession {
    /// Affinity of each load column, from the declared column types.
    fn column_affinities(&self, load: &BulkLoad<'_>) -> Result<Vec<Affinity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1, ?2)")?;
        let declared = stmt
            .query_map([load.table, load.schema], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(load
            .columns
            .iter()
            .map(|column| {
                declared
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .map_or(Affinity::Blob, |(_, ty)| Affinity::of(ty))
            })
            .collect())
    }
}

/// SQLite type affinity of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    fn of(declared: &str) -> Affinity {
        let ty = declared.to_ascii_uppercase();
        if ty.contains("INT") {
            Affinity::Integer
        } else if ty.contains("CHAR") || ty.contains("CLOB") || ty.contains("TEXT") {
            Affinity::Text
        } else if ty.is_empty() || ty.contains("BLOB") {
            Affinity::Blob
        } else if ty.contains("REAL") || ty.contains("FLOA") || ty.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// Whether a non-empty staged field converts to this affinity.
    fn accepts(self, field: &str) -> bool {
        match self {
            Affinity::Integer => field.parse::<i64>().is_ok(),
            Affinity::Real => field.parse::<f64>().map_or(false, f64::is_finite),
            // NUMERIC columns (DATE, BOOLEAN, ...) keep unconvertible text as is
            Affinity::Text | Affinity::Blob | Affinity::Numeric => true,
        }
    }
}

/// Why a staged line cannot be loaded, if it cannot.
fn reject_reason(fields: &[&str], affinities: &[Affinity]) -> Option<String> {
    if fields.len() != affinities.len() {
        return Some(format!(
            "expected {} fields, found {}",
            affinities.len(),
            fields.len()
        ));
    }
    fields
        .iter()
        .zip(affinities)
        .position(|(field, affinity)| !field.is_empty() && !affinity.accepts(field))
        .map(|i| format!("field {} ({:?}) is not {:?}", i + 1, fields[i], affinities[i]))
}

/// Executes one prepared statement; `None` when it has no result columns.
fn run_prepared(stmt: &mut Statement<'_>) -> Result<Option<TabularResult>> {
    if stmt.column_count() == 0 {
        stmt.execute([])?;
        return Ok(None);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..column_count)
                .map(|i| row.get_ref(i).map(to_value))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(TabularResult::new(columns, rows)?))
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(
            std::iter::once("0x".to_string())
                .chain(b.iter().map(|byte| format!("{:02X}", byte)))
                .collect(),
        ),
    }
}

/// Classifies SQLite failures the way the table operations branch on them.
impl From<rusqlite::Error> for EtlDbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let message = message.clone().unwrap_or_else(|| err.to_string());
                let kind = match failure.code {
                    ErrorCode::CannotOpen | ErrorCode::NotADatabase => {
                        return EtlDbError::Transport(message);
                    }
                    ErrorCode::ReadOnly
                    | ErrorCode::PermissionDenied
                    | ErrorCode::AuthorizationForStatementDenied => ServerErrorKind::PermissionDenied,
                    _ => classify_message(&message),
                };
                EtlDbError::Database {
                    kind,
                    code: Some(i64::from(failure.extended_code)),
                    message,
                }
            }
            _ => EtlDbError::database(ServerErrorKind::Other, err.to_string()),
        }
    }
}

fn classify_message(message: &str) -> ServerErrorKind {
    if message.starts_with("no such") {
        ServerErrorKind::ObjectNotFound
    } else if message.contains("cannot be dropped") {
        ServerErrorKind::ConstraintBacked
    } else {
        ServerErrorKind::Other
    }
}
