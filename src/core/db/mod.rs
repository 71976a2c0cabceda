/// Database Module
///
/// The managed database layer: one `DbHandle` per target database, wrapping
/// a connection that is opened lazily and retried on failure.
///
/// ## Architecture
///
/// - **Engine seam** (`session.rs`): `Connector` and `Session`, implemented
///   by the SQLite backend (`sqlite.rs`) and, with the `mssql` feature, the
///   SQL Server backend (`mssql.rs`)
/// - **Connection Management** (`connection.rs`): retry policy and session lifetime
/// - **SQL rendering** (`dialect.rs`, `predicate.rs`): quoting, literals and
///   catalog queries per engine
/// - **Query Execution** (`query.rs`): raw SQL and stored procedures
/// - **Schema Introspection** (`schema.rs`): columns, tables, indexes, procedures
/// - **Table Operations** (`table.rs`): select, index and table DDL
/// - **Bulk Loading** (`bulk.rs`): staged-file inserts
///
/// ## Error Handling
///
/// All operations return `EtlDbError`. Server errors carry a
/// `ServerErrorKind` so callers can branch on "not found" without parsing
/// messages.
pub mod bulk;
pub mod connection;
pub mod dialect;
pub mod handle;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod session;
pub mod sqlite;
pub mod table;
pub mod value;

pub use bulk::StagedFile;
pub use connection::{ConnectionManager, RetryPolicy};
pub use dialect::Dialect;
pub use handle::DbHandle;
#[cfg(feature = "mssql")]
pub use mssql::{MssqlConnector, MssqlSession};
pub use predicate::{Condition, Predicate};
pub use session::{BulkLoad, Connector, Session};
pub use sqlite::{SqliteConnector, SqliteSession};
pub use value::{TabularResult, Value};
