/// Core Module for etldb
///
/// Holds the database layer and the shared error type. Everything an ETL
/// script needs goes through `db::DbHandle`.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{EtlDbError, Result, ServerErrorKind};
