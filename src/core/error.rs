/// etldb Error Module
///
/// This module defines the error type shared by every layer of etldb.
/// Backend-specific errors are converted into it by the backends themselves,
/// which classify server-reported failures into a `ServerErrorKind` so callers
/// can branch on what went wrong instead of on message text.
use thiserror::Error;

/// Coarse classification of an error reported by the database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// The named object (table, index, constraint) does not exist
    ObjectNotFound,
    /// The index cannot be dropped directly because it enforces a constraint
    ConstraintBacked,
    /// The login lacks permission for the statement
    PermissionDenied,
    /// Anything else: syntax errors, constraint violations, server faults
    Other,
}

/// Error type for etldb.
///
/// Covers:
/// - Connection establishment (exhausted retries, transport failures)
/// - Statement execution as reported by the engine
/// - Column alignment between row-sets and the catalog
/// - Bulk-load staging and aborts
/// - Configuration loading
#[derive(Error, Debug)]
pub enum EtlDbError {
    /// No live connection could be established within the retry bound
    #[error("Not connected: {database} on {host} unreachable after {attempts} attempt(s)")]
    NotConnected {
        host: String,
        database: String,
        attempts: u32,
    },

    /// Errors reported by the database engine
    #[error("Database error: {message}")]
    Database {
        kind: ServerErrorKind,
        code: Option<i64>,
        message: String,
    },

    /// Driver or network-level errors (unreachable host, TLS, broken pipe)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Queries that cannot be built or whose results do not fit the request
    #[error("Query error: {0}")]
    Query(String),

    /// Row-set columns do not line up with the catalog columns of a table
    #[error("Column mismatch for table {table}: missing {missing:?}, unexpected {unexpected:?}")]
    ColumnMismatch {
        table: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// The engine rejected rows during a bulk load and rolled it back
    #[error("Bulk load into {table} aborted after {rejected} rejected row(s)")]
    BulkLoadAborted { table: String, rejected: usize },

    /// Values that cannot be written to a staging file
    #[error("Staging error: {0}")]
    Staging(String),

    /// Operations the target engine has no equivalent for
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Schema-related errors
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlDbError {
    /// Builds a `Database` error without a server error number.
    pub fn database(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        EtlDbError::Database {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// The server error classification, if this error came from the engine.
    pub fn server_kind(&self) -> Option<ServerErrorKind> {
        match self {
            EtlDbError::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the connection that produced this error should be discarded.
    pub fn is_transport(&self) -> bool {
        matches!(self, EtlDbError::Transport(_))
    }
}

/// Type alias for Result to use EtlDbError as the error type.
pub type Result<T> = std::result::Result<T, EtlDbError>;
