/// The database handle ETL scripts work with.
///
/// One `DbHandle` owns one connection. Its operations are spread over the
/// `query`, `schema`, `table` and `bulk` modules. Every operation takes
/// `&mut self`: statements on a handle run strictly one after another, and a
/// handle shared between threads needs an outer `Mutex`.
use super::connection::{ConnectionManager, RetryPolicy};
use super::dialect::Dialect;
use super::session::Connector;
use crate::config::DatabaseConfig;
use std::path::PathBuf;
use tracing::warn;

pub struct DbHandle<C: Connector> {
    pub(crate) connection: ConnectionManager<C>,
    pub(crate) dialect: Dialect,
    pub(crate) schema: String,
    pub(crate) staging_dir: Option<PathBuf>,
    pub(crate) insert_limit: Option<usize>,
    pub(crate) max_errors: u32,
}

impl<C: Connector> DbHandle<C> {
    /// Creates a handle and makes the first connection attempt.
    ///
    /// Construction never fails: if the target cannot be reached the handle
    /// stays disconnected, which `is_connected` reports, and every later
    /// operation retries before failing with `EtlDbError::NotConnected`.
    pub fn new(connector: C, config: &DatabaseConfig) -> Self {
        let dialect = connector.dialect();
        let connection = ConnectionManager::new(
            connector,
            config.host.clone(),
            config.database.clone(),
            RetryPolicy::from(&config.retry),
        );

        let mut handle = DbHandle {
            connection,
            dialect,
            schema: config
                .schema
                .clone()
                .unwrap_or_else(|| dialect.default_schema().to_string()),
            staging_dir: staging_dir(config),
            insert_limit: config.insert_limit.filter(|limit| *limit > 0),
            max_errors: config.max_errors,
        };

        if !handle.connection.ensure_connected() {
            warn!(
                host = %config.host,
                database = %config.database,
                "Handle created without a connection"
            );
        }
        handle
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// See `ConnectionManager::ensure_connected`.
    pub fn ensure_connected(&mut self) -> bool {
        self.connection.ensure_connected()
    }

    /// Closes the connection now instead of on drop.
    pub fn disconnect(&mut self) -> crate::core::Result<()> {
        self.connection.disconnect()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Directory staging files are written to, as the server sees it.
    pub fn staging_dir(&self) -> Option<&PathBuf> {
        self.staging_dir.as_ref()
    }
}

/// `staging_dir` if set, else the share `\\host\bulk_insert_folder`.
fn staging_dir(config: &DatabaseConfig) -> Option<PathBuf> {
    config.staging_dir.clone().or_else(|| {
        config
            .bulk_insert_folder
            .as_ref()
            .map(|folder| PathBuf::from(format!(r"\\{}\{}", config.host, folder)))
    })
}
