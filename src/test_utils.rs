/// # Test Utilities Module
///
/// Testing infrastructure shared by the unit and integration tests:
/// - `ScriptedConnector`, a fake SQL Server connector that counts connection
///   attempts, records every statement and answers with scripted replies
/// - SQLite fixtures backed by temporary directories

use crate::config::DatabaseConfig;
use crate::core::db::{BulkLoad, Connector, DbHandle, Dialect, Session, SqliteConnector};
use crate::core::db::{TabularResult, Value};
use crate::core::{EtlDbError, Result, ServerErrorKind};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A staging file as the fake server saw it during a load.
#[derive(Debug, Clone)]
pub struct ObservedLoad {
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Default)]
struct ScriptState {
    /// Connection attempts that fail before one succeeds (None: all fail)
    failures_left: Option<u32>,
    attempts: u32,
    autocommit_calls: Vec<bool>,
    statements: Vec<String>,
    replies: VecDeque<(String, Result<Option<TabularResult>>)>,
    loads: Vec<ObservedLoad>,
    closed: u32,
}

/// Fake connector speaking the SQL Server dialect.
///
/// Clones share their state, so a test keeps one clone to inspect what the
/// handle under test did with the other.
#[derive(Clone)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    /// Every connection attempt succeeds.
    pub fn new() -> Self {
        ScriptedConnector::with_failures(Some(0))
    }

    /// Every connection attempt fails.
    pub fn unreachable() -> Self {
        ScriptedConnector::with_failures(None)
    }

    /// The first `n` attempts fail, alternating database and driver errors.
    pub fn failing_first(n: u32) -> Self {
        ScriptedConnector::with_failures(Some(n))
    }

    fn with_failures(failures_left: Option<u32>) -> Self {
        ScriptedConnector {
            state: Arc::new(Mutex::new(ScriptState {
                failures_left,
                ..ScriptState::default()
            })),
        }
    }

    /// Queues a reply for the next statement starting with `prefix`.
    pub fn respond(&self, prefix: &str, reply: Result<Option<TabularResult>>) {
        self.state
            .lock()
            .unwrap()
            .replies
            .push_back((prefix.to_string(), reply));
    }

    /// Queues a catalog reply listing `columns` for the next column lookup.
    pub fn respond_columns(&self, columns: &[&str]) {
        self.respond("SELECT COLUMN_NAME", Ok(Some(catalog_rows("COLUMN_NAME", columns))));
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }

    pub fn autocommit_calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().autocommit_calls.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn loads(&self) -> Vec<ObservedLoad> {
        self.state.lock().unwrap().loads.clone()
    }

    pub fn closed(&self) -> u32 {
        self.state.lock().unwrap().closed
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    fn connect(&self, host: &str, _database: &str) -> Result<ScriptedSession> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        match state.failures_left {
            Some(0) => Ok(ScriptedSession {
                state: Arc::clone(&self.state),
            }),
            Some(n) => {
                state.failures_left = Some(n - 1);
                if n % 2 == 0 {
                    Err(EtlDbError::database(
                        ServerErrorKind::Other,
                        "Login failed: server is starting up",
                    ))
                } else {
                    Err(EtlDbError::Transport(format!("{}: connection refused", host)))
                }
            }
            None => Err(EtlDbError::Transport(format!("{}: host unreachable", host))),
        }
    }
}

pub struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSession {
    fn reply(&self, sql: &str) -> Result<Option<TabularResult>> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        match state
            .replies
            .iter()
            .position(|(prefix, _)| sql.starts_with(prefix.as_str()))
        {
            Some(i) => state
                .replies
                .remove(i)
                .map(|(_, reply)| reply)
                .unwrap_or(Ok(None)),
            None => Ok(None),
        }
    }
}

impl Session for ScriptedSession {
    fn execute(&mut self, sql: &str) -> Result<Option<TabularResult>> {
        self.reply(sql)
    }

    fn call_procedure(&mut self, name: &str, args: &[Value]) -> Result<TabularResult> {
        let call = format!(
            "EXEC {} {}",
            name,
            args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
        );
        Ok(self.reply(&call)?.unwrap_or_default())
    }

    fn bulk_load(&mut self, load: &BulkLoad<'_>) -> Result<Option<u64>> {
        let contents = fs::read_to_string(load.path)?;
        let rows = contents.lines().count() as u64;
        self.state.lock().unwrap().loads.push(ObservedLoad {
            path: load.path.to_path_buf(),
            contents,
        });
        let sql = Dialect::MsSql.bulk_insert(load)?;
        self.reply(&sql).map(|_| Some(rows))
    }

    fn set_autocommit(&mut self, on: bool) -> Result<()> {
        self.state.lock().unwrap().autocommit_calls.push(on);
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// A one-column result, one row per name.
pub fn catalog_rows(column: &str, names: &[&str]) -> TabularResult {
    TabularResult::new(
        vec![column.to_string()],
        names.iter().map(|n| vec![Value::from(*n)]).collect(),
    )
    .unwrap()
}

/// A `DbHandle` over the scripted connector, staging into a temp dir.
pub fn scripted_handle(connector: &ScriptedConnector) -> (TempDir, DbHandle<ScriptedConnector>) {
    let staging = TempDir::new().unwrap();
    let mut config = DatabaseConfig::new("sql01", "sales");
    config.staging_dir = Some(staging.path().to_path_buf());
    (staging, DbHandle::new(connector.clone(), &config))
}

/// Isolated SQLite database with its own staging directory
pub struct SqliteFixture {
    pub dir: TempDir,
    pub handle: DbHandle<SqliteConnector>,
}

impl SqliteFixture {
    pub fn new() -> Self {
        SqliteFixture::with_config(|_| {})
    }

    /// Builds the fixture after letting the test adjust the configuration.
    pub fn with_config(adjust: impl FnOnce(&mut DatabaseConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();

        let mut config =
            DatabaseConfig::new("localhost", dir.path().join("test.db").to_string_lossy());
        config.staging_dir = Some(staging);
        adjust(&mut config);

        let handle = DbHandle::new(SqliteConnector::new(), &config);
        SqliteFixture { dir, handle }
    }

    /// Creates `T(id, name, amount)` and an orders table with a unique key.
    pub fn with_sample_schema() -> Self {
        let mut fixture = SqliteFixture::new();
        fixture
            .handle
            .run_query("CREATE TABLE T (id INTEGER, name TEXT, amount REAL)")
            .unwrap();
        fixture
            .handle
            .run_query(
                "CREATE TABLE orders (
                    order_id INTEGER NOT NULL,
                    region TEXT,
                    total REAL,
                    CONSTRAINT uq_orders UNIQUE (order_id)
                )",
            )
            .unwrap();
        fixture
    }

    /// Files currently in the staging directory
    pub fn staged_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.dir.path().join("staging"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}
