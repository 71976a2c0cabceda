use crate::core::{EtlDbError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub mssql: Option<MssqlConfig>,
}

/// Which backend the binary opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Sqlite,
    Mssql,
}

/// Connection target and table-operation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: Engine,
    /// Server host. Also names the share staging files are written to.
    #[serde(default)]
    pub host: String,
    /// Database name, or the database file for SQLite
    pub database: String,
    /// Schema of the tables; the dialect default when absent
    pub schema: Option<String>,
    /// Share folder on `host` the server reads staging files from
    pub bulk_insert_folder: Option<String>,
    /// Explicit staging directory, replacing `\\host\bulk_insert_folder`
    pub staging_dir: Option<PathBuf>,
    /// Maximum rows per staged file
    pub insert_limit: Option<usize>,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DatabaseConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        DatabaseConfig {
            engine: Engine::default(),
            host: host.into(),
            database: database.into(),
            schema: None,
            bulk_insert_folder: None,
            staging_dir: None,
            insert_limit: None,
            max_errors: default_max_errors(),
            retry: RetryConfig::default(),
        }
    }
}

/// Connection retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt
    #[serde(default)]
    pub backoff_ms: u64,
    pub max_backoff_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
            max_backoff_ms: None,
        }
    }
}

/// SQL Server connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MssqlConfig {
    pub port: Option<u16>,
    /// SQL login, required
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub trust_cert: bool,
    /// Deadline for connecting and for each statement
    pub timeout_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_max_errors() -> u32 {
    1
}

/// Loads configuration from a TOML file at the given path.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| EtlDbError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| EtlDbError::Config(e.to_string()))
}

/// `<config dir>/etldb/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("etldb").join("config.toml"))
}
