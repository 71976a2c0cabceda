use etldb::config::{self, Config, Engine};
use etldb::core::db::{Connector, DbHandle, SqliteConnector};
use etldb::core::{EtlDbError, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const USAGE: &str = "usage: etldb [--config PATH] <sql>";

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only the JSON result
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("etldb: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<()> {
    let (config_path, sql) = parse_args(args)?;
    let config = config::load_config(&config_path)?;
    info!(
        config = %config_path.display(),
        engine = ?config.database.engine,
        "Starting etldb"
    );

    match config.database.engine {
        Engine::Sqlite => execute(SqliteConnector::new(), &config, &sql),
        Engine::Mssql => run_mssql(&config, &sql),
    }
}

#[cfg(feature = "mssql")]
fn run_mssql(config: &Config, sql: &str) -> Result<()> {
    let mssql = config.mssql.clone().unwrap_or_default();
    execute(etldb::core::db::MssqlConnector::new(&mssql)?, config, sql)
}

#[cfg(not(feature = "mssql"))]
fn run_mssql(_config: &Config, _sql: &str) -> Result<()> {
    Err(EtlDbError::Unsupported(
        "this build has no SQL Server support (enable the mssql feature)".to_string(),
    ))
}

fn execute<C: Connector>(connector: C, config: &Config, sql: &str) -> Result<()> {
    let mut handle = DbHandle::new(connector, &config.database);
    let result = handle.run_query(sql)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    handle.disconnect()
}

fn parse_args(args: Vec<String>) -> Result<(PathBuf, String)> {
    let mut config_path = None;
    let mut sql = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| EtlDbError::Config(format!("--config needs a path\n{}", USAGE)))?;
                config_path = Some(PathBuf::from(path));
            }
            _ if sql.is_none() => sql = Some(arg),
            _ => return Err(EtlDbError::Config(format!("unexpected argument {}\n{}", arg, USAGE))),
        }
    }

    let sql = sql.ok_or_else(|| EtlDbError::Config(USAGE.to_string()))?;
    let config_path = match config_path {
        Some(path) => path,
        None => config::default_config_path().ok_or_else(|| {
            EtlDbError::Config("no config directory on this platform; pass --config".to_string())
        })?,
    };
    Ok((config_path, sql))
}
