/// SQL Server Backend
///
/// Sessions over tiberius. The driver is async; each session owns a
/// single-threaded tokio runtime and blocks on it, so the rest of the crate
/// stays synchronous.

use super::dialect::Dialect;
use super::session::{BulkLoad, Connector, Session};
use super::value::{TabularResult, Value};
use crate::config::MssqlConfig;
use crate::core::{EtlDbError, Result, ServerErrorKind};
use std::future::Future;
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Query, QueryStream};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

const DEFAULT_PORT: u16 = 1433;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type TdsClient = Client<Compat<TcpStream>>;

#[derive(Debug, Clone)]
pub struct MssqlConnector {
    port: u16,
    user: String,
    password: String,
    trust_cert: bool,
    timeout: Duration,
}

impl MssqlConnector {
    pub fn new(config: &MssqlConfig) -> Result<Self> {
        let user = config
            .user
            .clone()
            .ok_or_else(|| EtlDbError::Config("mssql.user is required".to_string()))?;
        Ok(MssqlConnector {
            port: config.port.unwrap_or(DEFAULT_PORT),
            user,
            password: config.password.clone().unwrap_or_default(),
            trust_cert: config.trust_cert,
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    fn tds_config(&self, host: &str, database: &str) -> Config {
        let mut config = Config::new();
        config.host(host);
        config.port(self.port);
        config.database(database);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }
}

impl Connector for MssqlConnector {
    type Session = MssqlSession;

    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    fn connect(&self, host: &str, database: &str) -> Result<MssqlSession> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| EtlDbError::Transport(format!("cannot start runtime: {}", e)))?;

        let config = self.tds_config(host, database);
        let client = with_deadline(&runtime, self.timeout, async move {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| EtlDbError::Transport(e.to_string()))?;
            tcp.set_nodelay(true)
                .map_err(|e| EtlDbError::Transport(e.to_string()))?;
            Ok::<_, EtlDbError>(Client::connect(config, tcp.compat_write()).await?)
        })?;

        Ok(MssqlSession {
            runtime,
            client,
            timeout: self.timeout,
        })
    }
}

pub struct MssqlSession {
    runtime: Runtime,
    client: TdsClient,
    timeout: Duration,
}

impl Session for MssqlSession {
    fn execute(&mut self, sql: &str) -> Result<Option<TabularResult>> {
        let client = &mut self.client;
        with_deadline(&self.runtime, self.timeout, async move {
            first_result_set(client.simple_query(sql).await?).await
        })
    }

    fn call_procedure(&mut self, name: &str, args: &[Value]) -> Result<TabularResult> {
        let placeholders: Vec<String> = (1..=args.len()).map(|i| format!("@P{}", i)).collect();
        let sql = format!("EXEC {} {}", quote_procedure(name), placeholders.join(", "));

        let mut query = Query::new(sql.trim_end().to_string());
        for arg in args {
            match arg {
                Value::Text(s) => query.bind(s.clone()),
                Value::Integer(i) => query.bind(*i),
                Value::Float(f) => query.bind(*f),
                Value::Null => query.bind(Option::<String>::None),
            }
        }

        let client = &mut self.client;
        let result = with_deadline(&self.runtime, self.timeout, async move {
            first_result_set(query.query(client).await?).await
        })?;
        Ok(result.unwrap_or_else(TabularResult::empty))
    }

    fn bulk_load(&mut self, load: &BulkLoad<'_>) -> Result<Option<u64>> {
        let sql = Dialect::MsSql.bulk_insert(load)?;
        let client = &mut self.client;
        with_deadline(&self.runtime, self.timeout, async move {
            Ok::<_, EtlDbError>(Some(client.execute(sql, &[]).await?.total()))
        })
    }

    fn set_autocommit(&mut self, on: bool) -> Result<()> {
        let sql = if on {
            "SET IMPLICIT_TRANSACTIONS OFF"
        } else {
            "SET IMPLICIT_TRANSACTIONS ON"
        };
        self.execute(sql).map(|_| ())
    }

    fn close(self) -> Result<()> {
        let MssqlSession { runtime, client, timeout } = self;
        with_deadline(&runtime, timeout, async move {
            Ok::<_, EtlDbError>(client.close().await?)
        })
    }
}

/// Runs `fut` to completion, failing with a transport error after `timeout`.
fn with_deadline<T>(
    runtime: &Runtime,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    runtime.block_on(async {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| EtlDbError::Transport(format!("no answer within {:?}", timeout)))?
    })
}

/// Collects the first result set of a stream; `None` when the statement
/// produced no result set at all.
async fn first_result_set(mut stream: QueryStream<'_>) -> Result<Option<TabularResult>> {
    let columns: Vec<String> = match stream.columns().await? {
        Some(columns) => columns.iter().map(|c| c.name().to_string()).collect(),
        None => return Ok(None),
    };
    let rows = stream
        .into_first_result()
        .await?
        .into_iter()
        .map(|row| row.into_iter().map(column_value).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(TabularResult::new(columns, rows)?))
}

fn quote_procedure(name: &str) -> String {
    name.split('.')
        .map(|part| Dialect::MsSql.quote_ident(part))
        .collect::<Vec<_>>()
        .join(".")
}

fn column_value(data: ColumnData<'static>) -> Result<Value> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|n| Value::Integer(i64::from(n))),
        ColumnData::I16(v) => v.map(|n| Value::Integer(i64::from(n))),
        ColumnData::I32(v) => v.map(|n| Value::Integer(i64::from(n))),
        ColumnData::I64(v) => v.map(Value::Integer),
        ColumnData::F32(v) => v.map(|n| Value::Float(f64::from(n))),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(|b| Value::Integer(i64::from(b))),
        ColumnData::String(v) => v.as_ref().map(|s| Value::Text(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::Text(g.to_string())),
        ColumnData::Numeric(v) => v.as_ref().map(|n| Value::Text(n.to_string())),
        ColumnData::Xml(v) => v.as_ref().map(|x| Value::Text(x.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|bytes| {
            Value::Text(
                std::iter::once("0x".to_string())
                    .chain(bytes.iter().map(|b| format!("{:02X}", b)))
                    .collect(),
            )
        }),
        ColumnData::Date(_) => {
            chrono::NaiveDate::from_sql(&data)?.map(|d| Value::Text(d.to_string()))
        }
        ColumnData::Time(_) => {
            chrono::NaiveTime::from_sql(&data)?.map(|t| Value::Text(t.to_string()))
        }
        ColumnData::DateTimeOffset(_) => {
            chrono::DateTime::<chrono::FixedOffset>::from_sql(&data)?
                .map(|t| Value::Text(t.to_rfc3339()))
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(&data)?
                .map(|t| Value::Text(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Server error numbers the table operations branch on.
fn server_error_kind(code: u32) -> ServerErrorKind {
    match code {
        // cannot drop (does not exist), not a constraint, invalid object, ...
        208 | 1088 | 3701 | 3727 | 3728 | 4902 => ServerErrorKind::ObjectNotFound,
        // explicit DROP INDEX on a constraint-backed index
        3723 => ServerErrorKind::ConstraintBacked,
        229 | 230 | 262 | 297 | 300 => ServerErrorKind::PermissionDenied,
        _ => ServerErrorKind::Other,
    }
}

impl From<tiberius::error::Error> for EtlDbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error;
        match err {
            Error::Server(token) => EtlDbError::Database {
                kind: server_error_kind(token.code()),
                code: Some(i64::from(token.code())),
                message: token.message().to_string(),
            },
            Error::Io { .. } | Error::Tls(_) | Error::Routing { .. } | Error::Protocol(_) => {
                EtlDbError::Transport(err.to_string())
            }
            other => EtlDbError::database(ServerErrorKind::Other, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_requires_login() {
        assert!(matches!(
            MssqlConnector::new(&MssqlConfig::default()),
            Err(EtlDbError::Config(_))
        ));

        let connector = MssqlConnector::new(&MssqlConfig {
            user: Some("etl".to_string()),
            ..MssqlConfig::default()
        })
        .unwrap();
        assert_eq!(connector.port, DEFAULT_PORT);
        assert_eq!(connector.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_server_error_kinds() {
        assert_eq!(server_error_kind(3701), ServerErrorKind::ObjectNotFound);
        assert_eq!(server_error_kind(3723), ServerErrorKind::ConstraintBacked);
        assert_eq!(server_error_kind(229), ServerErrorKind::PermissionDenied);
        assert_eq!(server_error_kind(102), ServerErrorKind::Other);
    }

    #[test]
    fn test_column_values() {
        assert_eq!(column_value(ColumnData::I32(Some(7))).unwrap(), Value::Integer(7));
        assert_eq!(column_value(ColumnData::I32(None)).unwrap(), Value::Null);
        assert_eq!(column_value(ColumnData::Bit(Some(true))).unwrap(), Value::Integer(1));
        assert_eq!(
            column_value(ColumnData::String(Some("x".into()))).unwrap(),
            Value::from("x")
        );
    }

    #[test]
    fn test_procedure_name_quoting() {
        assert_eq!(quote_procedure("dbo.refresh_sales"), "[dbo].[refresh_sales]");
        assert_eq!(quote_procedure("cleanup"), "[cleanup]");
    }
}
