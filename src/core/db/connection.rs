/// Connection Management Module
///
/// Owns the one session of a `DbHandle`: opens it under a bounded retry
/// policy, hands it out for each statement, discards it after transport
/// failures and closes it exactly once on drop.

use super::dialect::Dialect;
use super::session::{Connector, Session};
use crate::config::RetryConfig;
use crate::core::{EtlDbError, Result};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often and how patiently to try connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further attempt
    pub initial_backoff: Duration,
    /// Upper bound for a single delay
    pub max_backoff: Option<Duration>,
}

impl RetryPolicy {
    /// `max_attempts` attempts back to back.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: None,
        }
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        let delay = self.initial_backoff.saturating_mul(factor);
        match self.max_backoff {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::immediate(10)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: config.max_backoff_ms.map(Duration::from_millis),
        }
    }
}

/// Connection manager for one database target
pub struct ConnectionManager<C: Connector> {
    connector: C,
    host: String,
    database: String,
    retry: RetryPolicy,
    /// Live session (None if disconnected)
    session: Option<C::Session>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a disconnected manager.
    pub fn new(
        connector: C,
        host: impl Into<String>,
        database: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        ConnectionManager {
            connector,
            host: host.into(),
            database: database.into(),
            retry,
            session: None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.connector.dialect()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Makes sure a live session exists.
    ///
    /// Tries up to `max_attempts` times, waiting out the policy's backoff
    /// between attempts, and stops at the first success. Database-level and
    /// transport-level failures are logged apart but retried alike. Returns
    /// `false` once every attempt has failed; the manager stays disconnected.
    pub fn ensure_connected(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }

        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnecting");
                thread::sleep(delay);
            }

            match self.open_session() {
                Ok(session) => {
                    info!(
                        host = %self.host,
                        database = %self.database,
                        attempt,
                        "Connected"
                    );
                    self.session = Some(session);
                    return true;
                }
                Err(err @ EtlDbError::Database { .. }) => {
                    warn!(attempt, "Trying to connect ({}. time): database error: {}", attempt, err);
                }
                Err(err) => {
                    warn!(attempt, "Trying to connect ({}. time): driver error: {}", attempt, err);
                }
            }
        }

        error!(
            host = %self.host,
            database = %self.database,
            attempts,
            "Giving up on connecting"
        );
        false
    }

    fn open_session(&self) -> Result<C::Session> {
        let mut session = self.connector.connect(&self.host, &self.database)?;
        session.set_autocommit(true)?;
        Ok(session)
    }

    /// Live session, connecting first if needed.
    pub fn session(&mut self) -> Result<&mut C::Session> {
        if !self.ensure_connected() {
            return Err(self.not_connected());
        }
        let attempts = self.retry.max_attempts.max(1);
        let ConnectionManager {
            session,
            host,
            database,
            ..
        } = self;
        session.as_mut().ok_or_else(|| EtlDbError::NotConnected {
            host: host.clone(),
            database: database.clone(),
            attempts,
        })
    }

    /// Runs `f` on the live session.
    ///
    /// A transport failure drops the session so the next call reconnects;
    /// the failed statement is not retried.
    pub fn with_session<T>(&mut self, f: impl FnOnce(&mut C::Session) -> Result<T>) -> Result<T> {
        let result = f(self.session()?);
        if let Err(err) = &result {
            if err.is_transport() {
                warn!("Discarding connection after transport failure: {}", err);
                self.session = None;
            }
        }
        result
    }

    /// Closes the live session, if any.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            debug!(host = %self.host, database = %self.database, "Closing connection");
            session.close()?;
        }
        Ok(())
    }

    fn not_connected(&self) -> EtlDbError {
        EtlDbError::NotConnected {
            host: self.host.clone(),
            database: self.database.clone(),
            attempts: self.retry.max_attempts.max(1),
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            warn!("Failed to close connection: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedConnector;

    fn manager(connector: ScriptedConnector, attempts: u32) -> ConnectionManager<ScriptedConnector> {
        ConnectionManager::new(connector, "sql01", "sales", RetryPolicy::immediate(attempts))
    }

    #[test]
    fn test_first_attempt_succeeds() {
        let connector = ScriptedConnector::new();
        let mut conn_mgr = manager(connector.clone(), 10);

        assert!(!conn_mgr.is_connected());
        assert!(conn_mgr.ensure_connected());
        assert!(conn_mgr.is_connected());
        assert_eq!(connector.attempts(), 1);

        // Already connected: no new attempt
        assert!(conn_mgr.ensure_connected());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.autocommit_calls(), vec![true]);
    }

    #[test]
    fn test_unreachable_target_exhausts_retries() {
        let connector = ScriptedConnector::unreachable();
        let mut conn_mgr = manager(connector.clone(), 10);

        assert!(!conn_mgr.ensure_connected());
        assert_eq!(connector.attempts(), 10);
        assert!(!conn_mgr.is_connected());

        match conn_mgr.with_session(|_| Ok(())) {
            Err(EtlDbError::NotConnected { attempts, .. }) => assert_eq!(attempts, 10),
            other => panic!("Expected NotConnected, got {:?}", other.map(|_| ())),
        }
        assert!(connector.statements().is_empty());
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let connector = ScriptedConnector::failing_first(3);
        let mut conn_mgr = manager(connector.clone(), 10);

        assert!(conn_mgr.ensure_connected());
        assert_eq!(connector.attempts(), 4);
    }

    #[test]
    fn test_transport_failure_discards_session() {
        let connector = ScriptedConnector::new();
        connector.respond("SELECT 1", Err(EtlDbError::Transport("reset".to_string())));
        let mut conn_mgr = manager(connector.clone(), 10);

        let result = conn_mgr.with_session(|s| s.execute("SELECT 1"));
        assert!(result.is_err());
        assert!(!conn_mgr.is_connected());

        // The next statement reconnects
        conn_mgr.with_session(|s| s.execute("SELECT 2")).unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[test]
    fn test_close_exactly_once() {
        let connector = ScriptedConnector::new();
        {
            let mut conn_mgr = manager(connector.clone(), 10);
            assert!(conn_mgr.ensure_connected());
            conn_mgr.disconnect().unwrap();
            // Disconnecting a closed manager is a no-op
            conn_mgr.disconnect().unwrap();
        }
        assert_eq!(connector.closed(), 1);

        {
            let mut conn_mgr = manager(connector.clone(), 10);
            assert!(conn_mgr.ensure_connected());
        }
        assert_eq!(connector.closed(), 2);

        {
            let _never_connected = manager(connector.clone(), 10);
        }
        assert_eq!(connector.closed(), 2);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Some(Duration::from_millis(300)),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(300));
        assert_eq!(RetryPolicy::default().delay_before(7), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 3,
            backoff_ms: 50,
            max_backoff_ms: None,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
    }
}
