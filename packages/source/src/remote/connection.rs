//! Shared connection to the remote spatial database.
//!
//! One [`ConnectionManager`] is created per run and shared by every remote
//! adapter. It opens lazily and reopens a connection that has gone stale.
//! A failed open is retried once, and a query that hits a connection
//! failure is retried once on a fresh connection.

use std::collections::BTreeMap;

use async_trait::async_trait;
use switchy_database::DatabaseValue;
use tokio::sync::Mutex;

use crate::RemoteError;

/// One result row with every requested column rendered as text.
pub type TextRow = BTreeMap<String, Option<String>>;

/// A live connection able to run parameterised queries.
#[async_trait]
pub trait SpatialConnection: Send + Sync {
    /// Whether the connection still answers.
    async fn is_open(&self) -> bool;

    /// Runs `sql` with `params` and reads `columns` from every row as text.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connection`] if the connection is unusable and
    /// [`RemoteError::Query`] for any other failure.
    async fn query_text(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        columns: &[&str],
    ) -> Result<Vec<TextRow>, RemoteError>;
}

/// Opens new connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RemoteError::Connection`] if the database cannot be reached.
    async fn connect(&self) -> Result<Box<dyn SpatialConnection>, RemoteError>;
}

/// Owns the run's single remote connection.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    connection: Mutex<Option<Box<dyn SpatialConnection>>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
        }
    }

    /// Runs a query, (re)opening the connection as needed.
    ///
    /// A query that fails with a connection error is retried once on a new
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the connection cannot be (re)opened or the
    /// query fails.
    pub async fn query_text(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        columns: &[&str],
    ) -> Result<Vec<TextRow>, RemoteError> {
        let mut slot = self.connection.lock().await;

        let reuse = match slot.as_ref() {
            Some(connection) => connection.is_open().await,
            None => false,
        };
        if !reuse {
            if slot.is_some() {
                log::warn!("Remote connection is closed, reconnecting");
            }
            *slot = Some(self.open().await?);
        }

        let Some(connection) = slot.as_ref() else {
            return Err(RemoteError::Connection {
                message: "no connection".to_string(),
            });
        };

        match connection.query_text(sql, params, columns).await {
            Err(e) if e.is_connection() => {
                log::warn!("Remote connection lost ({e}), retrying once");
                *slot = None;
                let fresh = self.open().await?;
                let result = fresh.query_text(sql, params, columns).await;
                *slot = Some(fresh);
                result
            }
            other => other,
        }
    }

    async fn open(&self) -> Result<Box<dyn SpatialConnection>, RemoteError> {
        match self.connector.connect().await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                log::warn!("Could not open remote connection ({e}), retrying once");
                self.connector.connect().await
            }
        }
    }

    /// Drops the current connection, if any.
    pub async fn close(&self) {
        self.connection.lock().await.take();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted connections for exercising remote adapters without a
    //! database.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Answers queries by matching a substring of the SQL.
    pub struct ScriptedConnection {
        pub responses: Vec<(&'static str, Result<Vec<TextRow>, &'static str>)>,
        pub open: bool,
        pub queries: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SpatialConnection for ScriptedConnection {
        async fn is_open(&self) -> bool {
            self.open
        }

        async fn query_text(
            &self,
            sql: &str,
            _params: &[DatabaseValue],
            _columns: &[&str],
        ) -> Result<Vec<TextRow>, RemoteError> {
            self.queries.lock().await.push(sql.to_string());
            for (needle, response) in &self.responses {
                if sql.contains(needle) {
                    return match response {
                        Ok(rows) => Ok(rows.clone()),
                        Err(message) if *message == "connection" => Err(RemoteError::Connection {
                            message: "server closed the connection".to_string(),
                        }),
                        Err(message) => Err(RemoteError::Query {
                            message: (*message).to_string(),
                        }),
                    };
                }
            }
            Ok(Vec::new())
        }
    }

    /// Hands out scripted connections, one script per `connect` call; the
    /// last script is reused once the list runs out.
    ///
    /// The first `refusals` calls to `connect` fail. With `stale` set, every
    /// connection reports itself closed when checked.
    pub struct ScriptedConnector {
        pub scripts: Vec<Vec<(&'static str, Result<Vec<TextRow>, &'static str>)>>,
        pub attempts: Arc<AtomicUsize>,
        pub connects: Arc<AtomicUsize>,
        pub queries: Arc<Mutex<Vec<String>>>,
        pub refusals: usize,
        pub stale: bool,
    }

    impl ScriptedConnector {
        pub fn new(scripts: Vec<Vec<(&'static str, Result<Vec<TextRow>, &'static str>)>>) -> Self {
            Self {
                scripts,
                attempts: Arc::new(AtomicUsize::new(0)),
                connects: Arc::new(AtomicUsize::new(0)),
                queries: Arc::new(Mutex::new(Vec::new())),
                refusals: 0,
                stale: false,
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn SpatialConnection>, RemoteError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.refusals {
                return Err(RemoteError::Connection {
                    message: "connection refused".to_string(),
                });
            }
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            let responses = self
                .scripts
                .get(n)
                .or_else(|| self.scripts.last())
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(ScriptedConnection {
                responses,
                open: !self.stale,
                queries: self.queries.clone(),
            }))
        }
    }

    pub fn row(pairs: &[(&str, Option<&str>)]) -> TextRow {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.map(str::to_string)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{ScriptedConnector, row};
    use super::*;

    #[tokio::test]
    async fn opens_lazily_and_reuses_the_connection() {
        let connector = ScriptedConnector::new(vec![vec![(
            "SELECT 1",
            Ok(vec![row(&[("one", Some("1"))])]),
        )]]);
        let connects = connector.connects.clone();
        let manager = ConnectionManager::new(Box::new(connector));
        assert_eq!(connects.load(Ordering::SeqCst), 0);

        let rows = manager.query_text("SELECT 1 AS one", &[], &["one"]).await.unwrap();
        assert_eq!(rows[0]["one"].as_deref(), Some("1"));
        manager.query_text("SELECT 1 AS one", &[], &["one"]).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_errors_are_retried_once_on_a_new_connection() {
        let connector = ScriptedConnector::new(vec![
            vec![("SELECT", Err("connection"))],
            vec![("SELECT", Ok(vec![row(&[("n", Some("2"))])]))],
        ]);
        let connects = connector.connects.clone();
        let manager = ConnectionManager::new(Box::new(connector));

        let rows = manager.query_text("SELECT 2 AS n", &[], &["n"]).await.unwrap();
        assert_eq!(rows[0]["n"].as_deref(), Some("2"));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_errors_are_not_retried() {
        let connector = ScriptedConnector::new(vec![vec![("SELECT", Err("syntax error"))]]);
        let manager = ConnectionManager::new(Box::new(connector));

        let result = manager.query_text("SELECT nonsense", &[], &[]).await;
        assert!(matches!(result, Err(RemoteError::Query { .. })));
    }

    #[tokio::test]
    async fn a_failed_open_is_retried_once() {
        let mut connector = ScriptedConnector::new(vec![vec![(
            "SELECT",
            Ok(vec![row(&[("n", Some("1"))])]),
        )]]);
        connector.refusals = 1;
        let attempts = connector.attempts.clone();
        let manager = ConnectionManager::new(Box::new(connector));

        let rows = manager.query_text("SELECT 1 AS n", &[], &["n"]).await.unwrap();
        assert_eq!(rows[0]["n"].as_deref(), Some("1"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_failed_opens_surface_as_connection_error() {
        let mut connector = ScriptedConnector::new(vec![]);
        connector.refusals = usize::MAX;
        let attempts = connector.attempts.clone();
        let manager = ConnectionManager::new(Box::new(connector));

        let result = manager.query_text("SELECT 1", &[], &[]).await;
        assert!(result.is_err_and(|e| e.is_connection()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_connection_found_closed_is_reopened() {
        let mut connector = ScriptedConnector::new(vec![vec![(
            "SELECT",
            Ok(vec![row(&[("n", Some("1"))])]),
        )]]);
        connector.stale = true;
        let connects = connector.connects.clone();
        let manager = ConnectionManager::new(Box::new(connector));

        manager.query_text("SELECT 1 AS n", &[], &["n"]).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        let rows = manager.query_text("SELECT 1 AS n", &[], &["n"]).await.unwrap();
        assert_eq!(rows[0]["n"].as_deref(), Some("1"));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_second_connection_failure_is_returned() {
        let connector = ScriptedConnector::new(vec![vec![("SELECT", Err("connection"))]]);
        let manager = ConnectionManager::new(Box::new(connector));

        let result = manager.query_text("SELECT 1", &[], &[]).await;
        assert!(result.is_err_and(|e| e.is_connection()));
    }
}
