//! `PostgreSQL`/`PostGIS` connections through `switchy_database`.

use async_trait::async_trait;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use switchy_database_connection::Credentials;

use super::connection::{Connector, SpatialConnection, TextRow};
use crate::RemoteError;

/// Opens native-TLS `PostgreSQL` connections from a database URL.
pub struct PostgisConnector {
    url: String,
}

impl PostgisConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for PostgisConnector {
    async fn connect(&self) -> Result<Box<dyn SpatialConnection>, RemoteError> {
        // Query parameters (sslmode etc.) are not understood by the
        // credentials parser; TLS is negotiated by the connector.
        let url_base = self.url.split('?').next().unwrap_or(&self.url);

        let creds = Credentials::from_url(url_base).map_err(|e| RemoteError::Connection {
            message: e.to_string(),
        })?;
        let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
            .await
            .map_err(|e| RemoteError::Connection {
                message: e.to_string(),
            })?;

        db.exec_raw("SET statement_timeout = '120s'")
            .await
            .map_err(|e| classify(&e))?;

        log::info!("Connected to remote spatial database");

        Ok(Box::new(PostgisConnection { db }))
    }
}

/// An open `PostgreSQL` connection.
pub struct PostgisConnection {
    db: Box<dyn Database>,
}

#[async_trait]
impl SpatialConnection for PostgisConnection {
    async fn is_open(&self) -> bool {
        self.db.exec_raw("SELECT 1").await.is_ok()
    }

    async fn query_text(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        columns: &[&str],
    ) -> Result<Vec<TextRow>, RemoteError> {
        let rows = self
            .db
            .query_raw_params(sql, params)
            .await
            .map_err(|e| classify(&e))?;

        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| {
                        let value: Option<String> =
                            row.to_value(*column).map_err(|e| RemoteError::Query {
                                message: format!("Failed to read column {column}: {e}"),
                            })?;
                        Ok(((*column).to_string(), value))
                    })
                    .collect::<Result<TextRow, RemoteError>>()
            })
            .collect()
    }
}

/// Sorts driver errors into connection failures (worth a reconnect) and
/// everything else.
fn classify(error: &impl std::fmt::Display) -> RemoteError {
    let message = error.to_string();
    if is_connection_message(&message) {
        RemoteError::Connection { message }
    } else {
        RemoteError::Query { message }
    }
}

fn is_connection_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["connection", "closed", "broken pipe", "timed out", "reset by peer"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lost_connections() {
        assert!(classify(&"connection closed by server").is_connection());
        assert!(classify(&"Broken pipe (os error 32)").is_connection());
        assert!(!classify(&"relation \"whse.parks\" does not exist").is_connection());
    }
}
