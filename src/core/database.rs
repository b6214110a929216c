//! Database trait and connection management
//!
//! This module defines the driver seam every backend implements, plus the
//! [`ConnectionBuilder`] that turns connection settings into a ready
//! [`Session`].

use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use super::session::{Session, SessionConfig};
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hold on a backend's transaction gate, kept for the lifetime of one
/// transaction
pub type TransactionPermit = OwnedMutexGuard<()>;

/// Core database trait that all database backends must implement
///
/// A backend object owns exactly one connection. Statements are serialized
/// on that connection, so a transaction begun on it covers every statement
/// issued through the same object until commit or rollback. Sessions hold
/// the backend's [`transaction_gate`](Database::transaction_gate) for the
/// whole transaction and make statements from outside it wait on the gate.
#[async_trait]
pub trait Database: Send + Sync {
    /// Get the database type
    fn database_type(&self) -> DatabaseType;

    /// Connect to the database with the given connection string
    async fn connect(&self, connection_string: &str) -> Result<()>;

    /// Check if connected to the database
    fn is_connected(&self) -> bool;

    /// Disconnect from the database
    async fn disconnect(&self) -> Result<()>;

    /// Execute SQL without parameters (DDL, PRAGMA, ...)
    ///
    /// # Security Warning
    ///
    /// **SQL Injection Risk**: the text is executed as-is. Use
    /// `execute_with_params()` for anything carrying user input.
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Execute a SELECT without parameters and return results
    async fn query(&self, query: &str) -> Result<DatabaseResult>;

    /// Execute a query with parameters (prepared statement)
    ///
    /// The SQL uses the backend's native placeholder syntax
    /// (see [`DatabaseType::render_placeholders`]).
    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult>;

    /// Execute a statement with parameters and return the affected row count
    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Begin a transaction
    ///
    /// Fails with `TransactionError` when one is already active on this
    /// connection.
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if currently in a transaction
    fn in_transaction(&self) -> bool;

    /// Gate held from begin until the end of a transaction
    fn transaction_gate(&self) -> Arc<Mutex<()>>;

    /// Best-effort synchronous rollback, used when a transaction guard is
    /// dropped without commit or rollback. Must not block on the runtime.
    ///
    /// `permit` is released only after the ROLLBACK has run, so nothing else
    /// reaches the connection while the abandoned transaction is still open.
    fn discard_transaction(&self, permit: Option<TransactionPermit>);
}

/// Object-safe version of the Database trait
///
/// Sessions hold their backend as `Arc<dyn DatabaseObject>`, so a session
/// type does not depend on the backend it runs on.
///
/// # Example
/// ```ignore
/// let db: Arc<dyn DatabaseObject> = Arc::new(SqliteDatabase::new());
/// let session = Session::new(db);
/// ```
#[async_trait]
pub trait DatabaseObject: Send + Sync {
    /// Get the database type
    fn database_type(&self) -> DatabaseType;

    /// Connect to the database with the given connection string
    async fn connect(&self, connection_string: &str) -> Result<()>;

    /// Check if connected to the database
    fn is_connected(&self) -> bool;

    /// Disconnect from the database
    async fn disconnect(&self) -> Result<()>;

    /// Execute SQL without parameters
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Execute a SELECT without parameters and return results
    async fn query(&self, query: &str) -> Result<DatabaseResult>;

    /// Execute a query with parameters (prepared statement)
    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult>;

    /// Execute a statement with parameters
    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if currently in a transaction
    fn in_transaction(&self) -> bool;

    /// Gate held from begin until the end of a transaction
    fn transaction_gate(&self) -> Arc<Mutex<()>>;

    /// Best-effort synchronous rollback; `permit` is released after it ran
    fn discard_transaction(&self, permit: Option<TransactionPermit>);
}

/// Blanket implementation of DatabaseObject for all types implementing Database
#[async_trait]
impl<T: Database> DatabaseObject for T {
    fn database_type(&self) -> DatabaseType {
        Database::database_type(self)
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        Database::connect(self, connection_string).await
    }

    fn is_connected(&self) -> bool {
        Database::is_connected(self)
    }

    async fn disconnect(&self) -> Result<()> {
        Database::disconnect(self).await
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        Database::execute(self, query).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        Database::query(self, query).await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        Database::query_with_params(self, query, params).await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        Database::execute_with_params(self, query, params).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        Database::begin_transaction(self).await
    }

    async fn commit(&self) -> Result<()> {
        Database::commit(self).await
    }

    async fn rollback(&self) -> Result<()> {
        Database::rollback(self).await
    }

    fn in_transaction(&self) -> bool {
        Database::in_transaction(self)
    }

    fn transaction_gate(&self) -> Arc<Mutex<()>> {
        Database::transaction_gate(self)
    }

    fn discard_transaction(&self, permit: Option<TransactionPermit>) {
        Database::discard_transaction(self, permit)
    }
}

/// Database connection builder
pub struct ConnectionBuilder {
    db_type: DatabaseType,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    options: std::collections::BTreeMap<String, String>,
    operation_timeout: Option<Duration>,
    session: SessionConfig,
}

impl ConnectionBuilder {
    /// Create a new connection builder for the specified database type
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            options: std::collections::BTreeMap::new(),
            operation_timeout: None,
            session: SessionConfig::default(),
        }
    }

    /// Set the database host
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the database port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name (the file path for SQLite)
    pub fn database<S: Into<String>>(mut self, database: S) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username
    pub fn username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a custom option
    pub fn option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Fail driver calls that take longer than `timeout` (30 seconds by default)
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Session settings for the connected session
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Build the connection string
    pub fn build_connection_string(&self) -> String {
        match self.db_type {
            DatabaseType::Sqlite => self
                .database
                .clone()
                .unwrap_or_else(|| ":memory:".to_string()),
            DatabaseType::Postgres => {
                let mut parts = Vec::new();
                if let Some(host) = &self.host {
                    parts.push(format!("host={}", host));
                }
                if let Some(port) = self.port {
                    parts.push(format!("port={}", port));
                }
                if let Some(database) = &self.database {
                    parts.push(format!("dbname={}", database));
                }
                if let Some(username) = &self.username {
                    parts.push(format!("user={}", username));
                }
                if let Some(password) = &self.password {
                    parts.push(format!("password={}", password));
                }
                for (key, value) in &self.options {
                    parts.push(format!("{}={}", key, value));
                }
                parts.join(" ")
            }
        }
    }

    /// Connect a backend of the configured type and wrap it in a session
    pub async fn connect(self) -> Result<Session> {
        let connection_string = self.build_connection_string();
        let timeout_ms = self.operation_timeout.map(|t| t.as_millis() as u64);

        let db: Arc<dyn DatabaseObject> = match self.db_type {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => {
                let mut config = crate::backends::SqliteConfig {
                    path: connection_string.clone(),
                    ..Default::default()
                };
                if let Some(ms) = timeout_ms {
                    config.operation_timeout_ms = Some(ms);
                }
                Arc::new(crate::backends::SqliteDatabase::with_config(config))
            }
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                let mut config = crate::backends::PostgresConfig {
                    connection_string: connection_string.clone(),
                    ..Default::default()
                };
                if let Some(ms) = timeout_ms {
                    config.operation_timeout_ms = Some(ms);
                }
                Arc::new(crate::backends::PostgresDatabase::with_config(config))
            }
            #[allow(unreachable_patterns)]
            other => {
                return Err(DatabaseError::connection(format!(
                    "backend {} is not compiled in",
                    other
                )))
            }
        };

        db.connect(&connection_string).await?;
        Ok(Session::with_config(db, self.session))
    }
}
