//! SQLite database backend implementation
//!
//! This module provides a SQLite implementation of the Database trait. The
//! connection lives behind an async mutex and every driver call runs on the
//! blocking thread pool.

use crate::core::{
    database::Database, database::TransactionPermit, database_types::DatabaseType,
    error::DatabaseError, error::Result, value::format_timestamp, value::DatabaseResult,
    value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Row};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// SQLite backend settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`
    pub path: String,
    /// Fail driver calls slower than this; `None` waits indefinitely
    pub operation_timeout_ms: Option<u64>,
    /// Run `PRAGMA foreign_keys = ON` after connecting
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            operation_timeout_ms: Some(DEFAULT_OPERATION_TIMEOUT_MS),
            foreign_keys: true,
        }
    }
}

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// SQLite database implementation
pub struct SqliteDatabase {
    connection: SharedConnection,
    in_transaction: Arc<AtomicBool>,
    tx_gate: Arc<Mutex<()>>,
    config: SqliteConfig,
}

impl SqliteDatabase {
    /// Create a new SQLite database instance
    pub fn new() -> Self {
        Self::with_config(SqliteConfig::default())
    }

    /// Create an instance with explicit settings
    pub fn with_config(config: SqliteConfig) -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(AtomicBool::new(false)),
            tx_gate: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Settings this instance was created with
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Convert a rusqlite Row to a DatabaseRow
    fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
        let mut db_row = DatabaseRow::new();
        let column_count = row.as_ref().column_count();

        for i in 0..column_count {
            let column_name = row.as_ref().column_name(i)?.to_string();
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => DatabaseValue::Null,
                rusqlite::types::ValueRef::Integer(v) => DatabaseValue::Long(v),
                rusqlite::types::ValueRef::Real(v) => DatabaseValue::Double(v),
                rusqlite::types::ValueRef::Text(v) => {
                    DatabaseValue::String(String::from_utf8_lossy(v).to_string())
                }
                rusqlite::types::ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
            };
            db_row.insert(column_name, value);
        }

        Ok(db_row)
    }

    /// Convert DatabaseValue to rusqlite parameter
    fn value_to_param(value: &DatabaseValue) -> Box<dyn rusqlite::ToSql> {
        match value {
            DatabaseValue::Null => Box::new(None::<i64>),
            DatabaseValue::Bool(v) => Box::new(*v),
            DatabaseValue::Int(v) => Box::new(*v),
            DatabaseValue::Long(v) => Box::new(*v),
            DatabaseValue::Float(v) => Box::new(*v),
            DatabaseValue::Double(v) => Box::new(*v),
            DatabaseValue::String(v) => Box::new(v.clone()),
            DatabaseValue::Bytes(v) => Box::new(v.clone()),
            // Timestamps are stored as RFC 3339 text
            DatabaseValue::Timestamp(v) => Box::new(
                chrono::DateTime::from_timestamp_micros(*v)
                    .map(|ts| format_timestamp(&ts))
                    .unwrap_or_else(|| v.to_string()),
            ),
        }
    }

    fn run_rows(conn: &Connection, query: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
            params.iter().map(Self::value_to_param).collect();

        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map(
            params_from_iter(rusqlite_params.iter()),
            Self::row_to_database_row,
        )?;

        let mut results = Vec::new();
        for row_result in rows {
            results.push(row_result?);
        }
        Ok(results)
    }

    /// Run `work` on the blocking thread pool with the connection locked,
    /// failing with `on_timeout` when it outlives the configured timeout
    async fn run_blocking<T, F>(&self, on_timeout: fn(u64) -> DatabaseError, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection_arc = Arc::clone(&self.connection);
        let mut task = tokio::task::spawn_blocking(move || -> Result<T> {
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
            work(conn)
        });

        let Some(timeout_ms) = self.config.operation_timeout_ms else {
            return task
                .await
                .map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?;
        };

        // Use select! to abort task on timeout, preventing resource leaks
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
            }
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                task.abort();
                Err(on_timeout(timeout_ms))
            }
        }
    }

    /// Run a transaction-control statement and update the flag on success
    async fn transaction_control(&self, sql: &'static str, expect_open: bool) -> Result<()> {
        if self.in_transaction.load(Ordering::SeqCst) != expect_open {
            return Err(DatabaseError::transaction(if expect_open {
                "Not in a transaction"
            } else {
                "Already in a transaction"
            }));
        }

        let result = self
            .run_blocking(DatabaseError::query_timeout, move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await;
        // A failed ROLLBACK leaves no transaction worth keeping open either
        if result.is_ok() || sql == "ROLLBACK" {
            self.in_transaction.store(!expect_open, Ordering::SeqCst);
        }
        result
    }

    /// ROLLBACK an abandoned transaction and clear the flag
    fn rollback_abandoned(conn: Option<&Connection>, in_transaction: &AtomicBool) {
        if let Some(conn) = conn {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "discarding sqlite transaction failed");
            }
        }
        in_transaction.store(false, Ordering::SeqCst);
    }
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        // Clean up any existing connection first
        {
            let mut connection = self.connection.lock().await;
            *connection = None;
        }
        self.in_transaction.store(false, Ordering::SeqCst);

        let path = if connection_string.is_empty() {
            self.config.path.clone()
        } else {
            connection_string.to_string()
        };
        let foreign_keys = self.config.foreign_keys;
        let connection_arc = Arc::clone(&self.connection);

        let mut task = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)?;
            if foreign_keys {
                conn.execute("PRAGMA foreign_keys = ON", [])?;
            }
            let mut connection = connection_arc.blocking_lock();
            *connection = Some(conn);
            Ok(())
        });

        let timeout_ms = self
            .config
            .operation_timeout_ms
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS);
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))??
            }
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                task.abort();
                return Err(DatabaseError::connection_timeout(timeout_ms));
            }
        }

        tracing::debug!(path = %connection_string, "sqlite connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection
            .try_lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        // Clear transaction flag to prevent stale state after reconnect
        self.in_transaction.store(false, Ordering::SeqCst);
        let mut connection = self.connection.lock().await;
        *connection = None;
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let query = query.to_string();
        self.run_blocking(DatabaseError::query_timeout, move |conn| {
            // Batches allow multi-statement DDL; the count is of the last statement
            conn.execute_batch(&query)?;
            Ok(conn.changes() as u64)
        })
        .await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        self.query_with_params(query, &[]).await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let query = query.to_string();
        let params = params.to_vec();
        self.run_blocking(DatabaseError::query_timeout, move |conn| {
            Self::run_rows(conn, &query, &params)
        })
        .await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let query = query.to_string();
        let params = params.to_vec();
        self.run_blocking(DatabaseError::query_timeout, move |conn| {
            let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(Self::value_to_param).collect();
            let mut stmt = conn.prepare(&query)?;
            let affected = stmt.execute(params_from_iter(rusqlite_params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_control("BEGIN TRANSACTION", false).await
    }

    async fn commit(&self) -> Result<()> {
        self.transaction_control("COMMIT", true).await
    }

    async fn rollback(&self) -> Result<()> {
        self.transaction_control("ROLLBACK", true).await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    fn transaction_gate(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.tx_gate)
    }

    fn discard_transaction(&self, permit: Option<TransactionPermit>) {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return;
        }
        // Fast path: nothing else holds the connection
        if let Ok(connection) = self.connection.try_lock() {
            Self::rollback_abandoned(connection.as_ref(), &self.in_transaction);
            drop(permit);
            return;
        }

        let connection_arc = Arc::clone(&self.connection);
        let in_transaction = Arc::clone(&self.in_transaction);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let connection = connection_arc.blocking_lock();
                    Self::rollback_abandoned(connection.as_ref(), &in_transaction);
                    drop(permit);
                });
            }
            // The flag stays set: the transaction is still open on the connection
            Err(_) => tracing::warn!("no runtime to discard sqlite transaction on"),
        }
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        // Best-effort cleanup since Drop cannot be async
        self.discard_transaction(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_connect() {
        let db = SqliteDatabase::new();
        assert!(db.connect(":memory:").await.is_ok());
        assert!(db.is_connected());
        assert!(db.disconnect().await.is_ok());
        assert!(!db.is_connected());
    }

    #[tokio::test]
    async fn test_sqlite_not_connected() {
        let db = SqliteDatabase::new();
        let err = db.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_sqlite_execute_and_query() -> Result<()> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;

        db.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
            .await?;
        let affected = db
            .execute_with_params(
                "INSERT INTO test (name, score) VALUES (?, ?), (?, ?)",
                &["Alice".into(), 1.5.into(), "Bob".into(), DatabaseValue::Null],
            )
            .await?;
        assert_eq!(affected, 2);

        let results = db
            .query_with_params("SELECT * FROM test WHERE name = ?", &["Bob".into()])
            .await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("score"), Some(&DatabaseValue::Null));
        assert_eq!(results[0].get("id"), Some(&DatabaseValue::Long(2)));
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_transaction_flags() -> Result<()> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;
        db.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;

        db.begin_transaction().await?;
        assert!(db.in_transaction());
        assert!(matches!(
            db.begin_transaction().await,
            Err(DatabaseError::TransactionError(_))
        ));
        db.execute("INSERT INTO test (name) VALUES ('Alice')").await?;
        db.commit().await?;
        assert!(!db.in_transaction());

        db.begin_transaction().await?;
        db.execute("INSERT INTO test (name) VALUES ('Bob')").await?;
        db.discard_transaction(None);
        assert!(!db.in_transaction());

        let results = db.query("SELECT * FROM test").await?;
        assert_eq!(results.len(), 1);
        assert!(db.rollback().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_discard_keeps_gate_until_rolled_back() -> Result<()> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;
        db.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;

        let permit = db.transaction_gate().lock_owned().await;
        db.begin_transaction().await?;
        db.execute("INSERT INTO test (name) VALUES ('Abandoned')").await?;

        // A busy connection pushes the ROLLBACK onto the blocking pool
        let busy = db.connection.lock().await;
        db.discard_transaction(Some(permit));
        assert!(db.in_transaction());
        assert!(db.transaction_gate().try_lock().is_err());
        drop(busy);

        let _next = db.transaction_gate().lock_owned().await;
        assert!(!db.in_transaction());
        db.begin_transaction().await?;
        db.execute("INSERT INTO test (name) VALUES ('Kept')").await?;
        db.commit().await?;

        let results = db.query("SELECT name FROM test").await?;
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].get("name"),
            Some(&DatabaseValue::String("Kept".into()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_timestamp_binds_as_text() -> Result<()> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;
        db.execute("CREATE TABLE t (at TEXT)").await?;
        db.execute_with_params("INSERT INTO t (at) VALUES (?)", &[DatabaseValue::Timestamp(0)])
            .await?;
        let rows = db.query("SELECT at FROM t").await?;
        assert_eq!(
            rows[0].get("at"),
            Some(&DatabaseValue::String("1970-01-01T00:00:00.000000Z".into()))
        );
        Ok(())
    }
}
