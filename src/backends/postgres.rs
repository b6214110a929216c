//! PostgreSQL database backend implementation
//!
//! This module provides a PostgreSQL implementation of the Database trait
//! using tokio-postgres. Statements are prepared first so that parameters
//! can be converted to the column types the server expects.

use crate::core::{
    database::Database, database::TransactionPermit, database_types::DatabaseType,
    error::DatabaseError, error::Result, value::DatabaseResult, value::DatabaseRow,
    value::DatabaseValue,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

type Param = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL backend settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// libpq-style `key=value` connection string
    pub connection_string: String,
    /// Fail driver calls slower than this; `None` waits indefinitely
    pub operation_timeout_ms: Option<u64>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            operation_timeout_ms: Some(DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

/// PostgreSQL database implementation
pub struct PostgresDatabase {
    client: Arc<Mutex<Option<Client>>>,
    in_transaction: Arc<AtomicBool>,
    tx_gate: Arc<Mutex<()>>,
    config: PostgresConfig,
}

impl PostgresDatabase {
    /// Create a new PostgreSQL database instance
    pub fn new() -> Self {
        Self::with_config(PostgresConfig::default())
    }

    /// Create an instance with explicit settings
    pub fn with_config(config: PostgresConfig) -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(AtomicBool::new(false)),
            tx_gate: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Convert a tokio_postgres Row to a DatabaseRow
    fn row_to_database_row(row: &Row) -> DatabaseRow {
        let mut db_row = DatabaseRow::new();

        for (idx, column) in row.columns().iter().enumerate() {
            let column_name = column.name().to_string();
            let value = match column.type_().name() {
                "bool" => row
                    .try_get::<_, Option<bool>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::Bool),
                "int2" => row
                    .try_get::<_, Option<i16>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| DatabaseValue::Int(v.into())),
                "int4" => row
                    .try_get::<_, Option<i32>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::Int),
                "int8" => row
                    .try_get::<_, Option<i64>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::Long),
                "float4" => row
                    .try_get::<_, Option<f32>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::Float),
                "float8" => row
                    .try_get::<_, Option<f64>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::Double),
                "bytea" => row
                    .try_get::<_, Option<Vec<u8>>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::Bytes),
                // Text and anything else readable as text
                _ => row
                    .try_get::<_, Option<String>>(idx)
                    .ok()
                    .flatten()
                    .map(DatabaseValue::String),
            };
            db_row.insert(column_name, value.unwrap_or(DatabaseValue::Null));
        }

        db_row
    }

    /// Convert a value to a parameter of the type the statement expects
    fn value_to_param(value: &DatabaseValue, ty: &Type) -> Result<Param> {
        fn convert<T>(
            value: &DatabaseValue,
            ty: &Type,
            f: impl Fn(&DatabaseValue) -> Option<T>,
        ) -> Result<Option<T>> {
            if value.is_null() {
                return Ok(None);
            }
            f(value)
                .map(Some)
                .ok_or_else(|| DatabaseError::type_mismatch(ty.name(), value.type_name()))
        }

        let param: Param = match ty.name() {
            "bool" => Box::new(convert(value, ty, DatabaseValue::as_bool)?),
            "int2" => Box::new(convert(value, ty, |v| {
                v.as_long().and_then(|n| i16::try_from(n).ok())
            })?),
            "int4" => Box::new(convert(value, ty, |v| {
                v.as_long().and_then(|n| i32::try_from(n).ok())
            })?),
            "int8" => Box::new(convert(value, ty, DatabaseValue::as_long)?),
            "float4" => Box::new(convert(value, ty, |v| v.as_double().map(|n| n as f32))?),
            "float8" => Box::new(convert(value, ty, DatabaseValue::as_double)?),
            "bytea" => Box::new(convert(value, ty, |v| v.as_bytes().map(<[u8]>::to_vec))?),
            _ => Box::new(convert(value, ty, |v| Some(v.as_string()))?),
        };
        Ok(param)
    }

    /// Await `fut`, failing with `on_timeout` when it outlives the
    /// configured timeout
    async fn with_timeout<T>(
        &self,
        on_timeout: fn(u64) -> DatabaseError,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.operation_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| on_timeout(ms))?,
            None => fut.await,
        }
    }

    async fn run_query(&self, query: &str, params: &[DatabaseValue]) -> Result<Vec<Row>> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        self.with_timeout(DatabaseError::query_timeout, async {
            let stmt = client.prepare(query).await?;
            let params = Self::bind(params, stmt.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            Ok(client.query(&stmt, &refs).await?)
        })
        .await
    }

    async fn run_execute(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        self.with_timeout(DatabaseError::query_timeout, async {
            let stmt = client.prepare(query).await?;
            let params = Self::bind(params, stmt.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            Ok(client.execute(&stmt, &refs).await?)
        })
        .await
    }

    fn bind(values: &[DatabaseValue], types: &[Type]) -> Result<Vec<Param>> {
        if values.len() != types.len() {
            return Err(DatabaseError::validation(format!(
                "statement takes {} parameters, {} given",
                types.len(),
                values.len()
            )));
        }
        values
            .iter()
            .zip(types)
            .map(|(value, ty)| Self::value_to_param(value, ty))
            .collect()
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

        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        let result = self
            .with_timeout(DatabaseError::query_timeout, async {
                client
                    .batch_execute(sql)
                    .await
                    .map_err(|e| DatabaseError::transaction(e.to_string()))
            })
            .await;

        // A failed ROLLBACK leaves no transaction worth keeping open either
        if result.is_ok() || sql == "ROLLBACK" {
            self.in_transaction.store(!expect_open, Ordering::SeqCst);
        }
        result
    }
}

impl Default for PostgresDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        // Clean up any existing connection first
        {
            let mut client = self.client.lock().await;
            *client = None;
        }
        self.in_transaction.store(false, Ordering::SeqCst);

        let connection_string = if connection_string.is_empty() {
            self.config.connection_string.clone()
        } else {
            connection_string.to_string()
        };
        let client_arc = Arc::clone(&self.client);

        let connect_future = async move {
            let (client, connection) = tokio_postgres::connect(&connection_string, NoTls)
                .await
                .map_err(|e| DatabaseError::connection(e.to_string()))?;

            // Spawn the connection handler in the background
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "postgres connection closed with error");
                }
            });

            let mut client_guard = client_arc.lock().await;
            *client_guard = Some(client);

            Ok::<(), DatabaseError>(())
        };

        let timeout_ms = self
            .config
            .operation_timeout_ms
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS);
        tokio::time::timeout(Duration::from_millis(timeout_ms), connect_future)
            .await
            .map_err(|_| DatabaseError::connection_timeout(timeout_ms))??;

        tracing::debug!("postgres connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client
            .try_lock()
            .map(|client| client.as_ref().is_some_and(|c| !c.is_closed()))
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        let mut client = self.client.lock().await;
        *client = None;
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        self.run_execute(query, &[]).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        self.query_with_params(query, &[]).await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let rows = self.run_query(query, params).await?;
        Ok(rows.iter().map(Self::row_to_database_row).collect())
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        self.run_execute(query, params).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_control("BEGIN", false).await
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
        let client_arc = Arc::clone(&self.client);
        let in_transaction = Arc::clone(&self.in_transaction);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let client = client_arc.lock().await;
                    if let Some(client) = client.as_ref() {
                        if let Err(e) = client.batch_execute("ROLLBACK").await {
                            tracing::warn!(error = %e, "discarding postgres transaction failed");
                        }
                    }
                    in_transaction.store(false, Ordering::SeqCst);
                    drop(permit);
                });
            }
            Err(_) => {
                // Closing the session aborts the transaction on the server
                match self.client.try_lock() {
                    Ok(mut client) => {
                        *client = None;
                        self.in_transaction.store(false, Ordering::SeqCst);
                    }
                    Err(_) => tracing::warn!("no runtime to discard postgres transaction on"),
                }
            }
        }
    }
}
