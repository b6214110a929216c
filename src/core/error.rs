//! Error types for the data-mapping layer
//!
//! Every data-access call returns its outcome as a [`Result`]; nothing is
//! retried behind the caller's back.

use std::fmt::Display;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Zero rows where exactly one was required
    #[error("Record not found in {table}")]
    NotFound { table: String },

    /// Unique or foreign-key conflict not covered by an upsert policy
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Connection error (transport or driver failure)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Malformed query specification
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation attempted on a transaction that is no longer open
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Transaction state error reported by a driver
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A row could not be mapped onto the destination type, or a record
    /// could not be turned into column values
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Invalid connection string
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(rusqlite::Error),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    PostgresError(tokio_postgres::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a not-found error for the given table
    pub fn not_found(table: impl Into<String>) -> Self {
        DatabaseError::NotFound {
            table: table.into(),
        }
    }

    /// Create a constraint violation error
    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConstraintViolation(msg.into())
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Validation(msg.into())
    }

    /// Create a transaction-aborted error
    pub fn aborted<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionAborted(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a mapping error
    pub fn mapping<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Mapping(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// True for [`DatabaseError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    /// True for [`DatabaseError::ConstraintViolation`]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DatabaseError::ConstraintViolation(_))
    }
}

impl serde::de::Error for DatabaseError {
    fn custom<T: Display>(msg: T) -> Self {
        DatabaseError::Mapping(msg.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Mapping(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(
                    message.clone().unwrap_or_else(|| failure.to_string()),
                )
            }
            _ => DatabaseError::SqliteError(err),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        // SQLSTATE class 23 is "integrity constraint violation"
        match err.code() {
            Some(state) if state.code().starts_with("23") => {
                DatabaseError::ConstraintViolation(err.to_string())
            }
            _ if err.is_closed() => DatabaseError::ConnectionError(err.to_string()),
            _ => DatabaseError::PostgresError(err),
        }
    }
}
