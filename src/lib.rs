//! # Rust Data Mapper
//!
//! A relational data-mapping layer: typed records mapped onto tables, a
//! chainable query builder, unit-of-work transactions, and association
//! loading (belongs-to, has-one, has-many, many-to-many) by preload or join.
//!
//! ## Features
//!
//! - **Explicit sessions**: every operation goes through a [`Session`]
//!   built from a connected backend; there is no global connection
//! - **Parameterized SQL**: values are always bound, `?` placeholders are
//!   rewritten for the target dialect
//! - **Typed mapping**: rows decode into any `serde` type, records map
//!   through a [`Schema`]
//! - **Transactions**: closure-scoped units of work with rollback on error
//!   or panic, plus manual begin/commit/rollback guards
//! - **Associations**: preload with filters and nested stages, join-based
//!   loading, association mode (append, replace, delete, clear)
//! - **Upsert and soft delete**: conflict policies on insert, default
//!   scoping of soft-deleted rows
//!
//! ## Supported Databases
//!
//! | Database | Feature | Notes |
//! |----------|---------|-------|
//! | SQLite | `sqlite` (default) | bundled, in-memory databases for tests |
//! | PostgreSQL | `postgres` | `$n` placeholders, row locks |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_data_mapper::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct Sample {
//!     id: String,
//!     name: String,
//! }
//!
//! impl Model for Sample {
//!     fn schema() -> &'static Schema {
//!         static SCHEMA: OnceLock<Schema> = OnceLock::new();
//!         SCHEMA.get_or_init(|| Schema::builder("sample").field("id").field("name").build())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = ConnectionBuilder::new(DatabaseType::Sqlite).connect().await?;
//!     session
//!         .exec("CREATE TABLE sample (id TEXT PRIMARY KEY, name TEXT)", args![])
//!         .await?;
//!
//!     session
//!         .create(&mut Sample { id: "1".into(), name: "Brian".into() })
//!         .await?;
//!
//!     let sample = session.query::<Sample>().where_eq("id", "1").first().await?;
//!     println!("{}", sample.name);
//!     Ok(())
//! }
//! ```
//!
//! ### Working with Transactions
//!
//! ```rust,ignore
//! session.transaction(|tx| async move {
//!     tx.create(&mut sample_1).await?;
//!     tx.create(&mut sample_2).await?;
//!     Ok(())
//! }).await?;
//! ```

/// Core data-mapping types and traits
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_data_mapper::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let session = ConnectionBuilder::new(DatabaseType::Sqlite).connect().await?;
///     assert!(!session.in_transaction());
///     Ok(())
/// }
/// ```
pub mod prelude {
    pub use crate::args;
    pub use crate::core::{
        Changes, Condition, ConditionMap, ConnectionBuilder, Database, DatabaseError,
        DatabaseObject, DatabaseResult, DatabaseRow, DatabaseType, DatabaseValue, JoinTable,
        Model, OnConflict, Query, Relation, Result, Schema, Session, SessionConfig, Transaction,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::SqliteDatabase;

    #[cfg(feature = "postgres")]
    pub use crate::backends::PostgresDatabase;
}

// Re-export at root level for convenience
pub use core::{
    Changes, Condition, ConditionMap, ConnectionBuilder, Database, DatabaseError,
    DatabaseObject, DatabaseResult, DatabaseRow, DatabaseType, DatabaseValue, JoinTable, Model,
    OnConflict, Query, Relation, Result, Schema, Session, SessionConfig, Transaction,
};

#[cfg(feature = "sqlite")]
pub use backends::SqliteDatabase;

#[cfg(feature = "postgres")]
pub use backends::PostgresDatabase;
