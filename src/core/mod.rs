//! Core data-mapping types and traits
//!
//! This module provides the building blocks of the mapper: values and
//! errors, the driver seam, statement builders, schemas and row mapping,
//! sessions with their transactions, and associations.

pub mod association;
pub mod condition;
pub mod database;
pub mod database_types;
pub mod error;
pub mod mapper;
pub mod query;
pub mod query_builder;
pub mod relation;
pub mod schema;
pub mod session;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use association::Association;
pub use condition::{Arg, CondValue, Condition, ConditionMap, Connector, WhereClause};
pub use database::{ConnectionBuilder, Database, DatabaseObject, TransactionPermit};
pub use database_types::DatabaseType;
pub use error::{DatabaseError, Result};
pub use mapper::{scan_model_row, scan_row};
pub use query::{Changes, Query};
pub use query_builder::{
    DeleteBuilder, InsertBuilder, JoinClause, JoinType, LockStrength, OnConflict, SelectBuilder,
    Statement, UpdateBuilder,
};
pub use relation::{
    Cascade, Join, JoinStage, JoinTable, Preload, PreloadStage, Relation, RelationKind,
};
pub use schema::{FieldInfo, Model, Schema, SchemaBuilder};
pub use session::{RawQuery, Session, SessionConfig};
pub use transaction::{Transaction, TransactionStatus};
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue};
