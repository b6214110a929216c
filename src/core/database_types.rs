//! Database type definitions
//!
//! This module defines the SQL dialects the mapping layer can target and the
//! dialect-specific pieces of syntax: placeholders, row-locking clauses and
//! `RETURNING` support.

use super::query_builder::LockStrength;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum DatabaseType {
    /// SQLite database
    #[default]
    Sqlite = 1,
    /// PostgreSQL database
    Postgres = 2,
}

impl DatabaseType {
    /// Convert database type to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Postgres => "postgres",
        }
    }

    /// Placeholder for the `index`-th (1-based) bound parameter
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DatabaseType::Sqlite => "?".to_string(),
            DatabaseType::Postgres => format!("${}", index),
        }
    }

    /// Rewrite `?` placeholders into this dialect's form.
    ///
    /// Question marks inside single-quoted literals and double-quoted
    /// identifiers are left alone.
    pub fn render_placeholders(&self, sql: &str) -> String {
        if *self == DatabaseType::Sqlite {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0;
        let mut quote: Option<char> = None;
        for ch in sql.chars() {
            match (quote, ch) {
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), c) => out.push(c),
                (None, '\'') | (None, '"') => {
                    quote = Some(ch);
                    out.push(ch);
                }
                (None, '?') => {
                    index += 1;
                    out.push_str(&self.placeholder(index));
                }
                (None, c) => out.push(c),
            }
        }
        out
    }

    /// Row-locking clause appended to a SELECT, if the dialect has one.
    ///
    /// SQLite locks the whole database for writers and has no row-level
    /// clause, so nothing is rendered there.
    pub fn lock_clause(&self, strength: LockStrength) -> Option<&'static str> {
        match (self, strength) {
            (DatabaseType::Sqlite, _) => None,
            (DatabaseType::Postgres, LockStrength::Update) => Some("FOR UPDATE"),
            (DatabaseType::Postgres, LockStrength::Share) => Some("FOR SHARE"),
        }
    }

    /// Whether `INSERT ... RETURNING` is available
    pub fn supports_returning(&self) -> bool {
        matches!(self, DatabaseType::Sqlite | DatabaseType::Postgres)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_str() {
        assert_eq!(
            "postgresql".parse::<DatabaseType>().ok(),
            Some(DatabaseType::Postgres)
        );
        assert_eq!(
            "sqlite3".parse::<DatabaseType>().ok(),
            Some(DatabaseType::Sqlite)
        );
        assert_eq!("mongodb".parse::<DatabaseType>().ok(), None);
    }

    #[test]
    fn test_postgres_placeholders_are_numbered() {
        let sql = "SELECT * FROM users WHERE id = ? AND name = '?' AND age > ?";
        assert_eq!(
            DatabaseType::Postgres.render_placeholders(sql),
            "SELECT * FROM users WHERE id = $1 AND name = '?' AND age > $2"
        );
        assert_eq!(DatabaseType::Sqlite.render_placeholders(sql), sql);
    }

    #[test]
    fn test_lock_clause() {
        assert_eq!(DatabaseType::Sqlite.lock_clause(LockStrength::Update), None);
        assert_eq!(
            DatabaseType::Postgres.lock_clause(LockStrength::Update),
            Some("FOR UPDATE")
        );
        assert_eq!(
            DatabaseType::Postgres.lock_clause(LockStrength::Share),
            Some("FOR SHARE")
        );
    }
}
