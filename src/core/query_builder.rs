//! SQL statement builders
//!
//! Provides a fluent API for building parameterized SQL statements. Every
//! builder renders to a [`Statement`] for a target [`DatabaseType`]; values
//! are always bound as parameters.

use super::condition::{Condition, Connector, WhereClause};
use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;

/// Rendered SQL text plus parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

impl Statement {
    /// Create a statement from already-rendered parts
    pub fn new(sql: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// JOIN types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
}

impl JoinType {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// Row-lock strength for `SELECT ... FOR UPDATE | FOR SHARE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    /// Exclusive row lock
    Update,
    /// Shared row lock
    Share,
}

/// Conflict policy for an insert that hits an existing primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnConflict {
    /// Update every non-key, non-create-only column from the new row
    UpdateAll,
    /// Update only the listed columns
    UpdateColumns(Vec<String>),
    /// Keep the existing row untouched
    DoNothing,
}

impl OnConflict {
    /// `ON CONFLICT (pk) DO UPDATE SET` every updatable column
    pub fn update_all() -> Self {
        OnConflict::UpdateAll
    }

    /// `ON CONFLICT (pk) DO UPDATE SET` the given columns
    pub fn update_columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        OnConflict::UpdateColumns(columns.into_iter().map(Into::into).collect())
    }

    /// `ON CONFLICT DO NOTHING`
    pub fn do_nothing() -> Self {
        OnConflict::DoNothing
    }
}

/// JOIN clause
#[derive(Debug, Clone)]
pub struct JoinClause {
    join_type: JoinType,
    table: String,
    alias: Option<String>,
    on: Condition,
}

impl JoinClause {
    /// Join `table`, optionally under `alias`, on the given condition.
    ///
    /// Bare column names in structured `on` conditions are qualified with the
    /// alias (or the table name).
    pub fn new(
        join_type: JoinType,
        table: impl Into<String>,
        alias: Option<String>,
        on: Condition,
    ) -> Self {
        Self {
            join_type,
            table: table.into(),
            alias,
            on,
        }
    }

    fn render(&self, params: &mut Vec<DatabaseValue>) -> Result<String> {
        let name = self.alias.as_deref().unwrap_or(&self.table);
        let on = self.on.render(Some(name))?;
        params.extend(on.params);
        let target = match &self.alias {
            Some(alias) => format!("{} AS {}", self.table, alias),
            None => self.table.clone(),
        };
        Ok(format!("{} {} ON {}", self.join_type.as_sql(), target, on.sql))
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    joins: Vec<JoinClause>,
    wheres: WhereClause,
    scope: Vec<Condition>,
    order_by: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    lock: Option<LockStrength>,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    ///
    /// # Example
    ///
    /// ```
    /// use rust_data_mapper::core::query_builder::SelectBuilder;
    /// use rust_data_mapper::DatabaseType;
    ///
    /// let stmt = SelectBuilder::new("users")
    ///     .columns(&["id", "first_name"])
    ///     .build(DatabaseType::Sqlite)
    ///     .unwrap();
    /// assert_eq!(stmt.sql, "SELECT id, first_name FROM users");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            joins: Vec::new(),
            wheres: WhereClause::new(),
            scope: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
        }
    }

    /// Select specific columns
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|s| s.as_ref().to_string()).collect();
        if self.columns.is_empty() {
            self.columns.push("*".to_string());
        }
        self
    }

    /// Add a condition joined with AND
    #[must_use]
    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push(Connector::And, condition);
        self
    }

    /// Add a condition joined with OR
    #[must_use]
    pub fn or_cond(mut self, condition: Condition) -> Self {
        self.wheres.push(Connector::Or, condition);
        self
    }

    /// Replace the WHERE chain
    #[must_use]
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.wheres = clause;
        self
    }

    /// Add a condition that is always ANDed with the whole WHERE chain
    #[must_use]
    pub fn scope(mut self, condition: Condition) -> Self {
        self.scope.push(condition);
        self
    }

    /// Add a JOIN clause
    #[must_use]
    pub fn join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a raw ORDER BY expression, e.g. `"id asc, first_name desc"`
    #[must_use]
    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    /// Add LIMIT clause
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add OFFSET clause
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Lock selected rows
    #[must_use]
    pub fn lock(mut self, strength: LockStrength) -> Self {
        self.lock = Some(strength);
        self
    }

    /// Build the statement for `dialect`
    pub fn build(&self, dialect: DatabaseType) -> Result<Statement> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.render(&mut params)?);
        }

        // With joins, bare column names would be ambiguous
        let qualifier = if self.joins.is_empty() {
            None
        } else {
            Some(self.table.as_str())
        };
        let filter = self.wheres.render_scoped(&self.scope, qualifier)?;
        if !filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.sql);
            params.extend(filter.params);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite only accepts OFFSET after a LIMIT
            (None, Some(_)) if dialect == DatabaseType::Sqlite => sql.push_str(" LIMIT -1"),
            _ => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        if let Some(clause) = self.lock.and_then(|s| dialect.lock_clause(s)) {
            sql.push(' ');
            sql.push_str(clause);
        }

        Ok(Statement {
            sql: dialect.render_placeholders(&sql),
            params,
        })
    }
}

/// INSERT query builder
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<DatabaseValue>>,
    conflict: Option<(Vec<String>, Option<Vec<String>>)>,
    returning: Vec<String>,
}

impl InsertBuilder {
    /// Create a new INSERT query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            conflict: None,
            returning: Vec::new(),
        }
    }

    /// Add a column-value pair to the first row
    #[must_use]
    pub fn value(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.columns.push(column.to_string());
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
        }
        self.rows[0].push(value.into());
        self
    }

    /// Set the column list for multi-row inserts
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Append a row of values in column order
    #[must_use]
    pub fn row(mut self, values: Vec<DatabaseValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// `ON CONFLICT (target) DO UPDATE SET col = excluded.col, ...`
    ///
    /// An empty update list degrades to `DO NOTHING`.
    #[must_use]
    pub fn on_conflict_update<S: AsRef<str>>(mut self, target: &[S], update: &[S]) -> Self {
        let target = target.iter().map(|s| s.as_ref().to_string()).collect();
        let update = update.iter().map(|s| s.as_ref().to_string()).collect();
        self.conflict = Some((target, Some(update)));
        self
    }

    /// `ON CONFLICT DO NOTHING`
    #[must_use]
    pub fn on_conflict_do_nothing(mut self) -> Self {
        self.conflict = Some((Vec::new(), None));
        self
    }

    /// Return the given columns of inserted rows
    #[must_use]
    pub fn returning<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.returning = columns.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Build the statement for `dialect`
    pub fn build(&self, dialect: DatabaseType) -> Result<Statement> {
        if self.columns.is_empty() || self.rows.is_empty() {
            return Err(DatabaseError::validation(format!(
                "insert into {} has no values",
                self.table
            )));
        }

        let mut params = Vec::with_capacity(self.columns.len() * self.rows.len());
        let mut groups = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            if row.len() != self.columns.len() {
                return Err(DatabaseError::validation(format!(
                    "insert into {} has {} columns but a row with {} values",
                    self.table,
                    self.columns.len(),
                    row.len()
                )));
            }
            groups.push(format!("({})", vec!["?"; row.len()].join(", ")));
            params.extend(row.iter().cloned());
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            groups.join(", ")
        );

        match &self.conflict {
            Some((target, Some(update))) if !update.is_empty() && !target.is_empty() => {
                let sets: Vec<String> = update
                    .iter()
                    .map(|col| format!("{} = excluded.{}", col, col))
                    .collect();
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    target.join(", "),
                    sets.join(", ")
                ));
            }
            Some(_) => sql.push_str(" ON CONFLICT DO NOTHING"),
            None => {}
        }

        if !self.returning.is_empty() && dialect.supports_returning() {
            sql.push_str(&format!(" RETURNING {}", self.returning.join(", ")));
        }

        Ok(Statement {
            sql: dialect.render_placeholders(&sql),
            params,
        })
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<(String, DatabaseValue)>,
    wheres: WhereClause,
    scope: Vec<Condition>,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            wheres: WhereClause::new(),
            scope: Vec::new(),
        }
    }

    /// Set a column value
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.sets.push((column.to_string(), value.into()));
        self
    }

    /// Add a WHERE column = value condition
    #[must_use]
    pub fn where_eq(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cond(Condition::eq(column, value))
    }

    /// Add a condition joined with AND
    #[must_use]
    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push(Connector::And, condition);
        self
    }

    /// Replace the WHERE chain
    #[must_use]
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.wheres = clause;
        self
    }

    /// Add a condition that is always ANDed with the whole WHERE chain
    #[must_use]
    pub fn scope(mut self, condition: Condition) -> Self {
        self.scope.push(condition);
        self
    }

    /// Build the statement for `dialect`.
    ///
    /// Fails when there is nothing to set or no caller-supplied condition.
    pub fn build(&self, dialect: DatabaseType) -> Result<Statement> {
        if self.sets.is_empty() {
            return Err(DatabaseError::validation(format!(
                "update of {} has no columns to set",
                self.table
            )));
        }
        if self.wheres.render(None)?.is_empty() {
            return Err(DatabaseError::validation(format!(
                "update of {} without a WHERE condition",
                self.table
            )));
        }

        let set_clauses: Vec<String> = self
            .sets
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut params: Vec<DatabaseValue> = self.sets.iter().map(|(_, v)| v.clone()).collect();

        let filter = self.wheres.render_scoped(&self.scope, None)?;
        params.extend(filter.params);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            set_clauses.join(", "),
            filter.sql
        );
        Ok(Statement {
            sql: dialect.render_placeholders(&sql),
            params,
        })
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    wheres: WhereClause,
    scope: Vec<Condition>,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            wheres: WhereClause::new(),
            scope: Vec::new(),
        }
    }

    /// Add a WHERE column = value condition
    #[must_use]
    pub fn where_eq(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cond(Condition::eq(column, value))
    }

    /// Add a condition joined with AND
    #[must_use]
    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push(Connector::And, condition);
        self
    }

    /// Replace the WHERE chain
    #[must_use]
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.wheres = clause;
        self
    }

    /// Add a condition that is always ANDed with the whole WHERE chain
    #[must_use]
    pub fn scope(mut self, condition: Condition) -> Self {
        self.scope.push(condition);
        self
    }

    /// Build the statement for `dialect`; fails without a WHERE condition.
    pub fn build(&self, dialect: DatabaseType) -> Result<Statement> {
        if self.wheres.render(None)?.is_empty() {
            return Err(DatabaseError::validation(format!(
                "delete from {} without a WHERE condition",
                self.table
            )));
        }
        let filter = self.wheres.render_scoped(&self.scope, None)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table, filter.sql);
        Ok(Statement {
            sql: dialect.render_placeholders(&sql),
            params: filter.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    const SQLITE: DatabaseType = DatabaseType::Sqlite;

    #[test]
    fn test_select_basic() {
        let stmt = SelectBuilder::new("users").build(SQLITE).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM users");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_where_order_limit() {
        let stmt = SelectBuilder::new("users")
            .where_cond(Condition::like("first_name", "%User%"))
            .where_cond(Condition::eq("id", "5"))
            .order_by("id asc, first_name desc")
            .limit(5)
            .offset(5)
            .build(SQLITE)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE first_name LIKE ? AND id = ? \
             ORDER BY id asc, first_name desc LIMIT 5 OFFSET 5"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_offset_without_limit() {
        let builder = SelectBuilder::new("users").offset(3);
        assert_eq!(
            builder.build(SQLITE).unwrap().sql,
            "SELECT * FROM users LIMIT -1 OFFSET 3"
        );
        assert_eq!(
            builder.build(DatabaseType::Postgres).unwrap().sql,
            "SELECT * FROM users OFFSET 3"
        );
    }

    #[test]
    fn test_select_postgres_placeholders_and_lock() {
        let stmt = SelectBuilder::new("users")
            .where_cond(Condition::raw("id = ? OR id = ?", args!["1", "2"]))
            .scope(Condition::is_null("deleted_at"))
            .lock(LockStrength::Update)
            .build(DatabaseType::Postgres)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE (id = $1 OR id = $2) AND deleted_at IS NULL FOR UPDATE"
        );

        let stmt = SelectBuilder::new("users")
            .lock(LockStrength::Update)
            .build(SQLITE)
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM users");
    }

    #[test]
    fn test_select_join_params_precede_where() {
        let stmt = SelectBuilder::new("users")
            .columns(&["users.*", "wallet.balance AS wallet__balance"])
            .join(JoinClause::new(
                JoinType::Left,
                "wallets",
                Some("wallet".to_string()),
                Condition::raw("wallet.user_id = users.id", args![])
                    .and(Condition::raw("wallet.balance > ?", args![100])),
            ))
            .where_cond(Condition::eq("id", "1"))
            .build(SQLITE)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT users.*, wallet.balance AS wallet__balance FROM users \
             LEFT JOIN wallets AS wallet ON wallet.user_id = users.id AND wallet.balance > ? \
             WHERE users.id = ?"
        );
        assert_eq!(
            stmt.params,
            vec![DatabaseValue::Int(100), DatabaseValue::from("1")]
        );
    }

    #[test]
    fn test_insert_multi_row_with_conflict() {
        let stmt = InsertBuilder::new("users")
            .columns(&["id", "first_name"])
            .row(vec!["1".into(), "Brian".into()])
            .row(vec!["2".into(), "Sari".into()])
            .on_conflict_update(&["id"], &["first_name"])
            .build(SQLITE)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO users (id, first_name) VALUES (?, ?), (?, ?) \
             ON CONFLICT (id) DO UPDATE SET first_name = excluded.first_name"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn test_insert_returning_and_do_nothing() {
        let stmt = InsertBuilder::new("user_logs")
            .value("user_id", "1")
            .value("action", "Test Action")
            .on_conflict_do_nothing()
            .returning(&["id"])
            .build(DatabaseType::Postgres)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO user_logs (user_id, action) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING RETURNING id"
        );
    }

    #[test]
    fn test_insert_row_width_mismatch() {
        let err = InsertBuilder::new("users")
            .columns(&["id", "first_name"])
            .row(vec!["1".into()])
            .build(SQLITE)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn test_update() {
        let stmt = UpdateBuilder::new("users")
            .set("first_name", "Celox")
            .set("last_name", "Dusk")
            .where_eq("id", "11")
            .build(SQLITE)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "UPDATE users SET first_name = ?, last_name = ? WHERE id = ?"
        );
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_update_and_delete_require_where() {
        let err = UpdateBuilder::new("users")
            .set("password", "x")
            .scope(Condition::is_null("deleted_at"))
            .build(SQLITE)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));

        let err = DeleteBuilder::new("users").build(SQLITE).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn test_delete() {
        let stmt = DeleteBuilder::new("users")
            .where_eq("id", 42)
            .build(SQLITE)
            .unwrap();

        assert_eq!(stmt.sql, "DELETE FROM users WHERE id = ?");
        assert_eq!(stmt.params.len(), 1);
    }
}
