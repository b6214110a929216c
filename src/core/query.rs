//! Chainable record queries
//!
//! [`Query`] accumulates conditions, ordering, paging, locking, preloads and
//! joins for one record type and is finished by a terminal call (`find`,
//! `first`, `count`, `updates`, `delete`, ...). Records with a soft-delete
//! column are filtered to live rows unless the query is unscoped.

use super::condition::{Arg, Condition, ConditionMap, Connector, WhereClause};
use super::error::{DatabaseError, Result};
use super::mapper::{self, scan_model_row};
use super::query_builder::{
    DeleteBuilder, JoinType, LockStrength, SelectBuilder, Statement, UpdateBuilder,
};
use super::relation::{Join, Preload};
use super::schema::Model;
use super::session::Session;
use super::value::{DatabaseRow, DatabaseValue};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};

/// Column alias of the parent key in page-key fetches
const PAGE_KEY: &str = "__page_key";

/// Column changes for [`Query::updates`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    values: Vec<(String, DatabaseValue)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column` to `value`
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.values.push((column, value)),
        }
        self
    }

    /// Every non-zero, non-key mapped column of `record`
    pub fn from_model<M: Model>(record: &M) -> Result<Self> {
        let schema = M::schema();
        let pk = &schema.primary_key().column;
        let values = mapper::column_values(schema, &mapper::record_of(record)?)
            .into_iter()
            .filter(|(column, value)| column != pk && !value.is_zero())
            .collect();
        Ok(Self { values })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Query on `M`'s table, bound to a session
pub struct Query<'s, M: Model> {
    session: &'s Session,
    wheres: WhereClause,
    columns: Vec<String>,
    order: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    lock: Option<LockStrength>,
    unscoped: bool,
    preloads: Vec<Box<dyn Preload<M>>>,
    joins: Vec<(Box<dyn Join<M>>, JoinType)>,
}

impl<'s, M: Model> Query<'s, M> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self {
            session,
            wheres: WhereClause::new(),
            columns: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
            unscoped: session.is_unscoped(),
            preloads: Vec::new(),
            joins: Vec::new(),
        }
    }

    /// AND a raw condition: `.where_sql("first_name LIKE ?", args!["%User%"])`
    #[must_use]
    pub fn where_sql(self, sql: &str, args: Vec<Arg>) -> Self {
        self.where_cond(Condition::raw(sql, args))
    }

    /// AND a structured condition
    #[must_use]
    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push(Connector::And, condition);
        self
    }

    /// OR a raw condition onto the chain so far
    #[must_use]
    pub fn or_sql(self, sql: &str, args: Vec<Arg>) -> Self {
        self.or_cond(Condition::raw(sql, args))
    }

    /// OR a structured condition onto the chain so far
    #[must_use]
    pub fn or_cond(mut self, condition: Condition) -> Self {
        self.wheres.push(Connector::Or, condition);
        self
    }

    /// AND the negation of a raw condition
    #[must_use]
    pub fn not_sql(self, sql: &str, args: Vec<Arg>) -> Self {
        self.where_cond(Condition::raw(sql, args).not())
    }

    /// AND the negation of a structured condition
    #[must_use]
    pub fn not_cond(self, condition: Condition) -> Self {
        self.where_cond(condition.not())
    }

    /// AND `column = value`
    #[must_use]
    pub fn where_eq(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cond(Condition::eq(column, value))
    }

    /// AND `column IN (values...)`
    #[must_use]
    pub fn where_in<T: Into<DatabaseValue>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        self.where_cond(Condition::is_in(column, values))
    }

    /// AND a column-to-value map
    #[must_use]
    pub fn where_map(self, map: ConditionMap) -> Self {
        self.where_cond(Condition::Map(map))
    }

    /// AND equality on every non-zero mapped field of `example`
    pub fn where_model(self, example: &M) -> Result<Self> {
        Ok(self.where_cond(Condition::from_model(example)?))
    }

    /// Restrict the selected columns
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a raw ORDER BY expression such as `"id asc, first_name desc"`
    #[must_use]
    pub fn order(mut self, expr: impl Into<String>) -> Self {
        self.order.push(expr.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Include soft-deleted rows (and hard-delete in [`delete`](Self::delete))
    #[must_use]
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Lock the selected rows exclusively; requires an open transaction
    #[must_use]
    pub fn for_update(mut self) -> Self {
        self.lock = Some(LockStrength::Update);
        self
    }

    /// Lock the selected rows in share mode; requires an open transaction
    #[must_use]
    pub fn for_share(mut self) -> Self {
        self.lock = Some(LockStrength::Share);
        self
    }

    /// Load an association with a follow-up query after the main one
    ///
    /// ```ignore
    /// let users = session.query::<User>()
    ///     .preload(User::wallet())
    ///     .preload(User::addresses().filter(Condition::eq("city", "Jakarta")))
    ///     .find()
    ///     .await?;
    /// ```
    #[must_use]
    pub fn preload(mut self, preload: impl Preload<M> + 'static) -> Self {
        self.preloads.push(Box::new(preload));
        self
    }

    /// Load an association through a LEFT JOIN in the main query
    ///
    /// Join stages built with [`inner`](super::relation::JoinStage::inner)
    /// use an INNER JOIN instead.
    #[must_use]
    pub fn joins(mut self, join: impl Join<M> + 'static) -> Self {
        let join_type = join.join_type().unwrap_or(JoinType::Left);
        self.joins.push((Box::new(join), join_type));
        self
    }

    /// Load an association through an INNER JOIN, dropping records without
    /// a related row
    #[must_use]
    pub fn inner_joins(mut self, join: impl Join<M> + 'static) -> Self {
        self.joins.push((Box::new(join), JoinType::Inner));
        self
    }

    fn scoped(&self) -> Option<Condition> {
        match M::schema().soft_delete_column() {
            Some(column) if !self.unscoped => Some(Condition::is_null(column)),
            _ => None,
        }
    }

    fn qualified_pk(&self) -> String {
        let schema = M::schema();
        let pk = &schema.primary_key().column;
        if self.joins.is_empty() {
            pk.clone()
        } else {
            format!("{}.{}", schema.table(), pk)
        }
    }

    /// SELECT with conditions, joins and scope, but no projection or paging
    fn base_select(&self) -> Result<SelectBuilder> {
        if self.lock.is_some() && !self.session.in_transaction() {
            return Err(DatabaseError::validation(
                "row locks need an open transaction",
            ));
        }

        let mut select = SelectBuilder::new(M::schema().table()).where_clause(self.wheres.clone());
        if let Some(scope) = self.scoped() {
            select = select.scope(scope);
        }
        for (join, join_type) in &self.joins {
            for clause in join.clauses(*join_type, self.unscoped)? {
                select = select.join(clause);
            }
        }
        Ok(select)
    }

    /// Full SELECT; `page` replaces LIMIT/OFFSET with a parent-key filter
    fn select_builder(&self, page: Option<Vec<DatabaseValue>>) -> Result<SelectBuilder> {
        let schema = M::schema();
        let table = schema.table();
        let mut select = self.base_select()?;
        let keyed = page.is_some();
        if let Some(keys) = page {
            select = select.scope(Condition::is_in(self.qualified_pk(), keys));
        }

        if self.joins.is_empty() {
            select = select.columns(&self.columns[..]);
        } else {
            let mut columns: Vec<String> = if self.columns.is_empty() {
                vec![format!("{}.*", table)]
            } else {
                self.columns
                    .iter()
                    .map(|c| {
                        if c.contains('.') || c.contains(' ') || c.contains('(') {
                            c.clone()
                        } else {
                            format!("{}.{}", table, c)
                        }
                    })
                    .collect()
            };
            for (join, _) in &self.joins {
                columns.extend(join.columns());
            }
            select = select.columns(&columns[..]);
        }

        for expr in &self.order {
            select = select.order_by(expr.clone());
        }
        if !keyed {
            if let Some(limit) = self.limit {
                select = select.limit(limit);
            }
            if let Some(offset) = self.offset {
                select = select.offset(offset);
            }
        }
        if let Some(lock) = self.lock {
            select = select.lock(lock);
        }
        Ok(select)
    }

    /// Statement `find` would run, LIMIT and OFFSET counting result rows
    pub fn to_statement(&self) -> Result<Statement> {
        self.select_builder(None)?.build(self.session.dialect())
    }

    /// True when LIMIT/OFFSET would cut through the rows of a to-many join
    fn pages_joined_rows(&self) -> bool {
        (self.limit.is_some() || self.offset.is_some())
            && self.joins.iter().any(|(join, _)| join.is_to_many())
    }

    /// Keys of the requested page of parents, in query order
    async fn page_keys(&self) -> Result<Vec<DatabaseValue>> {
        let mut select = self
            .base_select()?
            .columns(&[format!("{} AS {}", self.qualified_pk(), PAGE_KEY)]);
        for expr in &self.order {
            select = select.order_by(expr.clone());
        }
        let rows = self
            .session
            .run_query(&select.build(self.session.dialect())?)
            .await?;

        let mut seen = HashSet::new();
        Ok(rows
            .iter()
            .filter_map(|row| row.get(PAGE_KEY))
            .filter(|value| value.key().is_some_and(|k| seen.insert(k)))
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Every matching record, with joins and preloads applied
    ///
    /// With has-many or many-to-many joins, `limit` and `offset` count
    /// parent records, so every loaded parent carries all of its children.
    pub async fn find(self) -> Result<Vec<M>> {
        let stmt = if self.pages_joined_rows() {
            let keys = self.page_keys().await?;
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            self.select_builder(Some(keys))?
                .build(self.session.dialect())?
        } else {
            self.to_statement()?
        };

        let rows = self.session.run_query(&stmt).await?;
        let mut records = if self.joins.is_empty() {
            rows.iter()
                .map(scan_model_row::<M>)
                .collect::<Result<Vec<_>>>()?
        } else {
            self.fold_joined(&rows)?
        };

        let unscoped;
        let session = if self.unscoped && !self.session.is_unscoped() {
            unscoped = self.session.unscoped();
            &unscoped
        } else {
            self.session
        };
        for preload in &self.preloads {
            tracing::trace!(association = preload.name(), "preloading");
            preload.load(session, &mut records).await?;
        }
        Ok(records)
    }

    /// Collapse joined rows into one record per primary key, in row order
    fn fold_joined(&self, rows: &[DatabaseRow]) -> Result<Vec<M>> {
        let schema = M::schema();
        let pk = &schema.primary_key().column;
        let mut records = Vec::new();
        let mut groups: Vec<Vec<&DatabaseRow>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let key = row.get(pk).and_then(DatabaseValue::key).ok_or_else(|| {
                DatabaseError::mapping(format!(
                    "joined row of {} has no {} value",
                    schema.table(),
                    pk
                ))
            })?;
            match index.get(&key) {
                Some(&i) => groups[i].push(row),
                None => {
                    index.insert(key, records.len());
                    records.push(scan_model_row::<M>(row)?);
                    groups.push(vec![row]);
                }
            }
        }

        for (join, _) in &self.joins {
            join.attach(&mut records, &groups)?;
        }
        Ok(records)
    }

    async fn single(self) -> Result<M> {
        let table = M::schema().table();
        self.find()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::not_found(table))
    }

    /// First record by primary key (or by the given order); `NotFound` when
    /// nothing matches
    pub async fn first(mut self) -> Result<M> {
        if self.order.is_empty() {
            self.order.push(format!("{} ASC", self.qualified_pk()));
        }
        self.limit = Some(1);
        self.single().await
    }

    /// Last record by primary key (or by the given order)
    pub async fn last(mut self) -> Result<M> {
        if self.order.is_empty() {
            self.order.push(format!("{} DESC", self.qualified_pk()));
        }
        self.limit = Some(1);
        self.single().await
    }

    /// Any one matching record, without ordering
    pub async fn take(mut self) -> Result<M> {
        self.limit = Some(1);
        self.single().await
    }

    /// Number of matching records
    pub async fn count(self) -> Result<u64> {
        let schema = M::schema();
        let expr = if self.joins.is_empty() {
            "COUNT(*) AS count".to_string()
        } else {
            format!(
                "COUNT(DISTINCT {}.{}) AS count",
                schema.table(),
                schema.primary_key().column
            )
        };
        let stmt = self
            .base_select()?
            .columns(&[expr])
            .build(self.session.dialect())?;
        let rows = self.session.run_query(&stmt).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(DatabaseValue::as_long)
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// Matching rows decoded into any deserializable type (projections)
    pub async fn scan<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        let rows = self.session.run_query(&self.to_statement()?).await?;
        rows.iter().map(mapper::scan_row).collect()
    }

    /// First matching row decoded into `T`; `NotFound` when nothing matches
    pub async fn scan_one<T: DeserializeOwned>(mut self) -> Result<T> {
        self.limit = Some(1);
        let table = M::schema().table();
        let rows = self.session.run_query(&self.to_statement()?).await?;
        match rows.first() {
            Some(row) => mapper::scan_row(row),
            None => Err(DatabaseError::not_found(table)),
        }
    }

    /// Set one column on every matching record
    pub async fn update(self, column: &str, value: impl Into<DatabaseValue>) -> Result<u64> {
        self.updates(Changes::new().set(column, value)).await
    }

    /// Set several columns on every matching record
    ///
    /// Auto-update timestamps are refreshed unless set explicitly. An empty
    /// condition chain is rejected rather than updating the whole table.
    pub async fn updates(self, changes: Changes) -> Result<u64> {
        let schema = M::schema();
        let mut values = changes.values;
        if let Some((unknown, _)) = values.iter().find(|(c, _)| !schema.has_column(c)) {
            return Err(DatabaseError::validation(format!(
                "{} has no column {}",
                schema.table(),
                unknown
            )));
        }
        if values.is_empty() {
            return Err(DatabaseError::validation("update without changes"));
        }
        for field in schema.fields().iter().filter(|f| f.auto_update_time) {
            if !values.iter().any(|(c, _)| *c == field.column) {
                values.push((field.column.clone(), DatabaseValue::now()));
            }
        }

        let mut update = UpdateBuilder::new(schema.table()).where_clause(self.wheres.clone());
        if let Some(scope) = self.scoped() {
            update = update.scope(scope);
        }
        for (column, value) in values {
            update = update.set(&column, value);
        }
        let stmt = update.build(self.session.dialect())?;
        self.session.run_exec(&stmt).await
    }

    /// Delete every matching record
    ///
    /// Soft-delete records are marked deleted unless the query is unscoped.
    /// An empty condition chain is rejected.
    pub async fn delete(self) -> Result<u64> {
        let schema = M::schema();
        let stmt = match schema.soft_delete_column() {
            Some(column) if !self.unscoped => UpdateBuilder::new(schema.table())
                .set(column, DatabaseValue::now())
                .where_clause(self.wheres.clone())
                .scope(Condition::is_null(column))
                .build(self.session.dialect())?,
            _ => DeleteBuilder::new(schema.table())
                .where_clause(self.wheres.clone())
                .build(self.session.dialect())?,
        };
        self.session.run_exec(&stmt).await
    }
}
