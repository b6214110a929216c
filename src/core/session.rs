//! Sessions
//!
//! A [`Session`] is the handle every data-access call goes through. It owns
//! a shared reference to a connected backend, carries the transaction it is
//! bound to (if any), and logs every statement it runs. Sessions are cheap
//! to clone; clones share the backend and the transaction.

use super::association::Association;
use super::condition::{expand_placeholders, Arg, Condition};
use super::database::{DatabaseObject, TransactionPermit};
use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use super::mapper::{self, is_zero_json};
use super::query::Query;
use super::query_builder::{DeleteBuilder, InsertBuilder, OnConflict, Statement, UpdateBuilder};
use super::relation::Cascade;
use super::schema::{Model, Schema};
use super::transaction::{Transaction, TransactionStatus, TxState};
use super::value::{format_timestamp, DatabaseResult, DatabaseValue};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Rows per multi-row INSERT in [`Session::create_batch`]
    pub create_batch_size: usize,
    /// Statements slower than this are logged at `warn`
    pub slow_threshold_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            create_batch_size: 100,
            slow_threshold_ms: 200,
        }
    }
}

impl SessionConfig {
    /// Slow-statement threshold as a [`Duration`]
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

/// Handle for running statements against one backend
#[derive(Clone)]
pub struct Session {
    db: Arc<dyn DatabaseObject>,
    config: Arc<SessionConfig>,
    tx: Option<Arc<TxState>>,
    unscoped: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.db.database_type())
            .field("config", &self.config)
            .field("transaction", &self.tx.as_ref().map(|s| s.status()))
            .field("unscoped", &self.unscoped)
            .finish()
    }
}

impl Session {
    /// Create a session over a connected backend with default settings
    pub fn new(db: Arc<dyn DatabaseObject>) -> Self {
        Self::with_config(db, SessionConfig::default())
    }

    /// Create a session over a connected backend
    pub fn with_config(db: Arc<dyn DatabaseObject>, config: SessionConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            tx: None,
            unscoped: false,
        }
    }

    /// Backend this session runs on
    pub fn database(&self) -> &Arc<dyn DatabaseObject> {
        &self.db
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// SQL dialect of the backend
    pub fn dialect(&self) -> DatabaseType {
        self.db.database_type()
    }

    /// True when this session is bound to a transaction
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Session whose queries and deletes ignore soft-delete scoping
    pub fn unscoped(&self) -> Session {
        Session {
            unscoped: true,
            ..self.clone()
        }
    }

    pub(crate) fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    /// Start a query on `M`'s table
    pub fn query<M: Model>(&self) -> Query<'_, M> {
        Query::new(self)
    }

    /// Execute raw SQL with `?` placeholders and return the affected row count
    ///
    /// ```ignore
    /// session.exec("INSERT INTO sample (id, name) VALUES (?, ?)", args!["1", "Brian"]).await?;
    /// ```
    pub async fn exec(&self, sql: &str, args: Vec<Arg>) -> Result<u64> {
        let stmt = self.prepare(sql, &args)?;
        self.run_exec(&stmt).await
    }

    /// Raw SQL query with `?` placeholders, decoded on demand
    pub fn raw(&self, sql: &str, args: Vec<Arg>) -> RawQuery<'_> {
        RawQuery {
            session: self,
            sql: sql.to_string(),
            args,
        }
    }

    fn prepare(&self, sql: &str, args: &[Arg]) -> Result<Statement> {
        let mut params = Vec::with_capacity(args.len());
        let sql = expand_placeholders(sql, args, &mut params)?;
        Ok(Statement::new(self.dialect().render_placeholders(&sql), params))
    }

    // ---- statement execution -------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        match &self.tx {
            Some(state) => state.ensure_open(),
            None => Ok(()),
        }
    }

    /// Statements outside a transaction wait until no transaction holds
    /// the connection
    async fn outside_transaction(&self) -> Option<TransactionPermit> {
        match self.tx {
            Some(_) => None,
            None => Some(self.db.transaction_gate().lock_owned().await),
        }
    }

    pub(crate) async fn run_exec(&self, stmt: &Statement) -> Result<u64> {
        self.ensure_open()?;
        let _idle = self.outside_transaction().await;
        let started = Instant::now();
        let result = self.db.execute_with_params(&stmt.sql, &stmt.params).await;
        self.observe(stmt, started, result.as_ref().ok().map(|n| *n as usize));
        self.settle(result).await
    }

    pub(crate) async fn run_query(&self, stmt: &Statement) -> Result<DatabaseResult> {
        self.ensure_open()?;
        let _idle = self.outside_transaction().await;
        let started = Instant::now();
        let result = self.db.query_with_params(&stmt.sql, &stmt.params).await;
        self.observe(stmt, started, result.as_ref().ok().map(Vec::len));
        self.settle(result).await
    }

    fn observe(&self, stmt: &Statement, started: Instant, rows: Option<usize>) {
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match rows {
            Some(rows) if elapsed >= self.config.slow_threshold() => tracing::warn!(
                sql = %stmt.sql,
                params = stmt.params.len(),
                rows,
                elapsed_ms,
                "slow statement"
            ),
            Some(rows) => tracing::debug!(
                sql = %stmt.sql,
                params = stmt.params.len(),
                rows,
                elapsed_ms,
                "statement"
            ),
            None => tracing::debug!(sql = %stmt.sql, elapsed_ms, "statement failed"),
        }
    }

    /// A statement failure inside a transaction rolls the whole transaction back
    async fn settle<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.abort_transaction(&e.to_string()).await;
        }
        result
    }

    pub(crate) async fn abort_transaction(&self, reason: &str) {
        let Some(state) = &self.tx else {
            return;
        };
        if state.finish(TransactionStatus::RolledBack) {
            if let Err(e) = self.db.rollback().await {
                tracing::warn!(error = %e, "rollback after failure did not complete");
            }
            drop(state.release());
            tracing::debug!(reason, "transaction rolled back");
        }
    }

    // ---- transactions ----------------------------------------------------

    /// Begin a manual transaction
    ///
    /// Inside an open transaction this returns a guard participating in the
    /// enclosing one instead of starting a new database transaction.
    ///
    /// The transaction owns the backend's connection until it ends: begins
    /// and statements from sessions outside it wait, so a task holding a
    /// transaction must issue its statements through the transaction.
    pub async fn begin(&self) -> Result<Transaction> {
        if let Some(state) = &self.tx {
            state.ensure_open()?;
            return Ok(Transaction::participant(self.clone(), Arc::clone(state)));
        }

        let permit = self.db.transaction_gate().lock_owned().await;
        self.db.begin_transaction().await?;
        tracing::debug!("transaction started");
        let state = Arc::new(TxState::new(permit));
        let session = Session {
            tx: Some(Arc::clone(&state)),
            ..self.clone()
        };
        Ok(Transaction::owner(session, state))
    }

    /// Run `body` as one unit of work
    ///
    /// The body receives a session bound to the transaction. It commits when
    /// the body returns `Ok`, and rolls back when the body returns `Err` or
    /// panics (the panic is resumed afterwards). Called inside an open
    /// transaction, the body runs on the enclosing transaction and an error
    /// aborts it.
    ///
    /// ```ignore
    /// session.transaction(|tx| async move {
    ///     tx.create(&mut user_11).await?;
    ///     tx.create(&mut user_12).await?;
    ///     Ok(())
    /// }).await?;
    /// ```
    pub async fn transaction<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self.begin().await?;
        let outcome = AssertUnwindSafe(body(tx.session().clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after error did not complete");
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after panic did not complete");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    // ---- record writes ---------------------------------------------------

    /// Insert a record
    ///
    /// A zero auto-increment key is left to the database and written back;
    /// zero auto-managed timestamps are set to the current time.
    pub async fn create<M: Model>(&self, record: &mut M) -> Result<u64> {
        self.insert_record(record, None).await
    }

    /// Insert or resolve a primary-key conflict with `policy`, atomically
    pub async fn create_with<M: Model>(&self, record: &mut M, policy: OnConflict) -> Result<u64> {
        self.insert_record(record, Some(&policy)).await
    }

    /// Insert many records, in chunks of `create_batch_size` rows
    ///
    /// Runs inside a transaction (the enclosing one, if any) and returns the
    /// number of rows inserted.
    pub async fn create_batch<M: Model>(&self, records: &mut [M]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        if self.in_transaction() {
            return self.insert_batch(records).await;
        }
        self.transaction(|tx| async move { tx.insert_batch(records).await })
            .await
    }

    /// Upsert by primary key
    ///
    /// A record with a zero key is created; otherwise it is inserted with
    /// every updatable column overwritten on conflict.
    pub async fn save<M: Model>(&self, record: &mut M) -> Result<u64> {
        let schema = M::schema();
        let mut map = mapper::record_of(&*record)?;
        if is_zero_key(schema, &map) {
            return self.create(record).await;
        }

        let now = Value::String(format_timestamp(&chrono::Utc::now()));
        for field in schema.fields().iter().filter(|f| f.auto_update_time) {
            map.insert(field.name.clone(), now.clone());
        }
        mapper::write_back(map, record)?;
        self.insert_record(record, Some(&OnConflict::UpdateAll)).await
    }

    /// Delete a record by primary key
    ///
    /// Records with a soft-delete column are marked deleted (and the marker
    /// is written back) unless the session is [`unscoped`](Self::unscoped).
    pub async fn delete<M: Model>(&self, record: &mut M) -> Result<u64> {
        let schema = M::schema();
        let pk = schema.primary_key();
        let key = mapper::column_value(&*record, &pk.column)?;
        if key.is_zero() {
            return Err(DatabaseError::validation(format!(
                "delete from {} needs a primary key",
                schema.table()
            )));
        }

        match schema.soft_delete_column() {
            Some(column) if !self.unscoped => {
                let now = DatabaseValue::now();
                let stmt = UpdateBuilder::new(schema.table())
                    .set(column, now.clone())
                    .where_eq(&pk.column, key)
                    .scope(Condition::is_null(column))
                    .build(self.dialect())?;
                let affected = self.run_exec(&stmt).await?;
                mapper::set_column(record, column, &now)?;
                Ok(affected)
            }
            _ => {
                let stmt = DeleteBuilder::new(schema.table())
                    .where_eq(&pk.column, key)
                    .build(self.dialect())?;
                self.run_exec(&stmt).await
            }
        }
    }

    /// Association-mode operations on one owner record
    pub fn association<'a, P: Model, C: Model>(
        &'a self,
        owner: &'a mut P,
        relation: super::relation::Relation<P, C>,
    ) -> Association<'a, P, C> {
        Association::new(self, owner, relation)
    }

    /// Create a record together with its populated association fields
    ///
    /// Belongs-to targets are saved first and the foreign key is set on the
    /// owner; has-one / has-many children get the owner's key; many-to-many
    /// targets are saved and linked. Everything runs in one transaction.
    pub async fn create_with_associations<P: Model>(
        &self,
        record: &mut P,
        cascades: &[&dyn Cascade<P>],
    ) -> Result<u64> {
        self.transaction(|tx| async move {
            for cascade in cascades {
                cascade.before_create(&tx, record).await?;
            }
            let affected = tx.create(record).await?;
            for cascade in cascades {
                cascade.after_create(&tx, record).await?;
            }
            Ok(affected)
        })
        .await
    }

    async fn insert_record<M: Model>(
        &self,
        record: &mut M,
        conflict: Option<&OnConflict>,
    ) -> Result<u64> {
        let schema = M::schema();
        let pk = schema.primary_key();
        let mut map = mapper::record_of(&*record)?;
        stamp_create(schema, &mut map);

        let generate_key = pk.auto_increment && is_zero_key(schema, &map);
        let (columns, values): (Vec<String>, Vec<DatabaseValue>) =
            mapper::column_values(schema, &map)
                .into_iter()
                .filter(|(column, _)| !(generate_key && *column == pk.column))
                .unzip();

        let insert = InsertBuilder::new(schema.table())
            .columns(&columns[..])
            .row(values);
        let insert = apply_conflict(insert, schema, &columns, conflict)?;

        let affected = if generate_key {
            let stmt = insert
                .returning(&[pk.column.as_str()])
                .build(self.dialect())?;
            let rows = self.run_query(&stmt).await?;
            if let Some(key) = rows.first().and_then(|row| row.get(&pk.column)) {
                map.insert(pk.name.clone(), key.to_json());
            }
            rows.len() as u64
        } else {
            let stmt = insert.build(self.dialect())?;
            self.run_exec(&stmt).await?
        };

        mapper::write_back(map, record)?;
        Ok(affected)
    }

    async fn insert_batch<M: Model>(&self, records: &mut [M]) -> Result<u64> {
        let schema = M::schema();
        let mut maps = records
            .iter()
            .map(mapper::record_of)
            .collect::<Result<Vec<_>>>()?;

        // Generated keys have to be read back row by row
        let pk = schema.primary_key();
        if pk.auto_increment && maps.iter().any(|m| is_zero_key(schema, m)) {
            let mut affected = 0;
            for record in records.iter_mut() {
                affected += self.insert_record(record, None).await?;
            }
            return Ok(affected);
        }

        for map in maps.iter_mut() {
            stamp_create(schema, map);
        }
        let columns = schema.columns();
        let size = self.config.create_batch_size.max(1);
        let mut affected = 0;
        for (chunk, chunk_maps) in records.chunks_mut(size).zip(maps.chunks(size)) {
            let mut insert = InsertBuilder::new(schema.table()).columns(&columns[..]);
            for map in chunk_maps {
                let values = mapper::column_values(schema, map)
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect();
                insert = insert.row(values);
            }
            affected += self.run_exec(&insert.build(self.dialect())?).await?;
            for (record, map) in chunk.iter_mut().zip(chunk_maps) {
                mapper::write_back(map.clone(), record)?;
            }
        }
        Ok(affected)
    }
}

fn is_zero_key(schema: &Schema, record: &Map<String, Value>) -> bool {
    record
        .get(&schema.primary_key().name)
        .map_or(true, is_zero_json)
}

/// Fill zero auto-managed timestamps with the current time
fn stamp_create(schema: &Schema, record: &mut Map<String, Value>) {
    let now = Value::String(format_timestamp(&chrono::Utc::now()));
    for field in schema
        .fields()
        .iter()
        .filter(|f| f.auto_create_time || f.auto_update_time)
    {
        if record.get(&field.name).map_or(true, is_zero_json) {
            record.insert(field.name.clone(), now.clone());
        }
    }
}

fn apply_conflict(
    insert: InsertBuilder,
    schema: &Schema,
    inserted: &[String],
    conflict: Option<&OnConflict>,
) -> Result<InsertBuilder> {
    let target = [schema.primary_key().column.as_str()];
    match conflict {
        None => Ok(insert),
        Some(OnConflict::DoNothing) => Ok(insert.on_conflict_do_nothing()),
        Some(OnConflict::UpdateAll) => {
            let update: Vec<&str> = schema
                .fields()
                .iter()
                .filter(|f| f.updatable() && inserted.contains(&f.column))
                .map(|f| f.column.as_str())
                .collect();
            Ok(insert.on_conflict_update(&target[..], &update[..]))
        }
        Some(OnConflict::UpdateColumns(columns)) => {
            if let Some(unknown) = columns.iter().find(|c| !schema.has_column(c)) {
                return Err(DatabaseError::validation(format!(
                    "{} has no column {}",
                    schema.table(),
                    unknown
                )));
            }
            let update: Vec<&str> = columns.iter().map(String::as_str).collect();
            Ok(insert.on_conflict_update(&target[..], &update[..]))
        }
    }
}

/// Raw SQL query returned by [`Session::raw`]
pub struct RawQuery<'s> {
    session: &'s Session,
    sql: String,
    args: Vec<Arg>,
}

impl<'s> RawQuery<'s> {
    /// Undecoded rows, for callers that decode one row at a time with
    /// [`scan_row`](crate::core::mapper::scan_row)
    pub async fn rows(&self) -> Result<DatabaseResult> {
        let stmt = self.session.prepare(&self.sql, &self.args)?;
        self.session.run_query(&stmt).await
    }

    /// Every row decoded into `T`; zero rows is an empty vector
    pub async fn scan<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows()
            .await?
            .iter()
            .map(mapper::scan_row)
            .collect()
    }

    /// First row decoded into `T`; zero rows is `NotFound`
    pub async fn scan_one<T: DeserializeOwned>(&self) -> Result<T> {
        let rows = self.rows().await?;
        match rows.first() {
            Some(row) => mapper::scan_row(row),
            None => Err(DatabaseError::not_found("raw query")),
        }
    }
}
