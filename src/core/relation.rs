//! Associations between record types
//!
//! A [`Relation`] describes how a parent record type `P` relates to a
//! child type `C` (belongs-to, has-one, has-many, many-to-many), which key
//! columns link them, and which field of `P` holds the loaded children.
//! Relations are plain values: a record type usually exposes them as
//! associated functions (`User::wallet()`), and they are handed to
//! [`Query::preload`](super::query::Query::preload),
//! [`Query::joins`](super::query::Query::joins),
//! [`Session::association`](super::session::Session::association) and
//! [`Session::create_with_associations`](super::session::Session::create_with_associations).

use super::condition::Condition;
use super::error::{DatabaseError, Result};
use super::mapper::{self, scan_model_row};
use super::query_builder::{InsertBuilder, JoinClause, JoinType, OnConflict, SelectBuilder};
use super::schema::Model;
use super::session::Session;
use super::value::{DatabaseRow, DatabaseValue};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Column alias carrying the owner key in many-to-many fetches
const OWNER_KEY: &str = "__owner_key";

/// Kind of association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The parent holds the foreign key of one child
    BelongsTo,
    /// One child holds the parent's key
    HasOne,
    /// Many children hold the parent's key
    HasMany,
    /// Parents and children are linked through a join table
    ManyToMany,
}

/// Link table of a many-to-many association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Column holding the parent's key
    pub owner_column: String,
    /// Column holding the child's key
    pub related_column: String,
}

impl JoinTable {
    pub fn new(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        related_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_column: owner_column.into(),
            related_column: related_column.into(),
        }
    }
}

enum Accessor<P, C> {
    One {
        get: fn(&P) -> Option<&C>,
        set: fn(&mut P, Option<C>),
    },
    Many {
        get: fn(&P) -> &[C],
        set: fn(&mut P, Vec<C>),
    },
}

impl<P, C> Clone for Accessor<P, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, C> Copy for Accessor<P, C> {}

/// Association from `P` to `C`
///
/// # Example
///
/// ```ignore
/// impl User {
///     fn wallet() -> Relation<User, Wallet> {
///         Relation::has_one("wallet", "user_id", |u| u.wallet.as_ref(), |u, w| u.wallet = w)
///     }
///
///     fn like_products() -> Relation<User, Product> {
///         Relation::many_to_many(
///             "like_products",
///             JoinTable::new("user_like_product", "user_id", "product_id"),
///             |u| u.like_products.as_slice(),
///             |u, p| u.like_products = p,
///         )
///     }
/// }
/// ```
pub struct Relation<P, C> {
    name: String,
    kind: RelationKind,
    foreign_key: String,
    references: Option<String>,
    join_table: Option<JoinTable>,
    accessor: Accessor<P, C>,
}

impl<P, C> Clone for Relation<P, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            foreign_key: self.foreign_key.clone(),
            references: self.references.clone(),
            join_table: self.join_table.clone(),
            accessor: self.accessor,
        }
    }
}

impl<P, C> std::fmt::Debug for Relation<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("foreign_key", &self.foreign_key)
            .field("references", &self.references)
            .field("join_table", &self.join_table)
            .finish()
    }
}

impl<P: Model, C: Model> Relation<P, C> {
    /// `P` holds `foreign_key`, referencing `C`'s primary key
    pub fn belongs_to(
        name: &str,
        foreign_key: &str,
        get: fn(&P) -> Option<&C>,
        set: fn(&mut P, Option<C>),
    ) -> Self {
        Self::build(name, RelationKind::BelongsTo, foreign_key, None, Accessor::One { get, set })
    }

    /// `C` holds `foreign_key`, referencing `P`'s primary key
    pub fn has_one(
        name: &str,
        foreign_key: &str,
        get: fn(&P) -> Option<&C>,
        set: fn(&mut P, Option<C>),
    ) -> Self {
        Self::build(name, RelationKind::HasOne, foreign_key, None, Accessor::One { get, set })
    }

    /// Many `C` hold `foreign_key`, referencing `P`'s primary key
    pub fn has_many(
        name: &str,
        foreign_key: &str,
        get: fn(&P) -> &[C],
        set: fn(&mut P, Vec<C>),
    ) -> Self {
        Self::build(name, RelationKind::HasMany, foreign_key, None, Accessor::Many { get, set })
    }

    /// `P` and `C` are linked by rows of `join_table`
    pub fn many_to_many(
        name: &str,
        join_table: JoinTable,
        get: fn(&P) -> &[C],
        set: fn(&mut P, Vec<C>),
    ) -> Self {
        let foreign_key = join_table.owner_column.clone();
        Self::build(
            name,
            RelationKind::ManyToMany,
            &foreign_key,
            Some(join_table),
            Accessor::Many { get, set },
        )
    }

    fn build(
        name: &str,
        kind: RelationKind,
        foreign_key: &str,
        join_table: Option<JoinTable>,
        accessor: Accessor<P, C>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            foreign_key: foreign_key.to_string(),
            references: None,
            join_table,
            accessor,
        }
    }

    /// Reference a column other than the primary key: `C`'s column for
    /// belongs-to, `P`'s column otherwise
    #[must_use]
    pub fn references(mut self, column: &str) -> Self {
        self.references = Some(column.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn join_table(&self) -> Option<&JoinTable> {
        self.join_table.as_ref()
    }

    /// Column of `P` whose value identifies the related rows
    pub fn owner_key(&self) -> &str {
        match self.kind {
            RelationKind::BelongsTo => self.foreign_key.as_str(),
            _ => self
                .references
                .as_deref()
                .unwrap_or(&P::schema().primary_key().column),
        }
    }

    /// Column of `C` matched against [`owner_key`](Self::owner_key)
    pub fn related_key(&self) -> &str {
        match self.kind {
            RelationKind::BelongsTo => self
                .references
                .as_deref()
                .unwrap_or(&C::schema().primary_key().column),
            RelationKind::HasOne | RelationKind::HasMany => self.foreign_key.as_str(),
            RelationKind::ManyToMany => C::schema().primary_key().column.as_str(),
        }
    }

    fn link_table(&self) -> Result<&JoinTable> {
        self.join_table.as_ref().ok_or_else(|| {
            DatabaseError::validation(format!("association {} has no join table", self.name))
        })
    }

    /// Preload with an extra condition on the related rows
    #[must_use]
    pub fn filter(self, condition: Condition) -> PreloadStage<P, C> {
        PreloadStage::new(self).filter(condition)
    }

    /// Preload, then preload `nested` on the loaded children
    #[must_use]
    pub fn nested(self, nested: impl Preload<C> + 'static) -> PreloadStage<P, C> {
        PreloadStage::new(self).nested(nested)
    }

    /// Join with an INNER JOIN
    #[must_use]
    pub fn inner(self) -> JoinStage<P, C> {
        JoinStage::new(self).inner()
    }

    /// Join with an extra ON condition; bare columns refer to the related table
    #[must_use]
    pub fn on(self, condition: Condition) -> JoinStage<P, C> {
        JoinStage::new(self).on(condition)
    }

    // ---- in-memory field access -----------------------------------------

    pub(crate) fn current(&self, parent: &P) -> Vec<C> {
        match self.accessor {
            Accessor::One { get, .. } => get(parent).cloned().into_iter().collect(),
            Accessor::Many { get, .. } => get(parent).to_vec(),
        }
    }

    pub(crate) fn assign(&self, parent: &mut P, children: Vec<C>) {
        match self.accessor {
            Accessor::One { set, .. } => set(parent, children.into_iter().next()),
            Accessor::Many { set, .. } => set(parent, children),
        }
    }

    // ---- loading ----------------------------------------------------------

    /// Per-parent owner keys, and the distinct non-null key values
    fn owner_keys(&self, parents: &[P]) -> Result<(Vec<Option<String>>, Vec<DatabaseValue>)> {
        let column = self.owner_key();
        let mut keys = Vec::with_capacity(parents.len());
        let mut values = Vec::new();
        let mut seen = HashSet::new();
        for parent in parents {
            let value = mapper::column_value(parent, column)?;
            let key = value.key();
            if let Some(k) = &key {
                if seen.insert(k.clone()) {
                    values.push(value);
                }
            }
            keys.push(key);
        }
        Ok((keys, values))
    }

    /// Related records for the given owner key values, each tagged with the
    /// normalized owner key it belongs to, ordered by `C`'s primary key
    pub(crate) async fn fetch(
        &self,
        session: &Session,
        keys: &[DatabaseValue],
        filter: Option<&Condition>,
    ) -> Result<Vec<(String, C)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        if self.kind != RelationKind::ManyToMany {
            let related_key = self.related_key();
            let mut query = session
                .query::<C>()
                .where_in(related_key, keys.to_vec())
                .order(format!("{} ASC", C::schema().primary_key().column));
            if let Some(filter) = filter {
                query = query.where_cond(filter.clone());
            }
            return query
                .find()
                .await?
                .into_iter()
                .map(|child| {
                    let key = mapper::column_value(&child, related_key)?
                        .key()
                        .unwrap_or_default();
                    Ok((key, child))
                })
                .collect();
        }

        let link = self.link_table()?;
        let schema = C::schema();
        let table = schema.table();
        let pk = &schema.primary_key().column;
        let mut select = SelectBuilder::new(table)
            .columns(&[
                format!("{}.*", table),
                format!("{}.{} AS {}", link.table, link.owner_column, OWNER_KEY),
            ])
            .join(JoinClause::new(
                JoinType::Inner,
                link.table.clone(),
                None,
                Condition::raw(
                    format!("{}.{} = {}.{}", link.table, link.related_column, table, pk),
                    Vec::new(),
                ),
            ))
            .where_cond(Condition::is_in(
                format!("{}.{}", link.table, link.owner_column),
                keys.to_vec(),
            ))
            .order_by(format!("{}.{}", table, pk));
        if let Some(filter) = filter {
            select = select.where_cond(filter.clone());
        }
        if let Some(column) = schema.soft_delete_column() {
            if !session.is_unscoped() {
                select = select.scope(Condition::is_null(column));
            }
        }

        let rows = session.run_query(&select.build(session.dialect())?).await?;
        rows.iter()
            .map(|row| {
                let key = row
                    .get(OWNER_KEY)
                    .and_then(DatabaseValue::key)
                    .unwrap_or_default();
                Ok((key, scan_model_row::<C>(row)?))
            })
            .collect()
    }

    async fn preload_into(
        &self,
        session: &Session,
        parents: &mut [P],
        filter: Option<&Condition>,
        nested: &[Box<dyn Preload<C>>],
    ) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let (parent_keys, values) = self.owner_keys(parents)?;
        let (keys, mut children): (Vec<String>, Vec<C>) = self
            .fetch(session, &values, filter)
            .await?
            .into_iter()
            .unzip();
        for preload in nested {
            preload.load(session, &mut children).await?;
        }

        let mut grouped: HashMap<String, Vec<C>> = HashMap::new();
        for (key, child) in keys.into_iter().zip(children) {
            grouped.entry(key).or_default().push(child);
        }
        for (parent, key) in parents.iter_mut().zip(parent_keys) {
            let children = key
                .and_then(|k| grouped.get(&k).cloned())
                .unwrap_or_default();
            self.assign(parent, children);
        }
        tracing::debug!(
            association = %self.name,
            parents = parents.len(),
            keys = values.len(),
            "preloaded"
        );
        Ok(())
    }

    // ---- writes -------------------------------------------------------------

    /// Persist a related record: create it when its key is zero, otherwise
    /// insert it, updating only `key_column` (or nothing) when it exists
    pub(crate) async fn save_related(
        &self,
        session: &Session,
        child: &mut C,
        key_column: Option<&str>,
    ) -> Result<()> {
        let pk = &C::schema().primary_key().column;
        if mapper::column_value(&*child, pk)?.is_zero() {
            session.create(child).await?;
            return Ok(());
        }
        let policy = match key_column {
            Some(column) => OnConflict::update_columns([column]),
            None => OnConflict::do_nothing(),
        };
        session.create_with(child, policy).await?;
        Ok(())
    }

    /// Insert a join-table row unless it already exists
    pub(crate) async fn link(
        &self,
        session: &Session,
        owner: &DatabaseValue,
        related: &DatabaseValue,
    ) -> Result<u64> {
        let link = self.link_table()?;
        let stmt = InsertBuilder::new(link.table.clone())
            .value(&link.owner_column, owner.clone())
            .value(&link.related_column, related.clone())
            .on_conflict_do_nothing()
            .build(session.dialect())?;
        session.run_exec(&stmt).await
    }

    // ---- joins ----------------------------------------------------------------

    fn join_clauses(
        &self,
        join_type: JoinType,
        unscoped: bool,
        extra: Option<&Condition>,
    ) -> Result<Vec<JoinClause>> {
        let parent = P::schema().table();
        let schema = C::schema();
        let alias = self.name.clone();

        let mut related_on = match self.kind {
            RelationKind::ManyToMany => Condition::raw(
                format!(
                    "{}.{} = {}__jt.{}",
                    alias,
                    schema.primary_key().column,
                    alias,
                    self.link_table()?.related_column
                ),
                Vec::new(),
            ),
            _ => Condition::raw(
                format!(
                    "{}.{} = {}.{}",
                    alias,
                    self.related_key(),
                    parent,
                    self.owner_key()
                ),
                Vec::new(),
            ),
        };
        if let Some(column) = schema.soft_delete_column() {
            if !unscoped {
                related_on = related_on.and(Condition::is_null(column));
            }
        }
        if let Some(extra) = extra {
            related_on = related_on.and(extra.clone());
        }

        let mut clauses = Vec::with_capacity(2);
        if let Some(link) = &self.join_table {
            let link_alias = format!("{}__jt", alias);
            clauses.push(JoinClause::new(
                join_type,
                link.table.clone(),
                Some(link_alias.clone()),
                Condition::raw(
                    format!(
                        "{}.{} = {}.{}",
                        link_alias,
                        link.owner_column,
                        parent,
                        self.owner_key()
                    ),
                    Vec::new(),
                ),
            ));
        }
        clauses.push(JoinClause::new(
            join_type,
            schema.table(),
            Some(alias),
            related_on,
        ));
        Ok(clauses)
    }

    fn join_columns(&self) -> Vec<String> {
        C::schema()
            .columns()
            .into_iter()
            .map(|column| format!("{0}.{1} AS {0}__{1}", self.name, column))
            .collect()
    }

    /// Decode the aliased columns of each parent's joined rows
    fn attach_joined(&self, parents: &mut [P], groups: &[Vec<&DatabaseRow>]) -> Result<()> {
        let prefix = format!("{}__", self.name);
        let pk = &C::schema().primary_key().column;

        for (parent, rows) in parents.iter_mut().zip(groups) {
            let mut children = Vec::new();
            let mut seen = HashSet::new();
            for row in rows {
                let related: DatabaseRow = row
                    .iter()
                    .filter_map(|(column, value)| {
                        column
                            .strip_prefix(&prefix)
                            .map(|c| (c.to_string(), value.clone()))
                    })
                    .collect();
                // LEFT JOIN without a match
                let Some(key) = related.get(pk).and_then(DatabaseValue::key) else {
                    continue;
                };
                if seen.insert(key) {
                    children.push(scan_model_row::<C>(&related)?);
                }
            }
            self.assign(parent, children);
        }
        Ok(())
    }
}

/// Association loaded by a follow-up query per `find`
#[async_trait]
pub trait Preload<P: Model>: Send + Sync {
    /// Association name, for logs
    fn name(&self) -> &str;

    /// Load the association into every record of `parents`
    async fn load(&self, session: &Session, parents: &mut [P]) -> Result<()>;
}

#[async_trait]
impl<P: Model, C: Model> Preload<P> for Relation<P, C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, session: &Session, parents: &mut [P]) -> Result<()> {
        self.preload_into(session, parents, None, &[]).await
    }
}

/// Preload with a condition on the related rows and/or nested preloads
pub struct PreloadStage<P, C> {
    relation: Relation<P, C>,
    filter: Option<Condition>,
    nested: Vec<Box<dyn Preload<C>>>,
}

impl<P: Model, C: Model> PreloadStage<P, C> {
    pub fn new(relation: Relation<P, C>) -> Self {
        Self {
            relation,
            filter: None,
            nested: Vec::new(),
        }
    }

    /// AND `condition` into the related-rows query
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Preload `nested` on the loaded children
    #[must_use]
    pub fn nested(mut self, nested: impl Preload<C> + 'static) -> Self {
        self.nested.push(Box::new(nested));
        self
    }
}

#[async_trait]
impl<P: Model, C: Model> Preload<P> for PreloadStage<P, C> {
    fn name(&self) -> &str {
        &self.relation.name
    }

    async fn load(&self, session: &Session, parents: &mut [P]) -> Result<()> {
        self.relation
            .preload_into(session, parents, self.filter.as_ref(), &self.nested)
            .await
    }
}

/// Association loaded through JOINs in the main query
///
/// Related columns are selected as `<name>__<column>` and folded back into
/// the parent records.
pub trait Join<P: Model>: Send + Sync {
    fn name(&self) -> &str;

    /// Join type this join asks for, if it overrides the caller's default
    fn join_type(&self) -> Option<JoinType> {
        None
    }

    /// True when one parent can match several joined rows
    fn is_to_many(&self) -> bool;

    /// Extra select-list entries
    fn columns(&self) -> Vec<String>;

    /// JOIN clauses, in order
    fn clauses(&self, join_type: JoinType, unscoped: bool) -> Result<Vec<JoinClause>>;

    /// Fill the association field of each parent from its rows
    fn attach(&self, parents: &mut [P], groups: &[Vec<&DatabaseRow>]) -> Result<()>;
}

impl<P: Model, C: Model> Join<P> for Relation<P, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::HasMany | RelationKind::ManyToMany)
    }

    fn columns(&self) -> Vec<String> {
        self.join_columns()
    }

    fn clauses(&self, join_type: JoinType, unscoped: bool) -> Result<Vec<JoinClause>> {
        self.join_clauses(join_type, unscoped, None)
    }

    fn attach(&self, parents: &mut [P], groups: &[Vec<&DatabaseRow>]) -> Result<()> {
        self.attach_joined(parents, groups)
    }
}

/// Join with an explicit join type and/or extra ON condition
pub struct JoinStage<P, C> {
    relation: Relation<P, C>,
    join_type: Option<JoinType>,
    on: Option<Condition>,
}

impl<P: Model, C: Model> JoinStage<P, C> {
    pub fn new(relation: Relation<P, C>) -> Self {
        Self {
            relation,
            join_type: None,
            on: None,
        }
    }

    #[must_use]
    pub fn inner(mut self) -> Self {
        self.join_type = Some(JoinType::Inner);
        self
    }

    /// AND `condition` into the ON clause of the related table
    #[must_use]
    pub fn on(mut self, condition: Condition) -> Self {
        self.on = Some(match self.on.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }
}

impl<P: Model, C: Model> Join<P> for JoinStage<P, C> {
    fn name(&self) -> &str {
        &self.relation.name
    }

    fn join_type(&self) -> Option<JoinType> {
        self.join_type
    }

    fn is_to_many(&self) -> bool {
        Join::is_to_many(&self.relation)
    }

    fn columns(&self) -> Vec<String> {
        self.relation.join_columns()
    }

    fn clauses(&self, join_type: JoinType, unscoped: bool) -> Result<Vec<JoinClause>> {
        self.relation
            .join_clauses(self.join_type.unwrap_or(join_type), unscoped, self.on.as_ref())
    }

    fn attach(&self, parents: &mut [P], groups: &[Vec<&DatabaseRow>]) -> Result<()> {
        self.relation.attach_joined(parents, groups)
    }
}

/// Association saved together with its owner by
/// [`Session::create_with_associations`](super::session::Session::create_with_associations)
#[async_trait]
pub trait Cascade<P: Model>: Send + Sync {
    /// Runs before the owner is inserted
    async fn before_create(&self, session: &Session, owner: &mut P) -> Result<()>;

    /// Runs after the owner is inserted
    async fn after_create(&self, session: &Session, owner: &mut P) -> Result<()>;
}

#[async_trait]
impl<P: Model, C: Model> Cascade<P> for Relation<P, C> {
    async fn before_create(&self, session: &Session, owner: &mut P) -> Result<()> {
        if self.kind != RelationKind::BelongsTo {
            return Ok(());
        }
        let Some(mut target) = self.current(owner).into_iter().next() else {
            return Ok(());
        };
        self.save_related(session, &mut target, None).await?;
        let key = mapper::column_value(&target, self.related_key())?;
        mapper::set_column(owner, self.owner_key(), &key)?;
        self.assign(owner, vec![target]);
        Ok(())
    }

    async fn after_create(&self, session: &Session, owner: &mut P) -> Result<()> {
        if self.kind == RelationKind::BelongsTo {
            return Ok(());
        }
        let mut children = self.current(owner);
        if children.is_empty() {
            return Ok(());
        }
        let owner_key = mapper::column_value(&*owner, self.owner_key())?;

        for child in children.iter_mut() {
            if self.kind == RelationKind::ManyToMany {
                self.save_related(session, child, None).await?;
                let related = mapper::column_value(&*child, self.related_key())?;
                self.link(session, &owner_key, &related).await?;
            } else {
                mapper::set_column(child, self.related_key(), &owner_key)?;
                self.save_related(session, child, Some(self.related_key()))
                    .await?;
            }
        }
        self.assign(owner, children);
        Ok(())
    }
}
