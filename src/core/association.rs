//! Association mode
//!
//! Explicit operations on one owner's association: find, count, append,
//! replace, delete and clear. They only touch link rows (foreign-key
//! columns or join-table rows); other columns of the owner and of existing
//! related rows are left alone. Related records with a zero key are created
//! by `append` and `replace`. The owner's in-memory association field is
//! kept in step with what was written.

use super::condition::{Arg, Condition};
use super::error::{DatabaseError, Result};
use super::mapper;
use super::query_builder::{DeleteBuilder, JoinClause, JoinType, SelectBuilder, UpdateBuilder};
use super::relation::{JoinTable, Relation, RelationKind};
use super::schema::Model;
use super::session::Session;
use super::value::DatabaseValue;
use std::collections::HashSet;

/// Association-mode handle returned by
/// [`Session::association`](super::session::Session::association)
///
/// ```ignore
/// session.association(&mut user, User::like_products())
///     .append(&mut [product_1, product_2])
///     .await?;
/// ```
pub struct Association<'a, P: Model, C: Model> {
    session: &'a Session,
    owner: &'a mut P,
    relation: Relation<P, C>,
}

impl<'a, P: Model, C: Model> Association<'a, P, C> {
    pub(crate) fn new(session: &'a Session, owner: &'a mut P, relation: Relation<P, C>) -> Self {
        Self {
            session,
            owner,
            relation,
        }
    }

    /// Related records currently linked to the owner
    pub async fn find(&self) -> Result<Vec<C>> {
        let key = mapper::column_value(&*self.owner, self.relation.owner_key())?;
        if key.is_zero() {
            return Ok(Vec::new());
        }
        Ok(self
            .relation
            .fetch(self.session, &[key], None)
            .await?
            .into_iter()
            .map(|(_, child)| child)
            .collect())
    }

    /// Number of related records currently linked to the owner
    pub async fn count(&self) -> Result<u64> {
        let key = mapper::column_value(&*self.owner, self.relation.owner_key())?;
        if key.is_zero() {
            return Ok(0);
        }
        if self.relation.kind() != RelationKind::ManyToMany {
            return self
                .session
                .query::<C>()
                .where_eq(self.relation.related_key(), key)
                .count()
                .await;
        }

        let link = link_table(&self.relation)?;
        let schema = C::schema();
        let mut select = SelectBuilder::new(schema.table())
            .columns(&["COUNT(*) AS count"])
            .join(JoinClause::new(
                JoinType::Inner,
                link.table.clone(),
                None,
                Condition::raw(
                    format!(
                        "{}.{} = {}.{}",
                        link.table,
                        link.related_column,
                        schema.table(),
                        schema.primary_key().column
                    ),
                    Vec::new(),
                ),
            ))
            .where_cond(Condition::eq(
                format!("{}.{}", link.table, link.owner_column),
                key,
            ));
        if let Some(column) = schema.soft_delete_column() {
            if !self.session.is_unscoped() {
                select = select.scope(Condition::is_null(column));
            }
        }
        let rows = self
            .session
            .run_query(&select.build(self.session.dialect())?)
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(DatabaseValue::as_long)
            .unwrap_or(0)
            .max(0) as u64)
    }

    /// Link `children` to the owner, keeping existing links
    ///
    /// For has-one and belongs-to the last child replaces the current one.
    pub async fn append(&mut self, children: &mut [C]) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }
        let relation = &self.relation;
        let owner = &mut *self.owner;
        self.session
            .transaction(|tx| async move { append_in(&tx, relation, owner, children, false).await })
            .await
    }

    /// Make `children` the complete set of linked records
    ///
    /// Records no longer linked are unlinked, not deleted.
    pub async fn replace(&mut self, children: &mut [C]) -> Result<()> {
        if children.is_empty() {
            self.clear().await?;
            return Ok(());
        }
        let relation = &self.relation;
        let owner = &mut *self.owner;
        self.session
            .transaction(|tx| async move {
                append_in(&tx, relation, owner, children, true).await?;
                unlink_others(&tx, relation, owner, children).await
            })
            .await
    }

    /// Unlink `children` from the owner; returns the number of links removed
    pub async fn delete(&mut self, children: &[C]) -> Result<u64> {
        if children.is_empty() {
            return Ok(0);
        }
        let relation = &self.relation;
        let session = self.session;
        let pk = C::schema().primary_key().column.as_str();
        let keys = children
            .iter()
            .map(|c| mapper::column_value(c, pk))
            .collect::<Result<Vec<_>>>()?;
        let removed: HashSet<String> = keys.iter().filter_map(DatabaseValue::key).collect();
        let owner_key = mapper::column_value(&*self.owner, relation.owner_key())?;

        let affected = match relation.kind() {
            RelationKind::ManyToMany => {
                let link = link_table(relation)?;
                let stmt = DeleteBuilder::new(link.table.clone())
                    .where_eq(&link.owner_column, owner_key)
                    .where_cond(Condition::is_in(link.related_column.clone(), keys))
                    .build(session.dialect())?;
                session.run_exec(&stmt).await?
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let stmt = UpdateBuilder::new(C::schema().table())
                    .set(relation.related_key(), DatabaseValue::Null)
                    .where_eq(relation.related_key(), owner_key)
                    .where_cond(Condition::is_in(pk, keys))
                    .build(session.dialect())?;
                session.run_exec(&stmt).await?
            }
            RelationKind::BelongsTo => {
                let targets: HashSet<String> = children
                    .iter()
                    .map(|c| mapper::column_value(c, relation.related_key()))
                    .collect::<Result<Vec<_>>>()?
                    .iter()
                    .filter_map(DatabaseValue::key)
                    .collect();
                match owner_key.key() {
                    Some(current) if targets.contains(&current) => {
                        unlink_owner(session, relation, &mut *self.owner).await?
                    }
                    _ => 0,
                }
            }
        };

        let kept: Vec<C> = relation
            .current(&*self.owner)
            .into_iter()
            .filter(|c| {
                mapper::column_value(c, pk)
                    .ok()
                    .and_then(|v| v.key())
                    .map_or(true, |k| !removed.contains(&k))
            })
            .collect();
        relation.assign(&mut *self.owner, kept);
        Ok(affected)
    }

    /// Unlink every related record; returns the number of links removed
    pub async fn clear(&mut self) -> Result<u64> {
        let relation = &self.relation;
        let session = self.session;
        let owner_key = mapper::column_value(&*self.owner, relation.owner_key())?;

        let affected = match relation.kind() {
            RelationKind::ManyToMany => {
                let link = link_table(relation)?;
                let stmt = DeleteBuilder::new(link.table.clone())
                    .where_eq(&link.owner_column, owner_key)
                    .build(session.dialect())?;
                session.run_exec(&stmt).await?
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let stmt = UpdateBuilder::new(C::schema().table())
                    .set(relation.related_key(), DatabaseValue::Null)
                    .where_eq(relation.related_key(), owner_key)
                    .build(session.dialect())?;
                session.run_exec(&stmt).await?
            }
            RelationKind::BelongsTo if owner_key.is_null() => 0,
            RelationKind::BelongsTo => unlink_owner(session, relation, &mut *self.owner).await?,
        };
        relation.assign(&mut *self.owner, Vec::new());
        Ok(affected)
    }
}

fn link_table<P: Model, C: Model>(relation: &Relation<P, C>) -> Result<&JoinTable> {
    relation.join_table().ok_or_else(|| {
        DatabaseError::validation(format!("association {} has no join table", relation.name()))
    })
}

fn saved_owner_key<P: Model, C: Model>(relation: &Relation<P, C>, owner: &P) -> Result<DatabaseValue> {
    let key = mapper::column_value(owner, relation.owner_key())?;
    if key.is_zero() {
        return Err(DatabaseError::validation(format!(
            "association {} needs a saved owner",
            relation.name()
        )));
    }
    Ok(key)
}

/// Null the owner's foreign key of a belongs-to association
async fn unlink_owner<P: Model, C: Model>(
    session: &Session,
    relation: &Relation<P, C>,
    owner: &mut P,
) -> Result<u64> {
    let schema = P::schema();
    let pk = &schema.primary_key().column;
    let stmt = UpdateBuilder::new(schema.table())
        .set(relation.owner_key(), DatabaseValue::Null)
        .where_eq(pk, mapper::column_value(&*owner, pk)?)
        .build(session.dialect())?;
    let affected = session.run_exec(&stmt).await?;
    mapper::set_column(owner, relation.owner_key(), &DatabaseValue::Null)?;
    Ok(affected)
}

async fn append_in<P: Model, C: Model>(
    session: &Session,
    relation: &Relation<P, C>,
    owner: &mut P,
    children: &mut [C],
    replace: bool,
) -> Result<()> {
    match relation.kind() {
        RelationKind::BelongsTo => {
            let Some(target) = children.last_mut() else {
                return Ok(());
            };
            relation.save_related(session, target, None).await?;
            let key = mapper::column_value(&*target, relation.related_key())?;
            let schema = P::schema();
            let pk = &schema.primary_key().column;
            let stmt = UpdateBuilder::new(schema.table())
                .set(relation.owner_key(), key.clone())
                .where_eq(pk, saved_owner_key_of(owner, pk)?)
                .build(session.dialect())?;
            session.run_exec(&stmt).await?;
            mapper::set_column(owner, relation.owner_key(), &key)?;
            relation.assign(owner, vec![target.clone()]);
        }
        RelationKind::HasOne => {
            let owner_key = saved_owner_key(relation, owner)?;
            let Some(child) = children.last_mut() else {
                return Ok(());
            };
            let stmt = UpdateBuilder::new(C::schema().table())
                .set(relation.related_key(), DatabaseValue::Null)
                .where_eq(relation.related_key(), owner_key.clone())
                .build(session.dialect())?;
            session.run_exec(&stmt).await?;
            mapper::set_column(child, relation.related_key(), &owner_key)?;
            relation
                .save_related(session, child, Some(relation.related_key()))
                .await?;
            relation.assign(owner, vec![child.clone()]);
        }
        RelationKind::HasMany => {
            let owner_key = saved_owner_key(relation, owner)?;
            for child in children.iter_mut() {
                mapper::set_column(child, relation.related_key(), &owner_key)?;
                relation
                    .save_related(session, child, Some(relation.related_key()))
                    .await?;
            }
            remember(relation, owner, children, replace)?;
        }
        RelationKind::ManyToMany => {
            let owner_key = saved_owner_key(relation, owner)?;
            for child in children.iter_mut() {
                relation.save_related(session, child, None).await?;
                let related = mapper::column_value(&*child, relation.related_key())?;
                relation.link(session, &owner_key, &related).await?;
            }
            remember(relation, owner, children, replace)?;
        }
    }
    Ok(())
}

fn saved_owner_key_of<P: Model>(owner: &P, pk: &str) -> Result<DatabaseValue> {
    let key = mapper::column_value(owner, pk)?;
    if key.is_zero() {
        return Err(DatabaseError::validation(format!(
            "{} record needs a primary key",
            P::schema().table()
        )));
    }
    Ok(key)
}

/// Merge `added` into the owner's loaded children, replacing entries with
/// the same key
fn remember<P: Model, C: Model>(
    relation: &Relation<P, C>,
    owner: &mut P,
    added: &[C],
    replace: bool,
) -> Result<()> {
    if replace {
        relation.assign(owner, added.to_vec());
        return Ok(());
    }
    let pk = C::schema().primary_key().column.as_str();
    let added_keys: HashSet<String> = added
        .iter()
        .map(|c| mapper::column_value(c, pk))
        .collect::<Result<Vec<_>>>()?
        .iter()
        .filter_map(DatabaseValue::key)
        .collect();
    let mut merged: Vec<C> = relation
        .current(owner)
        .into_iter()
        .filter(|c| {
            mapper::column_value(c, pk)
                .ok()
                .and_then(|v| v.key())
                .map_or(true, |k| !added_keys.contains(&k))
        })
        .collect();
    merged.extend(added.iter().cloned());
    relation.assign(owner, merged);
    Ok(())
}

/// Unlink every related record of the owner that is not in `kept`
async fn unlink_others<P: Model, C: Model>(
    session: &Session,
    relation: &Relation<P, C>,
    owner: &mut P,
    kept: &[C],
) -> Result<()> {
    let pk = C::schema().primary_key().column.as_str();
    let keys = kept
        .iter()
        .map(|c| mapper::column_value(c, pk))
        .collect::<Result<Vec<_>>>()?;

    let stmt = match relation.kind() {
        // Single-valued associations were already replaced by append
        RelationKind::BelongsTo | RelationKind::HasOne => return Ok(()),
        RelationKind::HasMany => UpdateBuilder::new(C::schema().table())
            .set(relation.related_key(), DatabaseValue::Null)
            .where_eq(relation.related_key(), saved_owner_key(relation, owner)?)
            .where_cond(Condition::raw(format!("{} NOT IN ?", pk), vec![Arg::List(keys)]))
            .build(session.dialect())?,
        RelationKind::ManyToMany => {
            let link = link_table(relation)?;
            DeleteBuilder::new(link.table.clone())
                .where_eq(&link.owner_column, saved_owner_key(relation, owner)?)
                .where_cond(Condition::raw(
                    format!("{} NOT IN ?", link.related_column),
                    vec![Arg::List(keys)],
                ))
                .build(session.dialect())?
        }
    };
    session.run_exec(&stmt).await?;
    Ok(())
}
