//! WHERE-clause conditions
//!
//! Conditions are structured predicate fragments that render into SQL text
//! with `?` placeholders plus an ordered parameter list. Values are never
//! interpolated into the SQL text.

use super::error::{DatabaseError, Result};
use super::schema::Model;
use super::value::DatabaseValue;
use std::collections::BTreeMap;

/// Positional argument bound to a `?` placeholder.
///
/// A list argument expands its placeholder to `(?, ?, ...)`, so
/// `"id IN ?"` with a three-element list becomes `"id IN (?, ?, ?)"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Single scalar value
    Value(DatabaseValue),
    /// List of values, expanded to a parenthesized placeholder list
    List(Vec<DatabaseValue>),
}

macro_rules! impl_arg_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Value(DatabaseValue::from(v))
                }
            }
        )*
    };
}

impl_arg_from!(bool, i32, i64, f32, f64, String, &str, chrono::DateTime<chrono::Utc>);

impl From<DatabaseValue> for Arg {
    fn from(v: DatabaseValue) -> Self {
        Arg::Value(v)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        Arg::Value(DatabaseValue::from(v))
    }
}

impl<T: Into<DatabaseValue>> From<Vec<T>> for Arg {
    fn from(values: Vec<T>) -> Self {
        Arg::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<DatabaseValue>, const N: usize> From<[T; N]> for Arg {
    fn from(values: [T; N]) -> Self {
        Arg::List(values.into_iter().map(Into::into).collect())
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```
/// use rust_data_mapper::args;
///
/// let args = args!["%User%", 5, vec!["1", "2"]];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::core::condition::Arg>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::core::condition::Arg::from($arg)),+]
    };
}

/// Replace each `?` outside quoted text with the rendering of the matching
/// argument, appending bound values to `params`.
pub(crate) fn expand_placeholders(
    sql: &str,
    args: &[Arg],
    params: &mut Vec<DatabaseValue>,
) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut next = 0usize;
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
                match args.get(next) {
                    Some(Arg::Value(v)) => {
                        out.push('?');
                        params.push(v.clone());
                    }
                    Some(Arg::List(values)) if values.is_empty() => out.push_str("(NULL)"),
                    Some(Arg::List(values)) => {
                        out.push('(');
                        out.push_str(&vec!["?"; values.len()].join(", "));
                        out.push(')');
                        params.extend(values.iter().cloned());
                    }
                    None => {}
                }
                next += 1;
            }
            (None, c) => out.push(c),
        }
    }

    if next != args.len() {
        return Err(DatabaseError::validation(format!(
            "{} placeholders but {} arguments in `{}`",
            next,
            args.len(),
            sql
        )));
    }
    Ok(out)
}

/// True when the fragment has a top-level `AND`/`OR` and needs parentheses
/// when combined with other fragments.
fn has_connective(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word == "AND" || word == "OR")
}

/// Value side of a [`ConditionMap`] entry
#[derive(Debug, Clone, PartialEq)]
pub enum CondValue {
    /// `column = ?` (or `column IS NULL` for a null value)
    Value(DatabaseValue),
    /// `column IN (?, ...)`
    Set(Vec<DatabaseValue>),
}

/// Mapping-based equality conditions, rendered in sorted column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionMap {
    entries: BTreeMap<String, CondValue>,
}

impl ConditionMap {
    /// Create an empty condition map
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column = value`
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.entries
            .insert(column.into(), CondValue::Value(value.into()));
        self
    }

    /// Require `column IN (values...)`
    #[must_use]
    pub fn any_of<T: Into<DatabaseValue>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        self.entries.insert(
            column.into(),
            CondValue::Set(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A structured WHERE predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Raw SQL fragment with positional arguments
    Raw { sql: String, args: Vec<Arg> },
    /// `column = ?`, or `column IS NULL` when the value is null
    Eq { column: String, value: DatabaseValue },
    /// `column IN (?, ...)`
    In {
        column: String,
        values: Vec<DatabaseValue>,
    },
    /// `column IS NULL`
    IsNull(String),
    /// Mapping-based equality
    Map(ConditionMap),
    /// Conjunction; an empty list renders nothing
    All(Vec<Condition>),
    /// Disjunction; an empty list renders nothing
    Any(Vec<Condition>),
    /// Negation of the inner condition
    Not(Box<Condition>),
}

/// Rendered condition text and its parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
    compound: bool,
}

impl Fragment {
    fn simple(sql: String, params: Vec<DatabaseValue>) -> Self {
        Self {
            sql,
            params,
            compound: false,
        }
    }

    /// True when nothing was rendered
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// SQL text, parenthesized when it must not bind to its neighbours
    fn grouped(&self) -> String {
        if self.compound {
            format!("({})", self.sql)
        } else {
            self.sql.clone()
        }
    }
}

fn qualify(column: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(table) if !column.contains('.') => format!("{}.{}", table, column),
        _ => column.to_string(),
    }
}

fn join_fragments(parts: Vec<Fragment>, connective: &str) -> Fragment {
    let parts: Vec<Fragment> = parts.into_iter().filter(|f| !f.is_empty()).collect();
    match parts.len() {
        0 => Fragment::default(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => {
            let sql = parts
                .iter()
                .map(Fragment::grouped)
                .collect::<Vec<_>>()
                .join(connective);
            let params = parts.into_iter().flat_map(|f| f.params).collect();
            Fragment {
                sql,
                params,
                compound: true,
            }
        }
    }
}

impl Condition {
    /// Raw fragment: `Condition::raw("first_name LIKE ?", args!["%User%"])`
    pub fn raw(sql: impl Into<String>, args: Vec<Arg>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            args,
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Condition::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column IN (values...)`
    pub fn is_in<T: Into<DatabaseValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `column LIKE pattern`
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Condition::raw(
            format!("{} LIKE ?", column.into()),
            vec![Arg::from(pattern.into())],
        )
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::IsNull(column.into())
    }

    /// Equality on every non-zero mapped column of `record`.
    ///
    /// Zero values (`""`, `0`, `false`, null) are skipped, so a record with
    /// only `first_name` set filters on `first_name` alone.
    pub fn from_model<M: Model>(record: &M) -> Result<Self> {
        let schema = M::schema();
        let values = super::mapper::column_values(schema, &super::mapper::record_of(record)?);
        Ok(Condition::All(
            values
                .into_iter()
                .filter(|(_, v)| !v.is_zero())
                .map(|(column, value)| Condition::Eq { column, value })
                .collect(),
        ))
    }

    /// Negate this condition
    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Conjunction of `self` and `other`
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::All(mut list) => {
                list.push(other);
                Condition::All(list)
            }
            first => Condition::All(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`
    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Any(mut list) => {
                list.push(other);
                Condition::Any(list)
            }
            first => Condition::Any(vec![first, other]),
        }
    }

    /// Render with `?` placeholders.
    ///
    /// Bare column names in structured variants are prefixed with
    /// `qualifier` when one is given; raw fragments are left untouched.
    pub fn render(&self, qualifier: Option<&str>) -> Result<Fragment> {
        match self {
            Condition::Raw { sql, args } => {
                let mut params = Vec::new();
                let sql = expand_placeholders(sql.trim(), args, &mut params)?;
                let compound = has_connective(&sql);
                Ok(Fragment {
                    sql,
                    params,
                    compound,
                })
            }
            Condition::Eq { column, value } if value.is_null() => Ok(Fragment::simple(
                format!("{} IS NULL", qualify(column, qualifier)),
                Vec::new(),
            )),
            Condition::Eq { column, value } => Ok(Fragment::simple(
                format!("{} = ?", qualify(column, qualifier)),
                vec![value.clone()],
            )),
            Condition::In { column, values } => {
                let mut params = Vec::new();
                let sql = expand_placeholders(
                    &format!("{} IN ?", qualify(column, qualifier)),
                    &[Arg::List(values.clone())],
                    &mut params,
                )?;
                Ok(Fragment::simple(sql, params))
            }
            Condition::IsNull(column) => Ok(Fragment::simple(
                format!("{} IS NULL", qualify(column, qualifier)),
                Vec::new(),
            )),
            Condition::Map(map) => {
                let parts = map
                    .entries
                    .iter()
                    .map(|(column, value)| match value {
                        CondValue::Value(v) => Condition::eq(column.clone(), v.clone()),
                        CondValue::Set(vs) => Condition::is_in(column.clone(), vs.clone()),
                    })
                    .map(|c| c.render(qualifier))
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_fragments(parts, " AND "))
            }
            Condition::All(list) => {
                let parts = list
                    .iter()
                    .map(|c| c.render(qualifier))
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_fragments(parts, " AND "))
            }
            Condition::Any(list) => {
                let parts = list
                    .iter()
                    .map(|c| c.render(qualifier))
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_fragments(parts, " OR "))
            }
            Condition::Not(inner) => {
                let inner = inner.render(qualifier)?;
                if inner.is_empty() {
                    return Ok(inner);
                }
                Ok(Fragment::simple(
                    format!("NOT {}", inner.grouped()),
                    inner.params,
                ))
            }
        }
    }
}

impl From<ConditionMap> for Condition {
    fn from(map: ConditionMap) -> Self {
        Condition::Map(map)
    }
}

/// How a chained condition attaches to the ones before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

/// Ordered chain of conditions joined by `AND`/`OR`, left to right
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    parts: Vec<(Connector, Condition)>,
}

impl WhereClause {
    /// Create an empty clause
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a condition with the given connector
    pub fn push(&mut self, connector: Connector, condition: Condition) {
        self.parts.push((connector, condition));
    }

    /// True when no condition was added
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Render the chain; compound parts are parenthesized.
    pub fn render(&self, qualifier: Option<&str>) -> Result<Fragment> {
        let mut rendered = Vec::with_capacity(self.parts.len());
        for (connector, condition) in &self.parts {
            let fragment = condition.render(qualifier)?;
            if !fragment.is_empty() {
                rendered.push((*connector, fragment));
            }
        }
        if rendered.len() < 2 {
            return Ok(rendered
                .into_iter()
                .next()
                .map(|(_, f)| f)
                .unwrap_or_default());
        }

        let mut sql = String::new();
        let mut params = Vec::new();
        let mut has_or = false;
        for (i, (connector, fragment)) in rendered.into_iter().enumerate() {
            if i > 0 {
                match connector {
                    Connector::And => sql.push_str(" AND "),
                    Connector::Or => {
                        has_or = true;
                        sql.push_str(" OR ");
                    }
                }
            }
            sql.push_str(&fragment.grouped());
            params.extend(fragment.params);
        }
        Ok(Fragment {
            sql,
            params,
            compound: has_or,
        })
    }

    /// Render the chain ANDed with `scope` conditions.
    ///
    /// The caller's chain is parenthesized when it is compound so that a
    /// top-level `OR` cannot escape the scope.
    pub fn render_scoped(&self, scope: &[Condition], qualifier: Option<&str>) -> Result<Fragment> {
        let mut parts = vec![self.render(qualifier)?];
        for condition in scope {
            parts.push(condition.render(qualifier)?);
        }
        let mut fragment = join_fragments(parts, " AND ");
        fragment.compound = false;
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    #[test]
    fn test_list_argument_expands() {
        let fragment = Condition::raw("id IN ?", args![vec!["1", "2"]])
            .render(None)
            .unwrap();
        assert_eq!(fragment.sql, "id IN (?, ?)");
        assert_eq!(fragment.params.len(), 2);

        let fragment = Condition::raw("id IN ?", args![Vec::<i64>::new()])
            .render(None)
            .unwrap();
        assert_eq!(fragment.sql, "id IN (NULL)");
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn test_placeholder_count_mismatch() {
        let err = Condition::raw("id = ? AND name = ?", args!["1"])
            .render(None)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));

        let err = Condition::raw("id = ?", args!["1", "2"])
            .render(None)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn test_quoted_question_marks_are_literal() {
        let fragment = Condition::raw("name = '?' AND id = ?", args![1])
            .render(None)
            .unwrap();
        assert_eq!(fragment.sql, "name = '?' AND id = ?");
        assert_eq!(fragment.params, vec![DatabaseValue::Int(1)]);
    }

    #[test]
    fn test_map_renders_sorted() {
        let map = ConditionMap::new()
            .any_of("first_name", ["User 10", "User 11"])
            .eq("middle_name", "");
        let fragment = Condition::from(map).render(None).unwrap();
        assert_eq!(fragment.sql, "first_name IN (?, ?) AND middle_name = ?");
        assert_eq!(
            fragment.params,
            vec![
                DatabaseValue::from("User 10"),
                DatabaseValue::from("User 11"),
                DatabaseValue::from("")
            ]
        );
    }

    #[test]
    fn test_where_chain_with_or_and_not() {
        let mut clause = WhereClause::new();
        clause.push(
            Connector::And,
            Condition::raw("first_name LIKE ?", args!["%User%"]),
        );
        clause.push(
            Connector::Or,
            Condition::raw("password = ?", args!["rahasia"]),
        );
        let fragment = clause.render(None).unwrap();
        assert_eq!(fragment.sql, "first_name LIKE ? OR password = ?");

        let mut clause = WhereClause::new();
        clause.push(
            Connector::And,
            Condition::raw("first_name LIKE ?", args!["%User%"]).not(),
        );
        clause.push(Connector::And, Condition::eq("password", "rahasia"));
        let fragment = clause.render(None).unwrap();
        assert_eq!(fragment.sql, "NOT first_name LIKE ? AND password = ?");
    }

    #[test]
    fn test_raw_with_connective_is_parenthesized() {
        let mut clause = WhereClause::new();
        clause.push(Connector::And, Condition::raw("a = ? OR b = ?", args![1, 2]));
        clause.push(Connector::And, Condition::eq("c", 3));
        let fragment = clause.render(None).unwrap();
        assert_eq!(fragment.sql, "(a = ? OR b = ?) AND c = ?");
    }

    #[test]
    fn test_scope_is_anded_outside_user_or() {
        let mut clause = WhereClause::new();
        clause.push(Connector::And, Condition::eq("a", 1));
        clause.push(Connector::Or, Condition::eq("b", 2));
        let fragment = clause
            .render_scoped(&[Condition::is_null("deleted_at")], Some("todos"))
            .unwrap();
        assert_eq!(
            fragment.sql,
            "(todos.a = ? OR todos.b = ?) AND todos.deleted_at IS NULL"
        );
    }

    #[test]
    fn test_empty_conditions_render_nothing() {
        let clause = WhereClause::new();
        assert!(clause.render(None).unwrap().is_empty());
        assert!(Condition::All(vec![]).render(None).unwrap().is_empty());
        let fragment = clause
            .render_scoped(&[Condition::is_null("deleted_at")], None)
            .unwrap();
        assert_eq!(fragment.sql, "deleted_at IS NULL");
    }

    #[test]
    fn test_null_equality_renders_is_null() {
        let fragment = Condition::eq("middle_name", Option::<String>::None)
            .render(None)
            .unwrap();
        assert_eq!(fragment.sql, "middle_name IS NULL");
        assert!(fragment.params.is_empty());
    }
}
