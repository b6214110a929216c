//! Record schemas
//!
//! A [`Schema`] describes how a record type maps onto a table: the table
//! name, the field to column mapping, the primary key and the columns the
//! layer manages itself (auto-increment keys, timestamps, soft delete).
//! It is built once per type and handed out as a `&'static` reference.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Mapping of one record field onto a table column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field name as it appears in the record's serialized form
    pub name: String,
    /// Column name in the table
    pub column: String,
    pub primary_key: bool,
    /// Key value is assigned by the database when the record has a zero key
    pub auto_increment: bool,
    /// Set to the current time on create when zero
    pub auto_create_time: bool,
    /// Set to the current time on create (when zero), save and update
    pub auto_update_time: bool,
    /// Written on create, never updated afterwards
    pub create_only: bool,
    /// Nullable deletion timestamp marking a soft-deleted row
    pub soft_delete: bool,
}

impl FieldInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            column: to_snake_case(name),
            primary_key: false,
            auto_increment: false,
            auto_create_time: false,
            auto_update_time: false,
            create_only: false,
            soft_delete: false,
        }
    }

    /// True when an upsert may overwrite this column
    pub fn updatable(&self) -> bool {
        !self.primary_key && !self.create_only && !(self.auto_create_time && !self.auto_update_time)
    }
}

/// Table mapping of a record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    table: String,
    fields: Vec<FieldInfo>,
    primary_key: usize,
}

impl Schema {
    /// Start describing the mapping for `table`
    ///
    /// # Example
    ///
    /// ```
    /// use rust_data_mapper::Schema;
    ///
    /// let schema = Schema::builder("user_logs")
    ///     .field("id").primary_key().auto_increment()
    ///     .field("user_id")
    ///     .field("action")
    ///     .field("created_at").auto_create_time().create_only()
    ///     .field("updated_at").auto_create_time().auto_update_time()
    ///     .build();
    ///
    /// assert_eq!(schema.primary_key().column, "id");
    /// assert!(schema.primary_key().auto_increment);
    /// ```
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Mapped fields in declaration order
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Primary key field
    pub fn primary_key(&self) -> &FieldInfo {
        &self.fields[self.primary_key]
    }

    /// Field mapped to `column`
    pub fn field_by_column(&self, column: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Field with the given record name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True when `column` is mapped
    pub fn has_column(&self, column: &str) -> bool {
        self.field_by_column(column).is_some()
    }

    /// Soft-delete column, if the record type has one
    pub fn soft_delete_column(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.soft_delete)
            .map(|f| f.column.as_str())
    }

    /// Column names in declaration order
    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.column.as_str()).collect()
    }
}

/// Builder returned by [`Schema::builder`].
///
/// Modifiers apply to the most recently added field.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    fields: Vec<FieldInfo>,
}

impl SchemaBuilder {
    /// Map a field; the column defaults to the snake_case field name
    #[must_use]
    pub fn field(mut self, name: &str) -> Self {
        self.fields.push(FieldInfo::new(name));
        self
    }

    fn last(mut self, apply: impl FnOnce(&mut FieldInfo)) -> Self {
        if let Some(field) = self.fields.last_mut() {
            apply(field);
        }
        self
    }

    /// Override the column name
    #[must_use]
    pub fn column(self, column: &str) -> Self {
        self.last(|f| f.column = column.to_string())
    }

    #[must_use]
    pub fn primary_key(self) -> Self {
        self.last(|f| f.primary_key = true)
    }

    #[must_use]
    pub fn auto_increment(self) -> Self {
        self.last(|f| f.auto_increment = true)
    }

    #[must_use]
    pub fn auto_create_time(self) -> Self {
        self.last(|f| f.auto_create_time = true)
    }

    #[must_use]
    pub fn auto_update_time(self) -> Self {
        self.last(|f| f.auto_update_time = true)
    }

    #[must_use]
    pub fn create_only(self) -> Self {
        self.last(|f| f.create_only = true)
    }

    #[must_use]
    pub fn soft_delete(self) -> Self {
        self.last(|f| f.soft_delete = true)
    }

    /// Finish the schema.
    ///
    /// Without an explicit primary key, a field named `id` is used, and
    /// failing that the first field.
    ///
    /// # Panics
    ///
    /// Panics when no field was declared; a schema is static configuration.
    pub fn build(mut self) -> Schema {
        assert!(
            !self.fields.is_empty(),
            "schema for {} declares no fields",
            self.table
        );
        let primary_key = self
            .fields
            .iter()
            .position(|f| f.primary_key)
            .or_else(|| self.fields.iter().position(|f| f.name == "id"))
            .unwrap_or(0);
        self.fields[primary_key].primary_key = true;

        Schema {
            table: self.table,
            fields: self.fields,
            primary_key,
        }
    }
}

/// A record type mapped onto a table.
///
/// The serialized form must be a flat map of field names (nested structs
/// may be `#[serde(flatten)]`ed). Records should carry
/// `#[serde(default)]` so that projections and association fields absent
/// from a row fall back to their zero values.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Mapping of this type, built once
    fn schema() -> &'static Schema;
}

/// Convert `FirstName` / `firstName` into `first_name`
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("first_name"), "first_name");
        assert_eq!(to_snake_case("FirstName"), "first_name");
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("ID"), "id");
        assert_eq!(to_snake_case("UserID"), "user_id");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
    }

    #[test]
    fn test_primary_key_inference() {
        let schema = Schema::builder("samples").field("name").field("id").build();
        assert_eq!(schema.primary_key().name, "id");

        let schema = Schema::builder("products")
            .field("code")
            .primary_key()
            .field("id")
            .build();
        assert_eq!(schema.primary_key().name, "code");
        assert!(!schema.field_by_name("id").unwrap().primary_key);
    }

    #[test]
    fn test_column_override_and_soft_delete() {
        let schema = Schema::builder("todos")
            .field("id")
            .field("ownerRef")
            .column("user_id")
            .field("deleted_at")
            .soft_delete()
            .build();

        assert_eq!(schema.field_by_name("ownerRef").unwrap().column, "user_id");
        assert_eq!(schema.field_by_column("user_id").unwrap().name, "ownerRef");
        assert_eq!(schema.soft_delete_column(), Some("deleted_at"));
        assert_eq!(schema.columns(), vec!["id", "user_id", "deleted_at"]);
    }

    #[test]
    fn test_updatable_columns() {
        let schema = Schema::builder("user_logs")
            .field("id")
            .auto_increment()
            .field("action")
            .field("created_at")
            .auto_create_time()
            .field("updated_at")
            .auto_create_time()
            .auto_update_time()
            .field("origin")
            .create_only()
            .build();

        let updatable: Vec<&str> = schema
            .fields()
            .iter()
            .filter(|f| f.updatable())
            .map(|f| f.column.as_str())
            .collect();
        assert_eq!(updatable, vec!["action", "updated_at"]);
    }
}
