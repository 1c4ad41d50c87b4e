//! Field and column definitions.

use crate::types::SqlType;

/// Metadata about an entity field and the column it maps onto.
///
/// Built with `const` setters so `#[derive(Entity)]` can place the whole
/// field table in a `static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Value is generated by the database on insert
    pub identity: bool,
    pub unique: bool,
    /// Default value expression (SQL)
    pub default: Option<&'static str>,
    /// Index name if indexed
    pub index: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            identity: false,
            unique: false,
            default: None,
            index: None,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Mark as database-generated. Identity columns are left out of INSERT
    /// statements unless the per-thread override is active.
    pub const fn identity(mut self, value: bool) -> Self {
        self.identity = value;
        self
    }

    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub const fn default_opt(mut self, expr: Option<&'static str>) -> Self {
        self.default = expr;
        self
    }

    pub const fn index_opt(mut self, name: Option<&'static str>) -> Self {
        self.index = name;
        self
    }

    /// The SQL type rendered for DDL and schema comparison.
    pub fn effective_sql_type(&self) -> String {
        self.sql_type.sql_name()
    }
}
