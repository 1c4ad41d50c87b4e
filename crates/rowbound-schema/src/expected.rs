//! Expected table definitions derived from entity metadata.

use rowbound_core::{Entity, FieldInfo};

use crate::introspect::{ColumnInfo, IndexInfo, TableInfo};

/// Extension trait that adds schema extraction to entity types.
///
/// ```ignore
/// use rowbound_schema::EntitySchema;
///
/// let expected = Hero::table_schema("heroes_archive");
/// assert_eq!(expected.name, "heroes_archive");
/// ```
pub trait EntitySchema: Entity {
    /// Expected definition of the table this entity maps onto, under `table_name`.
    fn table_schema(table_name: &str) -> TableInfo {
        table_schema_from_fields(table_name, Self::fields())
    }
}

impl<E: Entity> EntitySchema for E {}

/// Convert field metadata to a [`TableInfo`].
///
/// Unique fields become unique indexes named `uk_<table>_<column>`; indexed
/// fields contribute to the named index, so several fields sharing an index
/// name produce one composite index.
pub fn table_schema_from_fields(table_name: &str, fields: &[FieldInfo]) -> TableInfo {
    let mut table = TableInfo::new(table_name);

    for field in fields {
        table.columns.push(ColumnInfo {
            name: field.column_name.to_string(),
            sql_type: field.effective_sql_type(),
            nullable: field.nullable,
            default: field.default.map(String::from),
            primary_key: field.primary_key,
            auto_increment: field.identity,
        });

        if field.primary_key {
            table.primary_key.push(field.column_name.to_string());
        }

        if field.unique && !field.primary_key {
            table.indexes.push(IndexInfo {
                name: format!("uk_{}_{}", table_name, field.column_name),
                columns: vec![field.column_name.to_string()],
                unique: true,
            });
        }

        if let Some(idx_name) = field.index {
            match table.indexes.iter_mut().find(|i| i.name == idx_name) {
                Some(existing) => existing.columns.push(field.column_name.to_string()),
                None => table.indexes.push(IndexInfo {
                    name: idx_name.to_string(),
                    columns: vec![field.column_name.to_string()],
                    unique: false,
                }),
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbound_core::SqlType;

    static FIELDS: &[FieldInfo] = &[
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .identity(true),
        FieldInfo::new("email", "email", SqlType::VarChar(120)).unique(true),
        FieldInfo::new("first", "first_name", SqlType::Text).index_opt(Some("idx_person_name")),
        FieldInfo::new("last", "last_name", SqlType::Text).index_opt(Some("idx_person_name")),
        FieldInfo::new("age", "age", SqlType::Integer)
            .nullable(true)
            .default_opt(Some("0")),
    ];

    #[test]
    fn test_columns_and_primary_key() {
        let table = table_schema_from_fields("people", FIELDS);
        assert_eq!(table.name, "people");
        assert_eq!(table.primary_key, vec!["id".to_string()]);
        assert!(table.has_auto_pk());

        let age = table.column("age").unwrap();
        assert!(age.nullable);
        assert_eq!(age.default.as_deref(), Some("0"));
        assert_eq!(table.column("email").unwrap().sql_type, "VARCHAR(120)");
    }

    #[test]
    fn test_indexes_from_fields() {
        let table = table_schema_from_fields("people", FIELDS);

        let unique = table.index("uk_people_email").unwrap();
        assert!(unique.unique);

        let composite = table.index("idx_person_name").unwrap();
        assert_eq!(
            composite.columns,
            vec!["first_name".to_string(), "last_name".to_string()]
        );
        assert!(!composite.unique);
    }
}
