//! Entity trait for mapping structs onto table rows.
//!
//! An [`Entity`] describes its columns through a static [`FieldInfo`] table
//! and reads/writes them through a parallel [`Accessor`] table, so the
//! runtime never needs reflection. Both tables are usually generated by
//! `#[derive(Entity)]` from `rowbound-macros`.

use crate::Result;
use crate::dirty::DirtySet;
use crate::error::{ConfigErrorKind, Error};
use crate::field::FieldInfo;
use crate::row::Row;
use crate::value::Value;

/// Getter/setter pair for one field, positionally aligned with
/// `Entity::fields()`.
pub struct Accessor<E> {
    pub get: fn(&E) -> Value,
    pub set: fn(&mut E, Value) -> Result<()>,
}

/// Trait for types persisted through an entity session.
///
/// # Example
///
/// ```ignore
/// use rowbound::Entity;
///
/// #[derive(Debug, Clone, Default, Entity)]
/// #[entity(table = "heroes", connection = "main")]
/// struct Hero {
///     #[entity(primary_key, identity)]
///     id: i64,
///     name: String,
///     age: Option<i32>,
///     #[entity(dirty)]
///     dirty: DirtySet,
/// }
/// ```
pub trait Entity: Clone + Default + Send + Sync + 'static {
    /// Default table name.
    const TABLE_NAME: &'static str;

    /// Default connection name.
    const CONNECTION_NAME: &'static str;

    /// Get field metadata for all columns.
    fn fields() -> &'static [FieldInfo];

    /// Accessors aligned with [`Entity::fields`].
    fn accessors() -> &'static [Accessor<Self>];

    fn dirty(&self) -> &DirtySet;

    fn dirty_mut(&mut self) -> &mut DirtySet;

    /// One-time type initialization hook, run on first use of the type.
    ///
    /// May register a custom operate object or touch other entity types.
    /// It can run more than once under contention and must tolerate that.
    fn initialize() {}

    /// Position of a field by Rust name or column name.
    fn field_index(name: &str) -> Option<usize> {
        Self::fields()
            .iter()
            .position(|f| f.name == name || f.column_name == name)
    }

    fn field(name: &str) -> Option<&'static FieldInfo> {
        Self::field_index(name).map(|i| &Self::fields()[i])
    }

    /// Read a field by name.
    fn get_value(&self, name: &str) -> Option<Value> {
        let idx = Self::field_index(name)?;
        Self::accessors().get(idx).map(|a| (a.get)(self))
    }

    /// Assign a field by name, marking it dirty when the value changes.
    ///
    /// Returns whether the stored value changed.
    fn set_value(&mut self, name: &str, value: Value) -> Result<bool> {
        let idx = field_position::<Self>(name)?;
        let accessor = accessor_at::<Self>(idx)?;
        if (accessor.get)(self) == value {
            return Ok(false);
        }
        (accessor.set)(self, value).map_err(|e| e.with_column(Self::fields()[idx].column_name))?;
        self.dirty_mut().mark(idx);
        Ok(true)
    }

    /// Assign a field by name without marking it dirty (loading path).
    fn load_value(&mut self, name: &str, value: Value) -> Result<()> {
        let idx = field_position::<Self>(name)?;
        let accessor = accessor_at::<Self>(idx)?;
        (accessor.set)(self, value).map_err(|e| e.with_column(Self::fields()[idx].column_name))
    }

    fn is_dirty(&self, name: &str) -> bool {
        Self::field_index(name).is_some_and(|i| self.dirty().is_marked(i))
    }

    fn has_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    /// Fields changed since load or last persist, in declaration order.
    fn dirty_fields(&self) -> Vec<&'static FieldInfo> {
        let fields = Self::fields();
        self.dirty().iter().filter_map(|i| fields.get(i)).collect()
    }

    fn clear_dirty(&mut self) {
        self.dirty_mut().clear();
    }

    fn primary_key_fields() -> Vec<&'static FieldInfo> {
        Self::fields().iter().filter(|f| f.primary_key).collect()
    }

    fn identity_field() -> Option<&'static FieldInfo> {
        Self::fields().iter().find(|f| f.identity)
    }

    /// Get the value of the primary key field(s).
    fn primary_key_value(&self) -> Vec<Value> {
        let accessors = Self::accessors();
        Self::fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .filter_map(|(i, _)| accessors.get(i).map(|a| (a.get)(self)))
            .collect()
    }

    /// Check if this is a new record: identity unassigned, or every key
    /// column NULL when there is no identity.
    fn is_new(&self) -> bool {
        if let Some(identity) = Self::identity_field() {
            return self
                .get_value(identity.name)
                .is_none_or(|v| v.is_unset_identity());
        }
        self.primary_key_value().iter().all(Value::is_null)
    }

    /// Convert this instance to (column, value) pairs.
    fn to_row(&self) -> Vec<(&'static str, Value)> {
        Self::fields()
            .iter()
            .zip(Self::accessors())
            .map(|(f, a)| (f.column_name, (a.get)(self)))
            .collect()
    }

    /// Construct an instance from a row. Columns the row lacks keep their
    /// default; the result has no dirty fields.
    fn from_row(row: &Row) -> Result<Self> {
        let mut entity = Self::default();
        for (field, accessor) in Self::fields().iter().zip(Self::accessors()) {
            if let Some(value) = row.get_by_name(field.column_name) {
                (accessor.set)(&mut entity, value.clone())
                    .map_err(|e| e.with_column(field.column_name))?;
            }
        }
        entity.dirty_mut().clear();
        Ok(entity)
    }
}

fn field_position<E: Entity>(name: &str) -> Result<usize> {
    E::field_index(name).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::UnknownColumn,
            format!(
                "entity `{}` has no field `{}`",
                std::any::type_name::<E>(),
                name
            ),
        )
    })
}

fn accessor_at<E: Entity>(idx: usize) -> Result<&'static Accessor<E>> {
    E::accessors().get(idx).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::InvalidEntity,
            format!(
                "entity `{}` declares {} fields but {} accessors",
                std::any::type_name::<E>(),
                E::fields().len(),
                E::accessors().len()
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    #[derive(Debug, Clone, Default)]
    struct Hero {
        id: i64,
        name: String,
        age: Option<i32>,
        dirty: DirtySet,
    }

    static FIELDS: &[FieldInfo] = &[
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .identity(true),
        FieldInfo::new("name", "hero_name", SqlType::Text),
        FieldInfo::new("age", "age", SqlType::Integer).nullable(true),
    ];

    static ACCESSORS: &[Accessor<Hero>] = &[
        Accessor {
            get: |h: &Hero| Value::from(h.id),
            set: |h: &mut Hero, v| {
                h.id = i64::try_from(v)?;
                Ok(())
            },
        },
        Accessor {
            get: |h: &Hero| Value::from(h.name.clone()),
            set: |h: &mut Hero, v| {
                h.name = String::try_from(v)?;
                Ok(())
            },
        },
        Accessor {
            get: |h: &Hero| Value::from(h.age),
            set: |h: &mut Hero, v| {
                h.age = Option::<i32>::try_from(v)?;
                Ok(())
            },
        },
    ];

    impl Entity for Hero {
        const TABLE_NAME: &'static str = "heroes";
        const CONNECTION_NAME: &'static str = "main";

        fn fields() -> &'static [FieldInfo] {
            FIELDS
        }

        fn accessors() -> &'static [Accessor<Self>] {
            ACCESSORS
        }

        fn dirty(&self) -> &DirtySet {
            &self.dirty
        }

        fn dirty_mut(&mut self) -> &mut DirtySet {
            &mut self.dirty
        }
    }

    #[test]
    fn test_set_value_marks_only_changes() {
        let mut hero = Hero {
            name: "Deadpond".to_string(),
            ..Hero::default()
        };

        assert!(!hero.set_value("name", Value::from("Deadpond")).unwrap());
        assert!(!hero.has_dirty());

        assert!(hero.set_value("age", Value::Int(30)).unwrap());
        assert!(hero.is_dirty("age"));
        assert!(!hero.is_dirty("name"));
        assert_eq!(
            hero.dirty_fields().iter().map(|f| f.name).collect::<Vec<_>>(),
            vec!["age"]
        );
    }

    #[test]
    fn test_set_value_by_column_name() {
        let mut hero = Hero::default();
        hero.set_value("hero_name", Value::from("Rusty")).unwrap();
        assert_eq!(hero.name, "Rusty");
        assert!(hero.is_dirty("name"));
    }

    #[test]
    fn test_unknown_field_is_config_error() {
        let mut hero = Hero::default();
        let err = hero.set_value("power", Value::Int(1)).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownColumn));
    }

    #[test]
    fn test_type_mismatch_names_column() {
        let mut hero = Hero::default();
        let err = hero.set_value("age", Value::from("old")).unwrap_err();
        assert!(err.to_string().contains("'age'"));
        assert!(!hero.has_dirty());
    }

    #[test]
    fn test_is_new_follows_identity() {
        let mut hero = Hero::default();
        assert!(hero.is_new());
        hero.load_value("id", Value::BigInt(7)).unwrap();
        assert!(!hero.is_new());
        assert!(!hero.has_dirty());
        assert_eq!(hero.primary_key_value(), vec![Value::BigInt(7)]);
    }

    #[test]
    fn test_row_round_trip_clears_dirty() {
        let row = Row::new(
            vec!["id".to_string(), "hero_name".to_string(), "age".to_string()],
            vec![Value::BigInt(3), Value::from("Spider-Boy"), Value::Null],
        );
        let hero = Hero::from_row(&row).unwrap();
        assert_eq!(hero.id, 3);
        assert_eq!(hero.name, "Spider-Boy");
        assert_eq!(hero.age, None);
        assert!(!hero.has_dirty());

        let pairs = hero.to_row();
        assert_eq!(pairs[1], ("hero_name", Value::from("Spider-Boy")));
    }
}
