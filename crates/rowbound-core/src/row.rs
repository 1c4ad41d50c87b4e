//! Result rows handed back by a [`Database`](crate::Database).

use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;

/// Column names shared by every row of one result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnSet {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnSet>,
}

impl Row {
    /// Create a row with its own column set.
    ///
    /// Drivers producing many rows should build one `Arc<ColumnSet>` and use
    /// [`Row::with_columns`].
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnSet::new(column_names)),
        }
    }

    pub fn with_columns(columns: Arc<ColumnSet>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn columns(&self) -> Arc<ColumnSet> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column name.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::try_from(value.clone()).map_err(|e| e.with_column(name))
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero_row() -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "age".to_string()],
            vec![
                Value::BigInt(1),
                Value::Text("Deadpond".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_row_access_by_name_and_index() {
        let row = hero_row();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&Value::BigInt(1)));
        assert_eq!(
            row.get_by_name("name"),
            Some(&Value::Text("Deadpond".to_string()))
        );
        assert!(row.get_by_name("missing").is_none());
    }

    #[test]
    fn test_row_typed_access() {
        let row = hero_row();
        assert_eq!(row.get_named::<i64>("id").unwrap(), 1);
        assert_eq!(row.get_named::<Option<i32>>("age").unwrap(), None);

        let err = row.get_named::<i64>("name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type error in column 'name': expected i64, found TEXT"
        );
        assert!(row.get_named::<i64>("missing").is_err());
    }

    #[test]
    fn test_rows_share_columns() {
        let first = hero_row();
        let second = Row::with_columns(
            first.columns(),
            vec![Value::BigInt(2), Value::Text("Rusty".to_string()), Value::Int(30)],
        );
        assert!(Arc::ptr_eq(&first.columns(), &second.columns()));
        let pairs: Vec<_> = second.iter().map(|(name, _)| name).collect();
        assert_eq!(pairs, vec!["id", "name", "age"]);
    }
}
