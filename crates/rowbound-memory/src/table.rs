//! Row storage for one in-memory table.

use std::sync::Arc;

use rowbound_core::{ColumnSet, Error, QueryErrorKind, Result, Row, Value};
use rowbound_schema::{ColumnInfo, IndexInfo, TableInfo};

#[derive(Debug, Clone)]
pub(crate) struct MemTable {
    pub(crate) info: TableInfo,
    columns: Arc<ColumnSet>,
    rows: Vec<Vec<Value>>,
    next_id: i64,
}

impl MemTable {
    pub(crate) fn new(info: TableInfo) -> Self {
        let columns = column_set(&info);
        Self {
            info,
            columns,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    fn position(&self, column: &str) -> Result<usize> {
        self.columns.index_of(column).ok_or_else(|| {
            Error::query(
                QueryErrorKind::NotFound,
                format!("no such column: {}.{}", self.info.name, column),
            )
        })
    }

    fn resolve<'a>(&self, filter: &'a [(String, Value)]) -> Result<Vec<(usize, &'a Value)>> {
        filter
            .iter()
            .map(|(column, value)| Ok((self.position(column)?, value)))
            .collect()
    }

    fn row(&self, values: &[Value]) -> Row {
        Row::with_columns(Arc::clone(&self.columns), values.to_vec())
    }

    pub(crate) fn insert(
        &mut self,
        values: &[(String, Value)],
        identity: Option<&str>,
    ) -> Result<Option<i64>> {
        let mut row = vec![Value::Null; self.info.columns.len()];
        for (column, value) in values {
            let pos = self.position(column)?;
            row[pos] = value.clone();
        }

        let mut generated = None;
        for (pos, column) in self.info.columns.iter().enumerate() {
            if !column.auto_increment {
                continue;
            }
            if row[pos].is_unset_identity() {
                row[pos] = Value::BigInt(self.next_id);
                generated = Some(self.next_id);
                self.next_id += 1;
            } else if let Some(explicit) = row[pos].as_i64() {
                self.next_id = self.next_id.max(explicit + 1);
                generated = Some(explicit);
            }
        }

        for (pos, column) in self.info.columns.iter().enumerate() {
            if !column.nullable && row[pos].is_null() && column.default.is_none() {
                return Err(constraint(format!(
                    "NOT NULL constraint failed: {}.{}",
                    self.info.name, column.name
                )));
            }
        }

        self.check_unique(&row)?;
        self.rows.push(row);

        match identity {
            Some(column) => {
                let pos = self.position(column)?;
                Ok(generated.or_else(|| self.rows.last().and_then(|r| r[pos].as_i64())))
            }
            None => Ok(None),
        }
    }

    fn check_unique(&self, candidate: &[Value]) -> Result<()> {
        let mut keys: Vec<Vec<&str>> = Vec::new();
        if !self.info.primary_key.is_empty() {
            keys.push(self.info.primary_key.iter().map(String::as_str).collect());
        }
        keys.extend(
            self.info
                .indexes
                .iter()
                .filter(|i| i.unique)
                .map(|i| i.columns.iter().map(String::as_str).collect()),
        );

        for key in keys {
            let positions: Vec<usize> = key
                .iter()
                .map(|c| self.position(c))
                .collect::<Result<_>>()?;
            // NULLs never collide
            if positions.iter().any(|&p| candidate[p].is_null()) {
                continue;
            }
            let clash = self
                .rows
                .iter()
                .any(|row| positions.iter().all(|&p| row[p].loosely_eq(&candidate[p])));
            if clash {
                return Err(constraint(format!(
                    "UNIQUE constraint failed: {}.{}",
                    self.info.name,
                    key.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn select(&self, filter: &[(String, Value)], limit: Option<usize>) -> Result<Vec<Row>> {
        let filter = self.resolve(filter)?;
        Ok(self
            .rows
            .iter()
            .filter(|row| matches(row, &filter))
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| self.row(row))
            .collect())
    }

    pub(crate) fn count(&self, filter: &[(String, Value)]) -> Result<i64> {
        let filter = self.resolve(filter)?;
        Ok(self.rows.iter().filter(|row| matches(row, &filter)).count() as i64)
    }

    pub(crate) fn max(&self, column: &str) -> Result<Value> {
        let pos = self.position(column)?;
        Ok(self
            .rows
            .iter()
            .filter_map(|row| row[pos].as_i64())
            .max()
            .map_or(Value::Null, Value::BigInt))
    }

    pub(crate) fn update(&mut self, set: &[(String, Value)], filter: &[(String, Value)]) -> Result<u64> {
        let assignments: Vec<(usize, Value)> = set
            .iter()
            .map(|(column, value)| Ok((self.position(column)?, value.clone())))
            .collect::<Result<_>>()?;
        let positions: Vec<(usize, Value)> = self
            .resolve(filter)?
            .into_iter()
            .map(|(p, v)| (p, v.clone()))
            .collect();

        let mut affected = 0;
        for row in &mut self.rows {
            let hit = positions.iter().all(|(p, v)| cell_matches(&row[*p], v));
            if hit {
                for (pos, value) in &assignments {
                    row[*pos] = value.clone();
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    pub(crate) fn delete(&mut self, filter: &[(String, Value)]) -> Result<u64> {
        let positions: Vec<(usize, Value)> = self
            .resolve(filter)?
            .into_iter()
            .map(|(p, v)| (p, v.clone()))
            .collect();
        let before = self.rows.len();
        self.rows
            .retain(|row| !positions.iter().all(|(p, v)| cell_matches(&row[*p], v)));
        Ok((before - self.rows.len()) as u64)
    }

    pub(crate) fn truncate(&mut self) -> u64 {
        let removed = self.rows.len() as u64;
        self.rows.clear();
        removed
    }

    pub(crate) fn add_column(&mut self, column: ColumnInfo) {
        if self.info.column(&column.name).is_some() {
            return;
        }
        self.info.columns.push(column);
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns = column_set(&self.info);
    }

    pub(crate) fn drop_column(&mut self, name: &str) -> Result<()> {
        let pos = self.position(name)?;
        self.info.columns.remove(pos);
        self.info.primary_key.retain(|c| c != name);
        self.info.indexes.retain(|i| !i.columns.iter().any(|c| c == name));
        for row in &mut self.rows {
            row.remove(pos);
        }
        self.columns = column_set(&self.info);
        Ok(())
    }

    pub(crate) fn create_index(&mut self, index: IndexInfo) {
        if self.info.index(&index.name).is_none() {
            self.info.indexes.push(index);
        }
    }

    pub(crate) fn drop_index(&mut self, name: &str) {
        self.info.indexes.retain(|i| i.name != name);
    }
}

fn column_set(info: &TableInfo) -> Arc<ColumnSet> {
    Arc::new(ColumnSet::new(
        info.columns.iter().map(|c| c.name.clone()).collect(),
    ))
}

fn matches(row: &[Value], filter: &[(usize, &Value)]) -> bool {
    filter.iter().all(|(pos, value)| cell_matches(&row[*pos], value))
}

fn cell_matches(cell: &Value, wanted: &Value) -> bool {
    if wanted.is_null() {
        cell.is_null()
    } else {
        cell.loosely_eq(wanted)
    }
}

fn constraint(message: String) -> Error {
    Error::query(QueryErrorKind::Constraint, message)
}
