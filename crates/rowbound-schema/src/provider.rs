//! Live schema access for a connection.

use rowbound_core::Result;

use crate::diff::SchemaOperation;
use crate::introspect::TableInfo;

/// Reads and alters the schema behind one connection.
///
/// Registered next to a [`Database`](rowbound_core::Database); sessions use
/// it once, during their first-use schema check.
pub trait SchemaProvider: Send + Sync {
    /// Describe a table, or `None` when it does not exist.
    fn get_table(&self, name: &str) -> Result<Option<TableInfo>>;

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.get_table(name)?.is_some())
    }

    /// Apply operations in order. Stops at the first failure.
    fn apply(&self, operations: &[SchemaOperation]) -> Result<()>;
}
