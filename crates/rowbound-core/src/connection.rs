//! Database connection trait.
//!
//! A [`Database`] is one named connection as seen by the session runtime.
//! Calls are blocking; the runtime drives them from ordinary OS threads.
//! Transaction control is connection-wide: the runtime guarantees that
//! `begin` runs once when the outermost scope opens and `commit`/`rollback`
//! once when it closes.

use crate::command::{Command, Dialect};
use crate::error::Result;
use crate::row::Row;

/// A database connection capable of executing [`Command`]s.
///
/// # Example
///
/// ```rust,ignore
/// let rows = db.query(&Command::Select {
///     table: "heroes".into(),
///     filter: vec![("id".into(), Value::BigInt(1))],
///     limit: Some(1),
/// })?;
/// ```
pub trait Database: Send + Sync {
    /// Dialect used when a command has to be rendered to SQL text.
    fn dialect(&self) -> Dialect {
        Dialect::default()
    }

    /// Execute a reading command and return all rows.
    fn query(&self, command: &Command) -> Result<Vec<Row>>;

    /// Execute a reading command and return the first row, if any.
    fn query_one(&self, command: &Command) -> Result<Option<Row>> {
        Ok(self.query(command)?.into_iter().next())
    }

    /// Execute a writing command and return rows affected.
    fn execute(&self, command: &Command) -> Result<u64>;

    /// Execute an insert and return the generated identity value, if the
    /// command asked for one.
    fn insert(&self, command: &Command) -> Result<Option<i64>>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Whether `COUNT(*)` is expensive on this provider.
    ///
    /// When true, record counting first tries a max-key estimate.
    fn count_is_slow(&self) -> bool {
        false
    }
}
