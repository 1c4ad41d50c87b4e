//! Method-call sugar over [`EntitySession::current`].
//!
//! ```ignore
//! let mut hero = Hero { name: "Deadpond".into(), ..Hero::default() };
//! hero.insert()?;
//! hero.set_age(Some(31));
//! hero.update()?;
//! let everyone = Hero::cache_all()?;
//! ```

use std::sync::Arc;

use rowbound_core::{Entity, Result, Value};

use crate::events::{self, DataChanged, ListenerId};
use crate::session::EntitySession;
use crate::shard::ShardScope;

/// Persistence operations on any [`Entity`], routed through the session the
/// calling thread currently resolves to.
pub trait Persist: Entity {
    fn session() -> Result<Arc<EntitySession<Self>>> {
        EntitySession::current()
    }

    fn insert(&mut self) -> Result<u64> {
        Self::session()?.insert(self)
    }

    fn update(&mut self) -> Result<u64> {
        Self::session()?.update(self)
    }

    fn delete(&self) -> Result<u64> {
        Self::session()?.delete(self)
    }

    fn save(&mut self) -> Result<u64> {
        Self::session()?.save(self)
    }

    fn find_by_key(key: &[Value]) -> Result<Option<Self>> {
        Self::session()?.find_by_key(key)
    }

    fn find_cached(key: &[Value]) -> Result<Option<Self>> {
        Self::session()?.find_cached(key)
    }

    fn find_all() -> Result<Vec<Self>> {
        Self::session()?.find_all()
    }

    fn find_all_by(name: &str, value: impl Into<Value>) -> Result<Vec<Self>> {
        Self::session()?.find_all_by(name, value)
    }

    fn find_count() -> Result<i64> {
        Self::session()?.find_count()
    }

    /// Approximate count; 0 when the connection cannot be resolved.
    fn count() -> i64 {
        Self::session().map_or(0, |s| s.count())
    }

    fn cache_all() -> Result<Arc<Vec<Self>>> {
        Self::session()?.cache_all()
    }

    fn execute_raw(sql: &str, params: Vec<Value>) -> Result<u64> {
        Self::session()?.execute_raw(sql, params)
    }

    fn truncate() -> Result<u64> {
        Self::session()?.truncate()
    }

    fn begin_trans() -> Result<u32> {
        Self::session()?.begin_trans()
    }

    fn commit() -> Result<u32> {
        Self::session()?.commit()
    }

    fn rollback() -> Result<u32> {
        Self::session()?.rollback()
    }

    fn enter_shard(connection: &str, table: &str) -> Result<ShardScope<Self>> {
        ShardScope::enter(connection, table)
    }

    fn on_data_changed(listener: impl Fn(&DataChanged) + Send + Sync + 'static) -> ListenerId {
        events::on_data_changed::<Self>(listener)
    }
}

impl<E: Entity> Persist for E {}
