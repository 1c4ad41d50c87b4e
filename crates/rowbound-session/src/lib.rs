//! Entity sessions for Rowbound.
//!
//! `rowbound-session` is the **runtime layer**. It sits between entity types
//! and registered connections and decides, per (entity, connection, table),
//! when to check the schema, what to cache and when caches stop being
//! trustworthy.
//!
//! # Role In The Architecture
//!
//! - **Metadata registry**: one published operate object per entity type,
//!   created lazily and safely under concurrent first use.
//! - **Sessions**: one [`EntitySession`] per (type, connection, table) with a
//!   first-use schema check, a collection cache, a single-object cache and a
//!   record count.
//! - **Transactions**: nested, per-thread, per-connection scopes that replay
//!   cache invalidation when the outermost level commits or rolls back.
//! - **Sharding**: thread-scoped redirection of an entity type to another
//!   connection or table.
//!
//! # Example
//!
//! ```ignore
//! let db = Arc::new(MemoryDatabase::new("main"));
//! DataSource::builder("main", db.clone()).schema(db).register()?;
//!
//! let mut hero = Hero { name: "Spider-Boy".into(), ..Hero::default() };
//! hero.insert()?;
//!
//! let tx = Hero::session()?.transaction()?;
//! hero.set_age(Some(17));
//! hero.update()?;
//! tx.commit()?;
//!
//! let _archive = Hero::enter_shard("archive", "heroes_2023")?;
//! let old = Hero::find_all()?;
//! ```

pub mod collection_cache;
pub mod config;
pub mod count;
pub mod dal;
pub mod events;
pub mod persist;
pub mod registry;
pub mod session;
pub mod shard;
pub mod single_cache;
pub mod transaction;

pub use collection_cache::{CacheStats, CollectionCache};
pub use config::SessionConfig;
pub use count::RecordCount;
pub use dal::{DataSource, DataSourceBuilder};
pub use events::{ChangeReason, DataChanged, ListenerId, on_data_changed, remove_listener};
pub use persist::Persist;
pub use registry::{
    EntityFactory, EntityOperate, MetadataRegistry, allow_insert_identity, registry,
    set_allow_insert_identity, with_insert_identity,
};
pub use session::{EntitySession, SchemaState, TransactionGuard};
pub use shard::{ShardScope, ShardTarget, current_target, with_shard};
pub use single_cache::{CacheKey, SingleCache};
pub use transaction::{Invalidate, Invalidation, SessionCounters};
