//! Rowbound: entity sessions over relational tables.
//!
//! Rowbound maps plain structs onto tables and runs every read and write
//! through a long-lived session per (entity, connection, table), giving:
//!
//! - Dirty tracking with partial UPDATEs of changed columns only
//! - A whole-table collection cache and a per-key single-object cache
//! - Cheap approximate record counts
//! - Nested, per-thread transactions that keep caches coherent on commit
//!   and rollback
//! - Thread-scoped sharding onto other connections or tables
//! - First-use schema reconciliation with selectable migration modes
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use rowbound::prelude::*;
//! use rowbound_memory::MemoryDatabase;
//!
//! #[derive(Debug, Clone, Default, Entity)]
//! #[entity(table = "heroes", connection = "main")]
//! struct Hero {
//!     #[entity(primary_key, identity)]
//!     id: i64,
//!     name: String,
//!     age: Option<i32>,
//!     dirty: DirtySet,
//! }
//!
//! fn main() -> Result<()> {
//!     let db = Arc::new(MemoryDatabase::new("main"));
//!     DataSource::builder("main", db.clone()).schema(db).register()?;
//!
//!     let mut hero = Hero { name: "Spider-Boy".into(), ..Hero::default() };
//!     hero.insert()?;
//!
//!     hero.set_age(Some(16));
//!     hero.update()?; // UPDATE "heroes" SET "age" = $1 WHERE "id" = $2
//!
//!     let everyone = Hero::cache_all()?;
//!     assert_eq!(everyone.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! Generated code refers to `rowbound_core`, so crates deriving `Entity`
//! depend on `rowbound-core` alongside this crate.

pub use rowbound_core::{
    Accessor, ColumnSet, Command, ConfigError, ConfigErrorKind, Database, Dialect, DirtySet,
    Entity, Error, FieldInfo, QueryError, QueryErrorKind, Result, Row, SchemaError,
    SchemaErrorKind, SqlType, TransactionError, TransactionErrorKind, TypeError, Value,
    quote_ident, validate_identifier,
};
pub use rowbound_macros::Entity;
pub use rowbound_schema::{
    ColumnInfo, EntitySchema, IndexInfo, MigrationMode, ReconcileOptions, ReconcileReport,
    SchemaOperation, SchemaProvider, TableInfo,
};
pub use rowbound_session::{
    CacheStats, ChangeReason, DataChanged, DataSource, DataSourceBuilder, EntityOperate,
    EntitySession, ListenerId, Persist, SchemaState, SessionConfig, ShardScope, ShardTarget,
    TransactionGuard, current_target, on_data_changed, registry, remove_listener, set_allow_insert_identity,
    with_insert_identity, with_shard,
};

/// Everything an application touching entities usually needs.
pub mod prelude {
    pub use crate::{
        DataSource, DirtySet, Entity, EntityOperate, EntitySession, Error, MigrationMode,
        Persist, Result, SessionConfig, ShardScope, Value,
    };
}
