//! Entity sessions.
//!
//! An [`EntitySession`] coordinates everything the runtime knows about one
//! entity type on one (connection, table) pair: the first-use schema check,
//! the collection and single-object caches, the record count and the
//! per-thread transaction counters. Sessions live for the whole process and
//! are shared as `Arc<EntitySession<E>>`; [`EntitySession::current`]
//! resolves the session the calling thread should use, honoring any active
//! [`ShardScope`](crate::ShardScope).
//!
//! # Cache coherence
//!
//! Every write picks one of three strategies:
//!
//! - **in place**: typed writes while hold-cache is on, or while a
//!   transaction is open on the connection, edit both caches directly;
//! - **soft**: other typed writes only retire the collection cache when the
//!   table has outgrown it, leaving snapshots to their expiry;
//! - **hard**: raw SQL, truncation and rollbacks evict the collection cache
//!   and, for update-class writes or a populated collection, the single
//!   cache too.
//!
//! Transactional writes are replayed through [`crate::transaction`] when the
//! connection scope closes.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rowbound_core::{
    Command, ConfigErrorKind, Database, Entity, Error, Result, Value, validate_identifier,
};
use rowbound_schema::{EntitySchema, ReconcileOptions, reconcile};

use crate::collection_cache::{CacheStats, CollectionCache};
use crate::config::SessionConfig;
use crate::count::RecordCount;
use crate::dal::DataSource;
use crate::events::{self, ChangeReason, DataChanged};
use crate::registry::{allow_insert_identity, registry};
use crate::shard;
use crate::single_cache::{CacheKey, SingleCache};
use crate::transaction::{self, Invalidate, Invalidation, SessionCounters};

type SessionKey = (TypeId, String, String);

static SESSIONS: LazyLock<DashMap<SessionKey, Arc<dyn Any + Send + Sync>>> =
    LazyLock::new(DashMap::new);
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// Progress of a session's first-use schema check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Uninitialized,
    Checking,
    Ready,
}

const UNINITIALIZED: u8 = 0;
const CHECKING: u8 = 1;
const READY: u8 = 2;

struct SchemaGate {
    state: AtomicU8,
    /// Thread token of the checking thread, 0 when none.
    owner: AtomicU64,
    token: Mutex<()>,
}

/// Marks the gate ready however the check ends.
struct GateRelease<'a>(&'a SchemaGate);

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        self.0.owner.store(0, Ordering::Release);
        self.0.state.store(READY, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
    Delete,
}

const HOLD_INHERIT: u8 = 0;
const HOLD_OFF: u8 = 1;
const HOLD_ON: u8 = 2;

/// Per-(connection, table) coordinator for entity type `E`.
pub struct EntitySession<E: Entity> {
    id: u64,
    connection: String,
    table: String,
    /// Is this the entity's own (connection, table) pairing?
    is_default: bool,
    this: Weak<Self>,
    gate: SchemaGate,
    collection: CollectionCache<E>,
    single: SingleCache<E>,
    count: RecordCount,
    hold_cache: AtomicU8,
}

impl<E: Entity> std::fmt::Debug for EntitySession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySession")
            .field("entity", &std::any::type_name::<E>())
            .field("connection", &self.connection)
            .field("table", &self.table)
            .field("schema", &self.schema_state())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> EntitySession<E> {
    /// The session for `E` on `connection`/`table`, created on first request.
    pub fn get(connection: &str, table: &str) -> Result<Arc<Self>> {
        validate_identifier("connection", connection)?;
        validate_identifier("table", table)?;
        let operate = registry().get_or_create::<E>()?;

        let key = (TypeId::of::<E>(), connection.to_string(), table.to_string());
        let existing = SESSIONS.get(&key).map(|entry| Arc::clone(entry.value()));
        let session = match existing {
            Some(session) => session,
            None => {
                let is_default =
                    connection == operate.connection_name() && table == operate.table_name();
                let entry = SESSIONS.entry(key).or_insert_with(|| {
                    tracing::debug!(
                        entity = std::any::type_name::<E>(),
                        connection,
                        table,
                        "session created"
                    );
                    Arc::new_cyclic(|this| Self::new(this, connection, table, is_default))
                        as Arc<dyn Any + Send + Sync>
                });
                Arc::clone(entry.value())
            }
        };
        session.downcast::<Self>().map_err(|_| {
            Error::Custom(format!(
                "session registry holds a foreign type under `{}`",
                std::any::type_name::<E>()
            ))
        })
    }

    /// The session this thread should use for `E`: the active shard
    /// target, or the entity's default pairing.
    pub fn current() -> Result<Arc<Self>> {
        match shard::current_target::<E>() {
            Some(target) => Self::get(&target.connection, &target.table),
            None => {
                let operate = registry().get_or_create::<E>()?;
                Self::get(operate.connection_name(), operate.table_name())
            }
        }
    }

    fn new(this: &Weak<Self>, connection: &str, table: &str, is_default: bool) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            connection: connection.to_string(),
            table: table.to_string(),
            is_default,
            this: this.clone(),
            gate: SchemaGate {
                state: AtomicU8::new(UNINITIALIZED),
                owner: AtomicU64::new(0),
                token: Mutex::new(()),
            },
            collection: CollectionCache::new(),
            single: SingleCache::new(),
            count: RecordCount::new(),
            hold_cache: AtomicU8::new(HOLD_INHERIT),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn collection_cache(&self) -> &CollectionCache<E> {
        &self.collection
    }

    pub fn single_cache(&self) -> &SingleCache<E> {
        &self.single
    }

    pub fn collection_stats(&self) -> CacheStats {
        self.collection.stats()
    }

    pub fn single_stats(&self) -> CacheStats {
        self.single.stats()
    }

    /// Override the connection's hold-cache setting for this session.
    /// `None` goes back to the connection default.
    pub fn set_hold_cache(&self, hold: Option<bool>) {
        let raw = match hold {
            None => HOLD_INHERIT,
            Some(false) => HOLD_OFF,
            Some(true) => HOLD_ON,
        };
        self.hold_cache.store(raw, Ordering::Relaxed);
    }

    fn holds_cache(&self, config: &SessionConfig) -> bool {
        match self.hold_cache.load(Ordering::Relaxed) {
            HOLD_ON => true,
            HOLD_OFF => false,
            _ => config.hold_cache,
        }
    }

    fn erased(&self) -> Result<Arc<dyn Invalidate>> {
        self.this
            .upgrade()
            .map(|this| this as Arc<dyn Invalidate>)
            .ok_or_else(|| Error::Custom(format!("{} is no longer registered", self.describe())))
    }

    // ------------------------------------------------------------------
    // Schema check
    // ------------------------------------------------------------------

    pub fn schema_state(&self) -> SchemaState {
        match self.gate.state.load(Ordering::Acquire) {
            READY => SchemaState::Ready,
            CHECKING => SchemaState::Checking,
            _ => SchemaState::Uninitialized,
        }
    }

    /// Run the schema check if it has not run yet, waiting the connection's
    /// configured time for a check already running on another thread.
    ///
    /// Returns false when the connection is unknown or the wait elapsed.
    pub fn ensure_ready(&self, ignore_indexes: bool) -> bool {
        match DataSource::get(&self.connection) {
            Ok(source) => {
                let wait = source.config().schema_wait_duration();
                self.check_schema(&source, ignore_indexes, wait)
            }
            Err(e) => {
                tracing::debug!(session = %self.describe(), error = %e, "schema check skipped");
                false
            }
        }
    }

    /// [`ensure_ready`](Self::ensure_ready) with an explicit wait.
    pub fn ensure_ready_with(&self, ignore_indexes: bool, wait: Duration) -> bool {
        match DataSource::get(&self.connection) {
            Ok(source) => self.check_schema(&source, ignore_indexes, wait),
            Err(e) => {
                tracing::debug!(session = %self.describe(), error = %e, "schema check skipped");
                false
            }
        }
    }

    /// Make the next data access run the schema check again.
    pub fn reset_schema_check(&self) {
        self.gate.state.store(UNINITIALIZED, Ordering::Release);
    }

    fn check_schema(&self, source: &DataSource, ignore_indexes: bool, wait: Duration) -> bool {
        if self.gate.state.load(Ordering::Acquire) == READY {
            return true;
        }
        let me = thread_token();
        // A thread never waits on its own check.
        if self.gate.owner.load(Ordering::Acquire) == me {
            return true;
        }
        let Some(_token) = self.gate.token.try_lock_for(wait) else {
            tracing::debug!(
                session = %self.describe(),
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "schema check busy on another thread; proceeding"
            );
            return false;
        };
        if self.gate.state.load(Ordering::Acquire) == READY {
            return true;
        }

        self.gate.owner.store(me, Ordering::Release);
        self.gate.state.store(CHECKING, Ordering::Release);
        let _release = GateRelease(&self.gate);

        self.reconcile_schema(source, ignore_indexes);
        self.seed();
        true
    }

    fn reconcile_schema(&self, source: &DataSource, ignore_indexes: bool) {
        let Some(provider) = source.schema() else {
            tracing::trace!(session = %self.describe(), "no schema provider");
            return;
        };
        let expected = E::table_schema(&self.table);
        let options = ReconcileOptions {
            mode: source.config().migration,
            allow_destructive: self.is_default,
            ignore_indexes,
        };
        match reconcile(provider, &expected, &options) {
            Ok(report) if !report.is_noop() => tracing::info!(
                session = %self.describe(),
                created = report.created,
                applied = report.applied.len(),
                pending = report.pending.len(),
                "schema reconciled"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(session = %self.describe(), error = %e, "schema reconciliation failed"),
        }
    }

    fn seed(&self) {
        let seeded = registry()
            .get_or_create::<E>()
            .and_then(|operate| operate.init_data(self));
        if let Err(e) = seeded {
            tracing::warn!(session = %self.describe(), error = %e, "initial data seeding failed");
        }
    }

    /// Resolve the connection and make sure the schema check has run.
    fn ready(&self) -> Result<Arc<DataSource>> {
        let source = DataSource::get(&self.connection)?;
        let wait = source.config().schema_wait_duration();
        self.check_schema(&source, false, wait);
        Ok(source)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn select(
        &self,
        db: &dyn Database,
        filter: Vec<(String, Value)>,
        limit: Option<usize>,
    ) -> Result<Vec<E>> {
        let command = Command::Select {
            table: self.table.clone(),
            filter,
            limit,
        };
        db.query(&command)?.iter().map(E::from_row).collect()
    }

    fn column_for(name: &str) -> Result<&'static str> {
        E::field(name).map(|f| f.column_name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownColumn,
                format!("entity `{}` has no field `{}`", std::any::type_name::<E>(), name),
            )
        })
    }

    fn key_filter(key: &[Value]) -> Result<Vec<(String, Value)>> {
        let fields = E::primary_key_fields();
        if fields.is_empty() {
            return Err(missing_primary_key::<E>());
        }
        if fields.len() != key.len() {
            return Err(Error::config(
                ConfigErrorKind::MissingPrimaryKey,
                format!(
                    "entity `{}` has {} key column(s), {} value(s) given",
                    std::any::type_name::<E>(),
                    fields.len(),
                    key.len()
                ),
            ));
        }
        Ok(fields
            .iter()
            .zip(key)
            .map(|(f, v)| (f.column_name.to_string(), v.clone()))
            .collect())
    }

    /// Every row, straight from the database.
    #[tracing::instrument(level = "trace", skip_all, fields(connection = %self.connection, table = %self.table))]
    pub fn find_all(&self) -> Result<Vec<E>> {
        let source = self.ready()?;
        self.select(source.db(), Vec::new(), None)
    }

    /// Rows whose field `name` (Rust or column name) equals `value`.
    pub fn find_all_by(&self, name: &str, value: impl Into<Value>) -> Result<Vec<E>> {
        let column = Self::column_for(name)?;
        let source = self.ready()?;
        self.select(source.db(), vec![(column.to_string(), value.into())], None)
    }

    /// One row by primary key, straight from the database.
    #[tracing::instrument(level = "trace", skip_all, fields(connection = %self.connection, table = %self.table))]
    pub fn find_by_key(&self, key: &[Value]) -> Result<Option<E>> {
        let filter = Self::key_filter(key)?;
        let source = self.ready()?;
        Ok(self.select(source.db(), filter, Some(1))?.into_iter().next())
    }

    /// Exact `COUNT(*)`, bypassing the cached count.
    pub fn find_count(&self) -> Result<i64> {
        let source = self.ready()?;
        count_rows(source.db(), &self.table, Vec::new())
    }

    pub fn find_count_by(&self, name: &str, value: impl Into<Value>) -> Result<i64> {
        let column = Self::column_for(name)?;
        let source = self.ready()?;
        count_rows(source.db(), &self.table, vec![(column.to_string(), value.into())])
    }

    /// One row by primary key through the single-object cache.
    pub fn find_cached(&self, key: &[Value]) -> Result<Option<E>> {
        let filter = Self::key_filter(key)?;
        let cache_key = CacheKey::new(key.to_vec());
        if let Some(entity) = self.single.get(&cache_key) {
            return Ok(Some(entity));
        }
        let source = self.ready()?;
        let found = self.select(source.db(), filter, Some(1))?.into_iter().next();
        if let Some(entity) = &found {
            let config = source.config();
            self.single.insert(
                cache_key,
                entity.clone(),
                config.single_expiry_duration(),
                config.single_max_entries,
            );
        }
        Ok(found)
    }

    /// Every row through the collection cache.
    ///
    /// Tables above the collection ceiling retire the cache and are read
    /// from the database each time.
    #[tracing::instrument(level = "trace", skip_all, fields(connection = %self.connection, table = %self.table))]
    pub fn cache_all(&self) -> Result<Arc<Vec<E>>> {
        let source = self.ready()?;
        let config = source.config();
        if !self.collection.is_retired() && !self.collection.is_populated() {
            let count = self.count_with(&source);
            if count > config.collection_ceiling as i64 {
                tracing::warn!(
                    session = %self.describe(),
                    count,
                    ceiling = config.collection_ceiling,
                    "table too large for the collection cache; retiring it"
                );
                self.collection.retire();
            }
        }
        self.collection.get_or_load(
            config.collection_expiry_duration(),
            config.collection_ceiling,
            || self.select(source.db(), Vec::new(), None),
        )
    }

    /// Approximate record count. Never fails: errors are logged and read
    /// as 0 without being cached.
    pub fn count(&self) -> i64 {
        match self.ready() {
            Ok(source) => self.count_with(&source),
            Err(e) => {
                tracing::warn!(session = %self.describe(), error = %e, "record count unavailable");
                0
            }
        }
    }

    fn count_with(&self, source: &DataSource) -> i64 {
        let config = source.config();
        let ttl = config.count_ttl_duration();
        if let Some(count) = self.count.fresh(config.exact_count_ceiling, ttl) {
            return count;
        }
        let _computing = self.count.computing();
        if let Some(count) = self.count.fresh(config.exact_count_ceiling, ttl) {
            return count;
        }
        let generation = self.count.generation();
        match self.compute_count(source.db(), config) {
            Ok(count) => {
                if !self.count.store_since(count, generation) {
                    tracing::trace!(session = %self.describe(), count, "count raced a write; not cached");
                }
                count
            }
            Err(e) => {
                tracing::warn!(session = %self.describe(), error = %e, "counting failed");
                0
            }
        }
    }

    fn compute_count(&self, db: &dyn Database, config: &SessionConfig) -> Result<i64> {
        if db.count_is_slow() {
            if let [pk] = E::primary_key_fields().as_slice() {
                if pk.sql_type.is_integer() {
                    let row = db.query_one(&Command::MaxKey {
                        table: self.table.clone(),
                        column: pk.column_name.to_string(),
                    })?;
                    let estimate = row
                        .and_then(|r| r.get(0).and_then(Value::as_i64))
                        .unwrap_or(0);
                    if estimate >= config.count_upgrade_threshold {
                        tracing::debug!(session = %self.describe(), estimate, "using max-key estimate");
                        return Ok(estimate);
                    }
                }
            }
        }
        count_rows(db, &self.table, Vec::new())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert `entity`. A database-generated identity is written back into
    /// it and its dirty set is cleared.
    #[tracing::instrument(level = "trace", skip_all, fields(connection = %self.connection, table = %self.table))]
    pub fn insert(&self, entity: &mut E) -> Result<u64> {
        let source = self.ready()?;
        let explicit_identity = allow_insert_identity::<E>();

        let mut values = Vec::with_capacity(E::fields().len());
        let mut report_identity = None;
        for (field, (column, value)) in E::fields().iter().zip(entity.to_row()) {
            if field.identity && !(explicit_identity && !value.is_unset_identity()) {
                report_identity = Some(column.to_string());
                continue;
            }
            values.push((column.to_string(), value));
        }

        let command = Command::Insert {
            table: self.table.clone(),
            values,
            identity: report_identity,
        };
        let generated = source.db().insert(&command)?;
        if let (Some(field), Some(id)) = (E::identity_field(), generated) {
            entity.load_value(field.name, Value::BigInt(id))?;
        }
        entity.clear_dirty();
        self.after_write(&source, WriteKind::Insert, entity);
        Ok(1)
    }

    /// Write the dirty non-key fields of `entity`. Returns 0 without a
    /// round-trip when nothing but key fields is dirty; key edits are
    /// discarded from the dirty set, not persisted.
    ///
    /// An update that matches no row leaves every cache untouched.
    #[tracing::instrument(level = "trace", skip_all, fields(connection = %self.connection, table = %self.table))]
    pub fn update(&self, entity: &mut E) -> Result<u64> {
        let key = Self::key_filter(&entity.primary_key_value())?;
        let set: Vec<(String, Value)> = entity
            .dirty_fields()
            .into_iter()
            .filter(|f| !f.primary_key)
            .filter_map(|f| {
                entity
                    .get_value(f.name)
                    .map(|v| (f.column_name.to_string(), v))
            })
            .collect();
        if set.is_empty() {
            entity.clear_dirty();
            return Ok(0);
        }

        let source = self.ready()?;
        let affected = source.db().execute(&Command::Update {
            table: self.table.clone(),
            set,
            key,
        })?;
        entity.clear_dirty();
        if affected > 0 {
            self.after_write(&source, WriteKind::Update, entity);
        }
        Ok(affected)
    }

    #[tracing::instrument(level = "trace", skip_all, fields(connection = %self.connection, table = %self.table))]
    pub fn delete(&self, entity: &E) -> Result<u64> {
        let key = Self::key_filter(&entity.primary_key_value())?;
        let source = self.ready()?;
        let affected = source.db().execute(&Command::Delete {
            table: self.table.clone(),
            key,
        })?;
        if affected > 0 {
            self.after_write(&source, WriteKind::Delete, entity);
        }
        Ok(affected)
    }

    /// Insert when new, update otherwise.
    ///
    /// With an identity column "new" means the identity is unset; without
    /// one the key is looked up first.
    pub fn save(&self, entity: &mut E) -> Result<u64> {
        let is_new = if E::identity_field().is_some() {
            entity.is_new()
        } else {
            let key = entity.primary_key_value();
            key.iter().all(Value::is_null) || self.find_by_key(&key)?.is_none()
        };
        if is_new {
            self.insert(entity)
        } else {
            self.update(entity)
        }
    }

    /// Run caller-supplied SQL against this session's connection.
    ///
    /// The runtime cannot see what the statement touched, so the caches are
    /// evicted unconditionally.
    #[tracing::instrument(level = "debug", skip(self, params), fields(connection = %self.connection, table = %self.table))]
    pub fn execute_raw(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        let source = self.ready()?;
        let command = Command::raw(sql, params);
        let affected = source.db().execute(&command)?;
        let update_class = command.is_update_class();
        transaction::record_write(&self.connection, &self.erased()?, update_class, true);
        self.invalidate_now(
            source.config(),
            Invalidation::Hard { update_class },
            ChangeReason::RawSql,
        );
        Ok(affected)
    }

    /// Delete every row. Evicts all caches and schedules a fresh schema check.
    pub fn truncate(&self) -> Result<u64> {
        let source = self.ready()?;
        let affected = source.db().execute(&Command::Truncate {
            table: self.table.clone(),
        })?;
        transaction::record_write(&self.connection, &self.erased()?, true, true);
        self.count.reset();
        self.invalidate_now(
            source.config(),
            Invalidation::Hard { update_class: true },
            ChangeReason::Truncate,
        );
        self.reset_schema_check();
        Ok(affected)
    }

    fn after_write(&self, source: &DataSource, kind: WriteKind, entity: &E) {
        let config = source.config();
        let update_class = kind != WriteKind::Insert;
        let in_tx = match self.erased() {
            Ok(this) => transaction::record_write(&self.connection, &this, update_class, false),
            Err(_) => false,
        };

        let key = CacheKey::new(entity.primary_key_value());
        match kind {
            WriteKind::Insert => self.count.adjust(1, config.exact_count_ceiling),
            WriteKind::Update => {
                self.single
                    .replace_if_present(&key, entity, config.single_expiry_duration());
            }
            WriteKind::Delete => {
                self.single.remove(&key);
                self.count.adjust(-1, config.exact_count_ceiling);
            }
        }

        if !(in_tx || self.holds_cache(config)) {
            self.invalidate_now(config, Invalidation::Soft, ChangeReason::Write);
            return;
        }

        let keyed = !key.values().is_empty();
        let same = |other: &E| keyed && CacheKey::new(other.primary_key_value()) == key;
        match kind {
            WriteKind::Insert => self.collection.upsert(entity, same),
            WriteKind::Update => self.collection.replace(entity, same),
            WriteKind::Delete => self.collection.remove(same),
        }
        tracing::trace!(session = %self.describe(), ?kind, in_tx, "caches updated in place");
        if !in_tx {
            self.notify(ChangeReason::Write, false);
        }
    }

    /// Evict both caches and the exact record count.
    pub fn invalidate_caches(&self) {
        let config = DataSource::get(&self.connection)
            .map(|s| s.config().clone())
            .unwrap_or_default();
        self.invalidate_now(
            &config,
            Invalidation::Hard { update_class: true },
            ChangeReason::Manual,
        );
    }

    fn invalidate_now(&self, config: &SessionConfig, mode: Invalidation, reason: ChangeReason) {
        let hard = match mode {
            Invalidation::Soft => {
                let outgrown = self
                    .count
                    .peek()
                    .is_some_and(|count| count > config.collection_ceiling as i64);
                if outgrown && !self.collection.is_retired() {
                    tracing::warn!(
                        session = %self.describe(),
                        ceiling = config.collection_ceiling,
                        "table outgrew the collection cache; retiring it"
                    );
                    self.collection.retire();
                }
                false
            }
            Invalidation::Hard { update_class } => {
                let was_populated = self.collection.clear();
                if update_class || was_populated {
                    self.single.clear();
                }
                self.count.reset_exact(config.exact_count_ceiling);
                true
            }
        };
        tracing::debug!(
            connection = %self.connection,
            table = %self.table,
            reason = reason.as_str(),
            hard,
            "cache invalidated"
        );
        self.notify(reason, hard);
    }

    fn notify(&self, reason: ChangeReason, hard: bool) {
        events::fire::<E>(&DataChanged {
            entity: std::any::type_name::<E>(),
            connection: self.connection.clone(),
            table: self.table.clone(),
            reason,
            hard,
        });
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a transaction level. Returns the new depth of this session.
    pub fn begin_trans(&self) -> Result<u32> {
        let source = self.ready()?;
        transaction::begin(&self.connection, source.db(), &self.erased()?)
    }

    pub fn commit(&self) -> Result<u32> {
        let source = DataSource::get(&self.connection)?;
        transaction::commit(&self.connection, source.db(), &self.erased()?)
    }

    pub fn rollback(&self) -> Result<u32> {
        let source = DataSource::get(&self.connection)?;
        transaction::rollback(&self.connection, source.db(), &self.erased()?)
    }

    /// Open a transaction level that rolls back when dropped uncommitted.
    pub fn transaction(&self) -> Result<TransactionGuard<'_, E>> {
        self.begin_trans()?;
        Ok(TransactionGuard {
            session: self,
            finished: false,
            _thread_bound: PhantomData,
        })
    }

    /// Is a transaction open on this session's connection on this thread?
    pub fn in_transaction(&self) -> bool {
        transaction::in_transaction(&self.connection)
    }

    /// This thread's transaction counters for this session.
    pub fn transaction_counters(&self) -> SessionCounters {
        transaction::counters(self.id)
    }
}

impl<E: Entity> Invalidate for EntitySession<E> {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn describe(&self) -> String {
        let name = std::any::type_name::<E>();
        let short = name.rsplit("::").next().unwrap_or(name);
        format!("{short}@{}.{}", self.connection, self.table)
    }

    fn invalidate(&self, mode: Invalidation, reason: ChangeReason) {
        let config = DataSource::get(&self.connection)
            .map(|s| s.config().clone())
            .unwrap_or_default();
        self.invalidate_now(&config, mode, reason);
    }
}

/// Transaction level that rolls back on drop unless committed.
#[must_use = "dropping the guard rolls the transaction back"]
pub struct TransactionGuard<'a, E: Entity> {
    session: &'a EntitySession<E>,
    finished: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<E: Entity> TransactionGuard<'_, E> {
    pub fn commit(mut self) -> Result<u32> {
        self.finished = true;
        self.session.commit()
    }

    pub fn rollback(mut self) -> Result<u32> {
        self.finished = true;
        self.session.rollback()
    }
}

impl<E: Entity> Drop for TransactionGuard<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.session.rollback() {
                tracing::warn!(session = %self.session.describe(), error = %e, "rollback on drop failed");
            }
        }
    }
}

fn count_rows(db: &dyn Database, table: &str, filter: Vec<(String, Value)>) -> Result<i64> {
    let row = db.query_one(&Command::Count {
        table: table.to_string(),
        filter,
    })?;
    Ok(row.and_then(|r| r.get(0).and_then(Value::as_i64)).unwrap_or(0))
}

fn missing_primary_key<E: Entity>() -> Error {
    Error::config(
        ConfigErrorKind::MissingPrimaryKey,
        format!("entity `{}` has no primary key", std::any::type_name::<E>()),
    )
}
