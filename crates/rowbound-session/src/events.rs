//! Per-type data-changed notifications.
//!
//! Listeners registered for an entity type run after every cache
//! invalidation of any of that type's sessions, and after typed writes
//! outside a transaction. Derived caches elsewhere use them to drop their
//! own state.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use rowbound_core::Entity;

/// What caused a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// Typed insert, update or delete.
    Write,
    /// Caller-supplied SQL.
    RawSql,
    /// Replay of writes made inside a committed transaction.
    Commit,
    /// Replay of writes made inside a rolled-back transaction.
    Rollback,
    Truncate,
    /// Explicit invalidation request.
    Manual,
}

impl ChangeReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeReason::Write => "write",
            ChangeReason::RawSql => "raw_sql",
            ChangeReason::Commit => "commit",
            ChangeReason::Rollback => "rollback",
            ChangeReason::Truncate => "truncate",
            ChangeReason::Manual => "manual",
        }
    }
}

/// Payload handed to data-changed listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChanged {
    pub entity: &'static str,
    pub connection: String,
    pub table: String,
    pub reason: ChangeReason,
    /// The collection cache was evicted unconditionally.
    pub hard: bool,
}

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&DataChanged) + Send + Sync>;

static LISTENERS: LazyLock<DashMap<TypeId, Vec<(ListenerId, Listener)>>> =
    LazyLock::new(DashMap::new);
static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Register a listener for changes to `E`.
pub fn on_data_changed<E: Entity>(
    listener: impl Fn(&DataChanged) + Send + Sync + 'static,
) -> ListenerId {
    let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
    LISTENERS
        .entry(TypeId::of::<E>())
        .or_default()
        .push((id, Arc::new(listener)));
    id
}

/// Remove a listener. Returns whether it was registered for `E`.
pub fn remove_listener<E: Entity>(id: ListenerId) -> bool {
    LISTENERS
        .get_mut(&TypeId::of::<E>())
        .is_some_and(|mut listeners| {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            listeners.len() != before
        })
}

pub(crate) fn fire<E: Entity>(event: &DataChanged) {
    // Listeners may register further listeners; never call them under the map lock.
    let listeners: Vec<Listener> = match LISTENERS.get(&TypeId::of::<E>()) {
        Some(entry) => entry.iter().map(|(_, l)| Arc::clone(l)).collect(),
        None => return,
    };
    for listener in listeners {
        listener(event);
    }
}
