//! Nested transactions and deferred cache invalidation.
//!
//! All state here is thread-local. Two levels are tracked:
//!
//! - per session: a nesting depth and the writes made since the session's
//!   outermost `begin` (executes, update-class writes, raw SQL);
//! - per connection: a scope depth that counts every open session level on
//!   that connection. The database transaction begins when the scope goes
//!   0→1 and ends when it returns to 0.
//!
//! When a session closes its outermost level its counters are packaged as a
//! [`DirtiedSession`] and parked in the connection scope. When the scope
//! closes, every parked session is invalidated at once: soft after a clean
//! commit, hard after raw SQL or any rollback.
//!
//! Nothing here calls into user code while a thread-local is borrowed, so
//! invalidation listeners may freely open new transactions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use rowbound_core::{Database, Error, Result, TransactionErrorKind};

use crate::events::ChangeReason;

/// How far an invalidation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// Retire the collection cache only if the table outgrew it.
    Soft,
    /// Evict the collection cache. `update_class` also evicts single entries.
    Hard { update_class: bool },
}

/// A session whose caches can be invalidated after the fact.
pub trait Invalidate: Send + Sync {
    /// Unique per session instance.
    fn session_id(&self) -> u64;

    fn describe(&self) -> String;

    fn invalidate(&self, mode: Invalidation, reason: ChangeReason);
}

/// Per-thread counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub depth: u32,
    pub executes: u64,
    pub updates: u64,
    pub direct_sql: u64,
    /// Outermost transactions started, i.e. counter resets.
    pub cycles: u64,
}

/// Writes one session made inside a connection scope, awaiting replay.
#[derive(Clone)]
pub struct DirtiedSession {
    pub session: Arc<dyn Invalidate>,
    pub executes: u64,
    pub updates: u64,
    pub direct_sql: u64,
}

impl DirtiedSession {
    fn merge(&mut self, executes: u64, updates: u64, direct_sql: u64) {
        self.executes += executes;
        self.updates += updates;
        self.direct_sql += direct_sql;
    }
}

impl std::fmt::Debug for DirtiedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtiedSession")
            .field("session", &self.session.describe())
            .field("executes", &self.executes)
            .field("updates", &self.updates)
            .field("direct_sql", &self.direct_sql)
            .finish()
    }
}

#[derive(Default)]
struct ConnectionScope {
    depth: u32,
    rollback_only: bool,
    dirtied: Vec<DirtiedSession>,
}

impl ConnectionScope {
    fn park(&mut self, session: &Arc<dyn Invalidate>, executes: u64, updates: u64, direct_sql: u64) {
        let id = session.session_id();
        match self.dirtied.iter_mut().find(|d| d.session.session_id() == id) {
            Some(existing) => existing.merge(executes, updates, direct_sql),
            None => self.dirtied.push(DirtiedSession {
                session: Arc::clone(session),
                executes,
                updates,
                direct_sql,
            }),
        }
    }
}

thread_local! {
    static SCOPES: RefCell<HashMap<String, ConnectionScope>> = RefCell::new(HashMap::new());
    static COUNTERS: RefCell<HashMap<u64, SessionCounters>> = RefCell::new(HashMap::new());
}

/// Scope depth of `connection` on this thread.
pub fn depth(connection: &str) -> u32 {
    SCOPES.with(|scopes| scopes.borrow().get(connection).map_or(0, |s| s.depth))
}

/// Is a transaction open on `connection` on this thread?
pub fn in_transaction(connection: &str) -> bool {
    depth(connection) > 0
}

/// Counters of a session on this thread.
pub fn counters(session_id: u64) -> SessionCounters {
    COUNTERS.with(|c| c.borrow().get(&session_id).copied().unwrap_or_default())
}

/// Open a level for `session`. Returns the session's new depth.
pub(crate) fn begin(connection: &str, db: &dyn Database, session: &Arc<dyn Invalidate>) -> Result<u32> {
    if depth(connection) == 0 {
        db.begin().map_err(|e| {
            Error::transaction(
                TransactionErrorKind::BeginFailed,
                format!("could not begin on {connection}: {e}"),
            )
        })?;
        tracing::debug!(connection, "database transaction started");
    }
    SCOPES.with(|scopes| {
        scopes
            .borrow_mut()
            .entry(connection.to_string())
            .or_default()
            .depth += 1;
    });
    let depth = COUNTERS.with(|c| {
        let mut c = c.borrow_mut();
        let counters = c.entry(session.session_id()).or_default();
        if counters.depth == 0 {
            counters.executes = 0;
            counters.updates = 0;
            counters.direct_sql = 0;
            counters.cycles += 1;
        }
        counters.depth += 1;
        counters.depth
    });
    tracing::trace!(connection, session = %session.describe(), depth, "begin");
    Ok(depth)
}

/// Close a level with commit. Returns the session's new depth.
pub(crate) fn commit(connection: &str, db: &dyn Database, session: &Arc<dyn Invalidate>) -> Result<u32> {
    let (depth, closed) = close_level(connection, session, false)?;
    let Some(scope) = closed else {
        return Ok(depth);
    };

    if scope.rollback_only {
        tracing::warn!(connection, "inner rollback; rolling back instead of committing");
        let rolled_back = db.rollback();
        replay_rollback(&scope.dirtied);
        rolled_back?;
        return Err(Error::transaction(
            TransactionErrorKind::RolledBack,
            format!("transaction on {connection} was rolled back by an inner rollback"),
        ));
    }

    match db.commit() {
        Ok(()) => {
            tracing::debug!(connection, sessions = scope.dirtied.len(), "database transaction committed");
            for dirtied in &scope.dirtied {
                if dirtied.executes == 0 && dirtied.direct_sql == 0 {
                    continue;
                }
                let mode = if dirtied.direct_sql > 0 {
                    Invalidation::Hard { update_class: true }
                } else {
                    Invalidation::Soft
                };
                dirtied.session.invalidate(mode, ChangeReason::Commit);
            }
            Ok(depth)
        }
        Err(e) => {
            tracing::warn!(connection, error = %e, "commit failed; rolling back");
            if let Err(rollback) = db.rollback() {
                tracing::warn!(connection, error = %rollback, "rollback after failed commit also failed");
            }
            replay_rollback(&scope.dirtied);
            Err(Error::transaction(
                TransactionErrorKind::CommitFailed,
                format!("commit on {connection} failed: {e}"),
            ))
        }
    }
}

/// Close a level with rollback. Returns the session's new depth.
///
/// An inner rollback only marks the connection scope; the database rolls
/// back when the scope closes.
pub(crate) fn rollback(connection: &str, db: &dyn Database, session: &Arc<dyn Invalidate>) -> Result<u32> {
    let (depth, closed) = close_level(connection, session, true)?;
    let Some(scope) = closed else {
        return Ok(depth);
    };
    let result = db.rollback();
    tracing::debug!(connection, sessions = scope.dirtied.len(), "database transaction rolled back");
    replay_rollback(&scope.dirtied);
    result.map(|()| depth)
}

/// Record a write by `session` on `connection`.
///
/// Returns whether the write happened inside a transaction. Writes by a
/// session with no open level of its own are parked directly in the
/// connection scope, so another session's rollback still reaches them.
pub(crate) fn record_write(
    connection: &str,
    session: &Arc<dyn Invalidate>,
    update_class: bool,
    direct_sql: bool,
) -> bool {
    if !in_transaction(connection) {
        return false;
    }
    let updates = u64::from(update_class);
    let direct = u64::from(direct_sql);
    let owned = COUNTERS.with(|c| {
        let mut c = c.borrow_mut();
        match c.get_mut(&session.session_id()) {
            Some(counters) if counters.depth > 0 => {
                counters.executes += 1;
                counters.updates += updates;
                counters.direct_sql += direct;
                true
            }
            _ => false,
        }
    });
    if !owned {
        SCOPES.with(|scopes| {
            if let Some(scope) = scopes.borrow_mut().get_mut(connection) {
                scope.park(session, 1, updates, direct);
            }
        });
    }
    true
}

fn close_level(
    connection: &str,
    session: &Arc<dyn Invalidate>,
    is_rollback: bool,
) -> Result<(u32, Option<ConnectionScope>)> {
    let id = session.session_id();
    let (depth, finished) = COUNTERS.with(|c| {
        let mut c = c.borrow_mut();
        match c.get_mut(&id) {
            Some(counters) if counters.depth > 0 => {
                counters.depth -= 1;
                let finished = (counters.depth == 0).then_some(*counters);
                Ok((counters.depth, finished))
            }
            _ => Err(Error::transaction(
                TransactionErrorKind::NotActive,
                format!("{} has no open transaction", session.describe()),
            )),
        }
    })?;

    let closed = SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        let scope = scopes.get_mut(connection)?;
        if let Some(done) = finished {
            scope.park(session, done.executes, done.updates, done.direct_sql);
        }
        scope.depth = scope.depth.saturating_sub(1);
        if scope.depth > 0 {
            if is_rollback {
                scope.rollback_only = true;
            }
            return None;
        }
        scopes.remove(connection)
    });
    tracing::trace!(connection, session = %session.describe(), depth, is_rollback, "end");
    Ok((depth, closed))
}

fn replay_rollback(dirtied: &[DirtiedSession]) {
    for d in dirtied {
        if d.executes > 0 || d.direct_sql > 0 {
            // inserts made in the transaction are gone too
            d.session
                .invalidate(Invalidation::Hard { update_class: true }, ChangeReason::Rollback);
        }
    }
}
