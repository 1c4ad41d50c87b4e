//! Scoped redirection of an entity type to another connection or table.
//!
//! A [`ShardScope`] overrides, for the current thread only, where sessions
//! of one entity type resolve to. Dropping the scope puts back exactly the
//! override that was active when it was entered, so nested scopes unwind in
//! order, and unwinding from a panic restores too.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

use rowbound_core::{Entity, Result, validate_identifier};

/// Where a shard scope points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTarget {
    pub connection: String,
    pub table: String,
}

thread_local! {
    static OVERRIDES: RefCell<HashMap<TypeId, ShardTarget>> = RefCell::new(HashMap::new());
}

/// Active override for `E` on this thread, if any.
pub fn current_target<E: Entity>() -> Option<ShardTarget> {
    OVERRIDES.with(|o| o.borrow().get(&TypeId::of::<E>()).cloned())
}

/// Guard returned by [`ShardScope::enter`].
///
/// Not `Send`: the override it restores belongs to the entering thread.
#[must_use = "the override ends as soon as the scope is dropped"]
pub struct ShardScope<E: Entity> {
    prior: Option<ShardTarget>,
    _marker: PhantomData<(fn() -> E, *const ())>,
}

impl<E: Entity> ShardScope<E> {
    /// Redirect `E` to `connection`/`table` until the scope is dropped.
    pub fn enter(connection: &str, table: &str) -> Result<Self> {
        validate_identifier("connection", connection)?;
        validate_identifier("table", table)?;
        let target = ShardTarget {
            connection: connection.to_string(),
            table: table.to_string(),
        };
        tracing::debug!(
            entity = std::any::type_name::<E>(),
            connection,
            table,
            "entering shard"
        );
        let prior = OVERRIDES.with(|o| o.borrow_mut().insert(TypeId::of::<E>(), target));
        Ok(Self {
            prior,
            _marker: PhantomData,
        })
    }

    /// The override this scope replaced.
    pub fn prior(&self) -> Option<&ShardTarget> {
        self.prior.as_ref()
    }
}

impl<E: Entity> Drop for ShardScope<E> {
    fn drop(&mut self) {
        let prior = self.prior.take();
        // The thread-local may already be gone during thread teardown.
        let _ = OVERRIDES.try_with(|o| {
            let mut o = o.borrow_mut();
            match prior {
                Some(prior) => {
                    o.insert(TypeId::of::<E>(), prior);
                }
                None => {
                    o.remove(&TypeId::of::<E>());
                }
            }
        });
    }
}

/// Run `f` with `E` redirected to `connection`/`table`.
pub fn with_shard<E: Entity, R>(connection: &str, table: &str, f: impl FnOnce() -> R) -> Result<R> {
    let _scope = ShardScope::<E>::enter(connection, table)?;
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbound_core::{Accessor, ConfigErrorKind, DirtySet, FieldInfo, SqlType, Value};

    #[derive(Debug, Clone, Default)]
    struct Log {
        id: i64,
        dirty: DirtySet,
    }

    static FIELDS: &[FieldInfo] = &[FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true)];

    static ACCESSORS: &[Accessor<Log>] = &[Accessor {
        get: |l| Value::BigInt(l.id),
        set: |l, v| {
            l.id = v.try_into()?;
            Ok(())
        },
    }];

    impl Entity for Log {
        const TABLE_NAME: &'static str = "logs";
        const CONNECTION_NAME: &'static str = "main";

        fn fields() -> &'static [FieldInfo] {
            FIELDS
        }

        fn accessors() -> &'static [Accessor<Self>] {
            ACCESSORS
        }

        fn dirty(&self) -> &DirtySet {
            &self.dirty
        }

        fn dirty_mut(&mut self) -> &mut DirtySet {
            &mut self.dirty
        }
    }

    fn target(connection: &str, table: &str) -> Option<ShardTarget> {
        Some(ShardTarget {
            connection: connection.to_string(),
            table: table.to_string(),
        })
    }

    #[test]
    fn test_nested_scopes_restore_in_order() {
        assert_eq!(current_target::<Log>(), None);
        {
            let _outer = ShardScope::<Log>::enter("archive", "logs_2023").unwrap();
            {
                let inner = ShardScope::<Log>::enter("archive", "logs_2024").unwrap();
                assert_eq!(inner.prior(), target("archive", "logs_2023").as_ref());
                assert_eq!(current_target::<Log>(), target("archive", "logs_2024"));
            }
            assert_eq!(current_target::<Log>(), target("archive", "logs_2023"));
        }
        assert_eq!(current_target::<Log>(), None);
    }

    #[test]
    fn test_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _scope = ShardScope::<Log>::enter("archive", "logs_2022").unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(current_target::<Log>(), None);
    }

    #[test]
    fn test_override_is_thread_local() {
        let _scope = ShardScope::<Log>::enter("archive", "logs_2021").unwrap();
        let other = std::thread::spawn(current_target::<Log>).join().unwrap();
        assert_eq!(other, None);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let err = ShardScope::<Log>::enter("archive", "logs; DROP TABLE x").err().unwrap();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidName));
        assert_eq!(current_target::<Log>(), None);
    }

    #[test]
    fn test_with_shard() {
        let seen = with_shard::<Log, _>("archive", "logs_old", current_target::<Log>).unwrap();
        assert_eq!(seen, target("archive", "logs_old"));
        assert_eq!(current_target::<Log>(), None);
    }
}
