//! Process-wide entity metadata registry.
//!
//! Each entity type publishes one operate object, the per-type hooks the
//! session runtime calls into. Publication never happens under a lock that
//! user code can observe: the type's initializer runs first, outside any
//! lock, so initializers that touch other entity types (which touch this one
//! again) cannot deadlock. A thread that re-enters initialization of a type
//! it is already initializing skips the initializer instead of recursing.
//!
//! Two competing operate objects for one type are resolved by
//! [`EntityOperate::depth`]: the more specialized one wins, ties keep the
//! first published.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rowbound_core::{ConfigErrorKind, Entity, Error, Result};

use crate::session::EntitySession;

/// Per-type hooks used by the session runtime.
pub trait EntityOperate<E: Entity>: Send + Sync + 'static {
    /// Specialization rank. A higher depth replaces a published lower one.
    fn depth(&self) -> u32 {
        0
    }

    fn connection_name(&self) -> &str {
        E::CONNECTION_NAME
    }

    fn table_name(&self) -> &str {
        E::TABLE_NAME
    }

    /// First-use data seeding, run once per session after its schema check.
    fn init_data(&self, _session: &EntitySession<E>) -> Result<()> {
        Ok(())
    }
}

/// The operate object published when a type registers nothing itself.
pub struct EntityFactory<E>(PhantomData<fn() -> E>);

impl<E> Default for EntityFactory<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<E: Entity> EntityOperate<E> for EntityFactory<E> {}

struct Published {
    depth: u32,
    /// Holds an `Arc<dyn EntityOperate<E>>`.
    operate: Arc<dyn Any + Send + Sync>,
}

/// Registry of published operate objects.
pub struct MetadataRegistry {
    seen: DashMap<TypeId, &'static str>,
    published: DashMap<TypeId, Published>,
}

static REGISTRY: LazyLock<MetadataRegistry> = LazyLock::new(|| MetadataRegistry {
    seen: DashMap::new(),
    published: DashMap::new(),
});

/// The process-wide registry.
pub fn registry() -> &'static MetadataRegistry {
    &REGISTRY
}

thread_local! {
    // Types whose initializer is running on this thread.
    static INITIALIZING: RefCell<HashSet<TypeId>> = RefCell::new(HashSet::new());
    static INSERT_IDENTITY: RefCell<HashSet<TypeId>> = RefCell::new(HashSet::new());
}

struct InitializingGuard(TypeId);

impl Drop for InitializingGuard {
    fn drop(&mut self) {
        INITIALIZING.with(|set| {
            set.borrow_mut().remove(&self.0);
        });
    }
}

impl MetadataRegistry {
    /// Operate object for `E`, initializing and publishing on first use.
    pub fn get_or_create<E: Entity>(&self) -> Result<Arc<dyn EntityOperate<E>>> {
        if let Some(operate) = self.lookup::<E>()? {
            return Ok(operate);
        }
        validate::<E>()?;
        self.run_initializer::<E>();
        // The initializer may have registered a specialized operate object.
        if let Some(operate) = self.lookup::<E>()? {
            return Ok(operate);
        }
        self.publish::<E>(Arc::new(EntityFactory::<E>::default()))
    }

    /// Publish a custom operate object for `E`.
    ///
    /// Returns the winner, which is `operate` unless an object of greater
    /// depth is already published.
    pub fn register<E, O>(&self, operate: O) -> Result<Arc<dyn EntityOperate<E>>>
    where
        E: Entity,
        O: EntityOperate<E>,
    {
        validate::<E>()?;
        self.publish::<E>(Arc::new(operate))
    }

    /// Has `E` been through initialization at least once?
    pub fn is_seen<E: Entity>(&self) -> bool {
        self.seen.contains_key(&TypeId::of::<E>())
    }

    pub fn is_published<E: Entity>(&self) -> bool {
        self.published.contains_key(&TypeId::of::<E>())
    }

    /// Names of all types seen so far.
    pub fn seen_types(&self) -> Vec<&'static str> {
        self.seen.iter().map(|entry| *entry.value()).collect()
    }

    fn run_initializer<E: Entity>(&self) {
        let id = TypeId::of::<E>();
        let first_on_thread = INITIALIZING.with(|set| set.borrow_mut().insert(id));
        if first_on_thread {
            let _guard = InitializingGuard(id);
            E::initialize();
            let _ = E::default();
        } else {
            tracing::trace!(entity = std::any::type_name::<E>(), "re-entrant initialization skipped");
        }
        self.seen.insert(id, std::any::type_name::<E>());
    }

    fn lookup<E: Entity>(&self) -> Result<Option<Arc<dyn EntityOperate<E>>>> {
        match self.published.get(&TypeId::of::<E>()) {
            Some(entry) => downcast::<E>(&entry.operate).map(Some),
            None => Ok(None),
        }
    }

    fn publish<E: Entity>(
        &self,
        operate: Arc<dyn EntityOperate<E>>,
    ) -> Result<Arc<dyn EntityOperate<E>>> {
        let depth = operate.depth();
        let candidate = Published {
            depth,
            operate: Arc::new(operate),
        };
        let winner = match self.published.entry(TypeId::of::<E>()) {
            Entry::Occupied(mut entry) => {
                if depth > entry.get().depth {
                    entry.insert(candidate);
                    tracing::debug!(
                        entity = std::any::type_name::<E>(),
                        depth,
                        "specialized operate object replaced published one"
                    );
                }
                Arc::clone(&entry.get().operate)
            }
            Entry::Vacant(entry) => {
                tracing::debug!(entity = std::any::type_name::<E>(), depth, "operate object published");
                Arc::clone(&entry.insert(candidate).operate)
            }
        };
        downcast::<E>(&winner)
    }
}

fn downcast<E: Entity>(operate: &Arc<dyn Any + Send + Sync>) -> Result<Arc<dyn EntityOperate<E>>> {
    operate
        .downcast_ref::<Arc<dyn EntityOperate<E>>>()
        .cloned()
        .ok_or_else(|| {
            Error::Custom(format!(
                "operate object for `{}` has the wrong type",
                std::any::type_name::<E>()
            ))
        })
}

/// Reject types whose metadata cannot drive a session.
fn validate<E: Entity>() -> Result<()> {
    let name = std::any::type_name::<E>();
    let problem = if E::TABLE_NAME.is_empty() {
        Some("has no table name".to_string())
    } else if E::CONNECTION_NAME.is_empty() {
        Some("has no connection name".to_string())
    } else if E::fields().is_empty() {
        Some("declares no fields".to_string())
    } else if E::fields().len() != E::accessors().len() {
        Some(format!(
            "declares {} fields but {} accessors",
            E::fields().len(),
            E::accessors().len()
        ))
    } else {
        None
    };
    match problem {
        Some(problem) => Err(Error::config(
            ConfigErrorKind::InvalidEntity,
            format!("entity type `{name}` {problem}"),
        )),
        None => Ok(()),
    }
}

/// Allow or forbid explicit identity values on insert for `E`, on this
/// thread only.
pub fn set_allow_insert_identity<E: Entity>(allow: bool) {
    INSERT_IDENTITY.with(|set| {
        let mut set = set.borrow_mut();
        if allow {
            set.insert(TypeId::of::<E>());
        } else {
            set.remove(&TypeId::of::<E>());
        }
    });
}

pub fn allow_insert_identity<E: Entity>() -> bool {
    INSERT_IDENTITY.with(|set| set.borrow().contains(&TypeId::of::<E>()))
}

/// Run `f` with explicit identity inserts enabled for `E`, restoring the
/// previous setting afterwards.
pub fn with_insert_identity<E: Entity, R>(f: impl FnOnce() -> R) -> R {
    struct Restore<E: Entity>(bool, PhantomData<fn() -> E>);
    impl<E: Entity> Drop for Restore<E> {
        fn drop(&mut self) {
            set_allow_insert_identity::<E>(self.0);
        }
    }

    let _restore = Restore::<E>(allow_insert_identity::<E>(), PhantomData);
    set_allow_insert_identity::<E>(true);
    f()
}
