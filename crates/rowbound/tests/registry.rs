//! Entity registration and session identity under concurrent first use.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rowbound::prelude::*;
use rowbound::{SchemaState, registry};

#[derive(Debug, Clone, Default, Entity)]
#[entity(table = "gadgets", connection = "reg_gadgets")]
struct Gadget {
    #[entity(primary_key, identity)]
    id: i64,
    label: String,
    dirty: DirtySet,
}

#[derive(Debug, Clone, Default, Entity)]
#[entity(table = "sprockets", connection = "reg_sprockets")]
struct Sprocket {
    #[entity(primary_key, identity)]
    id: i64,
    teeth: i32,
    dirty: DirtySet,
}

#[derive(Debug, Clone, Default, Entity)]
#[entity(connection = "reg_versioned")]
struct Versioned {
    #[entity(primary_key)]
    code: String,
    dirty: DirtySet,
}

static SPROCKET_SEEDS: AtomicUsize = AtomicUsize::new(0);

struct SprocketSeed;

impl EntityOperate<Sprocket> for SprocketSeed {
    fn depth(&self) -> u32 {
        1
    }

    fn init_data(&self, session: &EntitySession<Sprocket>) -> Result<()> {
        SPROCKET_SEEDS.fetch_add(1, Ordering::SeqCst);
        session.insert(&mut Sprocket {
            teeth: 12,
            ..Sprocket::default()
        })?;
        Ok(())
    }
}

struct VersionedV2;

impl EntityOperate<Versioned> for VersionedV2 {
    fn depth(&self) -> u32 {
        2
    }

    fn table_name(&self) -> &str {
        "versioneds_v2"
    }
}

#[test]
fn concurrent_first_use_yields_one_session() {
    common::connect("reg_gadgets", SessionConfig::default());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                EntitySession::<Gadget>::current().unwrap()
            })
        })
        .collect();
    let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for session in &sessions[1..] {
        assert!(Arc::ptr_eq(&sessions[0], session));
    }
    assert!(registry().is_seen::<Gadget>());
    assert!(registry().is_published::<Gadget>());
    assert!(sessions[0].is_default());
}

#[test]
fn concurrent_first_access_checks_schema_and_seeds_once() {
    let db = common::connect("reg_sprockets", SessionConfig::default());
    registry().register::<Sprocket, _>(SprocketSeed).unwrap();
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                Sprocket::find_count().unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1);
    }

    assert_eq!(db.stats().schema_applies, 1);
    assert_eq!(SPROCKET_SEEDS.load(Ordering::SeqCst), 1);
    assert_eq!(
        Sprocket::session().unwrap().schema_state(),
        SchemaState::Ready
    );
}

#[test]
fn deeper_operate_object_redirects_default_table() {
    let db = common::connect("reg_versioned", SessionConfig::default());
    registry().register::<Versioned, _>(VersionedV2).unwrap();

    let session = Versioned::session().unwrap();
    assert_eq!(session.table(), "versioneds_v2");
    assert!(session.is_default());

    let mut row = Versioned {
        code: "A-1".to_string(),
        ..Versioned::default()
    };
    row.insert().unwrap();
    assert!(db.has_table("versioneds_v2"));
    assert!(!db.has_table("versioneds"));
    assert_eq!(Versioned::TABLE_NAME, "versioneds");
}

#[test]
fn sessions_are_keyed_by_connection_and_table() {
    let a = EntitySession::<Gadget>::get("reg_other", "gadgets").unwrap();
    let b = EntitySession::<Gadget>::get("reg_other", "gadgets_old").unwrap();
    let c = EntitySession::<Gadget>::get("reg_other", "gadgets").unwrap();
    assert!(Arc::ptr_eq(&a, &c));
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(!a.is_default());

    let err = EntitySession::<Gadget>::get("reg_other", "gadgets; --").unwrap_err();
    assert_eq!(err.config_kind(), Some(rowbound::ConfigErrorKind::InvalidName));
}
