//! First-use schema reconciliation under each migration mode.

mod common;

use std::sync::{Barrier, LazyLock};
use std::thread;
use std::time::Duration;

use rowbound::prelude::*;
use rowbound::{ColumnInfo, EntitySchema, QueryErrorKind, SchemaProvider, SchemaState, registry};

#[derive(Debug, Clone, Default, Entity)]
#[entity(connection = "schema_full")]
struct Gauge {
    #[entity(primary_key, identity)]
    id: i64,
    label: String,
    unit: Option<String>,
    dirty: DirtySet,
}

#[derive(Debug, Clone, Default, Entity)]
#[entity(connection = "schema_slow")]
struct Slowpoke {
    #[entity(primary_key, identity)]
    id: i64,
    dirty: DirtySet,
}

static SEED_STARTED: LazyLock<Barrier> = LazyLock::new(|| Barrier::new(2));
static SEED_RELEASED: LazyLock<Barrier> = LazyLock::new(|| Barrier::new(2));

struct BlockingSeed;

impl EntityOperate<Slowpoke> for BlockingSeed {
    fn depth(&self) -> u32 {
        1
    }

    fn init_data(&self, _session: &EntitySession<Slowpoke>) -> Result<()> {
        SEED_STARTED.wait();
        SEED_RELEASED.wait();
        Ok(())
    }
}

fn gauge(label: &str) -> Gauge {
    Gauge {
        label: label.to_string(),
        ..Gauge::default()
    }
}

fn with_legacy_column(table: &str) -> rowbound::TableInfo {
    let mut info = Gauge::table_schema(table);
    let mut legacy = ColumnInfo::new("legacy", "TEXT");
    legacy.nullable = true;
    info.columns.push(legacy);
    info
}

#[test]
fn read_only_leaves_missing_table_missing() {
    let name = "schema_read_only";
    let db = common::connect(name, SessionConfig::new().migration(MigrationMode::ReadOnly));
    let gauges = EntitySession::<Gauge>::get(name, "gauges").unwrap();

    assert!(gauges.ensure_ready(false));
    assert_eq!(gauges.schema_state(), SchemaState::Ready);
    assert!(!db.has_table("gauges"));
    assert_eq!(db.stats().schema_applies, 0);

    let err = gauges.find_count().unwrap_err();
    assert!(matches!(err, Error::Query(ref q) if q.kind == QueryErrorKind::NotFound));
}

#[test]
fn off_never_inspects() {
    let name = "schema_off";
    let db = common::connect(name, SessionConfig::new().migration(MigrationMode::Off));
    db.create_table(&Gauge::table_schema("gauges")).unwrap();
    let gauges = EntitySession::<Gauge>::get(name, "gauges").unwrap();

    gauges.insert(&mut gauge("psi")).unwrap();
    assert_eq!(gauges.find_count().unwrap(), 1);
    assert_eq!(db.stats().schema_reads, 0);
}

#[test]
fn on_adds_missing_columns() {
    let name = "schema_on";
    let db = common::connect(name, SessionConfig::default());
    let mut old = Gauge::table_schema("gauges");
    old.columns.retain(|c| c.name != "unit");
    db.create_table(&old).unwrap();

    let gauges = EntitySession::<Gauge>::get(name, "gauges").unwrap();
    let mut g = gauge("bar");
    g.unit = Some("kPa".to_string());
    gauges.insert(&mut g).unwrap();

    let live = db.get_table("gauges").unwrap().unwrap();
    assert!(live.column("unit").is_some_and(|c| c.nullable));
    let loaded = gauges.find_by_key(&[Value::BigInt(g.id)]).unwrap().unwrap();
    assert_eq!(loaded.unit.as_deref(), Some("kPa"));
    assert!(db.applied_ddl().iter().any(|ddl| ddl.contains("ADD COLUMN")));
}

#[test]
fn full_drops_columns_only_for_the_default_pairing() {
    let db = common::connect("schema_full", SessionConfig::new().migration(MigrationMode::Full));
    db.create_table(&with_legacy_column("gauges")).unwrap();
    db.create_table(&with_legacy_column("gauges_copy")).unwrap();

    let copy = EntitySession::<Gauge>::get("schema_full", "gauges_copy").unwrap();
    assert!(!copy.is_default());
    copy.ensure_ready(false);
    let live = db.get_table("gauges_copy").unwrap().unwrap();
    assert!(live.column("legacy").is_some());

    let default = Gauge::session().unwrap();
    assert!(default.is_default());
    default.ensure_ready(false);
    let live = db.get_table("gauges").unwrap().unwrap();
    assert!(live.column("legacy").is_none());
    assert!(live.column("label").is_some());
}

#[test]
fn truncate_resets_schema_check() {
    let name = "schema_truncate";
    let db = common::connect(name, SessionConfig::default());
    let gauges = EntitySession::<Gauge>::get(name, "gauges").unwrap();
    gauges.insert(&mut gauge("a")).unwrap();
    gauges.insert(&mut gauge("b")).unwrap();
    let reads = db.stats().schema_reads;

    assert_eq!(gauges.truncate().unwrap(), 2);
    assert_eq!(gauges.schema_state(), SchemaState::Uninitialized);
    assert_eq!(gauges.find_count().unwrap(), 0);
    assert_eq!(gauges.schema_state(), SchemaState::Ready);
    assert_eq!(db.stats().schema_reads, reads + 1);
}

#[test]
fn waiting_on_a_busy_check_gives_up_after_the_timeout() {
    common::connect("schema_slow", SessionConfig::default());
    registry().register::<Slowpoke, _>(BlockingSeed).unwrap();

    let checker = thread::spawn(|| Slowpoke::session().unwrap().ensure_ready(false));
    SEED_STARTED.wait();

    let session = Slowpoke::session().unwrap();
    assert_eq!(session.schema_state(), SchemaState::Checking);
    assert!(!session.ensure_ready_with(false, Duration::from_millis(20)));

    SEED_RELEASED.wait();
    assert!(checker.join().unwrap());
    assert_eq!(session.schema_state(), SchemaState::Ready);
    assert!(session.ensure_ready_with(false, Duration::from_millis(20)));
}

#[test]
fn migration_mode_comes_from_json_settings() {
    let settings = serde_json::json!({ "migration": "read_only", "hold_cache": true });
    let config = SessionConfig::from_json(&settings.to_string()).unwrap();
    assert_eq!(config.migration, MigrationMode::ReadOnly);
    assert!(config.hold_cache);
    assert_eq!(config.collection_ceiling, SessionConfig::default().collection_ceiling);

    let name = "schema_from_json";
    let db = common::connect(name, config);
    let gauges = EntitySession::<Gauge>::get(name, "gauges").unwrap();
    assert!(gauges.ensure_ready(false));
    assert!(!db.has_table("gauges"));
}
