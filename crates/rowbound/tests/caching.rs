//! Collection cache, single-object cache and record count behavior.

mod common;

use std::sync::{Arc, Mutex};

use rowbound::prelude::*;
use rowbound::{ChangeReason, DataChanged, remove_listener};
use rowbound_memory::MemoryDatabase;

#[derive(Debug, Clone, Default, Entity)]
#[entity(table = "notes", connection = "cache_default")]
struct Note {
    #[entity(primary_key, identity)]
    id: i64,
    title: String,
    pinned: bool,
    dirty: DirtySet,
}

fn note(title: &str) -> Note {
    Note {
        title: title.to_string(),
        ..Note::default()
    }
}

fn open(name: &str, config: SessionConfig) -> (Arc<MemoryDatabase>, Arc<EntitySession<Note>>) {
    let db = common::connect(name, config);
    (db, EntitySession::get(name, "notes").unwrap())
}

fn titles(rows: &[Note]) -> Vec<String> {
    let mut titles: Vec<String> = rows.iter().map(|n| n.title.clone()).collect();
    titles.sort();
    titles
}

#[test]
fn collection_cache_serves_repeat_reads() {
    let (db, notes) = open("cache_repeat", SessionConfig::default());
    notes.insert(&mut note("a")).unwrap();
    notes.insert(&mut note("b")).unwrap();
    db.reset_stats();

    assert_eq!(notes.cache_all().unwrap().len(), 2);
    let after_first = db.stats().queries;
    assert_eq!(notes.cache_all().unwrap().len(), 2);
    assert_eq!(db.stats().queries, after_first);

    let stats = notes.collection_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 2);
}

#[test]
fn hold_cache_applies_typed_writes_in_place() {
    let (db, notes) = open("cache_hold", common::hold_cache());
    let mut first = note("first");
    notes.insert(&mut first).unwrap();
    notes.cache_all().unwrap();
    db.reset_stats();

    let mut second = note("second");
    notes.insert(&mut second).unwrap();
    first.set_title("first, edited".to_string());
    notes.update(&mut first).unwrap();

    let cached = notes.cache_all().unwrap();
    assert_eq!(titles(&cached), vec!["first, edited", "second"]);
    assert_eq!(db.stats().queries, 0);

    notes.delete(&second).unwrap();
    assert_eq!(titles(&notes.cache_all().unwrap()), vec!["first, edited"]);
    assert_eq!(db.stats().queries, 0);
}

#[test]
fn without_hold_cache_snapshots_live_until_expiry() {
    let (_db, notes) = open("cache_soft", SessionConfig::default());
    notes.insert(&mut note("old")).unwrap();
    assert_eq!(notes.cache_all().unwrap().len(), 1);

    notes.insert(&mut note("new")).unwrap();
    assert_eq!(notes.cache_all().unwrap().len(), 1);

    let (_db, fresh) = open("cache_expiring", SessionConfig::new().collection_expiry(0));
    fresh.insert(&mut note("old")).unwrap();
    assert_eq!(fresh.cache_all().unwrap().len(), 1);
    fresh.insert(&mut note("new")).unwrap();
    assert_eq!(fresh.cache_all().unwrap().len(), 2);
}

#[test]
fn raw_sql_always_evicts() {
    let (_db, notes) = open("cache_raw", common::hold_cache());
    let mut n = note("draft");
    notes.insert(&mut n).unwrap();
    let key = [Value::BigInt(n.id)];
    notes.cache_all().unwrap();
    notes.find_cached(&key).unwrap();
    assert_eq!(notes.single_cache().len(), 1);

    let affected = notes
        .execute_raw(
            "UPDATE notes SET title = ? WHERE id = ?",
            vec![Value::from("published"), Value::BigInt(n.id)],
        )
        .unwrap();
    assert_eq!(affected, 1);

    assert!(!notes.collection_cache().is_populated());
    assert!(notes.single_cache().is_empty());
    assert_eq!(notes.cache_all().unwrap()[0].title, "published");
    assert_eq!(notes.find_cached(&key).unwrap().unwrap().title, "published");
}

#[test]
fn find_cached_hits_and_misses() {
    let (db, notes) = open("cache_single", SessionConfig::default());
    let mut n = note("single");
    notes.insert(&mut n).unwrap();
    db.reset_stats();

    let key = [Value::Int(1)];
    assert!(notes.find_cached(&key).unwrap().is_some());
    assert!(notes.find_cached(&[Value::BigInt(1)]).unwrap().is_some());
    assert!(notes.find_cached(&[Value::BigInt(99)]).unwrap().is_none());
    assert_eq!(db.stats().queries, 2);

    let stats = notes.single_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[test]
fn oversized_table_retires_collection_cache() {
    let (db, notes) = open("cache_ceiling", SessionConfig::new().collection_ceiling(3));
    for i in 0..5 {
        notes.insert(&mut note(&format!("n{i}"))).unwrap();
    }
    assert_eq!(notes.cache_all().unwrap().len(), 5);
    assert!(notes.collection_cache().is_retired());

    db.reset_stats();
    notes.cache_all().unwrap();
    notes.cache_all().unwrap();
    assert_eq!(db.stats().queries, 2);
}

#[test]
fn count_tracks_writes_below_exact_ceiling() {
    let (db, notes) = open("cache_count_exact", SessionConfig::default());
    assert_eq!(notes.count(), 0);
    db.reset_stats();

    let mut a = note("a");
    notes.insert(&mut a).unwrap();
    notes.insert(&mut note("b")).unwrap();
    assert_eq!(notes.count(), 2);
    notes.delete(&a).unwrap();
    assert_eq!(notes.count(), 1);
    assert_eq!(db.stats().queries, 0);
}

#[test]
fn deleting_a_missing_row_leaves_count_alone() {
    let (_db, notes) = open("cache_count_redelete", SessionConfig::default());
    let mut a = note("a");
    notes.insert(&mut a).unwrap();
    notes.insert(&mut note("b")).unwrap();
    assert_eq!(notes.count(), 2);

    assert_eq!(notes.delete(&a).unwrap(), 1);
    assert_eq!(notes.delete(&a).unwrap(), 0);
    assert_eq!(notes.count(), 1);
    assert_eq!(notes.find_count().unwrap(), 1);
}

#[test]
fn update_of_missing_row_adds_nothing_to_the_cache() {
    let (db, notes) = open("cache_update_missing", common::hold_cache());
    notes.insert(&mut note("real")).unwrap();
    notes.cache_all().unwrap();

    let mut ghost = Note {
        id: 999,
        ..Note::default()
    };
    ghost.set_title("ghost".to_string());
    assert_eq!(notes.update(&mut ghost).unwrap(), 0);
    assert!(!ghost.has_dirty());

    assert_eq!(titles(&notes.cache_all().unwrap()), vec!["real"]);
    assert_eq!(db.row_count("notes"), Some(1));
    assert!(notes.find_cached(&[Value::BigInt(999)]).unwrap().is_none());
}

#[test]
fn key_only_edits_are_dropped_from_the_dirty_set() {
    let (db, notes) = open("cache_key_edit", SessionConfig::default());
    let mut n = note("keyed");
    notes.insert(&mut n).unwrap();
    db.reset_stats();

    let original = n.id;
    n.set_id(original + 100);
    assert!(n.has_dirty());
    assert_eq!(notes.update(&mut n).unwrap(), 0);
    assert!(!n.has_dirty());
    assert_eq!(db.stats().executes, 0);
    assert!(notes.find_by_key(&[Value::BigInt(original)]).unwrap().is_some());
}

#[test]
fn count_above_exact_ceiling_is_stable_within_ttl() {
    let (_db, notes) = open(
        "cache_count_large",
        SessionConfig::new().exact_count_ceiling(2),
    );
    for title in ["a", "b", "c"] {
        notes.insert(&mut note(title)).unwrap();
    }
    assert_eq!(notes.count(), 3);
    notes.insert(&mut note("d")).unwrap();
    assert_eq!(notes.count(), 3);
    assert_eq!(notes.find_count().unwrap(), 4);
}

#[test]
fn slow_count_uses_max_key_estimate() {
    let (db, notes) = open(
        "cache_count_slow",
        SessionConfig::new().count_upgrade_threshold(3),
    );
    let mut rows: Vec<Note> = (0..5).map(|i| note(&format!("n{i}"))).collect();
    for row in &mut rows {
        notes.insert(row).unwrap();
    }
    notes.delete(&rows[1]).unwrap();
    db.set_count_is_slow(true);

    assert_eq!(notes.count(), 5);
    assert_eq!(notes.find_count().unwrap(), 4);
}

#[test]
fn count_failure_reads_as_zero_and_is_not_cached() {
    let (db, notes) = open("cache_count_fail", SessionConfig::default());
    notes.insert(&mut note("a")).unwrap();
    db.fail_queries(true);
    assert_eq!(notes.count(), 0);
    db.fail_queries(false);
    assert_eq!(notes.count(), 1);
}

#[test]
fn listeners_see_changes() {
    let (_db, notes) = open("cache_events", common::hold_cache());
    let seen: Arc<Mutex<Vec<DataChanged>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let id = Note::on_data_changed(move |event| {
        if event.connection == "cache_events" {
            sink.lock().unwrap().push(event.clone());
        }
    });

    notes.insert(&mut note("x")).unwrap();
    notes
        .execute_raw("DELETE FROM notes", Vec::new())
        .unwrap();
    notes.invalidate_caches();

    let events = seen.lock().unwrap().clone();
    let reasons: Vec<(ChangeReason, bool)> = events.iter().map(|e| (e.reason, e.hard)).collect();
    assert_eq!(
        reasons,
        vec![
            (ChangeReason::Write, false),
            (ChangeReason::RawSql, true),
            (ChangeReason::Manual, true),
        ]
    );
    assert!(events.iter().all(|e| e.table == "notes"));

    assert!(remove_listener::<Note>(id));
    notes.insert(&mut note("y")).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3);
}
