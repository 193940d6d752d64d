use std::{sync::Arc, thread};

use semantic_ui_map::{
    memory::{
        cache::{StorageConfig, UiMemory},
        playbook::{JOURNAL_LIMIT, RecoveryPlaybook},
        store::MapStore,
    },
    model::{
        element::{ElementKind, Provenance, SemanticElement},
        fingerprint::WindowFingerprint,
        geometry::BBox,
        ui_map::UiMap,
    },
};

fn fp(title: &str) -> WindowFingerprint {
    WindowFingerprint::compute(title, 400, 300)
}

fn button(id: &str, x: i32) -> SemanticElement {
    SemanticElement {
        id: id.into(),
        kind: ElementKind::Button {
            text: Some(id.into()),
        },
        bbox: BBox::new(x, 10, 80, 30),
        confidence: 0.9,
        provenance: Provenance::Structural,
        paired_with: None,
        signature: None,
    }
}

fn login_map(x: i32) -> UiMap {
    UiMap::new(fp("Login"), vec![button("sign_in", x)])
}

fn file_config(dir: &tempfile::TempDir) -> StorageConfig {
    StorageConfig {
        db_path: dir.path().join("nested").join("ui.db").display().to_string(),
        ..StorageConfig::default()
    }
}

// =========================================================================
// Fingerprints
// =========================================================================

#[test]
fn fingerprint_ignores_position_but_not_size_or_title() {
    assert_eq!(fp("Login"), WindowFingerprint::compute("Login", 400, 300));
    assert_ne!(fp("Login"), WindowFingerprint::compute("Login", 800, 600), "Resize changes the screen");
    assert_ne!(fp("Login"), fp("Settings"));
    assert_eq!(fp("Login").as_str().len(), 40, "sha1 hex");
}

// =========================================================================
// Store
// =========================================================================

#[test]
fn store_round_trips_and_supersedes() {
    let store = MapStore::open_in_memory(5).unwrap();
    assert_eq!(store.load(&fp("Login")).unwrap(), None, "Miss on empty store");

    store.upsert(&login_map(10)).unwrap();
    store.upsert(&login_map(20)).unwrap();

    let live = store.load(&fp("Login")).unwrap().expect("live map");
    assert_eq!(live.get("sign_in").unwrap().bbox.x, 20, "Newest map wins");
    assert_eq!(store.history_count(&fp("Login")).unwrap(), 1, "Old map retired, not lost");
    assert_eq!(store.fingerprints().unwrap(), vec![fp("Login")]);
}

#[test]
fn history_is_pruned_per_fingerprint() {
    let store = MapStore::open_in_memory(2).unwrap();
    for x in 0..6 {
        store.upsert(&login_map(x)).unwrap();
    }
    store.upsert(&UiMap::empty(fp("Settings"))).unwrap();

    assert_eq!(store.history_count(&fp("Login")).unwrap(), 2);
    assert_eq!(store.history_count(&fp("Settings")).unwrap(), 0);
}

#[test]
fn retire_removes_the_live_map() {
    let store = MapStore::open_in_memory(5).unwrap();
    store.upsert(&login_map(10)).unwrap();

    assert!(store.retire(&fp("Login"), "invalidated").unwrap());
    assert_eq!(store.load(&fp("Login")).unwrap(), None);
    assert!(!store.retire(&fp("Login"), "invalidated").unwrap(), "Nothing left to retire");
}

#[test]
fn map_from_other_schema_version_reads_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ui.db");
    let store = MapStore::open(&path, 5).unwrap();
    store.upsert(&login_map(10)).unwrap();

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute("UPDATE ui_maps SET schema_version = 99", [])
        .unwrap();

    assert_eq!(store.load(&fp("Login")).unwrap(), None, "Stale schema means rebuild");
}

#[test]
fn stored_map_keeps_every_field() {
    let store = MapStore::open_in_memory(5).unwrap();
    let map = UiMap::new(
        fp("Login"),
        vec![
            SemanticElement {
                paired_with: Some("username".into()),
                signature: Some(semantic_ui_map::model::element::VisualSignature::new(0xF0F0, 140)),
                ..button("sign_in", 10)
            },
            SemanticElement {
                kind: ElementKind::Label {
                    text: "Username".into(),
                },
                provenance: Provenance::Fused,
                ..button("username", 200)
            },
        ],
    );

    store.upsert(&map).unwrap();

    assert_eq!(store.load(&fp("Login")).unwrap(), Some(map));
}

// =========================================================================
// Cache
// =========================================================================

#[test]
fn memory_serves_what_was_put() {
    let memory = UiMemory::in_memory(&StorageConfig::default()).unwrap();
    assert!(memory.get(&fp("Login")).unwrap().is_none());

    let stored = memory.put(login_map(10)).unwrap();
    let fetched = memory.get(&fp("Login")).unwrap().expect("hit");

    assert!(Arc::ptr_eq(&stored, &fetched), "Served from the hot layer");
}

#[test]
fn invalidate_forgets_the_map() {
    let memory = UiMemory::in_memory(&StorageConfig::default()).unwrap();
    memory.put(login_map(10)).unwrap();

    assert!(memory.invalidate(&fp("Login")).unwrap());
    assert!(memory.get(&fp("Login")).unwrap().is_none(), "Neither layer keeps it");
    assert!(!memory.invalidate(&fp("Login")).unwrap());
    assert_eq!(memory.store().history_count(&fp("Login")).unwrap(), 1);
}

#[test]
fn maps_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    {
        let memory = UiMemory::open(&config).unwrap();
        memory.put(login_map(42)).unwrap();
    }

    let reopened = UiMemory::open(&config).unwrap();
    let map = reopened.get(&fp("Login")).unwrap().expect("persisted");
    assert_eq!(map.get("sign_in").unwrap().bbox.x, 42);
}

#[test]
fn hot_layer_evicts_but_store_still_answers() {
    let memory = UiMemory::in_memory(&StorageConfig {
        hot_capacity: 1,
        ..StorageConfig::default()
    })
    .unwrap();

    memory.put(UiMap::empty(fp("First"))).unwrap();
    memory.put(UiMap::empty(fp("Second"))).unwrap();

    assert!(memory.get(&fp("First")).unwrap().is_some(), "Evicted from memory, read back from the store");
    assert!(memory.get(&fp("Second")).unwrap().is_some());
}

#[test]
fn concurrent_writers_leave_one_live_map() {
    let memory = Arc::new(UiMemory::in_memory(&StorageConfig::default()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let memory = memory.clone();
            thread::spawn(move || {
                memory.put(login_map(i)).unwrap();
                memory.put(UiMap::empty(fp(&format!("Window {}", i)))).unwrap();
                memory.get(&fp("Login")).unwrap().expect("some map is live")
            })
        })
        .collect();

    for h in handles {
        let map = h.join().expect("thread panicked");
        assert_eq!(map.len(), 1, "Never a torn map");
    }

    assert_eq!(memory.store().fingerprints().unwrap().len(), 9);
    assert_eq!(memory.store().history_count(&fp("Login")).unwrap(), 5, "Pruned to the limit");
    assert_eq!(memory.locked_keys(), 0, "No lock outlives its writers");
}

#[test]
fn per_window_locks_are_released_after_use() {
    let memory = UiMemory::in_memory(&StorageConfig::default()).unwrap();

    for i in 0..50 {
        let window = fp(&format!("Window {}", i));
        memory.put(UiMap::empty(window.clone())).unwrap();
        memory.get(&window).unwrap();
        memory.invalidate(&window).unwrap();
    }
    memory.get(&fp("Never stored")).unwrap();

    assert_eq!(memory.locked_keys(), 0);
}

// =========================================================================
// Recovery playbook
// =========================================================================

#[test]
fn empty_playbook_says_so() {
    let playbook = RecoveryPlaybook::in_memory();
    assert!(playbook.is_empty());
    assert!(playbook.resume_instructions().contains("No history found"));
}

#[test]
fn playbook_keeps_the_newest_steps_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal").join("steps.json");

    let mut playbook = RecoveryPlaybook::load(&path);
    for i in 0..JOURNAL_LIMIT + 3 {
        playbook
            .record_step(&format!("step_{}", i), "Settings", "click")
            .unwrap();
    }

    let reloaded = RecoveryPlaybook::load(&path);
    assert_eq!(reloaded.len(), JOURNAL_LIMIT);
    assert_eq!(reloaded.steps().next().unwrap().id, "step_3", "Oldest steps dropped");

    let md = reloaded.resume_instructions();
    assert!(md.starts_with("## Recovery Playbook: Resuming Session"), "{}", md);
    assert!(md.contains("1. On **Settings**, click **step_3**"), "{}", md);
}

#[test]
fn malformed_journal_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steps.json");
    std::fs::write(&path, "{ not json").unwrap();

    let playbook = RecoveryPlaybook::load(&path);
    assert!(playbook.is_empty());
}
