#![allow(dead_code)]

use reflect_core::repo::entity_repo::EntityRepository;
use reflect_core::{
    Capabilities, FixedClock, KeyValueStore, Reflection, SequentialIdGenerator, SettingsRecord,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const NOW: i64 = 1_700_000_000_000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(NOW))
}

pub fn caps(clock: &Arc<FixedClock>) -> Capabilities {
    Capabilities::new(clock.clone(), Arc::new(SequentialIdGenerator::new("gen")))
}

/// Separate id namespace for state created before the code under test runs.
pub fn seed_caps() -> Capabilities {
    Capabilities::new(clock(), Arc::new(SequentialIdGenerator::new("seed")))
}

pub fn seed_reflection<S: KeyValueStore>(store: &mut S, id: &str, content: &str, at: i64) {
    EntityRepository::new(store)
        .put_reflection(&Reflection::new(id, content, at))
        .unwrap();
}

pub fn seed_settings<S: KeyValueStore>(store: &mut S, settings: &SettingsRecord) {
    EntityRepository::new(store).put_settings(settings).unwrap();
}

pub fn local_prefs() -> SettingsRecord {
    SettingsRecord::new("prefs", NOW - DAY_MS)
        .with_value("theme", json!("dark"))
        .with_value("reminder", Value::Null)
}

/// Local state shared by the import tests: r1 conflicts, r2 is identical,
/// r3 is new, `prefs` conflicts.
pub fn seed_local<S: KeyValueStore>(store: &mut S) {
    seed_reflection(store, "r1", "I like cats", NOW - 2 * DAY_MS);
    seed_reflection(store, "r2", "same on both sides", NOW - 2 * DAY_MS);
    seed_settings(store, &local_prefs());
}

pub fn device_package() -> Value {
    json!({
        "format": "reflect-device-export",
        "schema_version": 1,
        "exported_at": NOW - 1_000,
        "source_device": "tablet",
        "reflections": [
            { "id": "r1", "content": "I like dogs", "created_at": NOW - 3 * DAY_MS, "updated_at": NOW - 1_000 },
            { "id": "r2", "content": "same on both sides", "updated_at": NOW - 5_000 },
            { "id": "r3", "content": "brand new entry", "prompt": "Today?", "updated_at": NOW - 1_000 }
        ],
        "settings": [
            { "id": "prefs", "values": { "theme": "light", "reminder": "21:00", "locale": "de" }, "updated_at": NOW - 1_000 }
        ],
        "recordings": [ { "id": "audio-1" } ]
    })
}

pub fn without_backups(entries: Vec<(String, String)>) -> Vec<(String, String)> {
    entries
        .into_iter()
        .filter(|(key, _)| !key.starts_with("backup/"))
        .collect()
}
