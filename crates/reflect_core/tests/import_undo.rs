mod common;

use common::{caps, clock, device_package, seed_local, without_backups, DAY_MS};
use reflect_core::db::open_db_in_memory;
use reflect_core::repo::flags::set_versioning_enabled;
use reflect_core::{
    Capabilities, EngineConfig, FixedClock, ImportService, KeyValueRead, MemoryKvStore,
    ReflectionService, ResolutionPolicy, RestoreOutcome, SaveOptions, SequentialIdGenerator,
    SnapshotStatus, SqliteKvStore, UndoError,
};
use std::sync::Arc;

fn user_caps(clock: &Arc<FixedClock>, prefix: &str) -> Capabilities {
    Capabilities::new(clock.clone(), Arc::new(SequentialIdGenerator::new(prefix)))
}

fn history_numbers(svc: &ReflectionService<MemoryKvStore>, id: &str) -> Vec<u32> {
    svc.version_history(id)
        .unwrap()
        .iter()
        .map(|version| version.version_number)
        .collect()
}

#[test]
fn restore_returns_store_to_exact_pre_import_state() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteKvStore::try_new(&mut conn).unwrap();
    seed_local(&mut store);
    set_versioning_enabled(&mut store, true).unwrap();
    let before = store.scan_prefix("").unwrap();

    let mut svc = ImportService::new(store, caps(&clock()), EngineConfig::default());
    let outcome = svc
        .import(&device_package(), ResolutionPolicy::Overwrite)
        .unwrap();
    assert_ne!(svc.store().scan_prefix("").unwrap(), before);

    match svc.restore(&outcome.operation_id).unwrap() {
        RestoreOutcome::Restored(report) => {
            // r1 and prefs revert; r3, the overwrite snapshot and its index go.
            assert_eq!(report.reverted, 2);
            assert_eq!(report.removed, 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        without_backups(svc.store().scan_prefix("").unwrap()),
        before
    );

    assert_eq!(
        svc.restore(&outcome.operation_id).unwrap(),
        RestoreOutcome::AlreadyRestored
    );
    assert_eq!(
        without_backups(svc.store().scan_prefix("").unwrap()),
        before
    );

    let backups = svc.list_backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].status, SnapshotStatus::Restored);
}

#[test]
fn restore_keeps_versions_saved_after_the_import() {
    let clock = clock();
    let mut store = MemoryKvStore::new();
    seed_local(&mut store);
    set_versioning_enabled(&mut store, true).unwrap();

    let mut imports = ImportService::new(store, caps(&clock), EngineConfig::default());
    let outcome = imports
        .import(&device_package(), ResolutionPolicy::Merge)
        .unwrap();

    clock.advance_ms(60_000);
    let mut reflections = ReflectionService::new(imports.into_inner(), user_caps(&clock, "user"));
    reflections
        .save_reflection("r1", "I like cats and dogs", SaveOptions::snapshot())
        .unwrap();
    assert_eq!(history_numbers(&reflections, "r1"), vec![1, 2]);

    let mut imports =
        ImportService::new(reflections.into_inner(), caps(&clock), EngineConfig::default());
    match imports.restore(&outcome.operation_id).unwrap() {
        RestoreOutcome::Restored(report) => assert!(report.conflicts.is_empty()),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(imports.store().get("reflection/r3").unwrap().is_none());

    let mut reflections = ReflectionService::new(imports.into_inner(), user_caps(&clock, "later"));
    let history = reflections.version_history("r1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version_number, 2);
    assert_eq!(history[0].content, "I like cats and dogs");
    assert_eq!(
        reflections.get_reflection("r1").unwrap().unwrap().content,
        "I like cats and dogs"
    );

    reflections
        .save_reflection("r1", "only dogs now", SaveOptions::snapshot())
        .unwrap();
    assert_eq!(history_numbers(&reflections, "r1"), vec![2, 3]);
}

#[test]
fn restore_leaves_entities_edited_after_the_import() {
    let clock = clock();
    let mut store = MemoryKvStore::new();
    seed_local(&mut store);

    let mut imports = ImportService::new(store, caps(&clock), EngineConfig::default());
    let outcome = imports
        .import(&device_package(), ResolutionPolicy::Overwrite)
        .unwrap();

    let mut reflections = ReflectionService::new(imports.into_inner(), user_caps(&clock, "user"));
    reflections
        .save_reflection("r1", "dogs, edited by hand", SaveOptions::default())
        .unwrap();

    let mut imports =
        ImportService::new(reflections.into_inner(), caps(&clock), EngineConfig::default());
    match imports.restore(&outcome.operation_id).unwrap() {
        RestoreOutcome::Restored(report) => {
            assert_eq!(report.conflicts, vec!["reflection/r1".to_string()]);
            // prefs reverts; r3 goes.
            assert_eq!(report.reverted, 1);
            assert_eq!(report.removed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let reflections = ReflectionService::new(imports.into_inner(), user_caps(&clock, "later"));
    assert_eq!(
        reflections.get_reflection("r1").unwrap().unwrap().content,
        "dogs, edited by hand"
    );
    assert!(reflections.get_reflection("r3").unwrap().is_none());
}

#[test]
fn every_policy_is_undoable() {
    for policy in [
        ResolutionPolicy::Merge,
        ResolutionPolicy::KeepExisting,
        ResolutionPolicy::Overwrite,
        ResolutionPolicy::CreateNew,
    ] {
        let mut store = MemoryKvStore::new();
        seed_local(&mut store);
        let before = store.entries();

        let mut svc = ImportService::new(store, caps(&clock()), EngineConfig::default());
        let outcome = svc.import(&device_package(), policy).unwrap();
        assert!(matches!(
            svc.restore(&outcome.operation_id).unwrap(),
            RestoreOutcome::Restored(_)
        ));

        let after: Vec<(String, String)> = svc.into_inner().entries().into_iter().collect();
        let before: Vec<(String, String)> = before.into_iter().collect();
        assert_eq!(without_backups(after), before, "policy {policy}");
    }
}

#[test]
fn snapshots_expire_after_retention() {
    let clock = clock();
    let mut store = MemoryKvStore::new();
    seed_local(&mut store);
    let mut svc = ImportService::new(store, caps(&clock), EngineConfig::default());
    let outcome = svc
        .import(&device_package(), ResolutionPolicy::Overwrite)
        .unwrap();

    clock.advance_ms(30 * DAY_MS + 1);
    let err = svc.restore(&outcome.operation_id).unwrap_err();
    assert!(matches!(
        err,
        UndoError::SnapshotExpired {
            status: SnapshotStatus::Expired,
            ..
        }
    ));
    assert!(matches!(
        svc.restore(&outcome.operation_id),
        Err(UndoError::SnapshotExpired { .. })
    ));
}

#[test]
fn retention_follows_configuration() {
    let clock = clock();
    let config = EngineConfig::from_toml_str("backup_retention_days = 1").unwrap();
    let mut store = MemoryKvStore::new();
    seed_local(&mut store);
    let mut svc = ImportService::new(store, caps(&clock), config);
    let first = svc
        .import(&device_package(), ResolutionPolicy::KeepExisting)
        .unwrap();

    clock.advance_ms(DAY_MS / 2);
    let second = svc
        .import(&device_package(), ResolutionPolicy::KeepExisting)
        .unwrap();

    clock.advance_ms(DAY_MS / 2 + 1);
    assert_eq!(svc.purge_expired().unwrap(), 1);
    assert_eq!(svc.purge_expired().unwrap(), 0);
    assert!(matches!(
        svc.restore(&first.operation_id),
        Err(UndoError::SnapshotExpired { .. })
    ));
    assert!(matches!(
        svc.restore(&second.operation_id).unwrap(),
        RestoreOutcome::Restored(_)
    ));
}

#[test]
fn discarded_and_unknown_snapshots_cannot_be_restored() {
    let mut store = MemoryKvStore::new();
    seed_local(&mut store);
    let mut svc = ImportService::new(store, caps(&clock()), EngineConfig::default());
    let outcome = svc
        .import(&device_package(), ResolutionPolicy::Overwrite)
        .unwrap();

    svc.discard(&outcome.operation_id).unwrap();
    assert!(matches!(
        svc.restore(&outcome.operation_id),
        Err(UndoError::SnapshotExpired {
            status: SnapshotStatus::Discarded,
            ..
        })
    ));
    assert!(matches!(
        svc.restore("no-such-operation"),
        Err(UndoError::SnapshotNotFound(id)) if id == "no-such-operation"
    ));
    assert!(matches!(
        svc.discard("no-such-operation"),
        Err(UndoError::SnapshotNotFound(_))
    ));
}
