//! Backup and undo for applied imports.
//!
//! # Responsibility
//! - Capture the pre-mutation value of every key an import batch touches.
//! - Revert an import within the retention window.
//! - Expire and discard snapshots on request.
//!
//! # Invariants
//! - A snapshot is persisted before any mutation of its operation.
//! - Restore rewrites the captured keys and the snapshot status in one
//!   atomic batch.
//! - Restore only reverts keys still holding the value the import wrote.
//!   Version indexes drop the ids the import added and keep later ones;
//!   any other key changed since the import is left alone and reported.
//! - Finished snapshots (restored, discarded, expired) keep a payload-free
//!   tombstone so later calls get an explicit answer.

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::repo::keys::{backup_key, BACKUP_PREFIX, VERSION_INDEX_PREFIX};
use crate::store::{
    decode_json, json_set_op, read_json, scan_json, write_json, KeyValueRead, KeyValueStore, KvOp,
    StoreError, StoreResult,
};
use crate::version::VersionIndex;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub type UndoResult<T> = Result<T, UndoError>;

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("no backup snapshot for import operation `{0}`")]
    SnapshotNotFound(String),
    #[error("backup snapshot for import operation `{operation_id}` is no longer restorable ({status:?})")]
    SnapshotExpired {
        operation_id: String,
        status: SnapshotStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Active,
    Restored,
    Discarded,
    Expired,
}

/// Value of one key before and right after the import; `None` means the
/// key did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorValue {
    pub key: String,
    pub value: Option<String>,
    #[serde(default)]
    pub applied: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub operation_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: SnapshotStatus,
    pub prior_values: Vec<PriorValue>,
}

impl BackupSnapshot {
    /// Captures current values of every key `ops` will touch.
    pub fn capture<S: KeyValueRead + ?Sized>(
        store: &S,
        operation_id: &str,
        ops: &[KvOp],
        now_ms: i64,
        retention_ms: i64,
    ) -> StoreResult<Self> {
        let mut applied: BTreeMap<&str, Option<&str>> = BTreeMap::new();
        for op in ops {
            let value = match op {
                KvOp::Set { value, .. } => Some(value.as_str()),
                KvOp::Delete { .. } => None,
            };
            applied.insert(op.key(), value);
        }

        let mut seen = BTreeSet::new();
        let mut prior_values = Vec::new();
        for op in ops {
            if !seen.insert(op.key()) {
                continue;
            }
            prior_values.push(PriorValue {
                key: op.key().to_string(),
                value: store.get(op.key())?,
                applied: applied.get(op.key()).copied().flatten().map(str::to_string),
            });
        }

        Ok(Self {
            operation_id: operation_id.to_string(),
            created_at: now_ms,
            expires_at: now_ms.saturating_add(retention_ms),
            status: SnapshotStatus::Active,
            prior_values,
        })
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Keys that did not exist before the import.
    pub fn inserted_keys(&self) -> impl Iterator<Item = &str> {
        self.prior_values
            .iter()
            .filter(|prior| prior.value.is_none())
            .map(|prior| prior.key.as_str())
    }

    fn finished(&self, status: SnapshotStatus) -> Self {
        Self {
            status,
            prior_values: Vec::new(),
            ..self.clone()
        }
    }
}

/// Listing row for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub operation_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: SnapshotStatus,
    pub touched_keys: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub operation_id: String,
    /// Keys rewritten to their prior value.
    pub reverted: usize,
    /// Keys the import created, now removed.
    pub removed: usize,
    /// Keys changed after the import, kept as they are.
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    /// The operation was already undone; nothing changed.
    AlreadyRestored,
}

pub struct BackupManager<S> {
    store: S,
    caps: Capabilities,
    config: EngineConfig,
}

impl<S: KeyValueRead> BackupManager<S> {
    pub fn new(store: S, caps: Capabilities, config: EngineConfig) -> Self {
        Self {
            store,
            caps,
            config,
        }
    }

    pub fn get_snapshot(&self, operation_id: &str) -> UndoResult<Option<BackupSnapshot>> {
        Ok(read_json(&self.store, &backup_key(operation_id))?)
    }

    pub fn list_snapshots(&self) -> UndoResult<Vec<BackupSummary>> {
        let snapshots: Vec<BackupSnapshot> = scan_json(&self.store, BACKUP_PREFIX)?;
        Ok(snapshots
            .into_iter()
            .map(|snapshot| BackupSummary {
                touched_keys: snapshot.prior_values.len(),
                operation_id: snapshot.operation_id,
                created_at: snapshot.created_at,
                expires_at: snapshot.expires_at,
                status: snapshot.status,
            })
            .collect())
    }

    /// Snapshot of `ops` against current state, expiring after retention.
    pub fn capture(&self, operation_id: &str, ops: &[KvOp]) -> StoreResult<BackupSnapshot> {
        BackupSnapshot::capture(
            &self.store,
            operation_id,
            ops,
            self.caps.now_ms(),
            self.config.retention_ms(),
        )
    }
}

impl<S: KeyValueStore> BackupManager<S> {
    /// Durably writes one snapshot.
    pub fn persist(&mut self, snapshot: &BackupSnapshot) -> StoreResult<()> {
        write_json(&mut self.store, &backup_key(&snapshot.operation_id), snapshot)?;
        info!(
            "event=backup_persist module=import status=ok operation_id={} keys={}",
            snapshot.operation_id,
            snapshot.prior_values.len()
        );
        Ok(())
    }

    /// Reverts an import to its pre-mutation state.
    ///
    /// Keys written again after the import are reported in
    /// `RestoreReport::conflicts` instead of being overwritten.
    ///
    /// # Errors
    /// - `SnapshotNotFound` for unknown operation ids.
    /// - `SnapshotExpired` past retention or after a discard.
    pub fn restore(&mut self, operation_id: &str) -> UndoResult<RestoreOutcome> {
        let snapshot = self
            .get_snapshot(operation_id)?
            .ok_or_else(|| UndoError::SnapshotNotFound(operation_id.to_string()))?;

        match snapshot.status {
            SnapshotStatus::Restored => {
                info!(
                    "event=import_restore module=import status=noop operation_id={operation_id} reason=already_restored"
                );
                return Ok(RestoreOutcome::AlreadyRestored);
            }
            SnapshotStatus::Discarded | SnapshotStatus::Expired => {
                return Err(UndoError::SnapshotExpired {
                    operation_id: operation_id.to_string(),
                    status: snapshot.status,
                });
            }
            SnapshotStatus::Active => {}
        }

        if snapshot.is_expired_at(self.caps.now_ms()) {
            self.finish(&snapshot, SnapshotStatus::Expired)?;
            warn!(
                "event=import_restore module=import status=rejected operation_id={operation_id} error_code=snapshot_expired"
            );
            return Err(UndoError::SnapshotExpired {
                operation_id: operation_id.to_string(),
                status: SnapshotStatus::Expired,
            });
        }

        let mut ops = Vec::new();
        let mut reverted = 0;
        let mut removed = 0;
        let mut conflicts = Vec::new();
        for prior in &snapshot.prior_values {
            let current = self.store.get(&prior.key)?;
            if current == prior.applied {
                match &prior.value {
                    Some(value) => {
                        ops.push(KvOp::set(prior.key.as_str(), value.as_str()));
                        reverted += 1;
                    }
                    None => {
                        ops.push(KvOp::delete(prior.key.as_str()));
                        removed += 1;
                    }
                }
            } else if current == prior.value {
                // Already back to the pre-import value.
            } else if prior.key.starts_with(VERSION_INDEX_PREFIX) {
                if let Some(op) = rebase_index(prior, current.as_deref())? {
                    ops.push(op);
                    reverted += 1;
                }
            } else {
                warn!(
                    "event=import_restore module=import status=conflict operation_id={operation_id} error_code=restore_conflict key={}",
                    prior.key
                );
                conflicts.push(prior.key.clone());
            }
        }
        ops.push(json_set_op(
            backup_key(operation_id),
            &snapshot.finished(SnapshotStatus::Restored),
        )?);
        self.store.apply_batch(&ops)?;

        let report = RestoreReport {
            operation_id: operation_id.to_string(),
            reverted,
            removed,
            conflicts,
        };
        info!(
            "event=import_restore module=import status=ok operation_id={} reverted={} removed={} conflicts={}",
            operation_id,
            report.reverted,
            report.removed,
            report.conflicts.len()
        );
        Ok(RestoreOutcome::Restored(report))
    }

    /// Gives up the ability to undo one import; finished snapshots are left
    /// as they are.
    pub fn discard(&mut self, operation_id: &str) -> UndoResult<()> {
        let snapshot = self
            .get_snapshot(operation_id)?
            .ok_or_else(|| UndoError::SnapshotNotFound(operation_id.to_string()))?;
        if snapshot.status == SnapshotStatus::Active {
            self.finish(&snapshot, SnapshotStatus::Discarded)?;
            info!("event=backup_discard module=import status=ok operation_id={operation_id}");
        }
        Ok(())
    }

    /// Expires every active snapshot past retention; returns how many.
    pub fn purge_expired(&mut self) -> UndoResult<usize> {
        let now_ms = self.caps.now_ms();
        let snapshots: Vec<BackupSnapshot> = scan_json(&self.store, BACKUP_PREFIX)?;
        let ops = snapshots
            .iter()
            .filter(|snapshot| {
                snapshot.status == SnapshotStatus::Active && snapshot.is_expired_at(now_ms)
            })
            .map(|snapshot| {
                json_set_op(
                    backup_key(&snapshot.operation_id),
                    &snapshot.finished(SnapshotStatus::Expired),
                )
            })
            .collect::<StoreResult<Vec<_>>>()?;

        if !ops.is_empty() {
            self.store.apply_batch(&ops)?;
        }
        info!("event=backup_purge module=import status=ok expired={}", ops.len());
        Ok(ops.len())
    }

    fn finish(&mut self, snapshot: &BackupSnapshot, status: SnapshotStatus) -> StoreResult<()> {
        write_json(
            &mut self.store,
            &backup_key(&snapshot.operation_id),
            &snapshot.finished(status),
        )
    }
}

/// Current index minus the ids the import added; later ids and the number
/// counter stay. `None` when nothing needs to change.
fn rebase_index(prior: &PriorValue, current: Option<&str>) -> StoreResult<Option<KvOp>> {
    let Some(current_raw) = current else {
        return Ok(None);
    };
    let decode = |raw: Option<&String>| -> StoreResult<VersionIndex> {
        raw.map(|raw| decode_json(&prior.key, raw))
            .transpose()
            .map(Option::unwrap_or_default)
    };
    let before = decode(prior.value.as_ref())?;
    let after = decode(prior.applied.as_ref())?;
    let mut index: VersionIndex = decode_json(&prior.key, current_raw)?;

    let inserted: BTreeSet<&String> = after
        .version_ids
        .iter()
        .filter(|id| !before.version_ids.contains(id))
        .collect();
    let live = index.version_ids.len();
    index.version_ids.retain(|id| !inserted.contains(id));
    if index.version_ids.len() == live {
        return Ok(None);
    }
    json_set_op(prior.key.as_str(), &index).map(Some)
}

#[cfg(test)]
mod tests {
    use super::{BackupManager, RestoreOutcome, SnapshotStatus, UndoError};
    use crate::capability::{Capabilities, FixedClock, SequentialIdGenerator};
    use crate::config::EngineConfig;
    use crate::store::{KeyValueRead, KeyValueStore, KvOp, MemoryKvStore};
    use std::sync::Arc;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn manager_parts() -> (Arc<FixedClock>, Capabilities) {
        let clock = Arc::new(FixedClock::new(0));
        let caps = Capabilities::new(clock.clone(), Arc::new(SequentialIdGenerator::new("op")));
        (clock, caps)
    }

    #[test]
    fn restore_reverts_changed_and_inserted_keys_once() {
        let (_clock, caps) = manager_parts();
        let mut store = MemoryKvStore::new();
        store.set("reflection/a", "old").unwrap();
        let before = store.entries();

        let ops = vec![KvOp::set("reflection/a", "new"), KvOp::set("reflection/b", "added")];
        let mut manager = BackupManager::new(&mut store, caps, EngineConfig::default());
        let snapshot = manager.capture("op-1", &ops).unwrap();
        manager.persist(&snapshot).unwrap();
        manager.store.apply_batch(&ops).unwrap();

        let outcome = manager.restore("op-1").unwrap();
        match outcome {
            RestoreOutcome::Restored(report) => {
                assert_eq!(report.reverted, 1);
                assert_eq!(report.removed, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(manager.restore("op-1").unwrap(), RestoreOutcome::AlreadyRestored);

        let mut after = store.entries();
        after.remove("backup/op-1");
        assert_eq!(after, before);
    }

    #[test]
    fn restore_keeps_keys_written_after_the_import() {
        let (_clock, caps) = manager_parts();
        let mut store = MemoryKvStore::new();
        store.set("reflection/a", "old").unwrap();

        let ops = vec![KvOp::set("reflection/a", "imported"), KvOp::set("reflection/b", "added")];
        let mut manager = BackupManager::new(&mut store, caps, EngineConfig::default());
        let snapshot = manager.capture("op-1", &ops).unwrap();
        manager.persist(&snapshot).unwrap();
        manager.store.apply_batch(&ops).unwrap();
        manager.store.set("reflection/a", "edited later").unwrap();

        let RestoreOutcome::Restored(report) = manager.restore("op-1").unwrap() else {
            panic!("expected a restore");
        };
        assert_eq!(report.conflicts, vec!["reflection/a".to_string()]);
        assert_eq!(report.removed, 1);
        assert_eq!(report.reverted, 0);
        assert_eq!(
            manager.store.get("reflection/a").unwrap().as_deref(),
            Some("edited later")
        );
        assert!(manager.store.get("reflection/b").unwrap().is_none());
    }

    #[test]
    fn restore_drops_only_imported_ids_from_a_grown_index() {
        let (_clock, caps) = manager_parts();
        let mut store = MemoryKvStore::new();
        store
            .set("version_index/r1", r#"{"last_number":1,"version_ids":["v-1"]}"#)
            .unwrap();

        let ops = vec![
            KvOp::set("version/v-2", "{}"),
            KvOp::set("version_index/r1", r#"{"last_number":2,"version_ids":["v-1","v-2"]}"#),
        ];
        let mut manager = BackupManager::new(&mut store, caps, EngineConfig::default());
        let snapshot = manager.capture("op-1", &ops).unwrap();
        manager.persist(&snapshot).unwrap();
        manager.store.apply_batch(&ops).unwrap();
        manager
            .store
            .set(
                "version_index/r1",
                r#"{"last_number":3,"version_ids":["v-1","v-2","v-3"]}"#,
            )
            .unwrap();

        let RestoreOutcome::Restored(report) = manager.restore("op-1").unwrap() else {
            panic!("expected a restore");
        };
        assert!(report.conflicts.is_empty());
        assert_eq!(
            manager.store.get("version_index/r1").unwrap().as_deref(),
            Some(r#"{"last_number":3,"version_ids":["v-1","v-3"]}"#)
        );
        assert!(manager.store.get("version/v-2").unwrap().is_none());
    }

    #[test]
    fn restore_after_retention_reports_expired() {
        let (clock, caps) = manager_parts();
        let mut store = MemoryKvStore::new();
        let mut manager = BackupManager::new(&mut store, caps, EngineConfig::default());
        let snapshot = manager.capture("op-1", &[KvOp::set("k", "v")]).unwrap();
        manager.persist(&snapshot).unwrap();

        clock.advance_ms(30 * DAY_MS + 1);
        let err = manager.restore("op-1").unwrap_err();
        assert!(matches!(err, UndoError::SnapshotExpired { .. }));
        assert_eq!(
            manager.get_snapshot("op-1").unwrap().unwrap().status,
            SnapshotStatus::Expired
        );
    }

    #[test]
    fn discarded_snapshot_cannot_be_restored() {
        let (_clock, caps) = manager_parts();
        let mut store = MemoryKvStore::new();
        let mut manager = BackupManager::new(&mut store, caps, EngineConfig::default());
        let snapshot = manager.capture("op-1", &[KvOp::set("k", "v")]).unwrap();
        manager.persist(&snapshot).unwrap();

        manager.discard("op-1").unwrap();
        assert!(matches!(
            manager.restore("op-1"),
            Err(UndoError::SnapshotExpired {
                status: SnapshotStatus::Discarded,
                ..
            })
        ));
        assert!(matches!(
            manager.restore("unknown"),
            Err(UndoError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn purge_expires_only_old_active_snapshots() {
        let (clock, caps) = manager_parts();
        let mut store = MemoryKvStore::new();
        let mut manager = BackupManager::new(&mut store, caps, EngineConfig::default());
        let old = manager.capture("op-old", &[KvOp::set("k", "v")]).unwrap();
        manager.persist(&old).unwrap();
        clock.advance_ms(20 * DAY_MS);
        let recent = manager.capture("op-new", &[KvOp::set("k", "v")]).unwrap();
        manager.persist(&recent).unwrap();

        clock.advance_ms(11 * DAY_MS);
        assert_eq!(manager.purge_expired().unwrap(), 1);
        assert_eq!(manager.purge_expired().unwrap(), 0);

        let statuses: Vec<SnapshotStatus> = manager
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|summary| summary.status)
            .collect();
        assert_eq!(statuses, vec![SnapshotStatus::Active, SnapshotStatus::Expired]);
        assert!(manager.store.get("backup/op-old").unwrap().is_some());
    }
}
