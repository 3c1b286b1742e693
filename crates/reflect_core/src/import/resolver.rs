//! Conflict resolver: turns a validated package and a policy into a mutation
//! plan, then applies the plan behind a backup.
//!
//! # Responsibility
//! - Decide per item what the import will do (`resolve`).
//! - Re-check local state, persist the backup and write everything in one
//!   batch (`apply`).
//!
//! # Invariants
//! - `resolve` refuses packages with errors and never writes.
//! - Ids for inserted entities and versions are fixed at plan time.
//! - An item whose local side changed since validation fails alone with
//!   `StaleConflict`.
//! - If the backup cannot be persisted, nothing is written.

use super::backup::BackupManager;
use super::{
    ImportError, ImportPackage, ImportResult, IncomingItem, ItemError, ItemStatus,
    ResolutionPolicy,
};
use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::model::entity::{Entity, EntityType};
use crate::model::reflection::Reflection;
use crate::model::settings::SettingsRecord;
use crate::model::version::{VersionId, VersionOrigin};
use crate::repo::entity_repo::{put_entity_op, EntityRepository};
use crate::repo::flags::versioning_enabled;
use crate::repo::keys::backup_key;
use crate::store::{KeyValueRead, KeyValueStore, KvOp};
use crate::version::{CreateVersionOptions, VersionBatch};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

const OVERWRITE_SNAPSHOT_NOTE: &str = "before import overwrite";

/// What the import will do with one incoming item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// No local counterpart: insert as-is.
    Insert { entity: Entity },
    /// Replace local content; `snapshot_version_id` keeps the old content.
    Overwrite {
        entity: Entity,
        snapshot_version_id: Option<VersionId>,
    },
    /// Keep local reflection live and store incoming text as a version.
    AppendMergeVersion {
        version_id: VersionId,
        content: String,
        note: String,
    },
    /// Fill unset local settings keys from the incoming record.
    MergeSettings {
        merged: SettingsRecord,
        filled_keys: Vec<String>,
    },
    /// Insert under a freshly generated id.
    InsertAsNew { entity: Entity },
    Skip { reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Incoming content equals local content.
    Unchanged,
    /// Conflict resolved in favour of local data.
    KeptExisting,
    /// Merge found no unset local key to fill.
    NothingToMerge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMutation {
    pub entity_type: EntityType,
    /// Id carried by the package.
    pub source_id: String,
    /// Local entity seen at validation time.
    pub baseline: Option<Entity>,
    pub action: PlannedAction,
}

impl PlannedMutation {
    /// Id of the local entity this mutation writes, if any.
    pub fn target_id(&self) -> Option<&str> {
        match &self.action {
            PlannedAction::Insert { entity }
            | PlannedAction::Overwrite { entity, .. }
            | PlannedAction::InsertAsNew { entity } => Some(entity.id()),
            PlannedAction::MergeSettings { merged, .. } => Some(&merged.id),
            PlannedAction::AppendMergeVersion { .. } => Some(&self.source_id),
            PlannedAction::Skip { .. } => None,
        }
    }

    fn action_name(&self) -> &'static str {
        match self.action {
            PlannedAction::Insert { .. } => "insert",
            PlannedAction::Overwrite { .. } => "overwrite",
            PlannedAction::AppendMergeVersion { .. } => "merge_version",
            PlannedAction::MergeSettings { .. } => "merge_settings",
            PlannedAction::InsertAsNew { .. } => "insert_as_new",
            PlannedAction::Skip { .. } => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub operation_id: String,
    pub policy: ResolutionPolicy,
    pub planned_at: i64,
    pub mutations: Vec<PlannedMutation>,
}

impl MutationPlan {
    pub fn skipped(&self) -> impl Iterator<Item = &PlannedMutation> {
        self.mutations
            .iter()
            .filter(|mutation| matches!(mutation.action, PlannedAction::Skip { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedItem {
    pub entity_type: EntityType,
    pub source_id: String,
    pub target_id: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub entity_type: EntityType,
    pub source_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub entity_type: EntityType,
    pub source_id: String,
    pub error: ItemError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// Key for `restore`.
    pub operation_id: String,
    pub applied: Vec<AppliedItem>,
    pub skipped: Vec<SkippedItem>,
    pub failed: Vec<ItemFailure>,
}

pub struct ConflictResolver<S> {
    store: S,
    caps: Capabilities,
    config: EngineConfig,
}

impl<S: KeyValueRead> ConflictResolver<S> {
    pub fn new(store: S, caps: Capabilities, config: EngineConfig) -> Self {
        Self {
            store,
            caps,
            config,
        }
    }

    /// Builds the mutation plan for `package` under `policy`.
    ///
    /// # Errors
    /// - `ImportAborted` when the package carries any error; warnings never
    ///   block.
    pub fn resolve(
        &self,
        package: &ImportPackage,
        policy: ResolutionPolicy,
    ) -> ImportResult<MutationPlan> {
        if !package.errors.is_empty() {
            warn!(
                "event=import_resolve module=import status=aborted policy={} errors={}",
                policy,
                package.errors.len()
            );
            return Err(ImportError::ImportAborted {
                error_count: package.errors.len(),
            });
        }

        let snapshot_on_overwrite = versioning_enabled(&self.store)?;
        let now_ms = self.caps.now_ms();
        let mutations: Vec<PlannedMutation> = package
            .items
            .iter()
            .map(|item| self.plan_item(item, policy, snapshot_on_overwrite, now_ms))
            .collect();

        let plan = MutationPlan {
            operation_id: self.caps.next_id(),
            policy,
            planned_at: now_ms,
            mutations,
        };
        info!(
            "event=import_resolve module=import status=ok policy={} operation_id={} mutations={} skipped={}",
            policy,
            plan.operation_id,
            plan.mutations.len(),
            plan.skipped().count()
        );
        Ok(plan)
    }

    fn plan_item(
        &self,
        item: &IncomingItem,
        policy: ResolutionPolicy,
        snapshot_on_overwrite: bool,
        now_ms: i64,
    ) -> PlannedMutation {
        let action = match (item.status(), &item.baseline) {
            (ItemStatus::New, _) | (_, None) => PlannedAction::Insert {
                entity: item.entity.clone(),
            },
            (ItemStatus::Identical, Some(_)) => PlannedAction::Skip {
                reason: SkipReason::Unchanged,
            },
            (ItemStatus::Conflicting, Some(local)) => {
                self.plan_conflict(local, &item.entity, policy, snapshot_on_overwrite, now_ms)
            }
        };

        PlannedMutation {
            entity_type: item.entity.entity_type(),
            source_id: item.entity.id().to_string(),
            baseline: item.baseline.clone(),
            action,
        }
    }

    fn plan_conflict(
        &self,
        local: &Entity,
        incoming: &Entity,
        policy: ResolutionPolicy,
        snapshot_on_overwrite: bool,
        now_ms: i64,
    ) -> PlannedAction {
        match policy {
            ResolutionPolicy::KeepExisting => PlannedAction::Skip {
                reason: SkipReason::KeptExisting,
            },
            ResolutionPolicy::CreateNew => PlannedAction::InsertAsNew {
                entity: incoming.with_id(self.caps.next_id()),
            },
            ResolutionPolicy::Overwrite => match (local, incoming) {
                (Entity::Reflection(local), Entity::Reflection(incoming)) => {
                    PlannedAction::Overwrite {
                        entity: Entity::Reflection(overwritten_reflection(local, incoming)),
                        snapshot_version_id: snapshot_on_overwrite.then(|| self.caps.next_id()),
                    }
                }
                (Entity::Settings(_), Entity::Settings(_)) => PlannedAction::Overwrite {
                    entity: incoming.clone(),
                    snapshot_version_id: None,
                },
                _ => mismatched_pair(),
            },
            ResolutionPolicy::Merge => match (local, incoming) {
                (Entity::Settings(local), Entity::Settings(incoming)) => {
                    let (merged, filled_keys) = local.merge_unset_from(incoming, now_ms);
                    if filled_keys.is_empty() {
                        PlannedAction::Skip {
                            reason: SkipReason::NothingToMerge,
                        }
                    } else {
                        PlannedAction::MergeSettings {
                            merged,
                            filled_keys,
                        }
                    }
                }
                (Entity::Reflection(_), Entity::Reflection(incoming)) => {
                    PlannedAction::AppendMergeVersion {
                        version_id: self.caps.next_id(),
                        content: incoming.content.clone(),
                        note: format!("merged from import on {}", format_day(now_ms)),
                    }
                }
                _ => mismatched_pair(),
            },
        }
    }
}

impl<S: KeyValueStore> ConflictResolver<S> {
    /// Applies `plan`: stale check, backup, then one atomic write.
    ///
    /// # Errors
    /// - `BackupFailed` when the snapshot cannot be written; the store is left
    ///   untouched.
    /// - `Store` when the final batch fails; the batch is rolled back.
    /// - `AlreadyApplied` when a snapshot for this operation already exists.
    pub fn apply(&mut self, plan: &MutationPlan) -> ImportResult<ImportOutcome> {
        if self.store.get(&backup_key(&plan.operation_id))?.is_some() {
            warn!(
                "event=import_apply module=import status=rejected operation_id={} error_code=already_applied",
                plan.operation_id
            );
            return Err(ImportError::AlreadyApplied(plan.operation_id.clone()));
        }

        let now_ms = self.caps.now_ms();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        let mut survivors = Vec::new();

        {
            let repo = EntityRepository::new(&self.store);
            for mutation in &plan.mutations {
                if let PlannedAction::Skip { reason } = mutation.action {
                    skipped.push(SkippedItem {
                        entity_type: mutation.entity_type,
                        source_id: mutation.source_id.clone(),
                        reason,
                    });
                    continue;
                }

                let current = repo.get_entity(mutation.entity_type, &mutation.source_id)?;
                if current != mutation.baseline {
                    warn!(
                        "event=import_apply module=import status=item_failed operation_id={} entity_type={} error_code=stale_conflict",
                        plan.operation_id, mutation.entity_type
                    );
                    failed.push(ItemFailure {
                        entity_type: mutation.entity_type,
                        source_id: mutation.source_id.clone(),
                        error: ItemError::StaleConflict {
                            entity_type: mutation.entity_type,
                            id: mutation.source_id.clone(),
                        },
                    });
                    continue;
                }
                survivors.push(mutation);
            }
        }

        let ops = self.build_ops(&survivors, now_ms)?;

        {
            let mut backups =
                BackupManager::new(&mut self.store, self.caps.clone(), self.config.clone());
            let snapshot = backups
                .capture(&plan.operation_id, &ops)
                .map_err(ImportError::BackupFailed)?;
            if let Err(err) = backups.persist(&snapshot) {
                error!(
                    "event=import_apply module=import status=error operation_id={} error_code=backup_failed error={}",
                    plan.operation_id, err
                );
                return Err(ImportError::BackupFailed(err));
            }
        }

        if let Err(err) = self.store.apply_batch(&ops) {
            error!(
                "event=import_apply module=import status=error operation_id={} error_code=apply_failed error={}",
                plan.operation_id, err
            );
            // Batch rolled back; nothing left for the snapshot to undo.
            if let Err(cleanup) = self.store.delete(&backup_key(&plan.operation_id)) {
                warn!(
                    "event=import_apply module=import status=error operation_id={} error_code=backup_cleanup_failed error={}",
                    plan.operation_id, cleanup
                );
            }
            return Err(err.into());
        }

        let applied: Vec<AppliedItem> = survivors
            .iter()
            .map(|mutation| AppliedItem {
                entity_type: mutation.entity_type,
                source_id: mutation.source_id.clone(),
                target_id: mutation
                    .target_id()
                    .unwrap_or(mutation.source_id.as_str())
                    .to_string(),
                action: mutation.action_name().to_string(),
            })
            .collect();

        info!(
            "event=import_apply module=import status=ok operation_id={} applied={} skipped={} failed={} ops={}",
            plan.operation_id,
            applied.len(),
            skipped.len(),
            failed.len(),
            ops.len()
        );
        Ok(ImportOutcome {
            operation_id: plan.operation_id.clone(),
            applied,
            skipped,
            failed,
        })
    }

    fn build_ops(&self, survivors: &[&PlannedMutation], now_ms: i64) -> ImportResult<Vec<KvOp>> {
        let mut entity_ops = Vec::new();
        let mut versions = VersionBatch::new(&self.store);

        for mutation in survivors {
            match &mutation.action {
                PlannedAction::Insert { entity } | PlannedAction::InsertAsNew { entity } => {
                    entity_ops.push(put_entity_op(entity)?);
                }
                PlannedAction::Overwrite {
                    entity,
                    snapshot_version_id,
                } => {
                    if let (Some(version_id), Some(Entity::Reflection(previous))) =
                        (snapshot_version_id, &mutation.baseline)
                    {
                        versions.append(
                            version_id.clone(),
                            &previous.id,
                            previous.content.clone(),
                            now_ms,
                            CreateVersionOptions::with_note(OVERWRITE_SNAPSHOT_NOTE),
                        )?;
                    }
                    entity_ops.push(put_entity_op(entity)?);
                }
                PlannedAction::AppendMergeVersion {
                    version_id,
                    content,
                    note,
                } => {
                    versions.append(
                        version_id.clone(),
                        &mutation.source_id,
                        content.clone(),
                        now_ms,
                        CreateVersionOptions {
                            note: Some(note.clone()),
                            origin: VersionOrigin::Merge,
                        },
                    )?;
                }
                PlannedAction::MergeSettings { merged, .. } => {
                    entity_ops.push(put_entity_op(&Entity::Settings(merged.clone()))?);
                }
                PlannedAction::Skip { .. } => {}
            }
        }

        entity_ops.extend(versions.finish()?);
        Ok(entity_ops)
    }
}

/// Incoming reflection text replacing local text, keeping the earliest
/// creation time.
fn overwritten_reflection(local: &Reflection, incoming: &Reflection) -> Reflection {
    Reflection {
        created_at: local.created_at.min(incoming.created_at),
        ..incoming.clone()
    }
}

/// Entities of different types never pair up; keep the local one.
fn mismatched_pair() -> PlannedAction {
    PlannedAction::Skip {
        reason: SkipReason::KeptExisting,
    }
}

fn format_day(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}
