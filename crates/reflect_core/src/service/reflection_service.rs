//! Reflection use-case service.
//!
//! # Responsibility
//! - Create, edit, delete reflections and manage their version history.
//!
//! # Invariants
//! - Every write is one atomic store batch: the entity change and any version
//!   it produces land together or not at all.
//! - Versions are created only on an explicit snapshot request (or a restore)
//!   while versioning is enabled.

use super::{ServiceError, ServiceResult};
use crate::capability::Capabilities;
use crate::diff::{diff, DiffSegment};
use crate::model::entity::{Entity, EntityType};
use crate::model::reflection::Reflection;
use crate::model::version::{ReflectionVersion, VersionOrigin};
use crate::repo::entity_repo::{delete_entity_op, put_entity_op, EntityRepository};
use crate::repo::flags::{set_versioning_enabled, versioning_enabled};
use crate::store::{KeyValueRead, KeyValueStore};
use crate::version::{delete_all_ops, CreateVersionOptions, VersionBatch, VersionError, VersionStore};
use log::{info, warn};

/// Options for `ReflectionService::save_reflection`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Record the saved text as a new version.
    pub snapshot: bool,
    pub note: Option<String>,
}

impl SaveOptions {
    pub fn snapshot() -> Self {
        Self {
            snapshot: true,
            note: None,
        }
    }

    pub fn snapshot_with_note(note: impl Into<String>) -> Self {
        Self {
            snapshot: true,
            note: Some(note.into()),
        }
    }
}

pub struct ReflectionService<S> {
    store: S,
    caps: Capabilities,
}

impl<S: KeyValueRead> ReflectionService<S> {
    pub fn new(store: S, caps: Capabilities) -> Self {
        Self { store, caps }
    }

    pub fn get_reflection(&self, id: &str) -> ServiceResult<Option<Reflection>> {
        Ok(EntityRepository::new(&self.store).get_reflection(id)?)
    }

    pub fn list_reflections(&self) -> ServiceResult<Vec<Reflection>> {
        Ok(EntityRepository::new(&self.store).list_reflections()?)
    }

    /// Versions of `reflection_id`, oldest first.
    pub fn version_history(&self, reflection_id: &str) -> ServiceResult<Vec<ReflectionVersion>> {
        Ok(self.versions().get_versions(reflection_id)?)
    }

    /// Diff from a stored version to the live content.
    pub fn diff_with_current(
        &self,
        reflection_id: &str,
        version_id: &str,
    ) -> ServiceResult<Vec<DiffSegment>> {
        let current = self.require_reflection(reflection_id)?;
        let version = self.require_version_of(reflection_id, version_id)?;
        Ok(diff(&version.content, &current.content))
    }

    pub fn versioning_enabled(&self) -> ServiceResult<bool> {
        Ok(versioning_enabled(&self.store)?)
    }

    fn versions(&self) -> VersionStore<&S> {
        VersionStore::new(&self.store, self.caps.clone())
    }

    fn require_reflection(&self, id: &str) -> ServiceResult<Reflection> {
        self.get_reflection(id)?
            .ok_or_else(|| ServiceError::ReflectionNotFound(id.to_string()))
    }

    /// A version counts as missing when it belongs to another reflection.
    fn require_version_of(
        &self,
        reflection_id: &str,
        version_id: &str,
    ) -> ServiceResult<ReflectionVersion> {
        match self.versions().get_version(version_id)? {
            Some(version) if version.reflection_id == reflection_id => Ok(version),
            _ => Err(VersionError::VersionNotFound(version_id.to_string()).into()),
        }
    }
}

impl<S: KeyValueStore> ReflectionService<S> {
    /// Creates a reflection under a generated id.
    pub fn create_reflection(
        &mut self,
        content: impl Into<String>,
        prompt: Option<String>,
    ) -> ServiceResult<Reflection> {
        let mut reflection = Reflection::new(self.caps.next_id(), content, self.caps.now_ms());
        reflection.prompt = prompt;
        EntityRepository::new(&mut self.store).put_reflection(&reflection)?;
        info!("event=reflection_create module=service status=ok");
        Ok(reflection)
    }

    /// Replaces the live text of `id`.
    ///
    /// # Errors
    /// - `ReflectionNotFound` for unknown ids.
    /// - `Version(VersioningDisabled)` when a snapshot is requested while the
    ///   flag is off; nothing is written in that case.
    pub fn save_reflection(
        &mut self,
        id: &str,
        content: impl Into<String>,
        options: SaveOptions,
    ) -> ServiceResult<Reflection> {
        let current = self.require_reflection(id)?;
        if options.snapshot && !versioning_enabled(&self.store)? {
            warn!(
                "event=reflection_save module=service status=rejected error_code=versioning_disabled"
            );
            return Err(VersionError::VersioningDisabled.into());
        }

        let now_ms = self.caps.now_ms();
        let updated = Reflection {
            content: content.into(),
            updated_at: now_ms.max(current.created_at),
            ..current
        };

        let mut ops = vec![put_entity_op(&Entity::Reflection(updated.clone()))?];
        if options.snapshot {
            let mut batch = VersionBatch::new(&self.store);
            batch.append(
                self.caps.next_id(),
                id,
                updated.content.clone(),
                now_ms,
                CreateVersionOptions {
                    note: options.note,
                    origin: VersionOrigin::User,
                },
            )?;
            ops.extend(batch.finish()?);
        }
        self.store.apply_batch(&ops)?;

        info!(
            "event=reflection_save module=service status=ok snapshot={}",
            options.snapshot
        );
        Ok(updated)
    }

    /// Deletes a reflection and its whole history. Returns whether it existed.
    pub fn delete_reflection(&mut self, id: &str) -> ServiceResult<bool> {
        let existed = self.get_reflection(id)?.is_some();
        let mut ops = vec![delete_entity_op(EntityType::Reflection, id)];
        ops.extend(delete_all_ops(&self.store, id)?);
        let version_ops = ops.len() - 1;
        self.store.apply_batch(&ops)?;

        info!(
            "event=reflection_delete module=service status=ok existed={existed} history_ops={version_ops}"
        );
        Ok(existed)
    }

    /// Makes an older version the live text again.
    ///
    /// With versioning enabled, the text being replaced is kept first as a
    /// `restore` version, so the step itself can be undone from history.
    pub fn restore_version(
        &mut self,
        reflection_id: &str,
        version_id: &str,
    ) -> ServiceResult<Reflection> {
        let current = self.require_reflection(reflection_id)?;
        let version = self.require_version_of(reflection_id, version_id)?;
        let now_ms = self.caps.now_ms();

        let mut ops = Vec::new();
        let keep_current = versioning_enabled(&self.store)?;
        if keep_current {
            let mut batch = VersionBatch::new(&self.store);
            batch.append(
                self.caps.next_id(),
                reflection_id,
                current.content.clone(),
                now_ms,
                CreateVersionOptions {
                    note: Some(format!("before restoring version {}", version.version_number)),
                    origin: VersionOrigin::Restore,
                },
            )?;
            ops.extend(batch.finish()?);
        }

        let restored = Reflection {
            content: version.content,
            updated_at: now_ms.max(current.created_at),
            ..current
        };
        ops.push(put_entity_op(&Entity::Reflection(restored.clone()))?);
        self.store.apply_batch(&ops)?;

        info!(
            "event=version_restore module=service status=ok version_number={} kept_current={keep_current}",
            version.version_number
        );
        Ok(restored)
    }

    pub fn set_versioning_enabled(&mut self, enabled: bool) -> ServiceResult<()> {
        set_versioning_enabled(&mut self.store, enabled)?;
        Ok(())
    }
}

impl<S> ReflectionService<S> {
    pub fn into_inner(self) -> S {
        self.store
    }
}
