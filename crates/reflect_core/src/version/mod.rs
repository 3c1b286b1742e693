//! Version store: immutable content snapshots per reflection.
//!
//! # Responsibility
//! - Create, list, read and delete reflection versions.
//! - Offer batch planning so import and undo can write versions atomically
//!   alongside entity changes.
//!
//! # Invariants
//! - `create_version` fails with `VersioningDisabled` while the flag is off.
//! - Version numbers per reflection start at 1 and never repeat while the
//!   reflection keeps any history; `delete_all_versions` starts it over.
//! - Versions are never edited in place.
//! - Nothing here prunes in the background.

mod batch;

pub(crate) use batch::VersionBatch;

use crate::capability::Capabilities;
use crate::diff::{diff, DiffSegment};
use crate::model::reflection::ReflectionId;
use crate::model::version::{ReflectionVersion, VersionId, VersionOrigin};
use crate::repo::flags::versioning_enabled;
use crate::repo::keys::{version_index_key, version_key};
use crate::store::{read_json, KeyValueRead, KeyValueStore, KvOp, StoreError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type VersionResult<T> = Result<T, VersionError>;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("versioning is disabled; enable it before saving versions")]
    VersioningDisabled,
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),
    #[error("version index of reflection `{reflection_id}` references missing version `{version_id}`")]
    DanglingIndex {
        reflection_id: ReflectionId,
        version_id: VersionId,
    },
    #[error("version `{version_id}` is already recorded for reflection `{reflection_id}`")]
    DuplicateVersion {
        reflection_id: ReflectionId,
        version_id: VersionId,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Options for `VersionStore::create_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVersionOptions {
    pub note: Option<String>,
    pub origin: VersionOrigin,
}

impl Default for CreateVersionOptions {
    fn default() -> Self {
        Self {
            note: None,
            origin: VersionOrigin::User,
        }
    }
}

impl CreateVersionOptions {
    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }
}

/// Per-reflection bookkeeping stored under `version_index/<reflection_id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VersionIndex {
    /// Highest number ever assigned while this index existed.
    pub last_number: u32,
    /// Live version ids in ascending number order.
    pub version_ids: Vec<VersionId>,
}

/// Version store over any key-value store.
pub struct VersionStore<S> {
    store: S,
    caps: Capabilities,
}

impl<S: KeyValueRead> VersionStore<S> {
    pub fn new(store: S, caps: Capabilities) -> Self {
        Self { store, caps }
    }

    /// Versions of one reflection ordered by ascending `version_number`.
    pub fn get_versions(&self, reflection_id: &str) -> VersionResult<Vec<ReflectionVersion>> {
        let Some(index) = load_index(&self.store, reflection_id)? else {
            return Ok(Vec::new());
        };

        let mut versions = Vec::with_capacity(index.version_ids.len());
        for version_id in &index.version_ids {
            match read_json::<ReflectionVersion, _>(&self.store, &version_key(version_id))? {
                Some(version) => versions.push(version),
                None => {
                    return Err(VersionError::DanglingIndex {
                        reflection_id: reflection_id.to_string(),
                        version_id: version_id.clone(),
                    });
                }
            }
        }
        versions.sort_by_key(|version| version.version_number);
        Ok(versions)
    }

    pub fn get_version(&self, version_id: &str) -> VersionResult<Option<ReflectionVersion>> {
        Ok(read_json(&self.store, &version_key(version_id))?)
    }

    pub fn latest_version(&self, reflection_id: &str) -> VersionResult<Option<ReflectionVersion>> {
        Ok(self.get_versions(reflection_id)?.pop())
    }

    /// Diff from one stored version to another.
    pub fn diff_versions(&self, from_id: &str, to_id: &str) -> VersionResult<Vec<DiffSegment>> {
        let from = self.require_version(from_id)?;
        let to = self.require_version(to_id)?;
        Ok(diff(&from.content, &to.content))
    }

    pub fn is_versioning_enabled(&self) -> VersionResult<bool> {
        Ok(versioning_enabled(&self.store)?)
    }

    fn require_version(&self, version_id: &str) -> VersionResult<ReflectionVersion> {
        self.get_version(version_id)?
            .ok_or_else(|| VersionError::VersionNotFound(version_id.to_string()))
    }
}

impl<S: KeyValueStore> VersionStore<S> {
    /// Records a new immutable version of `reflection_id`.
    ///
    /// # Errors
    /// - `VersioningDisabled` when the persisted flag is off, regardless of
    ///   existing history.
    pub fn create_version(
        &mut self,
        reflection_id: &str,
        content: impl Into<String>,
        options: CreateVersionOptions,
    ) -> VersionResult<ReflectionVersion> {
        if !versioning_enabled(&self.store)? {
            warn!(
                "event=version_create module=version status=rejected error_code=versioning_disabled"
            );
            return Err(VersionError::VersioningDisabled);
        }

        let (version, ops) = {
            let mut batch = VersionBatch::new(&self.store);
            let version = batch.append(
                self.caps.next_id(),
                reflection_id,
                content.into(),
                self.caps.now_ms(),
                options,
            )?;
            (version, batch.finish()?)
        };
        self.store.apply_batch(&ops)?;

        info!(
            "event=version_create module=version status=ok version_number={} origin={}",
            version.version_number,
            version.origin.as_str()
        );
        Ok(version)
    }

    /// Permanently deletes one version; absent ids are a no-op.
    pub fn delete_version(&mut self, version_id: &str) -> VersionResult<()> {
        let Some(version) = self.get_version(version_id)? else {
            return Ok(());
        };

        let ops = {
            let mut batch = VersionBatch::new(&self.store);
            batch.remove(&version)?;
            batch.finish()?
        };
        self.store.apply_batch(&ops)?;
        info!("event=version_delete module=version status=ok count=1");
        Ok(())
    }

    /// Permanently deletes the whole history of one reflection.
    pub fn delete_all_versions(&mut self, reflection_id: &str) -> VersionResult<()> {
        let ops = delete_all_ops(&self.store, reflection_id)?;
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len() - 1;
        self.store.apply_batch(&ops)?;
        info!("event=version_delete module=version status=ok count={count}");
        Ok(())
    }
}

impl<S> VersionStore<S> {
    pub fn into_inner(self) -> S {
        self.store
    }
}

pub(crate) fn load_index<S: KeyValueRead + ?Sized>(
    store: &S,
    reflection_id: &str,
) -> VersionResult<Option<VersionIndex>> {
    Ok(read_json(store, &version_index_key(reflection_id))?)
}

/// Ops removing every version and the index of one reflection.
pub(crate) fn delete_all_ops<S: KeyValueRead + ?Sized>(
    store: &S,
    reflection_id: &str,
) -> VersionResult<Vec<KvOp>> {
    let Some(index) = load_index(store, reflection_id)? else {
        return Ok(Vec::new());
    };
    let mut ops: Vec<KvOp> = index
        .version_ids
        .iter()
        .map(|version_id| KvOp::delete(version_key(version_id)))
        .collect();
    ops.push(KvOp::delete(version_index_key(reflection_id)));
    Ok(ops)
}
