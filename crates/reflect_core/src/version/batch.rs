//! Accumulates version writes for a single atomic store batch.

use super::{load_index, VersionError, VersionIndex, VersionResult};
use crate::model::version::{ReflectionVersion, VersionId};
use crate::repo::keys::{version_index_key, version_key};
use crate::store::{json_set_op, KeyValueRead, KvOp};
use crate::version::CreateVersionOptions;
use std::collections::BTreeMap;

/// Staged version appends/removals with in-memory index state.
///
/// Several edits to the same reflection inside one batch see each other.
pub(crate) struct VersionBatch<'s, S: KeyValueRead + ?Sized> {
    store: &'s S,
    indexes: BTreeMap<String, VersionIndex>,
    ops: Vec<KvOp>,
}

impl<'s, S: KeyValueRead + ?Sized> VersionBatch<'s, S> {
    pub(crate) fn new(store: &'s S) -> Self {
        Self {
            store,
            indexes: BTreeMap::new(),
            ops: Vec::new(),
        }
    }

    /// Stages a new version numbered after the highest assigned so far.
    ///
    /// # Errors
    /// - `DuplicateVersion` when `version_id` is already in the index.
    pub(crate) fn append(
        &mut self,
        version_id: VersionId,
        reflection_id: &str,
        content: String,
        created_at: i64,
        options: CreateVersionOptions,
    ) -> VersionResult<ReflectionVersion> {
        let index = self.index_mut(reflection_id)?;
        if index.version_ids.contains(&version_id) {
            return Err(VersionError::DuplicateVersion {
                reflection_id: reflection_id.to_string(),
                version_id,
            });
        }
        index.last_number += 1;
        index.version_ids.push(version_id.clone());

        let version = ReflectionVersion {
            id: version_id,
            reflection_id: reflection_id.to_string(),
            content,
            version_number: index.last_number,
            created_at,
            note: options.note,
            origin: options.origin,
        };
        self.ops
            .push(json_set_op(version_key(&version.id), &version)?);
        Ok(version)
    }

    /// Stages removal of one version, keeping the number counter.
    pub(crate) fn remove(&mut self, version: &ReflectionVersion) -> VersionResult<()> {
        let index = self.index_mut(&version.reflection_id)?;
        index.version_ids.retain(|id| id != &version.id);
        self.ops.push(KvOp::delete(version_key(&version.id)));
        Ok(())
    }

    /// Final op list: version records first, then one write per index.
    pub(crate) fn finish(mut self) -> VersionResult<Vec<KvOp>> {
        for (reflection_id, index) in &self.indexes {
            self.ops
                .push(json_set_op(version_index_key(reflection_id), index)?);
        }
        Ok(self.ops)
    }

    fn index_mut(&mut self, reflection_id: &str) -> VersionResult<&mut VersionIndex> {
        if !self.indexes.contains_key(reflection_id) {
            let loaded = load_index(self.store, reflection_id)?.unwrap_or_default();
            self.indexes.insert(reflection_id.to_string(), loaded);
        }
        Ok(self
            .indexes
            .entry(reflection_id.to_string())
            .or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::VersionBatch;
    use crate::store::{KeyValueStore, MemoryKvStore};
    use crate::version::{CreateVersionOptions, VersionError};

    fn append(
        batch: &mut VersionBatch<'_, MemoryKvStore>,
        version_id: &str,
    ) -> Result<u32, VersionError> {
        batch
            .append(
                version_id.to_string(),
                "r1",
                "text".to_string(),
                0,
                CreateVersionOptions::default(),
            )
            .map(|version| version.version_number)
    }

    #[test]
    fn append_rejects_an_id_staged_in_the_same_batch() {
        let store = MemoryKvStore::new();
        let mut batch = VersionBatch::new(&store);
        assert_eq!(append(&mut batch, "v-1").unwrap(), 1);

        let err = append(&mut batch, "v-1").unwrap_err();
        assert!(matches!(err, VersionError::DuplicateVersion { .. }));
        assert_eq!(append(&mut batch, "v-2").unwrap(), 2);
    }

    #[test]
    fn append_rejects_an_id_already_persisted() {
        let mut store = MemoryKvStore::new();
        let ops = {
            let mut batch = VersionBatch::new(&store);
            append(&mut batch, "v-1").unwrap();
            batch.finish().unwrap()
        };
        store.apply_batch(&ops).unwrap();

        let mut batch = VersionBatch::new(&store);
        assert!(matches!(
            append(&mut batch, "v-1"),
            Err(VersionError::DuplicateVersion { version_id, .. }) if version_id == "v-1"
        ));
        assert_eq!(append(&mut batch, "v-2").unwrap(), 2);
    }
}
