//! In-memory key-value store for embedding and deterministic callers.

use super::{KeyValueRead, KeyValueStore, KvOp, StoreResult};
use std::collections::BTreeMap;

/// Ordered map store; batches are trivially atomic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryKvStore {
    entries: BTreeMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full copy of the current contents.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries.clone()
    }
}

impl KeyValueRead for MemoryKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

impl KeyValueStore for MemoryKvStore {
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn apply_batch(&mut self, ops: &[KvOp]) -> StoreResult<()> {
        for op in ops {
            match op {
                KvOp::Set { key, value } => {
                    self.entries.insert(key.clone(), value.clone());
                }
                KvOp::Delete { key } => {
                    self.entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryKvStore;
    use crate::store::{KeyValueRead, KeyValueStore};

    #[test]
    fn scan_prefix_stops_at_first_non_matching_key() {
        let mut store = MemoryKvStore::new();
        store.set("a/1", "x").unwrap();
        store.set("a/2", "y").unwrap();
        store.set("b/1", "z").unwrap();

        let found = store.scan_prefix("a/").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, "a/1");
    }
}
