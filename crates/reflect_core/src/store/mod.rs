//! Key-value storage capability consumed by every engine component.
//!
//! # Responsibility
//! - Define the minimal get/set/delete/scan contract the engine depends on.
//! - Provide atomic multi-key batches so imports and undo never half-apply.
//! - Offer JSON helpers for typed records stored as text values.
//!
//! # Invariants
//! - `apply_batch` applies every op or none of them.
//! - `delete` of an absent key is not an error.
//! - `scan_prefix` returns entries ordered by key.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer error for key-value access and record decoding.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("failed to encode record: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("corrupt record at key `{key}`: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl KvOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Key touched by this op.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Read half of the storage capability.
pub trait KeyValueRead {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;
}

/// Full storage capability with durable writes.
pub trait KeyValueStore: KeyValueRead {
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()>;
    fn delete(&mut self, key: &str) -> StoreResult<()>;
    /// Applies all ops atomically, in order.
    fn apply_batch(&mut self, ops: &[KvOp]) -> StoreResult<()>;
}

impl<S: KeyValueRead + ?Sized> KeyValueRead for &S {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        (**self).scan_prefix(prefix)
    }
}

impl<S: KeyValueRead + ?Sized> KeyValueRead for &mut S {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        (**self).scan_prefix(prefix)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        (**self).delete(key)
    }

    fn apply_batch(&mut self, ops: &[KvOp]) -> StoreResult<()> {
        (**self).apply_batch(ops)
    }
}

/// Reads and decodes one JSON record.
pub fn read_json<T, S>(store: &S, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueRead + ?Sized,
{
    match store.get(key)? {
        Some(raw) => decode_json(key, &raw).map(Some),
        None => Ok(None),
    }
}

/// Reads and decodes every JSON record under `prefix`, ordered by key.
pub fn scan_json<T, S>(store: &S, prefix: &str) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    S: KeyValueRead + ?Sized,
{
    store
        .scan_prefix(prefix)?
        .iter()
        .map(|(key, raw)| decode_json(key, raw))
        .collect()
}

/// Encodes one record into a batch `Set` op.
pub fn json_set_op<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> StoreResult<KvOp> {
    let encoded = serde_json::to_string(value).map_err(StoreError::Serialization)?;
    Ok(KvOp::set(key, encoded))
}

/// Encodes and writes one record.
pub fn write_json<T, S>(store: &mut S, key: &str, value: &T) -> StoreResult<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let encoded = serde_json::to_string(value).map_err(StoreError::Serialization)?;
    store.set(key, &encoded)
}

pub(crate) fn decode_json<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}
