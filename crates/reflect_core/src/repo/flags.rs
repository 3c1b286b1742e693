//! Persisted feature flags.
//!
//! # Invariants
//! - `versioning_enabled` defaults to `false` when never written.

use super::keys::VERSIONING_FLAG_KEY;
use crate::store::{read_json, write_json, KeyValueRead, KeyValueStore, StoreResult};
use log::info;

pub fn versioning_enabled<S: KeyValueRead + ?Sized>(store: &S) -> StoreResult<bool> {
    Ok(read_json::<bool, _>(store, VERSIONING_FLAG_KEY)?.unwrap_or(false))
}

pub fn set_versioning_enabled<S: KeyValueStore + ?Sized>(
    store: &mut S,
    enabled: bool,
) -> StoreResult<()> {
    write_json(store, VERSIONING_FLAG_KEY, &enabled)?;
    info!("event=flag_set module=repo status=ok flag=versioning_enabled value={enabled}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{set_versioning_enabled, versioning_enabled};
    use crate::store::MemoryKvStore;

    #[test]
    fn flag_defaults_off_and_persists() {
        let mut store = MemoryKvStore::new();
        assert!(!versioning_enabled(&store).unwrap());

        set_versioning_enabled(&mut store, true).unwrap();
        assert!(versioning_enabled(&store).unwrap());

        set_versioning_enabled(&mut store, false).unwrap();
        assert!(!versioning_enabled(&store).unwrap());
    }
}
