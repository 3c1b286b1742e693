//! Typed repositories over the key-value store.
//!
//! # Responsibility
//! - Own the key layout for every record kind.
//! - Translate between domain records and stored JSON values.
//!
//! # Invariants
//! - Write paths validate records before producing store ops.
//! - Read paths surface corrupt values as errors instead of masking them.

pub mod entity_repo;
pub mod flags;
pub mod keys;
