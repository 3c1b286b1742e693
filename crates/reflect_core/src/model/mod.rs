//! Domain model for reflections, their history and imported entities.
//!
//! # Responsibility
//! - Define canonical records shared by the version store and import engine.
//! - Provide content-equality rules used for conflict detection.
//!
//! # Invariants
//! - Every stored entity is identified by a stable string id.
//! - Versions are immutable once created.

pub mod entity;
pub mod reflection;
pub mod settings;
pub mod version;

use thiserror::Error;

/// Validation failures for domain records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelValidationError {
    #[error("id cannot be blank")]
    BlankId,
    #[error("updated_at ({updated_at}) is earlier than created_at ({created_at})")]
    UpdatedBeforeCreated { created_at: i64, updated_at: i64 },
    #[error("settings key cannot be blank")]
    BlankSettingsKey,
}
