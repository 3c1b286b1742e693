//! Key layout of the shared key-value namespace.
//!
//! `reflection/<id>`, `settings/<id>`, `version/<version_id>`,
//! `version_index/<reflection_id>`, `backup/<operation_id>`, `flag/<name>`.

use crate::model::entity::EntityType;

pub const REFLECTION_PREFIX: &str = "reflection/";
pub const SETTINGS_PREFIX: &str = "settings/";
pub const VERSION_PREFIX: &str = "version/";
pub const VERSION_INDEX_PREFIX: &str = "version_index/";
pub const BACKUP_PREFIX: &str = "backup/";
pub const VERSIONING_FLAG_KEY: &str = "flag/versioning_enabled";

pub fn reflection_key(id: &str) -> String {
    format!("{REFLECTION_PREFIX}{id}")
}

pub fn settings_key(id: &str) -> String {
    format!("{SETTINGS_PREFIX}{id}")
}

pub fn entity_key(entity_type: EntityType, id: &str) -> String {
    match entity_type {
        EntityType::Reflection => reflection_key(id),
        EntityType::Settings => settings_key(id),
    }
}

pub fn version_key(version_id: &str) -> String {
    format!("{VERSION_PREFIX}{version_id}")
}

/// Live version ids plus the number counter of one reflection.
pub fn version_index_key(reflection_id: &str) -> String {
    format!("{VERSION_INDEX_PREFIX}{reflection_id}")
}

pub fn backup_key(operation_id: &str) -> String {
    format!("{BACKUP_PREFIX}{operation_id}")
}
