//! Immutable reflection snapshots.

use super::reflection::ReflectionId;
use serde::{Deserialize, Serialize};

pub type VersionId = String;

/// Why a version was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrigin {
    /// Explicit user save.
    User,
    /// Incoming content preserved by an import merge.
    Merge,
    /// Content displaced by restoring an older version.
    Restore,
}

impl VersionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Merge => "merge",
            Self::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionVersion {
    pub id: VersionId,
    pub reflection_id: ReflectionId,
    pub content: String,
    /// Starts at 1 and only ever increases per reflection.
    pub version_number: u32,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub origin: VersionOrigin,
}
