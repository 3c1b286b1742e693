//! Import pipeline: validate an external package, resolve conflicts under a
//! user-chosen policy, apply with a pre-mutation backup, undo on request.
//!
//! # Responsibility
//! - Detect package format and collect every problem before any decision.
//! - Turn conflicts plus a policy into an explicit mutation plan.
//! - Apply plans atomically after a durable backup.
//!
//! # Invariants
//! - Validation and resolution never mutate the store.
//! - A package with errors never reaches the store.
//! - No mutation is applied unless its backup was persisted first.

pub mod backup;
mod package;
pub mod resolver;
pub mod validator;

use crate::model::entity::{Entity, EntityType};
use crate::repo::entity_repo::RepoError;
use crate::store::StoreError;
use crate::version::VersionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub use package::{FORMAT_BACKUP, FORMAT_DEVICE_EXPORT, SUPPORTED_SCHEMA_VERSION};

pub type ImportResult<T> = Result<T, ImportError>;

/// Errors aborting a whole import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported import format: {0}")]
    UnsupportedFormat(String),
    #[error("import aborted: package has {error_count} blocking error(s)")]
    ImportAborted { error_count: usize },
    #[error("import aborted before any change: backup could not be persisted: {0}")]
    BackupFailed(#[source] StoreError),
    #[error("import operation `{0}` was already applied")]
    AlreadyApplied(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-item failure raised while applying a plan; siblings still apply.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ItemError {
    #[error("{entity_type} `{id}` changed locally after validation; validate the package again")]
    StaleConflict { entity_type: EntityType, id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    /// Full backup written by this application.
    Backup,
    /// Export produced on another device.
    DeviceExport,
}

impl ImportFormat {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Backup => FORMAT_BACKUP,
            Self::DeviceExport => FORMAT_DEVICE_EXPORT,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            FORMAT_BACKUP => Some(Self::Backup),
            FORMAT_DEVICE_EXPORT => Some(Self::DeviceExport),
            _ => None,
        }
    }
}

/// User-chosen rule for adjudicating conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    Merge,
    KeepExisting,
    Overwrite,
    CreateNew,
}

impl ResolutionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::KeepExisting => "keep-existing",
            Self::Overwrite => "overwrite",
            Self::CreateNew => "create-new",
        }
    }
}

impl Display for ResolutionPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resolution policy `{0}`; expected merge|keep-existing|overwrite|create-new")]
pub struct ParsePolicyError(pub String);

impl FromStr for ResolutionPolicy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "keep-existing" | "keep_existing" => Ok(Self::KeepExisting),
            "overwrite" => Ok(Self::Overwrite),
            "create-new" | "create_new" => Ok(Self::CreateNew),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

/// One local entity paired with an incoming entity of the same id whose
/// content differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConflict {
    pub entity_type: EntityType,
    pub existing_id: String,
    /// Always equal to `existing_id`; conflicts are matched by id.
    pub incoming_id: String,
    pub description: String,
}

/// Parsed incoming entity with the local state seen during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingItem {
    pub entity: Entity,
    /// Local entity under the same id at validation time.
    pub baseline: Option<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    New,
    Identical,
    Conflicting,
}

impl IncomingItem {
    pub fn status(&self) -> ItemStatus {
        match &self.baseline {
            None => ItemStatus::New,
            Some(local) if local.same_content(&self.entity) => ItemStatus::Identical,
            Some(_) => ItemStatus::Conflicting,
        }
    }
}

/// Validation result; lives for one validate/resolve cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPackage {
    pub format: ImportFormat,
    /// Item counts keyed by package category, including excluded ones.
    pub item_counts: BTreeMap<String, usize>,
    pub items: Vec<IncomingItem>,
    pub conflicts: Vec<ImportConflict>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub is_valid: bool,
    pub validated_at: i64,
}

impl ImportPackage {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
