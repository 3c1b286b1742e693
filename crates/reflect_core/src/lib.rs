//! Reflection versioning and import/merge engine.
//!
//! Keeps immutable version history for reflections, diffs texts word by
//! word, and imports external packages through validate → resolve → apply
//! with an undoable backup. All state lives behind `store::KeyValueStore`.

pub mod capability;
pub mod config;
pub mod db;
pub mod diff;
pub mod import;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;
pub mod version;

pub use capability::{
    Capabilities, Clock, FixedClock, IdGenerator, SequentialIdGenerator, SystemClock,
    UuidIdGenerator,
};
pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use diff::{diff, diff_stats, DiffKind, DiffSegment, DiffStats};
pub use import::backup::{RestoreOutcome, RestoreReport, SnapshotStatus, UndoError};
pub use import::resolver::{ImportOutcome, MutationPlan, PlannedAction, SkipReason};
pub use import::{ImportConflict, ImportError, ImportPackage, ItemError, ResolutionPolicy};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityType};
pub use model::reflection::Reflection;
pub use model::settings::SettingsRecord;
pub use model::version::{ReflectionVersion, VersionOrigin};
pub use service::import_service::ImportService;
pub use service::reflection_service::{ReflectionService, SaveOptions};
pub use service::{ServiceError, ServiceResult};
pub use store::{
    KeyValueRead, KeyValueStore, KvOp, MemoryKvStore, SqliteKvStore, StoreError, StoreResult,
};
pub use version::{CreateVersionOptions, VersionError, VersionStore};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
