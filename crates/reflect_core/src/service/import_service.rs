//! Import use-case service.
//!
//! # Responsibility
//! - Expose validate → resolve → apply and the undo lifecycle over one store.
//!
//! # Invariants
//! - `validate` and `resolve` are read-only; only `apply`/`import` and the
//!   undo calls write.

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::import::backup::{BackupManager, BackupSummary, RestoreOutcome, UndoResult};
use crate::import::resolver::{ConflictResolver, ImportOutcome, MutationPlan};
use crate::import::validator::ImportValidator;
use crate::import::{ImportPackage, ImportResult, ResolutionPolicy};
use crate::store::{KeyValueRead, KeyValueStore};
use serde_json::Value;

pub struct ImportService<S> {
    store: S,
    caps: Capabilities,
    config: EngineConfig,
}

impl<S: KeyValueRead> ImportService<S> {
    pub fn new(store: S, caps: Capabilities, config: EngineConfig) -> Self {
        Self {
            store,
            caps,
            config,
        }
    }

    pub fn validate(&self, raw: &Value) -> ImportResult<ImportPackage> {
        self.validator().validate(raw)
    }

    pub fn validate_json(&self, raw: &str) -> ImportResult<ImportPackage> {
        self.validator().validate_json(raw)
    }

    pub fn resolve(
        &self,
        package: &ImportPackage,
        policy: ResolutionPolicy,
    ) -> ImportResult<MutationPlan> {
        ConflictResolver::new(&self.store, self.caps.clone(), self.config.clone())
            .resolve(package, policy)
    }

    pub fn list_backups(&self) -> UndoResult<Vec<BackupSummary>> {
        BackupManager::new(&self.store, self.caps.clone(), self.config.clone()).list_snapshots()
    }

    fn validator(&self) -> ImportValidator<&S> {
        ImportValidator::new(&self.store, self.caps.clone(), self.config.clone())
    }
}

impl<S: KeyValueStore> ImportService<S> {
    pub fn apply(&mut self, plan: &MutationPlan) -> ImportResult<ImportOutcome> {
        ConflictResolver::new(&mut self.store, self.caps.clone(), self.config.clone()).apply(plan)
    }

    /// Validates, resolves and applies in one call.
    pub fn import(&mut self, raw: &Value, policy: ResolutionPolicy) -> ImportResult<ImportOutcome> {
        let package = self.validate(raw)?;
        let plan = self.resolve(&package, policy)?;
        self.apply(&plan)
    }

    pub fn restore(&mut self, operation_id: &str) -> UndoResult<RestoreOutcome> {
        self.backups().restore(operation_id)
    }

    pub fn discard(&mut self, operation_id: &str) -> UndoResult<()> {
        self.backups().discard(operation_id)
    }

    pub fn purge_expired(&mut self) -> UndoResult<usize> {
        self.backups().purge_expired()
    }

    fn backups(&mut self) -> BackupManager<&mut S> {
        BackupManager::new(&mut self.store, self.caps.clone(), self.config.clone())
    }
}

impl<S> ImportService<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}
