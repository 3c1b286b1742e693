//! Import validator: classify an incoming package against local state.
//!
//! # Responsibility
//! - Detect format and parse typed items.
//! - Pair every incoming item with its local counterpart and report
//!   conflicts, warnings and errors in one pass.
//!
//! # Invariants
//! - Read-only: nothing is written to the store.
//! - A conflict is reported only when a local entity with the same id exists
//!   and its content differs.
//! - Same package + same local state yields the same conflicts, in package
//!   order.

use super::package::parse_package;
use super::{
    ImportConflict, ImportError, ImportPackage, ImportResult, IncomingItem, ItemStatus,
};
use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::diff::{diff, diff_stats};
use crate::model::entity::Entity;
use crate::repo::entity_repo::EntityRepository;
use crate::store::KeyValueRead;
use log::{info, warn};
use serde_json::Value;
use std::time::Instant;

pub struct ImportValidator<S> {
    repo: EntityRepository<S>,
    caps: Capabilities,
    config: EngineConfig,
}

impl<S: KeyValueRead> ImportValidator<S> {
    pub fn new(store: S, caps: Capabilities, config: EngineConfig) -> Self {
        Self {
            repo: EntityRepository::new(store),
            caps,
            config,
        }
    }

    /// Validates a JSON text payload.
    ///
    /// # Errors
    /// - `UnsupportedFormat` when the text is not JSON or the format tag is
    ///   not recognized.
    pub fn validate_json(&self, raw: &str) -> ImportResult<ImportPackage> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| ImportError::UnsupportedFormat(format!("payload is not JSON: {err}")))?;
        self.validate(&value)
    }

    /// Validates a decoded payload against current local state.
    pub fn validate(&self, raw: &Value) -> ImportResult<ImportPackage> {
        let started_at = Instant::now();
        let now_ms = self.caps.now_ms();
        let parsed = match parse_package(raw, &self.config, now_ms) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("event=import_validate module=import status=error error_code=unsupported_format");
                return Err(err);
            }
        };

        let mut items = Vec::with_capacity(parsed.entities.len());
        let mut conflicts = Vec::new();
        for entity in parsed.entities {
            let baseline = self.repo.get_entity(entity.entity_type(), entity.id())?;
            let item = IncomingItem { entity, baseline };
            if item.status() == ItemStatus::Conflicting {
                if let Some(local) = &item.baseline {
                    conflicts.push(describe_conflict(local, &item.entity));
                }
            }
            items.push(item);
        }

        let is_valid = parsed.errors.is_empty();
        info!(
            "event=import_validate module=import status=ok format={} items={} conflicts={} warnings={} errors={} duration_ms={}",
            parsed.format.tag(),
            items.len(),
            conflicts.len(),
            parsed.warnings.len(),
            parsed.errors.len(),
            started_at.elapsed().as_millis()
        );

        Ok(ImportPackage {
            format: parsed.format,
            item_counts: parsed.item_counts,
            items,
            conflicts,
            warnings: parsed.warnings,
            errors: parsed.errors,
            is_valid,
            validated_at: now_ms,
        })
    }
}

fn describe_conflict(local: &Entity, incoming: &Entity) -> ImportConflict {
    let description = match (local, incoming) {
        (Entity::Reflection(local), Entity::Reflection(incoming)) => {
            let stats = diff_stats(&diff(&local.content, &incoming.content));
            let prompt_note = if local.prompt != incoming.prompt {
                ", prompt differs"
            } else {
                ""
            };
            format!(
                "reflection `{}` differs from the local copy (+{} / -{} words{prompt_note})",
                local.id, stats.added_words, stats.removed_words
            )
        }
        (Entity::Settings(local), Entity::Settings(incoming)) => {
            let differing: Vec<&str> = local
                .values
                .keys()
                .chain(incoming.values.keys())
                .filter(|key| local.values.get(*key) != incoming.values.get(*key))
                .map(String::as_str)
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            format!(
                "settings `{}` differ in key(s): {}",
                local.id,
                differing.join(", ")
            )
        }
        _ => format!("{} `{}` differs from the local copy", local.entity_type(), local.id()),
    };

    ImportConflict {
        entity_type: local.entity_type(),
        existing_id: local.id().to_string(),
        incoming_id: incoming.id().to_string(),
        description,
    }
}
