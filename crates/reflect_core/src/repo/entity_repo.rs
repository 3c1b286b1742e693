//! Reflection and settings persistence.
//!
//! # Responsibility
//! - Read live entities by type and id.
//! - Produce validated batch ops so callers can compose atomic writes.
//!
//! # Invariants
//! - Stored values are the bare record JSON, not the `Entity` envelope.

use super::keys::{entity_key, reflection_key, settings_key, REFLECTION_PREFIX, SETTINGS_PREFIX};
use crate::model::entity::{Entity, EntityType};
use crate::model::reflection::Reflection;
use crate::model::settings::SettingsRecord;
use crate::model::ModelValidationError;
use crate::store::{
    json_set_op, read_json, scan_json, KeyValueRead, KeyValueStore, KvOp, StoreError,
};
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ModelValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entity repository over any key-value store.
pub struct EntityRepository<S> {
    store: S,
}

impl<S: KeyValueRead> EntityRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get_reflection(&self, id: &str) -> RepoResult<Option<Reflection>> {
        Ok(read_json(&self.store, &reflection_key(id))?)
    }

    /// All reflections ordered by id.
    pub fn list_reflections(&self) -> RepoResult<Vec<Reflection>> {
        Ok(scan_json(&self.store, REFLECTION_PREFIX)?)
    }

    pub fn get_settings(&self, id: &str) -> RepoResult<Option<SettingsRecord>> {
        Ok(read_json(&self.store, &settings_key(id))?)
    }

    pub fn list_settings(&self) -> RepoResult<Vec<SettingsRecord>> {
        Ok(scan_json(&self.store, SETTINGS_PREFIX)?)
    }

    pub fn get_entity(&self, entity_type: EntityType, id: &str) -> RepoResult<Option<Entity>> {
        let entity = match entity_type {
            EntityType::Reflection => self.get_reflection(id)?.map(Entity::Reflection),
            EntityType::Settings => self.get_settings(id)?.map(Entity::Settings),
        };
        Ok(entity)
    }
}

impl<S: KeyValueStore> EntityRepository<S> {
    pub fn put_reflection(&mut self, reflection: &Reflection) -> RepoResult<()> {
        let op = put_entity_op(&Entity::Reflection(reflection.clone()))?;
        self.store.apply_batch(&[op])?;
        Ok(())
    }

    pub fn put_settings(&mut self, settings: &SettingsRecord) -> RepoResult<()> {
        let op = put_entity_op(&Entity::Settings(settings.clone()))?;
        self.store.apply_batch(&[op])?;
        Ok(())
    }

    /// Idempotent.
    pub fn delete_entity(&mut self, entity_type: EntityType, id: &str) -> RepoResult<()> {
        self.store.delete(&entity_key(entity_type, id))?;
        Ok(())
    }
}

/// Validated `Set` op for one entity.
pub fn put_entity_op(entity: &Entity) -> RepoResult<KvOp> {
    entity.validate()?;
    let key = entity_key(entity.entity_type(), entity.id());
    let op = match entity {
        Entity::Reflection(reflection) => json_set_op(key, reflection)?,
        Entity::Settings(settings) => json_set_op(key, settings)?,
    };
    Ok(op)
}

pub fn delete_entity_op(entity_type: EntityType, id: &str) -> KvOp {
    KvOp::delete(entity_key(entity_type, id))
}
