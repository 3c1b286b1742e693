//! Uniform envelope over importable entity kinds.

use super::reflection::Reflection;
use super::settings::SettingsRecord;
use super::ModelValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Reflection,
    Settings,
}

impl EntityType {
    /// Package category name carrying this entity type.
    pub fn category(self) -> &'static str {
        match self {
            Self::Reflection => "reflections",
            Self::Settings => "settings",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reflection => "reflection",
            Self::Settings => "settings",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum Entity {
    Reflection(Reflection),
    Settings(SettingsRecord),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Reflection(_) => EntityType::Reflection,
            Self::Settings(_) => EntityType::Settings,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Reflection(reflection) => &reflection.id,
            Self::Settings(settings) => &settings.id,
        }
    }

    pub fn updated_at(&self) -> i64 {
        match self {
            Self::Reflection(reflection) => reflection.updated_at,
            Self::Settings(settings) => settings.updated_at,
        }
    }

    /// Content equality; entities of different kinds never match.
    pub fn same_content(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Reflection(a), Self::Reflection(b)) => a.same_content(b),
            (Self::Settings(a), Self::Settings(b)) => a.same_content(b),
            _ => false,
        }
    }

    /// Same entity under a different id.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        let id = id.into();
        match self {
            Self::Reflection(reflection) => Self::Reflection(Reflection {
                id,
                ..reflection.clone()
            }),
            Self::Settings(settings) => Self::Settings(SettingsRecord {
                id,
                ..settings.clone()
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        match self {
            Self::Reflection(reflection) => reflection.validate(),
            Self::Settings(settings) => settings.validate(),
        }
    }
}
