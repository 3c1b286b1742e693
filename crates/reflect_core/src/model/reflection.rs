//! Reflection record: the live, user-authored entry that gets versioned.

use super::ModelValidationError;
use serde::{Deserialize, Serialize};

pub type ReflectionId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: ReflectionId,
    /// Current text; history lives in the version store.
    pub content: String,
    /// Prompt the user answered, when the entry was prompted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

impl Reflection {
    pub fn new(id: impl Into<ReflectionId>, content: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            prompt: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.id.trim().is_empty() {
            return Err(ModelValidationError::BlankId);
        }
        if self.updated_at < self.created_at {
            return Err(ModelValidationError::UpdatedBeforeCreated {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        Ok(())
    }

    /// Content equality used for conflict detection; timestamps are ignored.
    pub fn same_content(&self, other: &Self) -> bool {
        self.content == other.content && self.prompt == other.prompt
    }
}
