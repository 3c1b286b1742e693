//! Configuration-like entity merged key-wise during imports.
//!
//! # Invariants
//! - A key is unset when missing or holding JSON `null`.
//! - Merging never replaces a set local value.

use super::ModelValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub id: String,
    pub values: BTreeMap<String, Value>,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

impl SettingsRecord {
    pub fn new(id: impl Into<String>, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
            updated_at,
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.id.trim().is_empty() {
            return Err(ModelValidationError::BlankId);
        }
        if self.values.keys().any(|key| key.trim().is_empty()) {
            return Err(ModelValidationError::BlankSettingsKey);
        }
        Ok(())
    }

    pub fn is_unset(&self, key: &str) -> bool {
        matches!(self.values.get(key), None | Some(Value::Null))
    }

    pub fn same_content(&self, other: &Self) -> bool {
        self.values == other.values
    }

    /// Key-wise union where `incoming` only fills keys unset locally.
    ///
    /// Returns the merged record (keeping `self.id`) and the keys taken from
    /// `incoming`.
    pub fn merge_unset_from(&self, incoming: &Self, now_ms: i64) -> (Self, Vec<String>) {
        let mut merged = self.clone();
        let mut filled = Vec::new();
        for (key, value) in &incoming.values {
            if value.is_null() || !self.is_unset(key) {
                continue;
            }
            merged.values.insert(key.clone(), value.clone());
            filled.push(key.clone());
        }
        if !filled.is_empty() {
            merged.updated_at = now_ms.max(self.updated_at);
        }
        (merged, filled)
    }
}

#[cfg(test)]
mod tests {
    use super::SettingsRecord;
    use serde_json::json;

    #[test]
    fn merge_fills_only_unset_local_keys() {
        let local = SettingsRecord::new("prefs", 10)
            .with_value("theme", json!("dark"))
            .with_value("reminder", json!(null));
        let incoming = SettingsRecord::new("prefs", 20)
            .with_value("theme", json!("light"))
            .with_value("reminder", json!("21:00"))
            .with_value("locale", json!("de"));

        let (merged, filled) = local.merge_unset_from(&incoming, 30);

        assert_eq!(merged.values["theme"], json!("dark"));
        assert_eq!(merged.values["reminder"], json!("21:00"));
        assert_eq!(merged.values["locale"], json!("de"));
        assert_eq!(filled, vec!["locale".to_string(), "reminder".to_string()]);
        assert_eq!(merged.updated_at, 30);
    }

    #[test]
    fn merge_without_new_keys_keeps_record_untouched() {
        let local = SettingsRecord::new("prefs", 10).with_value("theme", json!("dark"));
        let incoming = SettingsRecord::new("prefs", 20).with_value("theme", json!("light"));

        let (merged, filled) = local.merge_unset_from(&incoming, 30);
        assert!(filled.is_empty());
        assert_eq!(merged, local);
    }
}
