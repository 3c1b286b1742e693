//! Structural parsing of an already-decoded import payload.
//!
//! # Invariants
//! - Only an unrecognized or missing format tag fails the parse; every other
//!   structural problem is collected as an error string.
//! - Items with any error are left out of the parsed collections.

use super::{ImportError, ImportFormat, ImportResult};
use crate::config::EngineConfig;
use crate::model::entity::{Entity, EntityType};
use crate::model::reflection::Reflection;
use crate::model::settings::SettingsRecord;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const FORMAT_BACKUP: &str = "reflect-backup";
pub const FORMAT_DEVICE_EXPORT: &str = "reflect-device-export";
pub const SUPPORTED_SCHEMA_VERSION: u64 = 1;

/// Top-level keys describing the package rather than carrying items.
const METADATA_KEYS: &[&str] = &["format", "schema_version", "exported_at", "source_device"];

#[derive(Debug)]
pub(super) struct ParsedPackage {
    pub format: ImportFormat,
    pub entities: Vec<Entity>,
    pub item_counts: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub(super) fn parse_package(
    raw: &Value,
    config: &EngineConfig,
    now_ms: i64,
) -> ImportResult<ParsedPackage> {
    let object = raw
        .as_object()
        .ok_or_else(|| ImportError::UnsupportedFormat("payload is not a JSON object".to_string()))?;
    let tag = object
        .get("format")
        .and_then(Value::as_str)
        .ok_or_else(|| ImportError::UnsupportedFormat("missing `format` tag".to_string()))?;
    let format = ImportFormat::from_tag(tag)
        .ok_or_else(|| ImportError::UnsupportedFormat(format!("`{tag}`")))?;

    let mut parsed = ParsedPackage {
        format,
        entities: Vec::new(),
        item_counts: BTreeMap::new(),
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    match object.get("schema_version") {
        None => parsed
            .errors
            .push("missing required field `schema_version`".to_string()),
        Some(value) => match value.as_u64() {
            Some(SUPPORTED_SCHEMA_VERSION) => {}
            Some(other) => parsed.errors.push(format!(
                "unsupported schema_version {other} for format `{tag}`; expected {SUPPORTED_SCHEMA_VERSION}"
            )),
            None => parsed
                .errors
                .push("field `schema_version` must be a non-negative integer".to_string()),
        },
    }

    let future_limit = now_ms.saturating_add(config.future_tolerance_ms());
    for (category, value) in object {
        if METADATA_KEYS.contains(&category.as_str()) {
            continue;
        }

        let entity_type = match category.as_str() {
            "reflections" => Some(EntityType::Reflection),
            "settings" => Some(EntityType::Settings),
            _ => None,
        };

        match (entity_type, value.as_array()) {
            (Some(entity_type), Some(items)) => {
                parsed.item_counts.insert(category.clone(), items.len());
                parse_category(entity_type, items, future_limit, &mut parsed);
            }
            (Some(_), None) => parsed
                .errors
                .push(format!("category `{category}` must be an array")),
            (None, items) => {
                let count = items.map_or(0, Vec::len);
                if config.is_excluded(category) {
                    parsed.item_counts.insert(category.clone(), count);
                    parsed.warnings.push(format!(
                        "{count} item(s) in excluded category `{category}` will not be imported"
                    ));
                } else if items.is_some() {
                    parsed.item_counts.insert(category.clone(), count);
                    parsed.warnings.push(format!(
                        "unknown category `{category}` with {count} item(s) ignored"
                    ));
                } else {
                    parsed
                        .warnings
                        .push(format!("unrecognized field `{category}` ignored"));
                }
            }
        }
    }

    Ok(parsed)
}

fn parse_category(
    entity_type: EntityType,
    items: &[Value],
    future_limit: i64,
    parsed: &mut ParsedPackage,
) {
    let category = entity_type.category();
    let mut seen_ids = BTreeSet::new();

    for (position, item) in items.iter().enumerate() {
        let location = format!("{category}[{position}]");
        let Some(fields) = item.as_object() else {
            parsed.errors.push(format!("{location}: item must be an object"));
            continue;
        };

        let mut item_errors = Vec::new();
        let entity = match entity_type {
            EntityType::Reflection => parse_reflection(fields, &mut item_errors),
            EntityType::Settings => parse_settings(fields, &mut item_errors),
        };
        let Some(entity) = entity.filter(|_| item_errors.is_empty()) else {
            parsed
                .errors
                .extend(item_errors.into_iter().map(|err| format!("{location}: {err}")));
            continue;
        };

        if let Err(err) = entity.validate() {
            parsed.errors.push(format!("{location}: {err}"));
            continue;
        }
        if !seen_ids.insert(entity.id().to_string()) {
            parsed
                .errors
                .push(format!("{location}: duplicate id `{}`", entity.id()));
            continue;
        }
        if entity.updated_at() > future_limit {
            parsed.warnings.push(format!(
                "{location}: {} `{}` has updated_at in the future",
                entity_type,
                entity.id()
            ));
        }
        parsed.entities.push(entity);
    }
}

fn parse_reflection(fields: &Map<String, Value>, errors: &mut Vec<String>) -> Option<Entity> {
    let id = required_id(fields, errors);
    let content = required_str(fields, "content", errors);
    let updated_at = required_i64(fields, "updated_at", errors);
    let created_at = optional_i64(fields, "created_at", errors);
    let prompt = optional_str(fields, "prompt", errors);

    let updated_at = updated_at?;
    Some(Entity::Reflection(Reflection {
        id: id?,
        content: content?,
        prompt,
        created_at: created_at.unwrap_or(updated_at),
        updated_at,
    }))
}

fn parse_settings(fields: &Map<String, Value>, errors: &mut Vec<String>) -> Option<Entity> {
    let id = required_id(fields, errors);
    let values = match fields.get("values") {
        None => {
            errors.push("missing required field `values`".to_string());
            None
        }
        Some(Value::Object(map)) => Some(
            map.iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        ),
        Some(_) => {
            errors.push("field `values` must be an object".to_string());
            None
        }
    };
    let updated_at = required_i64(fields, "updated_at", errors);

    Some(Entity::Settings(SettingsRecord {
        id: id?,
        values: values?,
        updated_at: updated_at?,
    }))
}

fn required_id(fields: &Map<String, Value>, errors: &mut Vec<String>) -> Option<String> {
    let id = required_str(fields, "id", errors)?;
    if id.trim().is_empty() {
        errors.push("field `id` cannot be blank".to_string());
        return None;
    }
    Some(id)
}

fn required_str(
    fields: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match fields.get(name) {
        None | Some(Value::Null) => {
            errors.push(format!("missing required field `{name}`"));
            None
        }
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            errors.push(format!("field `{name}` must be a string"));
            None
        }
    }
}

fn optional_str(
    fields: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            errors.push(format!("field `{name}` must be a string"));
            None
        }
    }
}

fn required_i64(fields: &Map<String, Value>, name: &str, errors: &mut Vec<String>) -> Option<i64> {
    if matches!(fields.get(name), None | Some(Value::Null)) {
        errors.push(format!("missing required field `{name}`"));
        return None;
    }
    optional_i64(fields, name, errors)
}

fn optional_i64(fields: &Map<String, Value>, name: &str, errors: &mut Vec<String>) -> Option<i64> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(value) => {
            let parsed = value.as_i64();
            if parsed.is_none() {
                errors.push(format!("field `{name}` must be an integer (epoch ms)"));
            }
            parsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_package;
    use crate::config::EngineConfig;
    use crate::import::{ImportError, ImportFormat};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn unknown_format_is_fatal() {
        let err = parse_package(
            &json!({ "format": "zip-archive", "schema_version": 1 }),
            &EngineConfig::default(),
            NOW,
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));

        let err = parse_package(&json!([1, 2]), &EngineConfig::default(), NOW).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));
    }

    #[test]
    fn collects_every_item_problem() {
        let parsed = parse_package(
            &json!({
                "format": "reflect-device-export",
                "schema_version": 1,
                "reflections": [
                    { "id": "a", "content": "ok", "updated_at": NOW },
                    { "id": "b", "updated_at": "yesterday" },
                    { "id": "a", "content": "again", "updated_at": NOW },
                    "not an object"
                ],
                "settings": { "id": "prefs" }
            }),
            &EngineConfig::default(),
            NOW,
        )
        .unwrap();

        assert_eq!(parsed.format, ImportFormat::DeviceExport);
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.item_counts["reflections"], 4);
        assert_eq!(
            parsed.errors,
            vec![
                "reflections[1]: missing required field `content`".to_string(),
                "reflections[1]: field `updated_at` must be an integer (epoch ms)".to_string(),
                "reflections[2]: duplicate id `a`".to_string(),
                "reflections[3]: item must be an object".to_string(),
                "category `settings` must be an array".to_string(),
            ]
        );
    }

    #[test]
    fn excluded_unknown_and_future_items_only_warn() {
        let parsed = parse_package(
            &json!({
                "format": "reflect-backup",
                "schema_version": 1,
                "exported_at": NOW,
                "recordings": [{}, {}],
                "stickers": [{}],
                "theme_color": "blue",
                "reflections": [
                    { "id": "late", "content": "x", "updated_at": NOW + 86_400_000 }
                ]
            }),
            &EngineConfig::default(),
            NOW,
        )
        .unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.item_counts["recordings"], 2);
        assert_eq!(parsed.warnings.len(), 4);
        assert!(parsed.warnings.iter().any(|w| w.contains("excluded category `recordings`")));
        assert!(parsed.warnings.iter().any(|w| w.contains("in the future")));
    }

    #[test]
    fn unsupported_schema_version_is_an_error_not_a_failure() {
        let parsed = parse_package(
            &json!({ "format": "reflect-backup", "schema_version": 7, "reflections": [] }),
            &EngineConfig::default(),
            NOW,
        )
        .unwrap();
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].contains("schema_version 7"));
    }
}
