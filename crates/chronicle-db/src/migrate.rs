//! Schema migration hooks for persisted documents.
//!
//! Every file carries a top-level `schema_version`. Files written before
//! versioning existed have none and are treated as version 0. On load, a
//! document older than [`CURRENT_SCHEMA_VERSION`] is upgraded step by step
//! on its raw JSON form before being deserialized; a document from a newer
//! schema is rejected.
//!
//! # Version history
//!
//! | Version | Change |
//! |---------|--------|
//! | 0 | Unversioned. State under `state`, history under `changes`, lowercase category and region names, no `active` flag. |
//! | 1 | `variables` / `history` keys, UPPERCASE names, explicit `active`, snapshot `metadata` always present. |

use serde_json::{Map, Value};

use chronicle_types::{StateCategory, WorldRegion};

use crate::error::DbError;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// The `schema_version` of a raw document, 0 when absent.
pub fn schema_version(doc: &Value) -> u32 {
    doc.get("schema_version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// Upgrade a raw `current/state.json` document.
///
/// # Errors
///
/// Returns [`DbError::UnsupportedSchema`] for a newer schema, or
/// [`DbError::Corrupt`] if the document is not a JSON object.
pub fn migrate_state(doc: Value) -> Result<Value, DbError> {
    migrate("state", doc, |obj| {
        if let Some(old) = obj.remove("state") {
            obj.entry("variables").or_insert(old);
        }
        if let Some(Value::Object(vars)) = obj.get_mut("variables") {
            for var in vars.values_mut() {
                if let Value::Object(fields) = var {
                    upgrade_names(fields);
                    fields.entry("active").or_insert(Value::Bool(true));
                    fields.entry("tags").or_insert_with(|| Value::Array(Vec::new()));
                }
            }
        }
    })
}

/// Upgrade a raw `history/state_history.json` document.
///
/// # Errors
///
/// Returns [`DbError::UnsupportedSchema`] for a newer schema, or
/// [`DbError::Corrupt`] if the document is not a JSON object.
pub fn migrate_history(doc: Value) -> Result<Value, DbError> {
    migrate("history", doc, |obj| {
        if let Some(old) = obj.remove("changes") {
            obj.entry("history").or_insert(old);
        }
        if let Some(Value::Array(records)) = obj.get_mut("history") {
            for record in records {
                if let Value::Object(fields) = record {
                    upgrade_names(fields);
                }
            }
        }
    })
}

/// Upgrade a raw snapshot document.
///
/// # Errors
///
/// Returns [`DbError::UnsupportedSchema`] for a newer schema, or
/// [`DbError::Corrupt`] if the document is not a JSON object.
pub fn migrate_snapshot(doc: Value) -> Result<Value, DbError> {
    migrate("snapshot", doc, |obj| {
        if let Some(Value::Object(snapshot)) = obj.get_mut("snapshot") {
            snapshot
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
        }
    })
}

/// Shared driver: version check, then the 0 -> 1 step.
fn migrate(
    file: &str,
    doc: Value,
    v0_to_v1: impl FnOnce(&mut Map<String, Value>),
) -> Result<Value, DbError> {
    let found = schema_version(&doc);
    if found > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchema {
            file: file.to_owned(),
            found,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if found == CURRENT_SCHEMA_VERSION {
        return Ok(doc);
    }

    let Value::Object(mut obj) = doc else {
        return Err(DbError::Corrupt(format!("{file} document is not an object")));
    };
    v0_to_v1(&mut obj);
    obj.insert(
        "schema_version".to_owned(),
        Value::from(CURRENT_SCHEMA_VERSION),
    );
    tracing::info!(file, from = found, to = CURRENT_SCHEMA_VERSION, "Migrated document");
    Ok(Value::Object(obj))
}

/// Rewrite `category` and `region` fields to their canonical names.
fn upgrade_names(fields: &mut Map<String, Value>) {
    if let Some(Value::String(name)) = fields.get_mut("category") {
        *name = StateCategory::from_str_lossy(name).as_str().to_owned();
    }
    if let Some(Value::String(name)) = fields.get_mut("region") {
        *name = WorldRegion::from_str_lossy(name).as_str().to_owned();
    }
}
