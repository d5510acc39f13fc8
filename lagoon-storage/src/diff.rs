//! Minimal changed-fields computation for update mutations.
//!
//! Locally-originated updates are reduced to the fields whose values
//! actually changed, plus the identifier and server-managed metadata, before
//! being published. An update that changes nothing produces no input at all,
//! which suppresses the change event entirely.

use lagoon_types::{
    JsonObject, ModelDefinition, DELETED_FIELD, LAST_CHANGED_AT_FIELD, VERSION_FIELD,
};
use serde_json::Value;

const METADATA_FIELDS: [&str; 3] = [VERSION_FIELD, LAST_CHANGED_AT_FIELD, DELETED_FIELD];

/// Builds the minimal update input from the newly saved record and the
/// previously stored one. Returns `None` when no user-visible field changed.
pub fn changed_fields_input(
    model: &ModelDefinition,
    saved: &JsonObject,
    prior: &JsonObject,
) -> Option<JsonObject> {
    let mut input = JsonObject::new();

    for field in model.fields.values() {
        // A relationship field stores its key in the association's target
        // columns; compare those instead of the virtual field itself.
        match field.association.as_ref() {
            Some(association) => {
                for target in &association.target_names {
                    collect_if_changed(model, saved, prior, target, &mut input);
                }
            }
            None => {
                collect_if_changed(model, saved, prior, &field.name, &mut input);
            }
        }
    }

    if input.is_empty() {
        return None;
    }

    for key_field in model.primary_key.fields() {
        if let Some(value) = saved.get(key_field) {
            input.insert(key_field.clone(), value.clone());
        }
    }
    for meta in METADATA_FIELDS {
        if let Some(value) = saved.get(meta) {
            input.insert(meta.to_string(), value.clone());
        }
    }

    Some(input)
}

fn collect_if_changed(
    model: &ModelDefinition,
    saved: &JsonObject,
    prior: &JsonObject,
    field: &str,
    input: &mut JsonObject,
) {
    let new_value = saved.get(field).unwrap_or(&Value::Null);
    let old_value = prior.get(field).unwrap_or(&Value::Null);
    if new_value == old_value {
        return;
    }
    input.insert(field.to_string(), new_value.clone());

    // A change to one member of a composite key carries the whole key.
    if model.primary_key.fields().len() > 1 && model.primary_key.contains(field) {
        for member in model.primary_key.fields() {
            let value = saved.get(member).cloned().unwrap_or(Value::Null);
            input.insert(member.clone(), value);
        }
    }
}
