//! Shallow patch merging for typed document sections.

use super::context::JsonMap;
use serde::de::{DeserializeOwned, Error as _};
use serde::Serialize;
use serde_json::Value;

/// Copies every patch key over `target`, replacing existing values.
pub fn merge_shallow(target: &mut JsonMap, patch: &JsonMap) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Applies a shallow patch to a typed section and decodes the result.
///
/// Fails when the patch gives a known field a value the section cannot hold;
/// the original section is left untouched in that case.
pub fn merge_section<T>(section: &T, patch: &JsonMap) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(section)?;
    if let Value::Object(fields) = &mut value {
        merge_shallow(fields, patch);
    } else {
        value = Value::Object(patch.clone());
    }
    let merged: T = serde_json::from_value(value)?;
    ensure_applied(&serde_json::to_value(&merged)?, patch)?;
    Ok(merged)
}

/// Checks that every key of `patch` reads back unchanged from `decoded`.
///
/// Decoding is lenient, so a value of the wrong shape shows up here as a
/// coerced or dropped field rather than as a decode error.
pub fn ensure_applied(decoded: &Value, patch: &JsonMap) -> Result<(), serde_json::Error> {
    for (key, expected) in patch {
        let found = decoded.get(key).unwrap_or(&Value::Null);
        if !holds(found, expected) {
            return Err(serde_json::Error::custom(format!(
                "field `{key}` cannot hold {expected}"
            )));
        }
    }
    Ok(())
}

/// `found` carries `expected`; objects may carry extra keys.
fn holds(found: &Value, expected: &Value) -> bool {
    match (found, expected) {
        (Value::Number(found), Value::Number(expected)) => found.as_f64() == expected.as_f64(),
        (Value::Array(found), Value::Array(expected)) => {
            found.len() == expected.len()
                && found.iter().zip(expected).all(|(found, expected)| holds(found, expected))
        }
        (Value::Object(found), Value::Object(expected)) => expected.iter().all(|(key, expected)| {
            holds(found.get(key).unwrap_or(&Value::Null), expected)
        }),
        _ => found == expected,
    }
}

/// Inserts `value` under `outer.key`, creating or repairing the nested object.
pub fn insert_nested(target: &mut JsonMap, outer: &str, key: String, value: Value) {
    let slot = target
        .entry(outer.to_string())
        .or_insert_with(|| Value::Object(JsonMap::new()));
    if !slot.is_object() {
        *slot = Value::Object(JsonMap::new());
    }
    if let Value::Object(nested) = slot {
        nested.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::{ensure_applied, insert_nested, merge_section, merge_shallow};
    use crate::model::context::{JsonMap, WorkflowState, WorkflowStatus};
    use serde_json::json;

    fn map(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_shallow_replaces_nested_objects_whole() {
        let mut target = map(json!({"a": {"x": 1}, "b": 2}));
        merge_shallow(&mut target, &map(json!({"a": {"y": 2}})));
        assert_eq!(target.get("a"), Some(&json!({"y": 2})));
        assert_eq!(target.get("b"), Some(&json!(2)));
    }

    #[test]
    fn merge_section_updates_known_and_keeps_unknown_fields() {
        let state = WorkflowState::default();
        let merged = merge_section(
            &state,
            &map(json!({"status": "in_progress", "current_phase": "design", "owner": "ci"})),
        )
        .unwrap();
        assert_eq!(merged.status, WorkflowStatus::InProgress);
        assert_eq!(merged.current_phase.as_deref(), Some("design"));
        assert_eq!(merged.extra.get("owner"), Some(&json!("ci")));
    }

    #[test]
    fn merge_section_rejects_wrong_shapes() {
        let state = WorkflowState::default();
        assert!(merge_section(&state, &map(json!({"status": "sleeping"}))).is_err());
        assert!(merge_section(&state, &map(json!({"completed_phases": 3}))).is_err());
        assert!(merge_section(&state, &map(json!({"current_phase": 7}))).is_err());
    }

    #[test]
    fn ensure_applied_compares_numbers_by_value() {
        let decoded = json!({"coverage": 80.0, "nested": {"a": [1, 2], "b": true}});
        assert!(ensure_applied(&decoded, &map(json!({"coverage": 80}))).is_ok());
        assert!(ensure_applied(&decoded, &map(json!({"nested": {"a": [1, 2]}}))).is_ok());
        assert!(ensure_applied(&decoded, &map(json!({"nested": {"a": [1]}}))).is_err());
        assert!(ensure_applied(&decoded, &map(json!({"missing": 1}))).is_err());
        assert!(ensure_applied(&decoded, &map(json!({"missing": null}))).is_ok());
    }

    #[test]
    fn insert_nested_accumulates_and_repairs() {
        let mut memory = map(json!({"shared": "oops"}));
        insert_nested(&mut memory, "shared", "a".to_string(), json!(1));
        insert_nested(&mut memory, "shared", "b".to_string(), json!(2));
        assert_eq!(memory.get("shared"), Some(&json!({"a": 1, "b": 2})));
    }
}
