//! Structural validation for raw context documents.
//!
//! Runs on the untyped JSON value so that a document missing a required key
//! is reported by name instead of as a generic decode failure.

use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Top-level keys every context document must carry.
pub const REQUIRED_FIELDS: &[&str] = &["context_id", "metadata", "project_state"];
/// Keys required inside `metadata`.
pub const REQUIRED_METADATA_FIELDS: &[&str] = &["created_at", "version", "project_id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValidationError {
    NotAnObject,
    MissingField(&'static str),
    MissingMetadataField(&'static str),
}

impl Display for ContextValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "context document must be a JSON object"),
            Self::MissingField(field) => write!(f, "context document missing {field}"),
            Self::MissingMetadataField(field) => {
                write!(f, "context document missing metadata.{field}")
            }
        }
    }
}

impl Error for ContextValidationError {}

/// Validates the required key set of a context document.
pub fn validate_document(document: &Value) -> Result<(), ContextValidationError> {
    let Some(root) = document.as_object() else {
        return Err(ContextValidationError::NotAnObject);
    };

    for field in REQUIRED_FIELDS {
        if !is_present(root.get(*field)) {
            return Err(ContextValidationError::MissingField(field));
        }
    }

    let metadata = root.get("metadata").and_then(Value::as_object);
    let Some(metadata) = metadata else {
        return Err(ContextValidationError::MissingField("metadata"));
    };
    for field in REQUIRED_METADATA_FIELDS {
        if !is_present(metadata.get(*field)) {
            return Err(ContextValidationError::MissingMetadataField(field));
        }
    }

    Ok(())
}

/// Absent, null, false, zero and empty strings all count as missing.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Number(number)) => number.as_f64().map_or(true, |n| n != 0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_document, ContextValidationError};
    use serde_json::json;

    fn valid() -> serde_json::Value {
        json!({
            "context_id": "wf-p1-20260101",
            "metadata": {"created_at": "2026-01-01T00:00:00.000Z", "version": "1.0.0", "project_id": "p1"},
            "project_state": {}
        })
    }

    #[test]
    fn accepts_minimal_document() {
        assert!(validate_document(&valid()).is_ok());
    }

    #[test]
    fn rejects_non_object() {
        assert_eq!(
            validate_document(&json!([1, 2])),
            Err(ContextValidationError::NotAnObject)
        );
    }

    #[test]
    fn reports_first_missing_top_level_field() {
        let mut doc = valid();
        doc.as_object_mut().unwrap().remove("project_state");
        assert_eq!(
            validate_document(&doc),
            Err(ContextValidationError::MissingField("project_state"))
        );

        doc = valid();
        doc["context_id"] = json!("");
        assert_eq!(
            validate_document(&doc),
            Err(ContextValidationError::MissingField("context_id"))
        );
    }

    #[test]
    fn reports_missing_metadata_field() {
        let mut doc = valid();
        doc["metadata"]["version"] = json!(null);
        assert_eq!(
            validate_document(&doc),
            Err(ContextValidationError::MissingMetadataField("version"))
        );

        doc = valid();
        doc["metadata"] = json!("flat");
        assert_eq!(
            validate_document(&doc),
            Err(ContextValidationError::MissingField("metadata"))
        );
    }
}
