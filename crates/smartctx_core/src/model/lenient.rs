//! Tolerant field decoders for persisted context documents.
//!
//! # Invariants
//! - Only `validate_document` rejects a stored document. A field holding a
//!   value of another shape decodes to the closest typed value or to its
//!   default, never to an error.
//! - Scalars are converted when the intent is unambiguous (`12` reads as the
//!   text `"12"`, `"3"` reads as the count `3`).

use log::debug;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Decodes `T`, or `T::default()` when the stored value has another shape.
pub(crate) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value).unwrap_or_else(|err| {
        debug!("event=context_decode module=model status=fallback error={err}");
        T::default()
    }))
}

/// Decodes a text field; other scalars are rendered as text.
pub(crate) fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Like [`text`], with `null` and non-scalars reading as `None`.
pub(crate) fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

/// Decodes a non-negative counter. Fractions round, numeric text parses.
pub(crate) fn count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(number) => number
            .as_u64()
            .and_then(|whole| u32::try_from(whole).ok())
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|raw| raw.is_finite() && *raw >= 0.0 && *raw <= f64::from(u32::MAX))
                    .map(|raw| raw.round() as u32)
            }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    if parsed.is_none() && !value.is_null() {
        debug!("event=context_decode module=model status=fallback expected=count");
    }
    Ok(parsed.unwrap_or_default())
}

/// Decodes a measurement; numeric text parses, anything else reads as `0.0`.
pub(crate) fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|raw| raw.is_finite()),
        _ => None,
    };
    Ok(parsed.unwrap_or_default())
}

/// Decodes a flag; only a JSON boolean counts.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

/// Decodes a list, dropping entries of another shape.
pub(crate) fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    let total = items.len();
    let kept: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if kept.len() < total {
        debug!(
            "event=context_decode module=model status=fallback dropped_entries={}",
            total - kept.len()
        );
    }
    Ok(kept)
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Sample {
        #[serde(deserialize_with = "super::text")]
        name: String,
        #[serde(deserialize_with = "super::optional_text")]
        current: Option<String>,
        #[serde(deserialize_with = "super::count")]
        total: u32,
        #[serde(deserialize_with = "super::number")]
        debt: f64,
        #[serde(deserialize_with = "super::flag")]
        critical: bool,
        #[serde(deserialize_with = "super::list")]
        phases: Vec<String>,
        #[serde(deserialize_with = "super::or_default")]
        stack: serde_json::Map<String, serde_json::Value>,
    }

    #[test]
    fn mismatched_shapes_decode_to_closest_value() {
        let sample: Sample = serde_json::from_value(json!({
            "name": 42,
            "current": 7,
            "total": "3",
            "debt": 12.5,
            "critical": "yes",
            "phases": ["design", 3, "build"],
            "stack": ["rust"]
        }))
        .unwrap();

        assert_eq!(sample.name, "42");
        assert_eq!(sample.current.as_deref(), Some("7"));
        assert_eq!(sample.total, 3);
        assert_eq!(sample.debt, 12.5);
        assert!(!sample.critical);
        assert_eq!(sample.phases, vec!["design", "build"]);
        assert!(sample.stack.is_empty());
    }

    #[test]
    fn nulls_and_fractions_fall_back_sensibly() {
        let sample: Sample = serde_json::from_value(json!({
            "name": null,
            "current": {"id": "1.1"},
            "total": 2.6,
            "debt": "n/a",
            "phases": "design"
        }))
        .unwrap();

        assert_eq!(sample.name, "");
        assert!(sample.current.is_none());
        assert_eq!(sample.total, 3);
        assert_eq!(sample.debt, 0.0);
        assert!(sample.phases.is_empty());
    }
}
