//! Context document schema version guard.
//!
//! # Invariants
//! - Documents without a schema version are read as the baseline version.
//! - A document newer than `SUPPORTED_SCHEMA_VERSION` is never rewritten by
//!   this binary, since that would drop fields it does not understand.

use super::{StoreError, StoreResult};

/// Latest context schema version this binary reads and writes.
pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Checks that a document schema version is readable.
pub fn check_schema_version(document_version: Option<&str>) -> StoreResult<()> {
    let Some(raw) = document_version else {
        return Ok(());
    };

    let supported = parse_version(SUPPORTED_SCHEMA_VERSION);
    match (parse_version(raw), supported) {
        (Some(found), Some(latest)) if found <= latest => Ok(()),
        _ => Err(StoreError::UnsupportedSchemaVersion {
            document_version: raw.to_string(),
            latest_supported: SUPPORTED_SCHEMA_VERSION,
        }),
    }
}

fn parse_version(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(part) => part.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor))
}
