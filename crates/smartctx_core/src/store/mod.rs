//! On-disk store layout, bootstrap, and schema version guard.
//!
//! # Responsibility
//! - Own the directory layout that context and checkpoint files live in.
//! - Create the layout on open and write JSON files atomically.
//! - Reject documents written by a newer schema than this binary supports.
//!
//! # Invariants
//! - Identifiers that become file names are validated before any path is built.
//! - A reader never observes a partially written file.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod layout;
pub mod schema;

pub use layout::{
    open_store, read_json_value, validate_identifier, write_json_atomic, StoreLayout,
    DEFAULT_STORE_ROOT,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidIdentifier {
        kind: &'static str,
        value: String,
    },
    UnsupportedSchemaVersion {
        document_version: String,
        latest_supported: &'static str,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Json { path, source } => {
                write!(f, "invalid JSON in {}: {source}", path.display())
            }
            Self::InvalidIdentifier { kind, value } => write!(
                f,
                "invalid {kind} `{value}`; expected letters, digits, `.`, `_` or `-`"
            ),
            Self::UnsupportedSchemaVersion {
                document_version,
                latest_supported,
            } => write!(
                f,
                "context schema version {document_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::InvalidIdentifier { .. } | Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}
