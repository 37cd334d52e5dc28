//! Directory layout bootstrap and file primitives.
//!
//! # Responsibility
//! - Resolve every store path from a single root.
//! - Create required directories before the store is handed out.
//! - Provide atomic JSON writes and tolerant JSON reads.
//!
//! # Invariants
//! - Temp files are siblings of their target and never end in `.json`.
//! - Returned layouts have all required directories created.

use super::{StoreError, StoreResult};
use log::{error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

/// Default store root, relative to the working directory.
pub const DEFAULT_STORE_ROOT: &str = ".cc-deck/runtime/global";

const CONTEXT_DIR: &str = "context";
const ACTIVE_DIR: &str = "active";
const COMPLETED_DIR: &str = "completed";
const CONTEXT_CHECKPOINTS_DIR: &str = "checkpoints";
const TEMPLATES_DIR: &str = "templates";
const CHECKPOINT_DIR: &str = "checkpoints";
const JSON_EXTENSION: &str = "json";

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("valid identifier regex")
});

/// Resolved store paths under one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Builds a layout without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context_dir(&self) -> PathBuf {
        self.root.join(CONTEXT_DIR)
    }

    pub fn active_dir(&self) -> PathBuf {
        self.context_dir().join(ACTIVE_DIR)
    }

    pub fn completed_dir(&self) -> PathBuf {
        self.context_dir().join(COMPLETED_DIR)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINT_DIR)
    }

    /// Active document path for one project.
    pub fn active_file(&self, project_id: &str) -> PathBuf {
        self.active_dir().join(json_file_name(project_id))
    }

    /// Archive bucket for one `YYYY-MM` month.
    pub fn archive_dir(&self, month: &str) -> PathBuf {
        self.completed_dir().join(month)
    }

    pub fn archive_file(&self, project_id: &str, month: &str) -> PathBuf {
        self.archive_dir(month).join(json_file_name(project_id))
    }

    /// Snapshot path for one named checkpoint.
    pub fn checkpoint_file(&self, project_id: &str, checkpoint_name: &str) -> PathBuf {
        self.checkpoint_dir()
            .join(json_file_name(&format!("{project_id}-{checkpoint_name}")))
    }

    fn required_dirs(&self) -> [PathBuf; 5] {
        [
            self.active_dir(),
            self.completed_dir(),
            self.context_dir().join(CONTEXT_CHECKPOINTS_DIR),
            self.context_dir().join(TEMPLATES_DIR),
            self.checkpoint_dir(),
        ]
    }
}

/// Opens a store rooted at `root`, creating the directory layout.
///
/// # Side effects
/// - Creates missing directories (idempotent).
/// - Emits `store_open` logging events with duration and status.
pub fn open_store(root: impl AsRef<Path>) -> StoreResult<StoreLayout> {
    let started_at = Instant::now();
    info!("event=store_open module=store status=start");

    let layout = StoreLayout::new(root.as_ref());
    for dir in layout.required_dirs() {
        if let Err(source) = fs::create_dir_all(&dir) {
            error!(
                "event=store_open module=store status=error duration_ms={} error_code=mkdir_failed error={}",
                started_at.elapsed().as_millis(),
                source
            );
            return Err(StoreError::Io { path: dir, source });
        }
    }

    info!(
        "event=store_open module=store status=ok duration_ms={} root={}",
        started_at.elapsed().as_millis(),
        layout.root().display()
    );
    Ok(layout)
}

/// Rejects identifiers that cannot safely become a file name component.
pub fn validate_identifier(kind: &'static str, value: &str) -> StoreResult<()> {
    if IDENTIFIER_RE.is_match(value) {
        return Ok(());
    }
    Err(StoreError::InvalidIdentifier {
        kind,
        value: value.to_string(),
    })
}

/// Writes `value` as pretty JSON via a sibling temp file and rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let mut payload = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    payload.push(b'\n');

    let temp_path = temp_sibling(path);
    fs::write(&temp_path, &payload).map_err(|source| StoreError::Io {
        path: temp_path.clone(),
        source,
    })?;

    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Reads a JSON file, returning `None` when it does not exist.
pub fn read_json_value(path: &Path) -> StoreResult<Option<Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn json_file_name(stem: &str) -> String {
    format!("{stem}.{JSON_EXTENSION}")
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()))
}
