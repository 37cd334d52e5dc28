//! Context repository contracts and file-backed implementation.
//!
//! # Responsibility
//! - Provide load/save/list/archive APIs over active context files.
//! - Persist and enumerate checkpoint snapshots and archived contexts.
//!
//! # Invariants
//! - Write paths validate the document before touching disk.
//! - Read paths reject documents that fail `validate_document` or carry a
//!   newer schema version; every other field decodes leniently.
//! - A missing active file reads as `None`, never as an error.
//! - A checkpoint file is only overwritten by a checkpoint of the same
//!   project and name.

use crate::model::context::ContextDocument;
use crate::model::validate::{validate_document, ContextValidationError};
use crate::store::schema::check_schema_version;
use crate::store::{
    open_store, read_json_value, validate_identifier, write_json_atomic, StoreError, StoreLayout,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for context persistence and enumeration.
#[derive(Debug)]
pub enum RepoError {
    Store(StoreError),
    Validation {
        path: PathBuf,
        source: ContextValidationError,
    },
    InvalidData {
        path: PathBuf,
        message: String,
    },
    /// The checkpoint file name is taken by a checkpoint of another project.
    CheckpointConflict {
        path: PathBuf,
        owner: String,
        checkpoint_name: String,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Validation { path, source } => {
                write!(f, "context validation failed for {}: {source}", path.display())
            }
            Self::InvalidData { path, message } => {
                write!(f, "invalid persisted context data in {}: {message}", path.display())
            }
            Self::CheckpointConflict {
                path,
                owner,
                checkpoint_name,
            } => write!(
                f,
                "checkpoint file {} already holds checkpoint `{checkpoint_name}` of project `{owner}`",
                path.display()
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Validation { source, .. } => Some(source),
            Self::InvalidData { .. } | Self::CheckpointConflict { .. } => None,
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Snapshot file written for one named checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_name: String,
    pub timestamp: String,
    pub project_id: String,
    pub context_snapshot: ContextDocument,
}

/// One enumerated file with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Repository interface for context documents and their snapshots.
pub trait ContextRepository {
    fn layout(&self) -> &StoreLayout;
    fn load(&self, project_id: &str) -> RepoResult<Option<ContextDocument>>;
    fn save(&self, document: &ContextDocument) -> RepoResult<()>;
    fn list_active(&self) -> RepoResult<Vec<String>>;
    fn archive(&self, document: &ContextDocument, month: &str) -> RepoResult<PathBuf>;
    fn write_checkpoint(&self, checkpoint: &CheckpointRecord) -> RepoResult<PathBuf>;
    fn read_checkpoint(
        &self,
        project_id: &str,
        checkpoint_name: &str,
    ) -> RepoResult<Option<CheckpointRecord>>;
    fn list_checkpoints(&self) -> RepoResult<Vec<StoredFile>>;
    fn list_archived(&self) -> RepoResult<Vec<StoredFile>>;
    fn remove_file(&self, file: &StoredFile) -> RepoResult<()>;
}

/// JSON-file-backed context repository.
#[derive(Debug, Clone)]
pub struct FileContextRepository {
    layout: StoreLayout,
}

impl FileContextRepository {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Opens (and creates) the store layout under `root`.
    pub fn open(root: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_store(root)?))
    }
}

impl ContextRepository for FileContextRepository {
    fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn load(&self, project_id: &str) -> RepoResult<Option<ContextDocument>> {
        validate_identifier("project id", project_id)?;
        let path = self.layout.active_file(project_id);
        match read_json_value(&path)? {
            Some(value) => decode_document(&path, value).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, document: &ContextDocument) -> RepoResult<()> {
        validate_identifier("project id", document.project_id())?;
        let path = self.layout.active_file(document.project_id());
        let value = encode_document(&path, document)?;
        write_json_atomic(&path, &value)?;
        Ok(())
    }

    fn list_active(&self) -> RepoResult<Vec<String>> {
        let mut ids: Vec<String> = list_json_files(&self.layout.active_dir())?
            .into_iter()
            .filter_map(|file| file.name.strip_suffix(".json").map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn archive(&self, document: &ContextDocument, month: &str) -> RepoResult<PathBuf> {
        let project_id = document.project_id();
        validate_identifier("project id", project_id)?;

        let archive_dir = self.layout.archive_dir(month);
        fs::create_dir_all(&archive_dir).map_err(|source| StoreError::Io {
            path: archive_dir.clone(),
            source,
        })?;

        let archive_path = self.layout.archive_file(project_id, month);
        let value = encode_document(&archive_path, document)?;
        write_json_atomic(&archive_path, &value)?;

        let active_path = self.layout.active_file(project_id);
        match fs::remove_file(&active_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: active_path,
                    source,
                }
                .into())
            }
        }
        Ok(archive_path)
    }

    fn write_checkpoint(&self, checkpoint: &CheckpointRecord) -> RepoResult<PathBuf> {
        validate_identifier("project id", &checkpoint.project_id)?;
        validate_identifier("checkpoint name", &checkpoint.checkpoint_name)?;
        let path = self
            .layout
            .checkpoint_file(&checkpoint.project_id, &checkpoint.checkpoint_name);

        // `a-b` + `c` and `a` + `b-c` share one file name.
        if let Some(existing) = read_json_value(&path)? {
            let field = |key: &str| {
                existing
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let owner = field("project_id");
            let checkpoint_name = field("checkpoint_name");
            if owner != checkpoint.project_id || checkpoint_name != checkpoint.checkpoint_name {
                return Err(RepoError::CheckpointConflict {
                    path,
                    owner,
                    checkpoint_name,
                });
            }
        }

        write_json_atomic(&path, checkpoint)?;
        Ok(path)
    }

    fn read_checkpoint(
        &self,
        project_id: &str,
        checkpoint_name: &str,
    ) -> RepoResult<Option<CheckpointRecord>> {
        validate_identifier("project id", project_id)?;
        validate_identifier("checkpoint name", checkpoint_name)?;
        let path = self.layout.checkpoint_file(project_id, checkpoint_name);
        let Some(value) = read_json_value(&path)? else {
            return Ok(None);
        };

        if let Some(snapshot) = value.get("context_snapshot") {
            validate_document(snapshot).map_err(|source| RepoError::Validation {
                path: path.clone(),
                source,
            })?;
        }
        let record: CheckpointRecord =
            serde_json::from_value(value).map_err(|err| RepoError::InvalidData {
                path: path.clone(),
                message: err.to_string(),
            })?;
        Ok(Some(record))
    }

    fn list_checkpoints(&self) -> RepoResult<Vec<StoredFile>> {
        list_json_files(&self.layout.checkpoint_dir())
    }

    fn list_archived(&self) -> RepoResult<Vec<StoredFile>> {
        let completed_dir = self.layout.completed_dir();
        let entries = match fs::read_dir(&completed_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: completed_dir,
                    source,
                }
                .into())
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: completed_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                files.extend(list_json_files(&path)?);
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn remove_file(&self, file: &StoredFile) -> RepoResult<()> {
        match fs::remove_file(&file.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: file.path.clone(),
                source,
            }
            .into()),
        }
    }
}

fn decode_document(path: &Path, value: Value) -> RepoResult<ContextDocument> {
    validate_document(&value).map_err(|source| RepoError::Validation {
        path: path.to_path_buf(),
        source,
    })?;

    let document = ContextDocument::from_value(value).map_err(|err| RepoError::InvalidData {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    check_schema_version(Some(&document.metadata.schema_version))?;
    Ok(document)
}

fn encode_document(path: &Path, document: &ContextDocument) -> RepoResult<Value> {
    let value = document.to_value().map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    validate_document(&value).map_err(|source| RepoError::Validation {
        path: path.to_path_buf(),
        source,
    })?;
    check_schema_version(Some(document.metadata.schema_version.as_str()))?;
    Ok(value)
}

/// Lists `*.json` regular files in `dir`, sorted by name.
fn list_json_files(dir: &Path) -> RepoResult<Vec<StoredFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            }
            .into())
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".json") || name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata().map_err(|source| StoreError::Io {
            path: entry.path(),
            source,
        })?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().map_err(|source| StoreError::Io {
            path: entry.path(),
            source,
        })?;
        files.push(StoredFile {
            name,
            path: entry.path(),
            modified,
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
