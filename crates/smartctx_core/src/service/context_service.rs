//! Context use-case service.
//!
//! # Responsibility
//! - Provide the read-modify-write operations callers run against a
//!   project's context: workflow state, task progress, agent memory,
//!   checkpoints, archive, retention cleanup, import/export.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Every read-modify-write cycle runs under the service write lock, so two
//!   callers sharing one service never lose each other's updates.
//! - Every successful mutation stamps `metadata.updated_at`.
//! - A rejected patch leaves the persisted document untouched.

use crate::access::policy::{filter_context, ContextScope, AGENT_ORCHESTRATOR};
use crate::config::StoreConfig;
use crate::model::context::{
    ContextDocument, JsonMap, RecoveryPoint, RestorePoint, TaskDetail, TaskProgress,
    WorkflowRecord, WorkflowState, WorkflowStatus,
};
use crate::model::merge::{ensure_applied, merge_section, merge_shallow};
use crate::model::validate::{validate_document, ContextValidationError};
use crate::repo::context_repo::{
    CheckpointRecord, ContextRepository, FileContextRepository, RepoError, StoredFile,
};
use crate::store::schema::{check_schema_version, SUPPORTED_SCHEMA_VERSION};
use crate::store::{validate_identifier, write_json_atomic, StoreError};
use crate::time::{format_timestamp, month_stamp};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Retention window applied by cleanup when the caller gives none.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors from context service operations.
#[derive(Debug)]
pub enum ServiceError {
    /// Repository-level failure.
    Repo(RepoError),
    /// No active context for the project.
    NotFound(String),
    /// `create_context` called for a project that already has one.
    AlreadyExists(String),
    /// Patch gave a known field a value of the wrong shape.
    InvalidPatch {
        section: &'static str,
        source: serde_json::Error,
    },
    /// Named checkpoint is missing or belongs to another project.
    CheckpointNotFound {
        project_id: String,
        checkpoint_name: String,
    },
    /// Document failed structural validation outside the repository.
    Validation(ContextValidationError),
    /// Import/export file failure.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Import file is not valid JSON or not a decodable document.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::NotFound(project_id) => write!(f, "context not found for project: {project_id}"),
            Self::AlreadyExists(project_id) => {
                write!(f, "context already exists for project: {project_id}")
            }
            Self::InvalidPatch { section, source } => {
                write!(f, "invalid update for {section}: {source}")
            }
            Self::CheckpointNotFound {
                project_id,
                checkpoint_name,
            } => write!(
                f,
                "checkpoint `{checkpoint_name}` not found for project: {project_id}"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Json { path, source } => {
                write!(f, "invalid context file {}: {source}", path.display())
            }
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::InvalidPatch { source, .. } => Some(source),
            Self::Validation(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::CheckpointNotFound { .. } => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Repo(RepoError::Store(value))
    }
}

/// Result of one retention cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_contexts: usize,
    pub deleted_checkpoints: usize,
    pub cleanup_date: String,
}

/// Store-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextStatistics {
    pub active_contexts: usize,
    pub active_projects: Vec<String>,
    pub total_checkpoints: usize,
    pub archived_contexts: usize,
    pub context_directory: String,
    pub checkpoint_directory: String,
    pub schema_version: &'static str,
    pub last_updated: String,
}

/// One-line view of an active context for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSummary {
    pub project_id: String,
    pub workflow: Option<String>,
    pub phase: Option<String>,
    pub completion_percentage: u32,
    pub completed_tasks: u32,
    pub total_tasks: u32,
    pub updated_at: String,
    pub agents: Vec<String>,
}

impl ContextSummary {
    fn from_document(document: &ContextDocument) -> Self {
        Self {
            project_id: document.project_id().to_string(),
            workflow: document.metadata.current_workflow.clone(),
            phase: document.current_workflow_state.current_phase.clone(),
            completion_percentage: document.task_progress.completion_percentage,
            completed_tasks: document.task_progress.completed_tasks,
            total_tasks: document.task_progress.total_tasks,
            updated_at: document.metadata.updated_at.clone(),
            agents: document.agent_memory.keys().cloned().collect(),
        }
    }
}

/// Use-case service over one context repository.
pub struct ContextService<R: ContextRepository> {
    repo: R,
    write_lock: Mutex<()>,
}

impl ContextService<FileContextRepository> {
    /// Opens the file-backed store described by `config`.
    pub fn open(config: &StoreConfig) -> ServiceResult<Self> {
        Ok(Self::new(FileContextRepository::open(&config.root)?))
    }
}

impl<R: ContextRepository> ContextService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Creates and persists the default context for a new project.
    ///
    /// `initial.project_state` is merged over the default project state; every
    /// other top-level key of `initial` replaces the document key wholesale.
    pub fn create_context(
        &self,
        project_id: &str,
        workflow: &str,
        initial: Option<&JsonMap>,
    ) -> ServiceResult<ContextDocument> {
        validate_identifier("project id", project_id)?;

        let _guard = self.lock();
        if self.repo.load(project_id)?.is_some() {
            return Err(ServiceError::AlreadyExists(project_id.to_string()));
        }

        let now = Utc::now();
        let mut document = ContextDocument::new(project_id, workflow, now);
        if let Some(initial) = initial {
            document = apply_initial_data(document, initial)?;
        }
        document.touch(now);
        self.repo.save(&document)?;

        info!(
            "event=context_create module=service status=ok project={} workflow={}",
            project_id, workflow
        );
        Ok(document)
    }

    /// Loads the active context, `None` when the project has none.
    pub fn load_context(&self, project_id: &str) -> ServiceResult<Option<ContextDocument>> {
        Ok(self.repo.load(project_id)?)
    }

    /// Persists a caller-modified document, stamping `updated_at`.
    pub fn save_context(&self, document: &mut ContextDocument) -> ServiceResult<()> {
        let _guard = self.lock();
        document.touch(Utc::now());
        self.repo.save(document)?;
        Ok(())
    }

    /// Merges `patch` into the current workflow state.
    ///
    /// Reaching `completed` moves the state into history and resets the
    /// current state to idle. Returns the resulting current state.
    pub fn update_workflow_state(
        &self,
        project_id: &str,
        workflow: &str,
        patch: &JsonMap,
    ) -> ServiceResult<WorkflowState> {
        let state = self.modify(project_id, |document, now| {
            let mut state = merge_section(&document.current_workflow_state, patch).map_err(
                |source| ServiceError::InvalidPatch {
                    section: "current_workflow_state",
                    source,
                },
            )?;
            state.workflow_name = Some(workflow.to_string());
            document.metadata.current_workflow = Some(workflow.to_string());

            if state.status == WorkflowStatus::Completed {
                document.workflow_history.push(WorkflowRecord {
                    state,
                    completed_at: format_timestamp(now),
                });
                document.current_workflow_state = WorkflowState::default();
            } else {
                document.current_workflow_state = state;
            }
            Ok(document.current_workflow_state.clone())
        })?;

        info!(
            "event=workflow_update module=service status=ok project={} workflow={} state={}",
            project_id,
            workflow,
            state.status.as_str()
        );
        Ok(state)
    }

    /// Merges `patch` into one task detail, creating it when absent.
    pub fn update_task_progress(
        &self,
        project_id: &str,
        task_id: &str,
        patch: &JsonMap,
    ) -> ServiceResult<TaskProgress> {
        self.modify(project_id, |document, now| {
            let mut fields = patch.clone();
            fields.remove("task_id");

            let progress = &mut document.task_progress;
            match progress
                .task_details
                .iter()
                .position(|task| task.task_id == task_id)
            {
                Some(index) => merge_shallow(&mut progress.task_details[index].fields, &fields),
                None => progress.task_details.push(TaskDetail {
                    task_id: task_id.to_string(),
                    fields,
                }),
            }
            progress.recompute(now);
            Ok(progress.clone())
        })
    }

    /// Sets the planned task count and recomputes completion.
    pub fn set_total_tasks(&self, project_id: &str, total_tasks: u32) -> ServiceResult<TaskProgress> {
        self.modify(project_id, |document, now| {
            document.task_progress.total_tasks = total_tasks;
            document.task_progress.recompute(now);
            Ok(document.task_progress.clone())
        })
    }

    /// Shallow-merges `patch` into one agent's memory.
    pub fn update_agent_memory(
        &self,
        project_id: &str,
        agent: &str,
        patch: &JsonMap,
    ) -> ServiceResult<()> {
        self.modify_agent_memory(project_id, agent, |memory| merge_shallow(memory, patch))
    }

    /// Runs `f` against one agent's memory under the write lock.
    ///
    /// Creates the memory entry when absent and stamps `last_updated`.
    pub fn modify_agent_memory<T>(
        &self,
        project_id: &str,
        agent: &str,
        f: impl FnOnce(&mut JsonMap) -> T,
    ) -> ServiceResult<T> {
        validate_identifier("agent name", agent)?;
        self.modify(project_id, |document, now| {
            // A non-object entry is replaced by the agent's first write.
            let mut memory = match document.agent_memory.remove(agent) {
                Some(Value::Object(memory)) => memory,
                _ => JsonMap::new(),
            };
            let output = f(&mut memory);
            memory.insert(
                "last_updated".to_string(),
                Value::String(format_timestamp(now)),
            );
            document
                .agent_memory
                .insert(agent.to_string(), Value::Object(memory));
            Ok(output)
        })
    }

    /// Returns the view of a context that `agent_type` may read.
    pub fn get_relevant_context(
        &self,
        project_id: &str,
        agent_type: &str,
        scope: ContextScope,
    ) -> ServiceResult<Option<Value>> {
        let Some(document) = self.repo.load(project_id)? else {
            return Ok(None);
        };
        let value = encode(&document)?;
        if scope == ContextScope::Full || agent_type == AGENT_ORCHESTRATOR {
            return Ok(Some(value));
        }
        Ok(Some(filter_context(&value, agent_type, scope)))
    }

    /// Snapshots the context into a named checkpoint file.
    ///
    /// The recovery point is recorded on the active document after the
    /// snapshot is written, so the snapshot itself never lists itself.
    pub fn create_checkpoint(
        &self,
        project_id: &str,
        checkpoint_name: &str,
    ) -> ServiceResult<PathBuf> {
        validate_identifier("checkpoint name", checkpoint_name)?;
        let path = self.modify(project_id, |document, now| {
            let timestamp = format_timestamp(now);
            let record = CheckpointRecord {
                checkpoint_name: checkpoint_name.to_string(),
                timestamp: timestamp.clone(),
                project_id: project_id.to_string(),
                context_snapshot: document.clone(),
            };
            let path = self.repo.write_checkpoint(&record)?;

            let file = path.display().to_string();
            let recovery = &mut document.error_recovery;
            recovery.last_checkpoint = Some(timestamp.clone());
            recovery.checkpoint_file = Some(file.clone());
            recovery.recovery_points.push(RecoveryPoint {
                name: checkpoint_name.to_string(),
                timestamp,
                file,
            });
            Ok(path)
        })?;

        info!(
            "event=checkpoint_create module=service status=ok project={} checkpoint={}",
            project_id, checkpoint_name
        );
        Ok(path)
    }

    /// Replaces the active context with a checkpoint snapshot.
    ///
    /// Recovery history of the current document is kept and the restore is
    /// appended to it.
    pub fn restore_checkpoint(
        &self,
        project_id: &str,
        checkpoint_name: &str,
    ) -> ServiceResult<ContextDocument> {
        let _guard = self.lock();
        let not_found = || ServiceError::CheckpointNotFound {
            project_id: project_id.to_string(),
            checkpoint_name: checkpoint_name.to_string(),
        };

        let record = self
            .repo
            .read_checkpoint(project_id, checkpoint_name)?
            .ok_or_else(not_found)?;
        if record.project_id != project_id || record.context_snapshot.project_id() != project_id {
            return Err(not_found());
        }

        let now = Utc::now();
        let mut restored = record.context_snapshot;
        if let Some(current) = self.repo.load(project_id)? {
            restored.error_recovery = current.error_recovery;
        }
        restored.error_recovery.restorations.push(RestorePoint {
            checkpoint_name: record.checkpoint_name,
            checkpoint_timestamp: record.timestamp,
            restored_at: format_timestamp(now),
        });
        restored.touch(now);
        self.repo.save(&restored)?;

        info!(
            "event=checkpoint_restore module=service status=ok project={} checkpoint={}",
            project_id, checkpoint_name
        );
        Ok(restored)
    }

    /// Moves the active context into the current month's archive bucket.
    pub fn archive_context(&self, project_id: &str) -> ServiceResult<PathBuf> {
        let _guard = self.lock();
        let document = self
            .repo
            .load(project_id)?
            .ok_or_else(|| ServiceError::NotFound(project_id.to_string()))?;
        let path = self.repo.archive(&document, &month_stamp(Utc::now()))?;

        info!(
            "event=context_archive module=service status=ok project={}",
            project_id
        );
        Ok(path)
    }

    /// Active project IDs, sorted.
    pub fn list_active_contexts(&self) -> ServiceResult<Vec<String>> {
        Ok(self.repo.list_active()?)
    }

    /// Summaries of every readable active context.
    ///
    /// Contexts that fail to load are logged and skipped.
    pub fn summaries(&self) -> ServiceResult<Vec<ContextSummary>> {
        let mut summaries = Vec::new();
        for project_id in self.repo.list_active()? {
            match self.repo.load(&project_id) {
                Ok(Some(document)) => summaries.push(ContextSummary::from_document(&document)),
                Ok(None) => {}
                Err(err) => warn!(
                    "event=context_summary module=service status=error project={} error={}",
                    project_id, err
                ),
            }
        }
        Ok(summaries)
    }

    /// Deletes checkpoints and archived contexts older than `days`.
    pub fn cleanup_old_contexts(&self, days: u32) -> ServiceResult<CleanupReport> {
        self.cleanup_old_contexts_at(days, Utc::now())
    }

    /// Deletes checkpoints and archived contexts last modified before
    /// `now - days`.
    pub fn cleanup_old_contexts_at(
        &self,
        days: u32,
        now: DateTime<Utc>,
    ) -> ServiceResult<CleanupReport> {
        let _guard = self.lock();
        let cutoff: SystemTime = (now - Duration::days(i64::from(days))).into();

        let deleted_checkpoints = self.remove_older_than(self.repo.list_checkpoints()?, cutoff)?;
        let deleted_contexts = self.remove_older_than(self.repo.list_archived()?, cutoff)?;

        info!(
            "event=cleanup module=service status=ok days={} deleted_contexts={} deleted_checkpoints={}",
            days, deleted_contexts, deleted_checkpoints
        );
        Ok(CleanupReport {
            deleted_contexts,
            deleted_checkpoints,
            cleanup_date: format_timestamp(now),
        })
    }

    /// Store-wide counters.
    pub fn statistics(&self) -> ServiceResult<ContextStatistics> {
        let active_projects = self.repo.list_active()?;
        let layout = self.repo.layout();
        Ok(ContextStatistics {
            active_contexts: active_projects.len(),
            active_projects,
            total_checkpoints: self.repo.list_checkpoints()?.len(),
            archived_contexts: self.repo.list_archived()?.len(),
            context_directory: layout.context_dir().display().to_string(),
            checkpoint_directory: layout.checkpoint_dir().display().to_string(),
            schema_version: SUPPORTED_SCHEMA_VERSION,
            last_updated: format_timestamp(Utc::now()),
        })
    }

    /// Loads and validates the active context.
    pub fn validate_context(&self, project_id: &str) -> ServiceResult<()> {
        self.repo
            .load(project_id)?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(project_id.to_string()))
    }

    /// Writes the active context to `output` as pretty JSON.
    pub fn export_context(&self, project_id: &str, output: &Path) -> ServiceResult<()> {
        let document = self
            .repo
            .load(project_id)?
            .ok_or_else(|| ServiceError::NotFound(project_id.to_string()))?;
        write_json_atomic(output, &document)?;
        Ok(())
    }

    /// Reads a context file and stores it as the active context of its
    /// `metadata.project_id`, replacing any existing one.
    pub fn import_context(&self, input: &Path) -> ServiceResult<ContextDocument> {
        let raw = fs::read_to_string(input).map_err(|source| ServiceError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|source| ServiceError::Json {
            path: input.to_path_buf(),
            source,
        })?;
        validate_document(&value).map_err(ServiceError::Validation)?;
        let mut document =
            ContextDocument::from_value(value).map_err(|source| ServiceError::Json {
                path: input.to_path_buf(),
                source,
            })?;
        check_schema_version(Some(&document.metadata.schema_version))?;
        self.save_context(&mut document)?;

        info!(
            "event=context_import module=service status=ok project={}",
            document.project_id()
        );
        Ok(document)
    }

    fn modify<T>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut ContextDocument, DateTime<Utc>) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let _guard = self.lock();
        let mut document = self
            .repo
            .load(project_id)?
            .ok_or_else(|| ServiceError::NotFound(project_id.to_string()))?;
        let now = Utc::now();
        let output = f(&mut document, now)?;
        document.touch(now);
        self.repo.save(&document)?;
        Ok(output)
    }

    fn remove_older_than(&self, files: Vec<StoredFile>, cutoff: SystemTime) -> ServiceResult<usize> {
        let mut removed = 0;
        for file in files.iter().filter(|file| file.modified < cutoff) {
            self.repo.remove_file(file)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn encode(document: &ContextDocument) -> ServiceResult<Value> {
    document
        .to_value()
        .map_err(|source| ServiceError::InvalidPatch {
            section: "context",
            source,
        })
}

fn apply_initial_data(
    document: ContextDocument,
    initial: &JsonMap,
) -> ServiceResult<ContextDocument> {
    let invalid = |source| ServiceError::InvalidPatch {
        section: "initial_data",
        source,
    };

    let mut value = document.to_value().map_err(invalid)?;
    if let Value::Object(fields) = &mut value {
        for (key, patch) in initial {
            if key == "project_state" {
                if let (Value::Object(patch), Some(Value::Object(state))) =
                    (patch, fields.get_mut(key))
                {
                    merge_shallow(state, patch);
                    continue;
                }
            }
            fields.insert(key.clone(), patch.clone());
        }
    }

    validate_document(&value).map_err(ServiceError::Validation)?;
    let document = ContextDocument::from_value(value.clone()).map_err(invalid)?;
    if let Value::Object(fields) = &value {
        ensure_applied(&document.to_value().map_err(invalid)?, fields).map_err(invalid)?;
    }
    Ok(document)
}
