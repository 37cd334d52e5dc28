//! Agent-side view of a project's context.
//!
//! # Responsibility
//! - Bind one agent type to a project and a `ContextService`.
//! - Cache policy-filtered reads for a short TTL.
//! - Record execution lifecycle, shared data and activity logs in the
//!   agent's own memory.
//!
//! # Invariants
//! - Every write through the session clears the read cache.
//! - Shared-data and log entries accumulate; a new entry never replaces the
//!   collection it lands in.
//! - Operations that need a project fail with `NoProject` when none is set.

use crate::access::policy::ContextScope;
use crate::config::DEFAULT_CACHE_TTL;
use crate::model::context::{JsonMap, TaskProgress, WorkflowState};
use crate::model::merge::insert_nested;
use crate::repo::context_repo::ContextRepository;
use crate::service::context_service::{ContextService, ServiceError};
use crate::time::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use log::{log, Level};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

const MAX_EXECUTION_HISTORY: usize = 50;
const MAX_ACTIVITY_LOGS: usize = 100;

const CURRENT_TASK: &str = "current_task";
const EXECUTION_HISTORY: &str = "execution_history";
const SHARED_DATA_RECEIVED: &str = "shared_data_received";
const SHARED_DATA_SENT: &str = "shared_data_sent";
const TASK_CONTRIBUTIONS: &str = "task_contributions";
const ACTIVITY_LOGS: &str = "logs";

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug)]
pub enum AgentError {
    /// Session has no project bound.
    NoProject(String),
    Service(ServiceError),
    Encode(serde_json::Error),
}

impl Display for AgentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoProject(agent) => write!(f, "agent {agent}: no project id set"),
            Self::Service(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode agent record: {err}"),
        }
    }
}

impl Error for AgentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoProject(_) => None,
            Self::Service(err) => Some(err),
            Self::Encode(err) => Some(err),
        }
    }
}

impl From<ServiceError> for AgentError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

/// Outcome of one agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Partial,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

/// Data one agent handed to others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub share_id: Uuid,
    pub shared_by: String,
    pub shared_at: String,
    pub data_type: String,
    pub data: Value,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub agent_type: String,
    pub project_id: Option<String>,
    pub total_executions: u64,
    pub success_rate: u64,
    pub average_duration_ms: f64,
    pub last_execution: Option<String>,
    pub current_task: Option<String>,
    pub cached_contexts: usize,
    pub memory_bytes: usize,
}

struct CachedContext {
    data: Value,
    fetched_at: Instant,
}

/// One agent's handle on a project's context.
pub struct AgentSession<'svc, R: ContextRepository> {
    agent_type: String,
    project_id: Option<String>,
    service: &'svc ContextService<R>,
    cache: HashMap<(String, ContextScope), CachedContext>,
    cache_ttl: Duration,
}

impl<'svc, R: ContextRepository> AgentSession<'svc, R> {
    pub fn new(agent_type: impl Into<String>, service: &'svc ContextService<R>) -> Self {
        Self {
            agent_type: agent_type.into(),
            project_id: None,
            service,
            cache: HashMap::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.set_project(project_id);
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Rebinds the session to another project and drops cached reads.
    pub fn set_project(&mut self, project_id: impl Into<String>) {
        self.project_id = Some(project_id.into());
        self.cache.clear();
    }

    /// Policy-filtered context, served from cache while fresh.
    pub fn my_context(&mut self, scope: ContextScope) -> AgentResult<Option<Value>> {
        let project_id = self.require_project()?;
        let key = (project_id, scope);
        if let Some(cached) = self.cache.get(&key) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(Some(cached.data.clone()));
            }
        }

        let context = self
            .service
            .get_relevant_context(&key.0, &self.agent_type, scope)?;
        if let Some(data) = &context {
            self.cache.insert(
                key,
                CachedContext {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(context)
    }

    /// Shallow-merges `patch` into this agent's memory.
    pub fn update_my_memory(&mut self, patch: &JsonMap) -> AgentResult<()> {
        let project_id = self.require_project()?;
        self.service
            .update_agent_memory(&project_id, &self.agent_type, patch)?;
        self.cache.clear();
        Ok(())
    }

    pub fn record_execution_start(
        &mut self,
        description: &str,
        parameters: Value,
    ) -> AgentResult<()> {
        let mut patch = JsonMap::new();
        patch.insert(
            CURRENT_TASK.to_string(),
            json!({
                "description": description,
                "parameters": parameters,
                "started_at": format_timestamp(Utc::now()),
                "status": "in_progress",
            }),
        );
        self.update_my_memory(&patch)
    }

    /// Closes the current task and updates execution counters.
    pub fn record_execution_complete(
        &mut self,
        results: Value,
        status: ExecutionStatus,
    ) -> AgentResult<()> {
        self.modify_my_memory(|memory| complete_execution(memory, results, status, Utc::now()))
    }

    pub fn execution_history(&mut self) -> AgentResult<Vec<Value>> {
        let memory = self.own_memory()?;
        Ok(memory
            .get(EXECUTION_HISTORY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Mean `duration_ms` over recorded executions, 0 when none have one.
    pub fn average_duration_ms(&mut self) -> AgentResult<f64> {
        Ok(average_duration(&self.execution_history()?))
    }

    /// Stores `data` in every target's received shares and in own sent shares.
    pub fn share_with_agents(
        &mut self,
        targets: &[&str],
        data: Value,
        data_type: &str,
    ) -> AgentResult<ShareRecord> {
        let project_id = self.require_project()?;
        let record = ShareRecord {
            share_id: Uuid::new_v4(),
            shared_by: self.agent_type.clone(),
            shared_at: format_timestamp(Utc::now()),
            data_type: data_type.to_string(),
            data,
            recipients: targets.iter().map(|target| (*target).to_string()).collect(),
        };
        let value = serde_json::to_value(&record).map_err(AgentError::Encode)?;
        let share_key = record.share_id.simple().to_string();

        for target in targets {
            let key = format!("from_{}_{share_key}", self.agent_type);
            self.service.modify_agent_memory(&project_id, target, |memory| {
                insert_nested(memory, SHARED_DATA_RECEIVED, key, value.clone())
            })?;
        }

        let key = format!("to_{}_{share_key}", targets.join("_"));
        self.modify_my_memory(|memory| insert_nested(memory, SHARED_DATA_SENT, key, value))?;
        Ok(record)
    }

    /// Received shares, newest first, optionally limited to one sender.
    pub fn shared_data(&mut self, from_agent: Option<&str>) -> AgentResult<Vec<ShareRecord>> {
        let memory = self.own_memory()?;
        let mut records: Vec<ShareRecord> = memory
            .get(SHARED_DATA_RECEIVED)
            .and_then(Value::as_object)
            .map(|received| {
                received
                    .values()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(sender) = from_agent {
            records.retain(|record: &ShareRecord| record.shared_by == sender);
        }
        records.sort_by(|a, b| {
            let a_at = parse_timestamp(&a.shared_at);
            let b_at = parse_timestamp(&b.shared_at);
            b_at.cmp(&a_at)
        });
        Ok(records)
    }

    pub fn update_workflow_state(
        &mut self,
        workflow: &str,
        patch: &JsonMap,
    ) -> AgentResult<WorkflowState> {
        let project_id = self.require_project()?;
        let state = self
            .service
            .update_workflow_state(&project_id, workflow, patch)?;
        self.cache.clear();
        Ok(state)
    }

    /// Updates task progress and records the contribution in own memory.
    pub fn update_task_progress(
        &mut self,
        task_id: &str,
        patch: &JsonMap,
    ) -> AgentResult<TaskProgress> {
        let project_id = self.require_project()?;
        let progress = self
            .service
            .update_task_progress(&project_id, task_id, patch)?;

        let mut contribution = patch.clone();
        contribution.insert(
            "contributed_at".to_string(),
            Value::String(format_timestamp(Utc::now())),
        );
        self.modify_my_memory(|memory| {
            insert_nested(
                memory,
                TASK_CONTRIBUTIONS,
                task_id.to_string(),
                Value::Object(contribution),
            )
        })?;
        Ok(progress)
    }

    /// Checkpoints the project under `<agent_type>-<name>`.
    pub fn create_checkpoint(&mut self, name: &str) -> AgentResult<PathBuf> {
        let project_id = self.require_project()?;
        let checkpoint_name = format!("{}-{name}", self.agent_type);
        let path = self
            .service
            .create_checkpoint(&project_id, &checkpoint_name)?;
        self.cache.clear();
        Ok(path)
    }

    pub fn project_state(&mut self) -> AgentResult<Option<Value>> {
        self.minimal_section("project_state")
    }

    pub fn current_workflow(&mut self) -> AgentResult<Option<Value>> {
        self.minimal_section("current_workflow_state")
    }

    pub fn task_progress(&mut self) -> AgentResult<Option<Value>> {
        self.minimal_section("task_progress")
    }

    /// Emits a log record and keeps it in own memory as an audit trail.
    pub fn log_activity(&mut self, level: Level, message: &str, data: Value) -> AgentResult<()> {
        log!(
            level,
            "event=agent_activity module=agent agent={} project={} message={}",
            self.agent_type,
            self.project_id.as_deref().unwrap_or("-"),
            message
        );

        let project_id = self.require_project()?;
        let timestamp = format_timestamp(Utc::now());
        let level_name = level.as_str().to_ascii_lowercase();
        let entry = json!({
            "timestamp": timestamp,
            "agent": self.agent_type,
            "project": project_id,
            "level": level_name,
            "message": message,
            "data": data,
        });
        let key = format!("{timestamp}_{level_name}_{}", Uuid::new_v4().simple());

        self.modify_my_memory(|memory| {
            insert_nested(memory, ACTIVITY_LOGS, key, entry);
            if let Some(Value::Object(logs)) = memory.get_mut(ACTIVITY_LOGS) {
                while logs.len() > MAX_ACTIVITY_LOGS {
                    let Some(oldest) = logs.keys().next().cloned() else {
                        break;
                    };
                    logs.remove(&oldest);
                }
            }
        })
    }

    pub fn performance_metrics(&mut self) -> AgentResult<PerformanceMetrics> {
        let memory = self.own_memory()?;
        let history = memory
            .get(EXECUTION_HISTORY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let memory_bytes = serde_json::to_vec(&memory)
            .map_err(AgentError::Encode)?
            .len();

        Ok(PerformanceMetrics {
            agent_type: self.agent_type.clone(),
            project_id: self.project_id.clone(),
            total_executions: counter(&memory, "total_executions"),
            success_rate: counter(&memory, "success_rate"),
            average_duration_ms: average_duration(&history),
            last_execution: memory
                .get("last_execution")
                .and_then(|last| last.get("completed_at"))
                .and_then(Value::as_str)
                .map(str::to_string),
            current_task: memory
                .get(CURRENT_TASK)
                .and_then(|task| task.get("description"))
                .and_then(Value::as_str)
                .map(str::to_string),
            cached_contexts: self.cache.len(),
            memory_bytes,
        })
    }

    /// Drops cached reads and unbinds the project.
    pub fn cleanup(&mut self) {
        self.cache.clear();
        self.project_id = None;
    }

    fn require_project(&self) -> AgentResult<String> {
        self.project_id
            .clone()
            .ok_or_else(|| AgentError::NoProject(self.agent_type.clone()))
    }

    fn own_memory(&mut self) -> AgentResult<JsonMap> {
        let context = self.my_context(ContextScope::AgentSpecific)?;
        Ok(context
            .as_ref()
            .and_then(|value| value.get("agent_memory"))
            .and_then(|memory| memory.get(&self.agent_type))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    fn minimal_section(&mut self, section: &str) -> AgentResult<Option<Value>> {
        let context = self.my_context(ContextScope::Minimal)?;
        Ok(context.and_then(|value| value.get(section).cloned()))
    }

    fn modify_my_memory<T>(&mut self, f: impl FnOnce(&mut JsonMap) -> T) -> AgentResult<T> {
        let project_id = self.require_project()?;
        let output = self
            .service
            .modify_agent_memory(&project_id, &self.agent_type, f)?;
        self.cache.clear();
        Ok(output)
    }
}

fn counter(memory: &JsonMap, key: &str) -> u64 {
    memory.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn average_duration(history: &[Value]) -> f64 {
    let durations: Vec<f64> = history
        .iter()
        .filter_map(|entry| entry.get("duration_ms").and_then(Value::as_f64))
        .collect();
    if durations.is_empty() {
        return 0.0;
    }
    durations.iter().sum::<f64>() / durations.len() as f64
}

fn complete_execution(
    memory: &mut JsonMap,
    results: Value,
    status: ExecutionStatus,
    now: DateTime<Utc>,
) {
    let mut completed = match memory.remove(CURRENT_TASK) {
        Some(Value::Object(task)) => task,
        _ => JsonMap::new(),
    };
    let duration_ms = completed
        .get("started_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|started_at| (now - started_at).num_milliseconds());
    completed.insert("results".to_string(), results);
    completed.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    completed.insert(
        "completed_at".to_string(),
        Value::String(format_timestamp(now)),
    );
    completed.insert("duration_ms".to_string(), Value::from(duration_ms));

    let total = counter(memory, "total_executions") + 1;
    let successes =
        counter(memory, "success_count") + u64::from(status == ExecutionStatus::Success);
    let success_rate = (successes * 200 + total) / (total * 2);

    memory.insert(CURRENT_TASK.to_string(), Value::Null);
    memory.insert(
        "last_execution".to_string(),
        Value::Object(completed.clone()),
    );
    memory.insert("total_executions".to_string(), Value::from(total));
    memory.insert("success_count".to_string(), Value::from(successes));
    memory.insert("success_rate".to_string(), Value::from(success_rate));

    let history = memory
        .entry(EXECUTION_HISTORY.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !history.is_array() {
        *history = Value::Array(Vec::new());
    }
    if let Value::Array(entries) = history {
        entries.push(Value::Object(completed));
        if entries.len() > MAX_EXECUTION_HISTORY {
            let overflow = entries.len() - MAX_EXECUTION_HISTORY;
            entries.drain(..overflow);
        }
    }
}
