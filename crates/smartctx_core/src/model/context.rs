//! Context document model.
//!
//! # Responsibility
//! - Define the persisted shape of a project's workflow context.
//! - Build the default document for a newly tracked project.
//!
//! # Invariants
//! - `context_id`, `metadata.created_at`, `metadata.version` and
//!   `metadata.project_id` are set at construction and never blanked.
//! - Unknown keys of every object section survive a load/save cycle through
//!   the `extra` maps.
//! - Decoding never fails on a field of another shape; see `lenient`.
//! - `task_progress.completed_tasks` counts details with `completed == true`.

use super::lenient;
use crate::store::schema::SUPPORTED_SCHEMA_VERSION;
use crate::time::{date_stamp, format_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object used for schema-less sections.
pub type JsonMap = Map<String, Value>;

/// Version of the document layout written into `metadata.version`.
pub const CONTEXT_DOCUMENT_VERSION: &str = "1.0.0";

/// Lifecycle state of the workflow currently bound to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created alongside the context, no phase has run yet.
    Initialized,
    /// No workflow bound; the previous one completed.
    #[default]
    Ready,
    InProgress,
    Paused,
    /// Terminal. Moves the state into `workflow_history`.
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Full persisted context for one project.
///
/// Every section decodes leniently, so a stored document is only ever
/// rejected by `validate_document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    #[serde(default, deserialize_with = "lenient::text")]
    pub context_id: String,
    pub metadata: ContextMetadata,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub project_state: ProjectState,
    #[serde(default, deserialize_with = "lenient::list")]
    pub workflow_history: Vec<WorkflowRecord>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub current_workflow_state: WorkflowState,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub task_progress: TaskProgress,
    /// Per-agent scratch objects, keyed by agent type.
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub agent_memory: JsonMap,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub user_preferences: UserPreferences,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub quality_metrics: QualityMetrics,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub integration_context: IntegrationContext,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub error_recovery: ErrorRecovery,
    /// Top-level keys supplied by callers that this model does not name.
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl ContextDocument {
    /// Builds the default document for `project_id` entering `workflow`.
    pub fn new(project_id: &str, workflow: &str, at: DateTime<Utc>) -> Self {
        let now = format_timestamp(at);
        Self {
            context_id: format!("{workflow}-{project_id}-{}", date_stamp(at)),
            metadata: ContextMetadata {
                created_at: now.clone(),
                updated_at: now.clone(),
                version: CONTEXT_DOCUMENT_VERSION.to_string(),
                project_id: project_id.to_string(),
                current_workflow: Some(workflow.to_string()),
                schema_version: SUPPORTED_SCHEMA_VERSION.to_string(),
                extra: JsonMap::new(),
            },
            project_state: ProjectState {
                project_name: project_id.to_string(),
                analysis_timestamp: Some(now.clone()),
                ..ProjectState::default()
            },
            workflow_history: Vec::new(),
            current_workflow_state: WorkflowState {
                workflow_name: Some(workflow.to_string()),
                status: WorkflowStatus::Initialized,
                started_at: Some(now.clone()),
                ..WorkflowState::default()
            },
            task_progress: TaskProgress {
                tasks_file: format!(".kiro/specs/{project_id}/tasks.md"),
                last_updated: now.clone(),
                ..TaskProgress::default()
            },
            agent_memory: JsonMap::new(),
            user_preferences: UserPreferences::default(),
            quality_metrics: QualityMetrics {
                test_coverage: TestCoverage {
                    last_measured: Some(now),
                    ..TestCoverage::default()
                },
                ..QualityMetrics::default()
            },
            integration_context: IntegrationContext::default(),
            error_recovery: ErrorRecovery::default(),
            extra: JsonMap::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.metadata.project_id
    }

    /// Serializes into a JSON value for filtering and validation.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Stamps `metadata.updated_at`.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.metadata.updated_at = format_timestamp(at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    #[serde(default, deserialize_with = "lenient::text")]
    pub created_at: String,
    /// Stamped on every write; older documents may lack it.
    #[serde(default, deserialize_with = "lenient::text")]
    pub updated_at: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub project_id: String,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub current_workflow: Option<String>,
    #[serde(
        default = "default_schema_version",
        deserialize_with = "schema_version_or_default"
    )]
    pub schema_version: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}

fn default_schema_version() -> String {
    SUPPORTED_SCHEMA_VERSION.to_string()
}

fn schema_version_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient::optional_text(deserializer)?.unwrap_or_else(default_schema_version))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
    #[serde(deserialize_with = "lenient::text")]
    pub project_name: String,
    #[serde(deserialize_with = "lenient::text")]
    pub project_type: String,
    #[serde(deserialize_with = "lenient::text")]
    pub complexity: String,
    #[serde(deserialize_with = "lenient::flag")]
    pub security_critical: bool,
    #[serde(deserialize_with = "lenient::or_default")]
    pub technology_stack: JsonMap,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub analysis_timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            project_type: "unknown".to_string(),
            complexity: "medium".to_string(),
            security_critical: false,
            technology_stack: JsonMap::new(),
            analysis_timestamp: None,
            extra: JsonMap::new(),
        }
    }
}

/// Workflow currently bound to the project.
///
/// `Default` is the idle state a context returns to after a workflow completes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowState {
    #[serde(deserialize_with = "lenient::optional_text")]
    pub workflow_name: Option<String>,
    /// An unrecognized stored status reads as `ready`.
    #[serde(deserialize_with = "lenient::or_default")]
    pub status: WorkflowStatus,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub started_at: Option<String>,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub current_phase: Option<String>,
    #[serde(deserialize_with = "lenient::list")]
    pub completed_phases: Vec<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub phase_outputs: JsonMap,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Completed workflow moved into history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    #[serde(flatten)]
    pub state: WorkflowState,
    #[serde(default, deserialize_with = "lenient::text")]
    pub completed_at: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskProgress {
    #[serde(deserialize_with = "lenient::text")]
    pub tasks_file: String,
    #[serde(deserialize_with = "lenient::count")]
    pub total_tasks: u32,
    #[serde(deserialize_with = "lenient::count")]
    pub completed_tasks: u32,
    /// Caller-defined; usually a task id or `null`.
    pub current_task: Value,
    #[serde(deserialize_with = "lenient::count")]
    pub completion_percentage: u32,
    #[serde(deserialize_with = "lenient::text")]
    pub last_updated: String,
    #[serde(deserialize_with = "lenient::list")]
    pub task_details: Vec<TaskDetail>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl TaskProgress {
    /// Recomputes completion counters from `task_details`.
    pub fn recompute(&mut self, at: DateTime<Utc>) {
        let completed = self
            .task_details
            .iter()
            .filter(|task| task.is_completed())
            .count();
        self.completed_tasks = u32::try_from(completed).unwrap_or(u32::MAX);
        self.completion_percentage = completion_percentage(self.completed_tasks, self.total_tasks);
        self.last_updated = format_timestamp(at);
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskDetail> {
        self.task_details.iter().find(|task| task.task_id == task_id)
    }
}

fn completion_percentage(completed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    // Rounded half away from zero.
    let scaled = (u64::from(completed) * 200 + u64::from(total)) / (u64::from(total) * 2);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// One task entry. Everything except `task_id` is caller-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(default, deserialize_with = "lenient::text")]
    pub task_id: String,
    #[serde(flatten)]
    pub fields: JsonMap,
}

impl TaskDetail {
    pub fn is_completed(&self) -> bool {
        matches!(self.fields.get("completed"), Some(Value::Bool(true)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    #[serde(deserialize_with = "lenient::or_default")]
    pub workflow_selections: Vec<Value>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub approval_history: Vec<Value>,
    #[serde(deserialize_with = "lenient::text")]
    pub tdd_preference: String,
    #[serde(deserialize_with = "lenient::flag")]
    pub auto_progression: bool,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            workflow_selections: Vec::new(),
            approval_history: Vec::new(),
            tdd_preference: "always_use".to_string(),
            auto_progression: false,
            extra: JsonMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetrics {
    #[serde(deserialize_with = "lenient::or_default")]
    pub test_coverage: TestCoverage,
    #[serde(deserialize_with = "lenient::or_default")]
    pub code_quality: CodeQuality,
    #[serde(deserialize_with = "lenient::or_default")]
    pub workflow_efficiency: WorkflowEfficiency,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCoverage {
    #[serde(deserialize_with = "lenient::number")]
    pub line_coverage: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub branch_coverage: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub function_coverage: f64,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub last_measured: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeQuality {
    #[serde(deserialize_with = "lenient::number")]
    pub complexity_score: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub maintainability_index: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub technical_debt_minutes: f64,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowEfficiency {
    #[serde(deserialize_with = "lenient::text")]
    pub average_phase_duration: String,
    #[serde(deserialize_with = "lenient::text")]
    pub approval_response_time: String,
    #[serde(deserialize_with = "lenient::text")]
    pub total_development_time: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Default for WorkflowEfficiency {
    fn default() -> Self {
        Self {
            average_phase_duration: "0min".to_string(),
            approval_response_time: "0min".to_string(),
            total_development_time: "0min".to_string(),
            extra: JsonMap::new(),
        }
    }
}

const MCP_SERVICES: &[&str] = &[
    "deepwiki_status",
    "context7_status",
    "serena_status",
    "playwright_status",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationContext {
    /// Status per MCP service, `"unknown"` until probed by a host.
    #[serde(deserialize_with = "lenient::or_default")]
    pub mcp_services: JsonMap,
    #[serde(deserialize_with = "lenient::or_default")]
    pub generated_agents: Vec<Value>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Default for IntegrationContext {
    fn default() -> Self {
        Self {
            mcp_services: MCP_SERVICES
                .iter()
                .map(|name| ((*name).to_string(), Value::from("unknown")))
                .collect(),
            generated_agents: Vec::new(),
            extra: JsonMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRecovery {
    #[serde(deserialize_with = "lenient::optional_text")]
    pub last_checkpoint: Option<String>,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub checkpoint_file: Option<String>,
    #[serde(deserialize_with = "lenient::list")]
    pub recovery_points: Vec<RecoveryPoint>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "lenient::list"
    )]
    pub restorations: Vec<RestorePoint>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub file: String,
}

/// Record of a checkpoint being restored over the active document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePoint {
    #[serde(default, deserialize_with = "lenient::text")]
    pub checkpoint_name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub checkpoint_timestamp: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub restored_at: String,
}
