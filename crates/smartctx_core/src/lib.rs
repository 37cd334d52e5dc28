//! Core of the smartctx context store.
//! Owns the context document model, its on-disk layout and every invariant
//! the CLI and agent sessions rely on.

pub mod access;
pub mod agent;
pub mod config;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;
pub mod time;

pub use access::policy::{filter_context, parse_context_scope, policy_for, ContextScope};
pub use agent::session::{AgentError, AgentResult, AgentSession, ExecutionStatus, ShareRecord};
pub use config::StoreConfig;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::context::{ContextDocument, JsonMap, TaskProgress, WorkflowState, WorkflowStatus};
pub use model::validate::{validate_document, ContextValidationError};
pub use repo::context_repo::{ContextRepository, FileContextRepository, RepoError, RepoResult};
pub use service::context_service::{
    CleanupReport, ContextService, ContextStatistics, ContextSummary, ServiceError,
    ServiceResult, DEFAULT_RETENTION_DAYS,
};
pub use store::{StoreError, StoreLayout, DEFAULT_STORE_ROOT};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
