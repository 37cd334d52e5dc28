//! Per-agent read policy over context documents.
//!
//! # Responsibility
//! - Map an agent type to the document sections it may read.
//! - Project a document down to that view, including visible agent memory.
//!
//! # Invariants
//! - Unknown agent types fall back to the default policy, never to full access.
//! - Filtered views always carry an `agent_memory` object, possibly empty.

use crate::model::context::JsonMap;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const AGENT_ORCHESTRATOR: &str = "orchestrator";
pub const AGENT_PROJECT_STATE_ANALYZER: &str = "project-state-analyzer";
pub const AGENT_TDD: &str = "tdd-agent";
pub const AGENT_IMPLEMENTATION: &str = "implementation-agent";

const AGENT_MEMORY_FIELD: &str = "agent_memory";

/// How much of the document a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContextScope {
    /// Whole document regardless of policy.
    Full,
    /// Policy-filtered view.
    #[default]
    AgentSpecific,
    /// Policy-filtered view used by the narrow accessors.
    Minimal,
}

impl ContextScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::AgentSpecific => "agent_specific",
            Self::Minimal => "minimal",
        }
    }
}

/// Parses a scope from its wire name.
pub fn parse_context_scope(value: &str) -> Result<ContextScope, ContextScopeError> {
    match value.trim() {
        "full" => Ok(ContextScope::Full),
        "agent_specific" => Ok(ContextScope::AgentSpecific),
        "minimal" => Ok(ContextScope::Minimal),
        other => Err(ContextScopeError(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextScopeError(pub String);

impl Display for ContextScopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported context scope `{}`; expected full|agent_specific|minimal",
            self.0
        )
    }
}

impl Error for ContextScopeError {}

/// Readable document paths. Dotted paths select nested values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAccess {
    All,
    Paths(&'static [&'static str]),
}

/// Whose entries in `agent_memory` are visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccess {
    All,
    Own,
    Agents(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub reads: ReadAccess,
    pub memory: MemoryAccess,
}

const DEFAULT_POLICY: AccessPolicy = AccessPolicy {
    reads: ReadAccess::Paths(&["project_state", "current_workflow_state"]),
    memory: MemoryAccess::Own,
};

/// Returns the built-in policy for `agent_type`.
pub fn policy_for(agent_type: &str) -> AccessPolicy {
    match agent_type {
        AGENT_ORCHESTRATOR => AccessPolicy {
            reads: ReadAccess::All,
            memory: MemoryAccess::All,
        },
        AGENT_PROJECT_STATE_ANALYZER => AccessPolicy {
            reads: ReadAccess::Paths(&[
                "project_state",
                "task_progress",
                "quality_metrics",
                "workflow_history",
            ]),
            memory: MemoryAccess::All,
        },
        AGENT_TDD => AccessPolicy {
            reads: ReadAccess::Paths(&[
                "current_workflow_state",
                "task_progress",
                "project_state.technology_stack",
            ]),
            memory: MemoryAccess::Agents(&[AGENT_TDD, AGENT_IMPLEMENTATION]),
        },
        AGENT_IMPLEMENTATION => AccessPolicy {
            reads: ReadAccess::Paths(&[
                "current_workflow_state",
                "task_progress",
                "project_state",
                "quality_metrics",
            ]),
            memory: MemoryAccess::Agents(&[AGENT_IMPLEMENTATION, AGENT_TDD]),
        },
        _ => DEFAULT_POLICY,
    }
}

/// Projects `document` down to what `agent_type` may read under `scope`.
pub fn filter_context(document: &Value, agent_type: &str, scope: ContextScope) -> Value {
    let policy = policy_for(agent_type);
    let paths = match (scope, policy.reads) {
        (ContextScope::Full, _) | (_, ReadAccess::All) => return document.clone(),
        (_, ReadAccess::Paths(paths)) => paths,
    };

    let mut filtered = JsonMap::new();
    for path in paths {
        if let Some(value) = lookup_path(document, path) {
            insert_path(&mut filtered, path, value.clone());
        }
    }

    let memory = document.get(AGENT_MEMORY_FIELD).and_then(Value::as_object);
    let visible = match (memory, policy.memory) {
        (None, _) => JsonMap::new(),
        (Some(memory), MemoryAccess::All) => memory.clone(),
        (Some(memory), MemoryAccess::Own) => pick_agents(memory, [agent_type]),
        (Some(memory), MemoryAccess::Agents(names)) => pick_agents(memory, names.iter().copied()),
    };
    filtered.insert(AGENT_MEMORY_FIELD.to_string(), Value::Object(visible));

    Value::Object(filtered)
}

fn pick_agents<'a>(memory: &JsonMap, names: impl IntoIterator<Item = &'a str>) -> JsonMap {
    names
        .into_iter()
        .filter_map(|name| {
            memory
                .get(name)
                .map(|entry| (name.to_string(), entry.clone()))
        })
        .collect()
}

fn lookup_path<'v>(document: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn insert_path(target: &mut JsonMap, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = target;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        if !slot.is_object() {
            *slot = Value::Object(JsonMap::new());
        }
        current = match slot {
            Value::Object(next) => next,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::{
        filter_context, parse_context_scope, policy_for, ContextScope, MemoryAccess, ReadAccess,
    };
    use serde_json::{json, Value};

    fn document() -> Value {
        json!({
            "context_id": "wf-p1-20260101",
            "metadata": {"project_id": "p1"},
            "project_state": {"project_name": "p1", "technology_stack": {"lang": "rust"}},
            "current_workflow_state": {"status": "in_progress"},
            "task_progress": {"total_tasks": 3},
            "quality_metrics": {"code_quality": {}},
            "workflow_history": [],
            "agent_memory": {
                "tdd-agent": {"note": "red"},
                "implementation-agent": {"note": "green"},
                "reviewer": {"note": "lgtm"}
            }
        })
    }

    #[test]
    fn parses_known_scopes_only() {
        assert_eq!(parse_context_scope("full").unwrap(), ContextScope::Full);
        assert_eq!(
            parse_context_scope(" minimal ").unwrap(),
            ContextScope::Minimal
        );
        assert!(parse_context_scope("everything").is_err());
    }

    #[test]
    fn unknown_agents_use_default_policy() {
        let policy = policy_for("mystery-agent");
        assert_eq!(policy.memory, MemoryAccess::Own);
        assert!(matches!(policy.reads, ReadAccess::Paths(_)));
    }

    #[test]
    fn orchestrator_and_full_scope_see_everything() {
        let doc = document();
        assert_eq!(
            filter_context(&doc, "orchestrator", ContextScope::AgentSpecific),
            doc
        );
        assert_eq!(filter_context(&doc, "reviewer", ContextScope::Full), doc);
    }

    #[test]
    fn tdd_agent_sees_nested_stack_and_paired_memory() {
        let view = filter_context(&document(), "tdd-agent", ContextScope::AgentSpecific);
        assert_eq!(
            view["project_state"],
            json!({"technology_stack": {"lang": "rust"}})
        );
        assert!(view.get("quality_metrics").is_none());
        assert!(view.get("metadata").is_none());
        assert_eq!(
            view["agent_memory"],
            json!({"tdd-agent": {"note": "red"}, "implementation-agent": {"note": "green"}})
        );
    }

    #[test]
    fn default_policy_sees_only_own_memory() {
        let view = filter_context(&document(), "reviewer", ContextScope::Minimal);
        assert_eq!(view["agent_memory"], json!({"reviewer": {"note": "lgtm"}}));
        assert!(view.get("task_progress").is_none());

        let stranger = filter_context(&document(), "nobody", ContextScope::Minimal);
        assert_eq!(stranger["agent_memory"], json!({}));
    }

    #[test]
    fn analyzer_sees_all_memory() {
        let view = filter_context(
            &document(),
            "project-state-analyzer",
            ContextScope::AgentSpecific,
        );
        assert_eq!(view["agent_memory"].as_object().unwrap().len(), 3);
        assert!(view.get("workflow_history").is_some());
        assert!(view.get("current_workflow_state").is_none());
    }
}
