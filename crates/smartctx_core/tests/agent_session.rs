use log::Level;
use serde_json::{json, Value};
use smartctx_core::{
    AgentError, AgentSession, ContextScope, ContextService, ExecutionStatus,
    FileContextRepository, JsonMap, StoreConfig,
};
use std::time::Duration;

fn service_with_project() -> (tempfile::TempDir, ContextService<FileContextRepository>) {
    let dir = tempfile::tempdir().unwrap();
    let service = ContextService::open(&StoreConfig::with_root(dir.path())).unwrap();
    service.create_context("demo", "tdd", None).unwrap();
    (dir, service)
}

fn patch(key: &str, value: Value) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert(key.to_string(), value);
    map
}

#[test]
fn operations_without_project_fail() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("tdd-agent", &service);

    assert!(matches!(
        session.my_context(ContextScope::AgentSpecific),
        Err(AgentError::NoProject(agent)) if agent == "tdd-agent"
    ));
    assert!(matches!(
        session.update_my_memory(&JsonMap::new()),
        Err(AgentError::NoProject(_))
    ));
}

#[test]
fn cached_reads_are_invalidated_by_own_writes() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("tdd-agent", &service)
        .with_project("demo")
        .with_cache_ttl(Duration::from_secs(300));

    let before = session
        .my_context(ContextScope::AgentSpecific)
        .unwrap()
        .unwrap();
    assert_eq!(before["agent_memory"], json!({}));

    // Out-of-band write is hidden by the cache.
    service
        .update_agent_memory("demo", "tdd-agent", &patch("external", json!(1)))
        .unwrap();
    let cached = session
        .my_context(ContextScope::AgentSpecific)
        .unwrap()
        .unwrap();
    assert_eq!(cached, before);

    session
        .update_my_memory(&patch("note", json!("red")))
        .unwrap();
    let fresh = session
        .my_context(ContextScope::AgentSpecific)
        .unwrap()
        .unwrap();
    assert_eq!(fresh["agent_memory"]["tdd-agent"]["external"], json!(1));
    assert_eq!(fresh["agent_memory"]["tdd-agent"]["note"], json!("red"));
}

#[test]
fn zero_ttl_always_refetches() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("tdd-agent", &service)
        .with_project("demo")
        .with_cache_ttl(Duration::ZERO);

    session.my_context(ContextScope::Minimal).unwrap();
    service
        .update_agent_memory("demo", "tdd-agent", &patch("seen", json!(true)))
        .unwrap();
    let view = session.my_context(ContextScope::Minimal).unwrap().unwrap();
    assert_eq!(view["agent_memory"]["tdd-agent"]["seen"], json!(true));
}

#[test]
fn execution_lifecycle_updates_counters_and_history() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("implementation-agent", &service).with_project("demo");

    session
        .record_execution_start("write handler", json!({"file": "src/lib.rs"}))
        .unwrap();
    session
        .record_execution_complete(json!({"lines": 40}), ExecutionStatus::Success)
        .unwrap();
    session
        .record_execution_start("write tests", Value::Null)
        .unwrap();
    session
        .record_execution_complete(Value::Null, ExecutionStatus::Failed)
        .unwrap();

    let history = session.execution_history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["description"], json!("write handler"));
    assert_eq!(history[1]["status"], json!("failed"));
    assert!(history[0]["duration_ms"].as_i64().unwrap() >= 0);

    let metrics = session.performance_metrics().unwrap();
    assert_eq!(metrics.total_executions, 2);
    assert_eq!(metrics.success_rate, 50);
    assert!(metrics.current_task.is_none());
    assert!(metrics.last_execution.is_some());
    assert!(metrics.memory_bytes > 0);
}

#[test]
fn shared_data_accumulates_and_filters_by_sender() {
    let (_dir, service) = service_with_project();
    let mut analyzer = AgentSession::new("project-state-analyzer", &service).with_project("demo");
    let mut tdd = AgentSession::new("tdd-agent", &service).with_project("demo");

    let first = analyzer
        .share_with_agents(&["tdd-agent"], json!({"risk": "low"}), "analysis")
        .unwrap();
    tdd.share_with_agents(&["tdd-agent"], json!({"self": true}), "note")
        .unwrap();
    let second = analyzer
        .share_with_agents(
            &["tdd-agent", "implementation-agent"],
            json!({"risk": "high"}),
            "analysis",
        )
        .unwrap();
    assert_ne!(first.share_id, second.share_id);

    let received = tdd.shared_data(None).unwrap();
    assert_eq!(received.len(), 3);

    let from_analyzer = tdd.shared_data(Some("project-state-analyzer")).unwrap();
    assert_eq!(from_analyzer.len(), 2);
    assert!(from_analyzer
        .iter()
        .all(|record| record.shared_by == "project-state-analyzer"));
    assert!(from_analyzer[0].shared_at >= from_analyzer[1].shared_at);

    let doc = service.load_context("demo").unwrap().unwrap();
    let sent = doc.agent_memory["project-state-analyzer"]["shared_data_sent"]
        .as_object()
        .unwrap();
    assert_eq!(sent.len(), 2);
    assert!(doc.agent_memory["implementation-agent"]["shared_data_received"].is_object());
}

#[test]
fn task_updates_record_contributions_and_checkpoints_are_prefixed() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("tdd-agent", &service).with_project("demo");

    let progress = session
        .update_task_progress("2.1", &patch("completed", json!(true)))
        .unwrap();
    assert_eq!(progress.completed_tasks, 1);

    let path = session.create_checkpoint("green").unwrap();
    assert!(path.ends_with("demo-tdd-agent-green.json"));

    let doc = service.load_context("demo").unwrap().unwrap();
    let contribution = &doc.agent_memory["tdd-agent"]["task_contributions"]["2.1"];
    assert_eq!(contribution["completed"], json!(true));
    assert!(contribution["contributed_at"].is_string());

    let workflow = session.current_workflow().unwrap().unwrap();
    assert_eq!(workflow["workflow_name"], json!("tdd"));
    let tasks = session.task_progress().unwrap().unwrap();
    assert_eq!(tasks["completed_tasks"], json!(1));
    // tdd-agent only sees the technology stack of the project state.
    let state = session.project_state().unwrap().unwrap();
    assert!(state.get("project_name").is_none());
}

#[test]
fn activity_logs_are_capped() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("orchestrator", &service).with_project("demo");

    for index in 0..105 {
        session
            .log_activity(Level::Info, "tick", json!({ "index": index }))
            .unwrap();
    }

    let doc = service.load_context("demo").unwrap().unwrap();
    let logs = doc.agent_memory["orchestrator"]["logs"].as_object().unwrap();
    assert_eq!(logs.len(), 100);
}

#[test]
fn cleanup_unbinds_project() {
    let (_dir, service) = service_with_project();
    let mut session = AgentSession::new("tdd-agent", &service).with_project("demo");
    session.my_context(ContextScope::Minimal).unwrap();

    session.cleanup();
    assert!(session.project_id().is_none());
    assert!(matches!(
        session.project_state(),
        Err(AgentError::NoProject(_))
    ));
}
