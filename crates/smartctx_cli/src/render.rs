//! Terminal output helpers.

use anyhow::Result;
use serde_json::Value;
use smartctx_core::ContextSummary;

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_summaries(summaries: &[ContextSummary]) {
    if summaries.is_empty() {
        println!("No active contexts");
        return;
    }

    println!("Active contexts ({}):", summaries.len());
    for summary in summaries {
        println!("{}", summary_line(summary));
    }
}

fn summary_line(summary: &ContextSummary) -> String {
    let agents = if summary.agents.is_empty() {
        "-".to_string()
    } else {
        summary.agents.join(",")
    };
    format!(
        "  {} workflow={} phase={} progress={}/{} ({}%) agents={} updated={}",
        summary.project_id,
        summary.workflow.as_deref().unwrap_or("-"),
        summary.phase.as_deref().unwrap_or("-"),
        summary.completed_tasks,
        summary.total_tasks,
        summary.completion_percentage,
        agents,
        summary.updated_at
    )
}
