use std::fmt::Write;

use planweave_agent::{ExecutionContext, ExecutionReport};
use planweave_core::types::StepStatus;

/// Render a finished (or loaded) run for the terminal.
pub fn render(ctx: &ExecutionContext, report: Option<&ExecutionReport>) -> String {
    let summary = ctx.get_execution_summary();
    let mut out = String::new();

    let _ = writeln!(out, "Session:  {}", summary.session_id);
    let _ = writeln!(out, "Query:    {}", truncate(&summary.original_query, 100));
    if let Some(report) = report {
        let _ = writeln!(
            out,
            "Outcome:  {} ({} iterations, {:.1}s)",
            report.outcome,
            report.iterations,
            report.total_elapsed_ms as f64 / 1000.0
        );
    }
    let _ = writeln!(
        out,
        "Steps:    {} completed, {} failed, {} pending, {} total",
        summary.completed_steps,
        summary.failed_steps,
        summary.pending_steps(),
        summary.total_steps
    );
    let _ = writeln!(
        out,
        "Usage:    ${:.4}, {} tokens ({} in / {} out)",
        summary.total_cost,
        summary.total_tokens,
        summary.total_input_tokens,
        summary.total_output_tokens
    );

    if ctx.graph().is_empty() {
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<8} {:<20} {:<10} {:>8} {:>9}  NOTE",
        "ID", "AGENT", "STATUS", "TIME", "COST"
    );
    for node in ctx.steps() {
        let note = match node.status {
            StepStatus::Failed => node.error.as_deref().map(|e| truncate(e, 60)).unwrap_or(""),
            _ if !node.missing_writes.is_empty() => "missing writes",
            _ if node.call_self_used => "call_self",
            _ => "",
        };
        let _ = writeln!(
            out,
            "{:<8} {:<20} {:<10} {:>7.2}s {:>9}  {}",
            truncate(&node.id, 8),
            truncate(&node.agent, 20),
            node.status.to_string(),
            node.execution_time,
            format!("${:.4}", node.cost),
            note
        );
    }

    let blocked = ctx.blocked_steps();
    if !blocked.is_empty() {
        let _ = writeln!(out, "Blocked by failures: {}", blocked.join(", "));
    }

    if !summary.cost_breakdown.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Cost breakdown:");
        for (label, cost) in &summary.cost_breakdown {
            let _ = writeln!(
                out,
                "  {:<32} ${:.4}  ({} in / {} out)",
                label, cost.cost, cost.input_tokens, cost.output_tokens
            );
        }
    }

    if !summary.final_outputs.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Final outputs:");
        for (key, value) in &summary.final_outputs {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "  {}: {}", key, truncate(&rendered, 200));
        }
    }

    out
}

/// Truncate on a char boundary.
pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planweave_agent::{GraphAttributes, PlanSpec, RunOutcome};
    use planweave_core::types::CapabilityOutput;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::from_plan(
            GraphAttributes::new(Some("abc12345".into()), "Double the number"),
            PlanSpec::from_value(planweave_test_utils::chain_plan()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn renders_completed_run() {
        let mut ctx = context();
        ctx.mark_running("T1").unwrap();
        ctx.mark_done(
            "T1",
            CapabilityOutput::from_value(json!({"x": 5, "cost": 0.01, "input_tokens": 10}))
                .unwrap(),
        )
        .unwrap();
        ctx.mark_running("T2").unwrap();
        ctx.mark_done("T2", CapabilityOutput::from_value(json!({"y": 10})).unwrap())
            .unwrap();

        let report = ExecutionReport {
            outcome: RunOutcome::Completed,
            iterations: 2,
            total_elapsed_ms: 1500,
        };
        let text = render(&ctx, Some(&report));
        assert!(text.contains("Session:  abc12345"));
        assert!(text.contains("2 completed, 0 failed, 0 pending, 2 total"));
        assert!(text.contains("T1 (ProducerAgent)"));
        assert!(text.contains("Final outputs:"));
        assert!(text.contains("y: 10"));
    }

    #[test]
    fn renders_failure_and_blocked() {
        let mut ctx = context();
        ctx.mark_running("T1").unwrap();
        ctx.mark_failed("T1", "quota exceeded").unwrap();

        let text = render(&ctx, None);
        assert!(text.contains("quota exceeded"));
        assert!(text.contains("Blocked by failures: T2"));
        assert!(!text.contains("Outcome:"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
