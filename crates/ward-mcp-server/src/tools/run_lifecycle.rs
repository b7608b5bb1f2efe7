use super::{finalize, invalid_input_response, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::governor::{Risk, RunStatus};
use ward_core::response::Code;

/// Starts an owner-bound run. Unlike every other adapter, this does not
/// go through the general `run_id`-ownership precondition (there is no
/// `run_id` yet by definition) — `Governor::start_run` applies its own
/// narrower precondition (an `owner_id` is still required).
pub async fn start(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let owner_id = args.get("owner_id").and_then(Value::as_str).map(str::to_string);
    let metadata = args.get("metadata").cloned();

    let (decision, run_id) = ctx.governor.start_run(metadata, owner_id.as_deref());

    let outcome = if decision.is_allowed() {
        let data = json!({"run_id": run_id});
        (Code::Success, "run started".to_string(), data)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

pub async fn end(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let run_id = args.get("run_id").and_then(Value::as_str).map(str::to_string);
    let owner_id = args.get("owner_id").and_then(Value::as_str).map(str::to_string);

    let Some(rid) = run_id.clone() else {
        return invalid_input_response(ctx, "end_run", Risk::Write, "missing 'run_id' argument");
    };

    let decision = ctx.governor.end_run(&rid, owner_id.as_deref());

    let outcome = if decision.is_allowed() {
        let record = ctx.governor.get_run(&rid, owner_id.as_deref());
        let duration_seconds = record
            .and_then(|r| r.end_time.map(|end| (end - r.start_time) as f64))
            .unwrap_or(0.0);
        let data = json!({"run_id": rid, "status": "ended", "duration_seconds": duration_seconds});
        (Code::Success, "run ended".to_string(), data)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

pub async fn summary(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let run_id = args.get("run_id").and_then(Value::as_str).map(str::to_string);
    let owner_id = args.get("owner_id").and_then(Value::as_str).map(str::to_string);

    let Some(rid) = run_id.clone() else {
        return invalid_input_response(ctx, "get_run_summary", Risk::Read, "missing 'run_id' argument");
    };

    let decision = ctx.governor.validate_get_run_summary(&rid, owner_id.as_deref());

    let outcome = if decision.is_allowed() {
        match ctx.governor.get_run(&rid, owner_id.as_deref()) {
            Some(run) => {
                let now = chrono::Utc::now().timestamp();
                let elapsed = run.end_time.unwrap_or(now) - run.start_time;
                let data = json!({
                    "run_id": run.run_id,
                    "status": if run.status == RunStatus::Active { "active" } else { "ended" },
                    "tool_sequence": run.tool_sequence,
                    "risk_distribution": run.risk_distribution,
                    "allowed_count": run.allowed_count,
                    "blocked_count": run.blocked_count,
                    "elapsed_seconds": elapsed,
                });
                (Code::Success, "run summary".to_string(), data)
            }
            None => (Code::NotFound, format!("run not found: {rid}"), json!({"key": "RUN_NOT_FOUND"})),
        }
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}
