use super::{extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::governor::Risk;
use ward_core::response::Code;

/// Reports the workspace root, allowlisted task names, and the limits a
/// caller would need to respect (`max_file_bytes`, `max_runtime_seconds`).
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "workspace_info",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if decision.is_allowed() {
        let policy = &ctx.governor.policy;
        let allowed_tasks: Vec<&String> = policy.allow_tasks.keys().collect();
        let data = json!({
            "workspace_root": ctx.governor.root.to_string_lossy(),
            "allowed_tasks": allowed_tasks,
            "limits": {
                "max_file_bytes": policy.max_file_bytes,
                "max_runtime_seconds": policy.max_runtime_seconds,
            }
        });
        (Code::Success, "workspace info".to_string(), data)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}
