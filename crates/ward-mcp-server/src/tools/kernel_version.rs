use super::{extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::governor::Risk;
use ward_core::response::{Code, CONTRACT_VERSION};

/// Reports the kernel, contract, and policy fingerprints a caller can
/// compare across calls to detect a policy reload or server restart.
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "kernel_version",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if decision.is_allowed() {
        let data = json!({
            "kernel_version": env!("CARGO_PKG_VERSION"),
            "contract_version": CONTRACT_VERSION,
            "policy_schema_version": 1,
            "policy_profile": ctx.governor.policy.profile,
            "policy_hash": ctx.governor.policy.policy_hash,
            "server_instance_id": ctx.governor.server_instance_id,
        });
        (Code::Success, "kernel version".to_string(), data)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}
