use super::{extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::governor::Risk;
use ward_core::response::{Code, Decision as Verdict};

/// Runs three internal health probes: policy is loaded and hashed, the
/// three bounded stores are configured with positive bounds, and a
/// freshly built meta block's timestamp has the expected shape. Used by
/// operators to distinguish "tool reports blocked" from "kernel is
/// broken".
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "self_check",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if decision.is_allowed() {
        let policy_loaded = !ctx.governor.policy.policy_hash.is_empty();

        let bounded_stores = ctx
            .governor
            .store_bounds()
            .iter()
            .all(|(_, max_size, ttl_seconds)| *max_size > 0 && *ttl_seconds > 0);

        let probe_meta = ctx.governor.build_meta(
            "self_check",
            Risk::Read,
            Verdict::Allowed,
            Code::Success,
            "self-check-probe",
            0,
            None,
            false,
        );
        let meta_contract = probe_meta.timestamp.ends_with('Z');

        let checks = vec![
            json!({"name": "policy_loaded", "ok": policy_loaded}),
            json!({"name": "bounded_stores", "ok": bounded_stores}),
            json!({"name": "meta_contract", "ok": meta_contract}),
        ];
        let overall_ok = policy_loaded && bounded_stores && meta_contract;
        let status = if overall_ok { "ok" } else { "error" };

        let data = json!({
            "status": status,
            "kernel_version": env!("CARGO_PKG_VERSION"),
            "checks": checks,
        });
        (Code::Success, format!("self-check: {status}"), data)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}
