use super::{extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::governor::Risk;
use ward_core::response::Code;

/// Looks up a past decision by `audit_id` and explains the triggered
/// rule, supporting evidence, and a compliant alternative. Read-only and
/// exempt from audit logging itself (`skip_audit = true`) — explaining a
/// decision shouldn't generate a new decision to explain.
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "explain_policy_decision",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        true,
    );

    let outcome = if decision.is_allowed() {
        build_outcome(ctx, args)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

fn build_outcome(ctx: &mut ToolContext, args: &Value) -> (Code, String, Value) {
    let Some(audit_id) = args.get("audit_id").and_then(Value::as_str) else {
        return (Code::InvalidInput, "missing 'audit_id' argument".to_string(), json!({}));
    };
    let owner_id = args.get("owner_id").and_then(Value::as_str);

    let Some(entry) = ctx.governor.lookup_audit(audit_id, owner_id) else {
        return (
            Code::NotFound,
            format!("audit entry not found: {audit_id}"),
            json!({"key": "AUDIT_NOT_FOUND"}),
        );
    };

    let decision_str = format!("{:?}", entry.decision).to_lowercase();
    let explanation = if decision_str == "blocked" {
        if let Some(v) = &entry.violation {
            let (evidence, compliant_alternative) = evidence_for(&v.key);
            json!({
                "audit_id": entry.audit_id,
                "tool": entry.tool,
                "decision": decision_str,
                "rule_triggered": v.key,
                "config_location": v.config_path.clone().unwrap_or_else(|| "N/A".to_string()),
                "evidence": evidence,
                "compliant_alternative": compliant_alternative,
            })
        } else {
            json!({
                "audit_id": entry.audit_id,
                "tool": entry.tool,
                "decision": decision_str,
                "rule_triggered": "None",
                "config_location": "N/A",
                "evidence": "The action was blocked but no violation detail was recorded.",
                "compliant_alternative": "N/A",
            })
        }
    } else {
        json!({
            "audit_id": entry.audit_id,
            "tool": entry.tool,
            "decision": decision_str,
            "rule_triggered": "None",
            "config_location": "N/A",
            "evidence": "The action passed all policy checks.",
            "compliant_alternative": "N/A",
        })
    };

    (Code::Success, format!("explanation for {audit_id}"), explanation)
}

/// Hardcoded evidence/compliant-alternative pairs per violation key, with
/// a generic fallback for keys not in this table.
fn evidence_for(key: &str) -> (&'static str, &'static str) {
    match key {
        "PATH_OUTSIDE_ALLOW_PATHS" => (
            "The target path falls outside this profile's allow_paths.",
            "Request a path under one of the profile's allow_paths entries.",
        ),
        "PATH_MATCHES_DENY_GLOBS" => (
            "The target path matches one of this profile's deny_globs patterns.",
            "Avoid paths matching the denied patterns (e.g. secrets, .git internals).",
        ),
        "TASK_NOT_ALLOWLISTED" => (
            "The requested task name is not a key in this profile's allow_tasks.",
            "Use one of the task names listed in allow_tasks for this profile.",
        ),
        "FILE_EXCEEDS_MAX_BYTES" => (
            "The file's size exceeds this profile's max_file_bytes limit.",
            "Read the file in smaller ranges via start_line/end_line, or request a policy override.",
        ),
        "OWNER_ID_REQUIRED" => (
            "This call requires an owner_id to bind the action to a run.",
            "Supply an owner_id argument.",
        ),
        "RUN_ID_REQUIRED" => (
            "This profile requires a run_id for write/execute actions.",
            "Call start_run first and pass its run_id with subsequent calls.",
        ),
        "RUN_NOT_FOUND" => (
            "The run_id does not exist, has expired, or doesn't belong to the given owner_id.",
            "Start a new run, or verify the run_id and owner_id pair.",
        ),
        "BUNDLE_NOT_FOUND" => (
            "The bundle_id does not exist, has expired, or doesn't belong to the given owner_id.",
            "Create a new change bundle, or verify the bundle_id and owner_id pair.",
        ),
        _ => (
            "The action was rejected by policy.",
            "Review the policy configuration for the triggered rule.",
        ),
    }
}
