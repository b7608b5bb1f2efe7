use super::{blocked_outcome, extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::change_bundle::{
    bundle_id, classify_risk, extract_target_files, rollback_hint, synthetic_commit_message, BundleRisk,
    CreateBundleError,
};
use ward_core::governor::Risk;
use ward_core::response::{Code, CONTRACT_VERSION};

/// Registers a unified diff as a deterministically-identified change
/// bundle. Re-submitting the same diff against the same policy returns
/// the existing bundle rather than minting a new one.
pub async fn create(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let diff_text = args.get("diff_text").and_then(Value::as_str).unwrap_or("").to_string();
    let metadata = args.get("metadata").cloned();
    let targets = extract_target_files(&diff_text);

    let validate_args = json!({"diff_size": diff_text.len(), "paths": targets});
    let decision = ctx.governor.validate_action(
        "create_change_bundle",
        Risk::Write,
        &validate_args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if !decision.is_allowed() {
        (Code::Blocked, String::new(), json!({}))
    } else if targets.is_empty() {
        (
            Code::InvalidInput,
            "Could not parse any target paths from diff".to_string(),
            json!({"key": "invalid_input"}),
        )
    } else {
        let id = bundle_id(CONTRACT_VERSION, &ctx.governor.policy.policy_hash, &targets, &diff_text);
        let existed = ctx.governor.bundles_mut().get(&id).is_some();
        match ctx.governor.create_change_bundle(&diff_text, metadata, owner_id.as_deref()) {
            Ok(record) => {
                let verb = if existed { "Returned existing" } else { "Created" };
                let data = json!({
                    "bundle_id": record.bundle_id,
                    "target_files": record.target_files,
                });
                (Code::Success, format!("{verb} change bundle {}", record.bundle_id), data)
            }
            Err(CreateBundleError::NoTargets) => (
                Code::InvalidInput,
                "Could not parse any target paths from diff".to_string(),
                json!({"key": "invalid_input"}),
            ),
            Err(CreateBundleError::PathSafety(e)) => blocked_outcome(
                "PATH_OUTSIDE_ALLOW_PATHS",
                "profiles.<profile>.allow_paths",
                json!({"error": e}),
            ),
        }
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

/// Reports risk classification, test hints, a suggested commit message,
/// and rollback guidance for a previously registered bundle.
pub async fn report(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "bundle_report",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if decision.is_allowed() {
        build_report(ctx, args)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

fn build_report(ctx: &mut ToolContext, args: &Value) -> (Code, String, Value) {
    let Some(bundle_id) = args.get("bundle_id").and_then(Value::as_str) else {
        return (Code::InvalidInput, "missing 'bundle_id' argument".to_string(), json!({}));
    };
    let owner_id = args.get("owner_id").and_then(Value::as_str);

    let Some(record) = ctx.governor.get_bundle(bundle_id, owner_id) else {
        return (
            Code::NotFound,
            format!("bundle not found: {bundle_id}"),
            json!({"key": "BUNDLE_NOT_FOUND"}),
        );
    };

    let risk = classify_risk(&record.target_files, &ctx.governor.policy.risk_rules);
    let mut test_recommendations = vec!["Run unit tests for affected modules.".to_string()];
    if matches!(risk, BundleRisk::Medium | BundleRisk::High) {
        test_recommendations.push("Run full test suite and static analysis.".to_string());
    }

    let data = json!({
        "bundle_id": record.bundle_id,
        "target_files": record.target_files,
        "risk_level": risk,
        "test_recommendations": test_recommendations,
        "suggested_commit_message": synthetic_commit_message(&record.target_files),
        "rollback_notes": [rollback_hint(&record.target_files)],
    });
    (Code::Success, format!("bundle report for {bundle_id}"), data)
}
