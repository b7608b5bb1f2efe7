use serde_json::Value;
use std::time::Instant;
use ward_core::governor::{sha256_hex, Decision as PipelineDecision, Governor};
use ward_core::response::{Code, Decision as Verdict, ResponseContract, Status};

pub mod apply_patch;
pub mod change_bundle;
pub mod explain_policy;
pub mod kernel_version;
pub mod read_file;
pub mod repo_search;
pub mod run_lifecycle;
pub mod run_task;
pub mod self_check;
pub mod workspace_info;

pub struct ToolContext {
    pub governor: Governor,
}

/// Pulls the two fields every tool accepts in addition to its own
/// arguments.
pub fn extract_run_owner(args: &Value) -> (Option<String>, Option<String>) {
    let run_id = args.get("run_id").and_then(Value::as_str).map(str::to_string);
    let owner_id = args.get("owner_id").and_then(Value::as_str).map(str::to_string);
    (run_id, owner_id)
}

/// Stamps the measured duration onto both the stored audit entry and the
/// response, and builds the final contract-conformant envelope. Called
/// once by every adapter after its side-effecting work (if any) completes.
pub fn finalize(
    ctx: &mut ToolContext,
    decision: PipelineDecision,
    start: Instant,
    run_id: Option<String>,
    owner_id: Option<String>,
    output_truncated: bool,
    outcome: (Code, String, Value),
) -> anyhow::Result<Value> {
    let duration_ms = start.elapsed().as_millis() as u64;
    ctx.governor.record_duration(&decision.audit_id, duration_ms);

    if let Some(mut resp) = decision.block_response {
        resp.meta.duration_ms = duration_ms;
        return Ok(serde_json::to_value(resp)?);
    }

    let (code, summary, data) = outcome;
    let verdict = match code.status() {
        Status::Ok => Verdict::Allowed,
        Status::Blocked => Verdict::Blocked,
        Status::Error => Verdict::Error,
    };
    let meta = ctx.governor.build_meta(
        decision.tool,
        decision.risk,
        verdict,
        code,
        decision.audit_id,
        duration_ms,
        run_id,
        output_truncated,
    );
    let owner_hash = owner_id.as_deref().map(sha256_hex);
    let owner_hint = owner_hash.as_deref().map(|h| h[..8].to_string());
    let response = ResponseContract::new(code, summary, data, meta).with_owner(owner_hash, owner_hint);
    Ok(serde_json::to_value(response)?)
}

/// Builds a `(Code::Blocked, summary, data)` outcome for a policy
/// violation an adapter detects itself (after the Governor's own
/// `validate_action` already passed), e.g. a file too large to read.
/// Shaped like the Governor's own block response so callers can't tell
/// the two apart by structure.
pub fn blocked_outcome(key: &str, config_path: &str, details: Value) -> (Code, String, Value) {
    let data = serde_json::json!({
        "policy_violation": {
            "key": key,
            "config_path": config_path,
            "details": details,
        }
    });
    (Code::Blocked, format!("action rejected by policy: {key}"), data)
}

/// A `tokio::process::Command` with an environment scrubbed to just
/// `PATH`/`LANG`, rooted at `cwd`, argv-only (never shell-interpreted).
/// Shared by every adapter that shells out to an external tool.
pub fn scrubbed_command(program: &str, cwd: &std::path::Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.current_dir(cwd);
    cmd.env_clear();
    cmd.env("PATH", "/usr/bin:/bin:/usr/local/bin");
    cmd.env("LANG", "C.UTF-8");
    cmd
}

/// Builds a standalone error response for a malformed call that never
/// reaches the Governor's decision pipeline (a required field missing
/// entirely, not a policy violation).
pub fn invalid_input_response(
    ctx: &ToolContext,
    tool: impl Into<String>,
    risk: ward_core::governor::Risk,
    message: impl Into<String>,
) -> anyhow::Result<Value> {
    let meta = ctx.governor.build_meta(
        tool,
        risk,
        Verdict::Error,
        Code::InvalidInput,
        uuid::Uuid::new_v4().to_string(),
        0,
        None,
        false,
    );
    let response = ResponseContract::error(Code::InvalidInput, message, serde_json::json!({}), meta);
    Ok(serde_json::to_value(response)?)
}

pub fn list_tools() -> Vec<Value> {
    vec![
        serde_json::json!({
            "name": "workspace_info",
            "description": "Report the workspace root, allowed task names, and key file/runtime limits.",
            "inputSchema": {"type": "object", "properties": {"run_id": {"type": "string"}, "owner_id": {"type": "string"}}}
        }),
        serde_json::json!({
            "name": "kernel_version",
            "description": "Report kernel/contract/policy version fingerprints.",
            "inputSchema": {"type": "object", "properties": {"run_id": {"type": "string"}, "owner_id": {"type": "string"}}}
        }),
        serde_json::json!({
            "name": "self_check",
            "description": "Run internal health probes (policy loaded, stores bounded, meta contract sane).",
            "inputSchema": {"type": "object", "properties": {"run_id": {"type": "string"}, "owner_id": {"type": "string"}}}
        }),
        serde_json::json!({
            "name": "repo_search",
            "description": "Search workspace files for a query, honoring deny_globs and max_file_bytes.",
            "inputSchema": {"type": "object", "properties": {
                "query": {"type": "string"}, "file_globs": {"type": "array", "items": {"type": "string"}},
                "limit": {"type": "integer"}, "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["query"]}
        }),
        serde_json::json!({
            "name": "read_file",
            "description": "Read a workspace file, optionally restricted to a line range.",
            "inputSchema": {"type": "object", "properties": {
                "path": {"type": "string"}, "start_line": {"type": "integer"}, "end_line": {"type": "integer"},
                "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["path"]}
        }),
        serde_json::json!({
            "name": "validate_patch",
            "description": "Check that a unified diff's target file exists and the diff is well-formed, without applying it.",
            "inputSchema": {"type": "object", "properties": {
                "target_file": {"type": "string"}, "diff_text": {"type": "string"},
                "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["target_file", "diff_text"]}
        }),
        serde_json::json!({
            "name": "apply_patch",
            "description": "Dry-run then apply a unified diff against the workspace.",
            "inputSchema": {"type": "object", "properties": {
                "diff_text": {"type": "string"}, "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["diff_text"]}
        }),
        serde_json::json!({
            "name": "run_task",
            "description": "Run an allowlisted task command with a scrubbed environment and output capture.",
            "inputSchema": {"type": "object", "properties": {
                "task_name": {"type": "string"}, "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["task_name"]}
        }),
        serde_json::json!({
            "name": "create_change_bundle",
            "description": "Register a unified diff as a deterministically-identified change bundle.",
            "inputSchema": {"type": "object", "properties": {
                "diff_text": {"type": "string"}, "metadata": {"type": "object"},
                "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["diff_text"]}
        }),
        serde_json::json!({
            "name": "bundle_report",
            "description": "Report risk classification, test hints, and rollback guidance for a change bundle.",
            "inputSchema": {"type": "object", "properties": {
                "bundle_id": {"type": "string"}, "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["bundle_id"]}
        }),
        serde_json::json!({
            "name": "start_run",
            "description": "Start an owner-bound run to accumulate tool-call accounting.",
            "inputSchema": {"type": "object", "properties": {
                "metadata": {"type": "object"}, "owner_id": {"type": "string"}
            }, "required": ["owner_id"]}
        }),
        serde_json::json!({
            "name": "end_run",
            "description": "End a previously started run.",
            "inputSchema": {"type": "object", "properties": {
                "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["run_id", "owner_id"]}
        }),
        serde_json::json!({
            "name": "get_run_summary",
            "description": "Report a run's accumulated counters and elapsed time.",
            "inputSchema": {"type": "object", "properties": {
                "run_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["run_id", "owner_id"]}
        }),
        serde_json::json!({
            "name": "explain_policy_decision",
            "description": "Look up a past decision by audit_id and explain the rule, evidence, and compliant alternative.",
            "inputSchema": {"type": "object", "properties": {
                "audit_id": {"type": "string"}, "owner_id": {"type": "string"}
            }, "required": ["audit_id"]}
        }),
    ]
}

pub async fn handle_call(ctx: &mut ToolContext, name: &str, args: &Value) -> anyhow::Result<Value> {
    match name {
        "workspace_info" => workspace_info::call(ctx, args).await,
        "kernel_version" => kernel_version::call(ctx, args).await,
        "self_check" => self_check::call(ctx, args).await,
        "repo_search" => repo_search::call(ctx, args).await,
        "read_file" => read_file::call(ctx, args).await,
        "validate_patch" => apply_patch::validate(ctx, args).await,
        "apply_patch" => apply_patch::apply(ctx, args).await,
        "run_task" => run_task::call(ctx, args).await,
        "create_change_bundle" => change_bundle::create(ctx, args).await,
        "bundle_report" => change_bundle::report(ctx, args).await,
        "start_run" => run_lifecycle::start(ctx, args).await,
        "end_run" => run_lifecycle::end(ctx, args).await,
        "get_run_summary" => run_lifecycle::summary(ctx, args).await,
        "explain_policy_decision" => explain_policy::call(ctx, args).await,
        other => {
            let meta = ctx.governor.build_meta(
                other.to_string(),
                ward_core::governor::Risk::Read,
                Verdict::Error,
                Code::InvalidInput,
                uuid::Uuid::new_v4().to_string(),
                0,
                None,
                false,
            );
            let response = ResponseContract::new(
                Code::InvalidInput,
                format!("unknown tool: {other}"),
                serde_json::json!({"key": "UNKNOWN_TOOL"}),
                meta,
            );
            Ok(serde_json::to_value(response)?)
        }
    }
}
