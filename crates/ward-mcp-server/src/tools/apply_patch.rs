use super::{blocked_outcome, extract_run_owner, finalize, scrubbed_command, ToolContext};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use ward_core::change_bundle::extract_target_files;
use ward_core::governor::Risk;
use ward_core::path_safety;
use ward_core::response::Code;

/// Checks that a unified diff's target file exists and the diff is
/// well-formed, without touching the filesystem otherwise.
pub async fn validate(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "validate_patch",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if decision.is_allowed() {
        build_validate_outcome(ctx, args)
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

fn build_validate_outcome(ctx: &mut ToolContext, args: &Value) -> (Code, String, Value) {
    let target_file = args.get("target_file").and_then(Value::as_str).unwrap_or("");
    let diff_text = args.get("diff_text").and_then(Value::as_str).unwrap_or("");

    let resolved = match path_safety::resolve_and_validate(
        &ctx.governor.root,
        target_file,
        &ctx.governor.policy.deny_globs,
        &ctx.governor.policy.allow_paths,
    ) {
        Ok(p) => p,
        Err(_) => {
            return blocked_outcome(
                "PATH_OUTSIDE_ALLOW_PATHS",
                "profiles.<profile>.allow_paths",
                json!({"target_file": target_file}),
            )
        }
    };

    if !resolved.exists() {
        return (Code::NotFound, format!("file not found: {target_file}"), json!({"key": "not_found"}));
    }

    if !(diff_text.contains("---") && diff_text.contains("+++")) {
        return (
            Code::InvalidInput,
            "diff_text is not a well-formed unified diff".to_string(),
            json!({"key": "invalid_input"}),
        );
    }

    let data = json!({"target_file": target_file, "violations": Vec::<Value>::new()});
    (Code::Success, format!("{target_file} is patchable"), data)
}

/// Parses target paths from the diff, validates each, then dry-run then
/// applies it via the system `patch` binary, falling back from `-p1` to
/// `-p0` when the strip level doesn't match.
pub async fn apply(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let diff_text = args.get("diff_text").and_then(Value::as_str).unwrap_or("").to_string();
    let targets = extract_target_files(&diff_text);

    let validate_args = json!({"diff_size": diff_text.len(), "paths": targets});
    let decision = ctx.governor.validate_action(
        "apply_patch",
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
        match validate_targets(ctx, &targets) {
            Some(blocked) => blocked,
            None => run_patch(ctx, &diff_text, &targets).await,
        }
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

fn validate_targets(ctx: &ToolContext, targets: &[String]) -> Option<(Code, String, Value)> {
    for target in targets {
        if path_safety::resolve_and_validate(
            &ctx.governor.root,
            target,
            &ctx.governor.policy.deny_globs,
            &ctx.governor.policy.allow_paths,
        )
        .is_err()
        {
            return Some(blocked_outcome(
                "PATH_OUTSIDE_ALLOW_PATHS",
                "profiles.<profile>.allow_paths",
                json!({"target_file": target}),
            ));
        }
    }
    None
}

async fn run_patch(ctx: &ToolContext, diff_text: &str, targets: &[String]) -> (Code, String, Value) {
    let timeout_secs = ctx.governor.policy.max_runtime_seconds;
    let root = ctx.governor.root.clone();

    let tmp = match tokio::task::spawn_blocking({
        let diff_text = diff_text.to_string();
        move || -> std::io::Result<tempfile::NamedTempFile> {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new()?;
            f.write_all(diff_text.as_bytes())?;
            Ok(f)
        }
    })
    .await
    {
        Ok(Ok(f)) => f,
        Ok(Err(e)) => return (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})),
        Err(e) => return (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})),
    };
    let tmp_path = tmp.path().to_path_buf();

    let dry_run = match run_patch_command(&root, &tmp_path, true, timeout_secs).await {
        Ok(output) => output,
        Err(outcome) => return outcome,
    };
    if !dry_run.status.success() {
        return (
            Code::ToolFailed,
            "patch dry-run failed".to_string(),
            json!({
                "key": "tool_failed",
                "stderr": String::from_utf8_lossy(&dry_run.stderr),
                "stdout": String::from_utf8_lossy(&dry_run.stdout),
            }),
        );
    }

    let applied = match run_patch_command(&root, &tmp_path, false, timeout_secs).await {
        Ok(output) => output,
        Err(outcome) => return outcome,
    };
    if !applied.status.success() {
        return (
            Code::ToolFailed,
            "patch apply failed".to_string(),
            json!({
                "key": "tool_failed",
                "stderr": String::from_utf8_lossy(&applied.stderr),
                "stdout": String::from_utf8_lossy(&applied.stdout),
            }),
        );
    }

    let data = json!({
        "modified_files": targets,
        "output": String::from_utf8_lossy(&applied.stdout),
    });
    (Code::Success, format!("applied patch to {} files", targets.len()), data)
}

/// Runs `patch -p1`, falling back to `-p0` if the `-p1` invocation itself
/// fails to spawn correctly (strip-level mismatch shows up as a non-zero
/// exit, which the caller inspects).
async fn run_patch_command(
    root: &std::path::Path,
    diff_path: &std::path::Path,
    dry_run: bool,
    timeout_secs: u64,
) -> Result<std::process::Output, (Code, String, Value)> {
    let run_once = |strip: &str, dry_run: bool| {
        let mut cmd = scrubbed_command("patch", root);
        cmd.arg(strip);
        if dry_run {
            cmd.arg("--dry-run");
        }
        cmd.arg("--input").arg(diff_path);
        cmd
    };

    let first = tokio::time::timeout(Duration::from_secs(timeout_secs), run_once("-p1", dry_run).output())
        .await
        .map_err(|_| (Code::Timeout, "patch invocation timed out".to_string(), json!({"key": "timeout"})))?
        .map_err(|e| (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})))?;

    if first.status.success() {
        return Ok(first);
    }

    tokio::time::timeout(Duration::from_secs(timeout_secs), run_once("-p0", dry_run).output())
        .await
        .map_err(|_| (Code::Timeout, "patch invocation timed out".to_string(), json!({"key": "timeout"})))?
        .map_err(|e| (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})))
}
