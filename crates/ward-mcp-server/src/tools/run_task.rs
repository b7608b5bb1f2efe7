use super::{extract_run_owner, finalize, scrubbed_command, ToolContext};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use ward_core::governor::Risk;
use ward_core::response::Code;

const TRUNCATION_MARKER: &str = "\n... [TRUNCATED]";

/// Runs an allowlisted task's fixed argv with a scrubbed `PATH`/`LANG`
/// environment, under `cwd=workspace_root` and a hard timeout. Neither
/// stream is passed through a shell. Output over `max_output_bytes` per
/// stream is truncated independently and flagged in the response meta.
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "run_task",
        Risk::Execute,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let (outcome, output_truncated) = if decision.is_allowed() {
        run(ctx, args).await
    } else {
        ((Code::Blocked, String::new(), json!({})), false)
    };

    finalize(ctx, decision, start, run_id, owner_id, output_truncated, outcome)
}

async fn run(ctx: &mut ToolContext, args: &Value) -> ((Code, String, Value), bool) {
    let task_name = args.get("task_name").and_then(Value::as_str).unwrap_or("");
    let Some(argv) = ctx.governor.policy.allow_tasks.get(task_name).cloned() else {
        // Governor's own policy check already blocked this; reachable only
        // if that check somehow passed with no matching entry.
        return (
            (Code::InvalidInput, format!("task not allowlisted: {task_name}"), json!({"key": "invalid_input"})),
            false,
        );
    };
    let Some((program, rest)) = argv.split_first() else {
        return (
            (Code::InvalidInput, format!("empty argv for task: {task_name}"), json!({"key": "invalid_input"})),
            false,
        );
    };

    let max_output_bytes = ctx.governor.policy.max_output_bytes as usize;
    let timeout_secs = ctx.governor.policy.max_runtime_seconds;
    let root = ctx.governor.root.clone();

    let mut cmd = scrubbed_command(program, &root);
    cmd.args(rest);

    let task_start = Instant::now();
    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            return (
                (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})),
                false,
            )
        }
        Err(_) => {
            return (
                (Code::Timeout, format!("task '{task_name}' exceeded {timeout_secs}s"), json!({"key": "timeout"})),
                false,
            )
        }
    };
    let duration_seconds = task_start.elapsed().as_secs_f64();

    let (stdout, stdout_truncated) = truncate(&output.stdout, max_output_bytes);
    let (stderr, stderr_truncated) = truncate(&output.stderr, max_output_bytes);
    let output_truncated = stdout_truncated || stderr_truncated;

    let mut data = json!({
        "exit_code": output.status.code().unwrap_or(-1),
        "stdout": stdout,
        "stderr": stderr,
        "duration_seconds": duration_seconds,
    });

    if task_name == "pytest" {
        if let Some(summary) = stdout
            .lines()
            .rev()
            .find(|l| l.contains("==") && (l.contains("passed") || l.contains("failed")))
        {
            data["pytest_summary"] = json!(summary);
        }
    }
    if task_name == "ruff" {
        let violations = stdout.lines().filter(|l| l.contains(".py:")).count();
        data["ruff_violations_count"] = json!(violations);
    }

    let summary = format!("task '{task_name}' exited {}", output.status.code().unwrap_or(-1));
    ((Code::Success, summary, data), output_truncated)
}

fn truncate(bytes: &[u8], max_bytes: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return (text.into_owned(), false);
    }
    let mut cut = max_bytes.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (format!("{}{}", &text[..cut], TRUNCATION_MARKER), true)
}
