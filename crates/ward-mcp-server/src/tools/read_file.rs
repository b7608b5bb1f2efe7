use super::{blocked_outcome, extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::time::Instant;
use ward_core::governor::Risk;
use ward_core::path_safety::{self, posix_relative};
use ward_core::response::Code;

/// Reads a workspace file, optionally restricted to a 1-indexed
/// `[start_line, end_line]` range. The Governor's own policy check has
/// already vetted the path against `deny_globs`/`allow_paths`; this
/// adapter enforces the two checks that depend on the file's actual
/// content: size and line-range sanity.
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "read_file",
        Risk::Read,
        args,
        run_id.as_deref(),
        owner_id.as_deref(),
        false,
    );

    let outcome = if decision.is_allowed() {
        build_outcome(ctx, args).await
    } else {
        (Code::Blocked, String::new(), json!({}))
    };

    finalize(ctx, decision, start, run_id, owner_id, false, outcome)
}

async fn build_outcome(ctx: &mut ToolContext, args: &Value) -> (Code, String, Value) {
    let Some(path) = args.get("path").and_then(Value::as_str) else {
        return (Code::InvalidInput, "missing 'path' argument".to_string(), json!({}));
    };
    let max_file_bytes = ctx.governor.policy.max_file_bytes;

    let resolved = match path_safety::resolve(&ctx.governor.root, path) {
        Ok(p) => p,
        Err(e) => return (Code::InvalidInput, e.to_string(), json!({})),
    };

    let metadata = match tokio::fs::metadata(&resolved).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (Code::NotFound, format!("file not found: {path}"), json!({"key": "not_found"}))
        }
        Err(e) => return (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})),
    };

    let size = metadata.len();
    if size > max_file_bytes {
        return blocked_outcome(
            "FILE_EXCEEDS_MAX_BYTES",
            "profiles.<profile>.max_file_bytes",
            json!({"size": size, "max_size": max_file_bytes}),
        );
    }

    let start_line = args.get("start_line").and_then(Value::as_i64);
    let end_line = args.get("end_line").and_then(Value::as_i64);
    if start_line.is_some_and(|s| s < 1) || end_line.is_some_and(|e| e < 1) {
        return blocked_outcome("INVALID_LINE_RANGE", "", json!({"start_line": start_line, "end_line": end_line}));
    }
    if let (Some(s), Some(e)) = (start_line, end_line) {
        if e < s {
            return blocked_outcome("INVALID_LINE_RANGE", "", json!({"start_line": s, "end_line": e}));
        }
    }

    let bytes = match tokio::fs::read(&resolved).await {
        Ok(b) => b,
        Err(e) => return (Code::ToolFailed, e.to_string(), json!({"key": "tool_failed"})),
    };
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let all_lines: Vec<&str> = text.lines().collect();
    let total_lines = all_lines.len();

    let (content, lines_read) = match (start_line, end_line) {
        (Some(s), Some(e)) => {
            let s = s as usize;
            let e = (e as usize).min(total_lines.max(1));
            let slice: Vec<&str> = all_lines
                .iter()
                .enumerate()
                .filter(|(i, _)| i + 1 >= s && i + 1 <= e)
                .map(|(_, l)| *l)
                .collect();
            (slice.join("\n"), format!("{s}-{e}"))
        }
        (Some(s), None) => {
            let s = s as usize;
            let slice: Vec<&str> = all_lines.iter().enumerate().filter(|(i, _)| i + 1 >= s).map(|(_, l)| *l).collect();
            (slice.join("\n"), format!("{s}-{total_lines}"))
        }
        (None, Some(e)) => {
            let e = (e as usize).min(total_lines.max(1));
            let slice: Vec<&str> = all_lines.iter().enumerate().filter(|(i, _)| i + 1 <= e).map(|(_, l)| *l).collect();
            (slice.join("\n"), format!("1-{e}"))
        }
        (None, None) => (text.clone(), format!("1-{total_lines}")),
    };

    let rel = posix_relative(&resolved, &ctx.governor.root).unwrap_or_else(|_| path.to_string());
    let data = json!({
        "path": rel,
        "content": content,
        "total_lines": total_lines,
        "lines_read": lines_read,
    });
    (Code::Success, format!("read {path}"), data)
}
