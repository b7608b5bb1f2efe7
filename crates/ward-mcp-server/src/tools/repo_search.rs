use super::{blocked_outcome, extract_run_owner, finalize, ToolContext};
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;
use ward_core::governor::Risk;
use ward_core::path_safety::{glob_matches, posix_relative};
use ward_core::response::Code;

/// Searches workspace files for `query`, preferring `ripgrep` when it's
/// on `PATH` and falling back to a plain recursive walk otherwise. Both
/// paths honor `deny_globs` and an optional `file_globs` allowlist so
/// the fallback can't surface anything `rg` itself would have been
/// denied.
pub async fn call(ctx: &mut ToolContext, args: &Value) -> anyhow::Result<Value> {
    let start = Instant::now();
    let (run_id, owner_id) = extract_run_owner(args);
    let decision = ctx.governor.validate_action(
        "repo_search",
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
    let query = args.get("query").and_then(Value::as_str).unwrap_or("");
    if query.trim().is_empty() {
        return blocked_outcome("INVALID_QUERY", "", json!({"query": query}));
    }

    let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(50).max(1).min(200) as usize;
    let file_globs: Vec<String> = args
        .get("file_globs")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_else(|| vec!["*".to_string()]);

    let deny_globs = ctx.governor.policy.deny_globs.clone();
    let root = ctx.governor.root.clone();
    let max_file_bytes = ctx.governor.policy.max_file_bytes;
    let timeout_secs = ctx.governor.policy.max_runtime_seconds.min(10);

    let matches = match run_ripgrep(&root, query, limit, &deny_globs, &file_globs, timeout_secs).await {
        Some(lines) => lines,
        None => search_with_walk(&root, query, limit, &deny_globs, &file_globs, max_file_bytes),
    };

    let data = json!({
        "query": query,
        "matches": matches,
        "truncated": matches.len() >= limit,
    });
    (Code::Success, format!("{} matches", matches.len()), data)
}

async fn run_ripgrep(
    root: &Path,
    query: &str,
    limit: usize,
    deny_globs: &[String],
    file_globs: &[String],
    timeout_secs: u64,
) -> Option<Vec<String>> {
    Command::new("rg").arg("--version").output().await.ok()?;

    let mut cmd = Command::new("rg");
    cmd.arg("--no-heading")
        .arg("--line-number")
        .arg("--max-count")
        .arg(limit.to_string());
    for pattern in deny_globs {
        cmd.arg("-g").arg(format!("!{pattern}"));
    }
    for pattern in file_globs {
        cmd.arg("-g").arg(pattern);
    }
    cmd.arg(query).arg(root);

    let fut = cmd.output();
    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(Ok(out)) => out,
        Ok(Err(_)) => return None,
        Err(_) => return Some(vec!["[search timed out]".to_string()]),
    };

    match output.status.code() {
        Some(0) | Some(1) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut lines: Vec<String> = stdout.lines().map(str::to_string).collect();
            lines.truncate(limit);
            Some(lines)
        }
        _ => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Some(vec![format!("[ripgrep error] {stderr}")])
        }
    }
}

fn search_with_walk(
    root: &Path,
    query: &str,
    limit: usize,
    deny_globs: &[String],
    file_globs: &[String],
    max_file_bytes: u64,
) -> Vec<String> {
    let mut matches = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if matches.len() >= limit {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            if matches.len() >= limit {
                break;
            }
            let path = entry.path();
            let Ok(rel) = posix_relative(&path, root) else { continue };
            if deny_globs.iter().any(|g| glob_matches(g, &rel)) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if !file_globs.iter().any(|g| glob_matches(g, &rel)) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() > max_file_bytes {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            for (i, line) in content.lines().enumerate() {
                if matches.len() >= limit {
                    break;
                }
                if line.contains(query) {
                    matches.push(format!("{}:{}:{}", rel, i + 1, line.trim_end()));
                }
            }
        }
    }
    matches
}
