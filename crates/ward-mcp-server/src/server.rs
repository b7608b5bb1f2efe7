use crate::config::ServerTransportConfig;
use crate::tools::{self, ToolContext};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use ward_core::governor::Governor;
use ward_core::policy;
use ward_core::runtime_config::RuntimeConfig;

static RID: AtomicU64 = AtomicU64::new(1);

fn next_rid() -> String {
    let n = RID.fetch_add(1, Ordering::Relaxed);
    format!("r-{n:06}")
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

pub struct Server;

impl Server {
    /// Reads newline-delimited JSON-RPC requests from stdin and writes
    /// responses to stdout until the input stream closes. Every
    /// `tools/call` is adjudicated by the Governor: there is no fail-open
    /// path on internal error, a crashed tool call is reported as an
    /// MCP `isError: true` result, never silently allowed.
    pub async fn run(runtime: RuntimeConfig, cfg: ServerTransportConfig) -> Result<()> {
        let policy = policy::load_effective_policy(
            &runtime.profile,
            runtime.policy_path.as_deref(),
            runtime.strict,
        )
        .map_err(|e| anyhow::anyhow!("failed to load policy: {e}"))?;
        let governor = Governor::new(policy, runtime.workspace_root.clone(), runtime.strict)?;
        let mut ctx = ToolContext { governor };

        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin).lines();
        let mut stdout = io::stdout();

        while let Some(line) = reader.next_line().await? {
            let rid = next_rid();

            if line.len() > cfg.max_message_bytes {
                tracing::warn!(
                    event = "limit_exceeded",
                    rid = %rid,
                    bytes_in = line.len(),
                    max = cfg.max_message_bytes,
                );
                let resp = JsonRpcResponse::error(
                    None,
                    -32600,
                    format!("message bytes={} > max={}", line.len(), cfg.max_message_bytes),
                );
                write_response(&mut stdout, &resp).await?;
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let req: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(event = "json_parse_error", rid = %rid, error = %e);
                    continue;
                }
            };

            let resp = match req.method.as_str() {
                "initialize" => {
                    let caps = serde_json::json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {
                            "name": "ward-mcp-server",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    });
                    JsonRpcResponse::ok(req.id.clone(), caps)
                }
                "notifications/initialized" => {
                    tracing::info!(event = "initialized", rid = %rid);
                    continue;
                }
                "tools/list" => JsonRpcResponse::ok(
                    req.id.clone(),
                    serde_json::json!({"tools": tools::list_tools()}),
                ),
                "tools/call" => handle_tools_call(&mut ctx, &cfg, &rid, &req).await,
                _ => JsonRpcResponse::error(
                    req.id.clone(),
                    -32601,
                    format!("Method not found: {}", req.method),
                ),
            };

            write_response(&mut stdout, &resp).await?;
        }

        Ok(())
    }
}

/// Finds the first top-level string-valued argument field whose byte
/// length exceeds `max_field_bytes`, e.g. an oversized `diff_text` or
/// `content` blob the caller tried to push past the Governor entirely.
fn oversized_field(args: &Value, max_field_bytes: usize) -> Option<(String, usize)> {
    let obj = args.as_object()?;
    obj.iter().find_map(|(k, v)| {
        let s = v.as_str()?;
        (s.len() > max_field_bytes).then(|| (k.clone(), s.len()))
    })
}

async fn write_response(stdout: &mut io::Stdout, resp: &JsonRpcResponse) -> Result<()> {
    let mut line = serde_json::to_string(resp)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn handle_tools_call(
    ctx: &mut ToolContext,
    cfg: &ServerTransportConfig,
    rid: &str,
    req: &JsonRpcRequest,
) -> JsonRpcResponse {
    let Some(params) = req.params.clone() else {
        return JsonRpcResponse::error(req.id.clone(), -32602, "Missing params".to_string());
    };
    let name = params.get("name").and_then(Value::as_str).unwrap_or("").to_string();
    let default_args = serde_json::json!({});
    let args = params.get("arguments").unwrap_or(&default_args).clone();

    if let Some((field, len)) = oversized_field(&args, cfg.max_field_bytes) {
        tracing::warn!(
            event = "limit_exceeded",
            rid = %rid,
            field = %field,
            bytes_in = len,
            max = cfg.max_field_bytes,
        );
        return JsonRpcResponse::error(
            req.id.clone(),
            -32602,
            format!("field '{field}' bytes={len} > max_field_bytes={}", cfg.max_field_bytes),
        );
    }

    let start = std::time::Instant::now();
    tracing::info!(event = "tool_call_start", rid = %rid, rpc_id = ?req.id, tool = %name);

    let fut = tools::handle_call(ctx, &name, &args);
    let result = match timeout(Duration::from_millis(cfg.call_timeout_ms), fut).await {
        Ok(res) => res,
        Err(_) => {
            let dur = start.elapsed().as_millis() as u64;
            tracing::warn!(
                event = "tool_call_timeout",
                rid = %rid,
                rpc_id = ?req.id,
                tool = %name,
                duration_ms = dur,
            );
            Ok(serde_json::json!({
                "status": "error",
                "code": "timeout",
                "summary": format!("tool call exceeded {}ms", cfg.call_timeout_ms),
            }))
        }
    };

    let dur = start.elapsed().as_millis() as u64;
    match result {
        Ok(res) => {
            tracing::info!(
                event = "tool_call_done",
                rid = %rid,
                rpc_id = ?req.id,
                tool = %name,
                duration_ms = dur,
                status = %res.get("status").and_then(Value::as_str).unwrap_or(""),
            );
            let is_error = res.get("status").and_then(Value::as_str) != Some("ok");
            let json_text = serde_json::to_string_pretty(&res).unwrap_or_default();
            let mcp_result = serde_json::json!({
                "content": [{"type": "text", "text": json_text}],
                "isError": is_error
            });
            JsonRpcResponse::ok(req.id.clone(), mcp_result)
        }
        Err(e) => {
            tracing::error!(
                event = "tool_call_crash",
                rid = %rid,
                rpc_id = ?req.id,
                tool = %name,
                duration_ms = dur,
                error = %e,
            );
            let safe_resp = serde_json::json!({
                "status": "error",
                "code": "tool_failed",
                "summary": e.to_string(),
            });
            let json_text = serde_json::to_string_pretty(&safe_resp).unwrap_or_default();
            let mcp_result = serde_json::json!({
                "content": [{"type": "text", "text": json_text}],
                "isError": true
            });
            JsonRpcResponse::ok(req.id.clone(), mcp_result)
        }
    }
}
