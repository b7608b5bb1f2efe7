use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Spawns the server binary rooted at `workspace`, in `profile`, with an
/// optional policy overlay and extra transport-level env vars layered on
/// top of the inherited environment.
pub fn spawn_server(
    workspace: &Path,
    profile: &str,
    policy_path: Option<&Path>,
    extra_env: Vec<(&str, &str)>,
) -> Child {
    let bin = env!("CARGO_BIN_EXE_ward-mcp-server");
    let mut cmd = Command::new(bin);
    cmd.arg("--workspace-root").arg(workspace);
    cmd.arg("--profile").arg(profile);
    if let Some(p) = policy_path {
        cmd.arg("--policy-path").arg(p);
    }
    cmd.env_clear();
    cmd.envs(std::env::vars());
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd.spawn().expect("failed to spawn ward-mcp-server")
}

pub fn send_req(child: &mut Child, req: Value) -> Value {
    let stdin = child.stdin.as_mut().expect("stdin not piped");
    writeln!(stdin, "{}", req).expect("failed to write request");

    let stdout = child.stdout.as_mut().expect("stdout not piped");
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    reader.read_line(&mut line).expect("failed to read response");
    serde_json::from_str(&line).expect("response was not valid JSON")
}

pub fn tool_call(child: &mut Child, id: i64, name: &str, arguments: Value) -> Value {
    let req = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments},
        "id": id
    });
    send_req(child, req)
}

/// Unwraps the MCP `content[0].text` envelope into the inner
/// `ResponseContract` JSON.
pub fn inner_result(resp: &Value) -> Value {
    let text = resp["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("missing content text in {resp:?}"));
    serde_json::from_str(text).expect("tool result text was not valid JSON")
}

pub fn initialize(child: &mut Child) -> Value {
    send_req(
        child,
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "test", "version": "1.0"}},
            "id": 0
        }),
    )
}
