mod support;

use support::{initialize, inner_result, spawn_server};
use std::io::{BufRead, BufReader, Write};

#[test]
fn blank_and_malformed_lines_are_skipped_without_killing_the_session() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);

    let init = initialize(&mut child);
    assert!(init.get("result").is_some());

    let stdin = child.stdin.as_mut().unwrap();
    writeln!(stdin).unwrap();
    writeln!(stdin, "not json at all {{").unwrap();
    writeln!(
        stdin,
        "{}",
        serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "params": {}, "id": 9})
    )
    .unwrap();

    let stdout = child.stdout.as_mut().unwrap();
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let resp: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["id"], 9);
    assert!(resp["result"]["tools"].as_array().unwrap().len() > 0);

    let _ = child.kill();
}

#[test]
fn unknown_method_yields_a_json_rpc_method_not_found_error() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = support::send_req(
        &mut child,
        serde_json::json!({"jsonrpc": "2.0", "method": "nonexistent/method", "params": {}, "id": 1}),
    );
    assert_eq!(resp["error"]["code"], -32601);

    let _ = child.kill();
}

#[test]
fn tools_call_missing_params_yields_invalid_params_error() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = support::send_req(
        &mut child,
        serde_json::json!({"jsonrpc": "2.0", "method": "tools/call", "id": 1}),
    );
    assert_eq!(resp["error"]["code"], -32602);

    let _ = child.kill();
}

#[test]
fn unknown_tool_name_is_reported_as_an_mcp_error_result_not_a_crash() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = support::tool_call(&mut child, 1, "does_not_exist", serde_json::json!({}));
    assert_eq!(resp["result"]["isError"], true);
    let result = inner_result(&resp);
    assert_eq!(result["status"], "error");
    assert_eq!(result["data"]["key"], "UNKNOWN_TOOL");

    let _ = child.kill();
}
