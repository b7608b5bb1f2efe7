mod support;

use support::{initialize, inner_result, spawn_server, tool_call};

#[test]
fn oversized_transport_message_is_rejected_before_json_parsing() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![("WARD_MAX_MSG_BYTES", "64")]);

    let huge = "x".repeat(500);
    let resp = tool_call(&mut child, 1, "workspace_info", serde_json::json!({"padding": huge}));
    assert!(resp.get("error").is_some(), "expected a transport-level JSON-RPC error, got {resp:?}");
    assert_eq!(resp["error"]["code"], -32600);

    let _ = child.kill();
}

#[test]
fn oversized_argument_field_is_rejected_before_dispatch() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![("WARD_MAX_FIELD_BYTES", "16")]);

    let resp = tool_call(
        &mut child,
        1,
        "read_file",
        serde_json::json!({"path": "this path is definitely longer than sixteen bytes"}),
    );
    assert!(resp.get("error").is_some(), "expected a transport-level JSON-RPC error, got {resp:?}");
    assert_eq!(resp["error"]["code"], -32602);

    let _ = child.kill();
}

#[test]
fn run_task_exceeding_max_runtime_seconds_is_reported_as_a_timeout() {
    let workspace = tempfile::tempdir().unwrap();
    let overlay_dir = tempfile::tempdir().unwrap();
    let overlay_path = overlay_dir.path().join("overlay.yaml");
    std::fs::write(
        &overlay_path,
        "profiles:\n  dev:\n    max_runtime_seconds: 1\n    allow_tasks:\n      slow: [\"sleep\", \"5\"]\n",
    )
    .unwrap();

    let mut child = spawn_server(workspace.path(), "dev", Some(&overlay_path), vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "run_task", serde_json::json!({"task_name": "slow"}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "error");
    assert_eq!(result["code"], "timeout");

    let _ = child.kill();
}

#[test]
fn read_file_over_max_file_bytes_is_blocked_with_the_observed_size() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("big.txt"), "a".repeat(200)).unwrap();

    let overlay_dir = tempfile::tempdir().unwrap();
    let overlay_path = overlay_dir.path().join("overlay.yaml");
    std::fs::write(&overlay_path, "profiles:\n  dev:\n    max_file_bytes: 100\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", Some(&overlay_path), vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": "big.txt"}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "FILE_EXCEEDS_MAX_BYTES");
    assert_eq!(result["data"]["policy_violation"]["details"]["size"], 200);
    assert_eq!(result["data"]["policy_violation"]["details"]["max_size"], 100);

    let _ = child.kill();
}

#[test]
fn run_task_output_over_max_output_bytes_is_truncated_and_flagged() {
    let workspace = tempfile::tempdir().unwrap();
    let overlay_dir = tempfile::tempdir().unwrap();
    let overlay_path = overlay_dir.path().join("overlay.yaml");
    std::fs::write(
        &overlay_path,
        "profiles:\n  dev:\n    max_output_bytes: 16\n    allow_tasks:\n      noisy: [\"echo\", \"this output is much longer than sixteen bytes\"]\n",
    )
    .unwrap();

    let mut child = spawn_server(workspace.path(), "dev", Some(&overlay_path), vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "run_task", serde_json::json!({"task_name": "noisy"}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "ok");
    assert!(result["data"]["stdout"].as_str().unwrap().ends_with("[TRUNCATED]"));
    assert_eq!(result["meta"]["output_truncated"], true);

    let _ = child.kill();
}

#[test]
fn read_file_with_only_start_line_reads_to_end_of_file() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": "f.txt", "start_line": 3}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "ok");
    assert_eq!(result["data"]["content"], "three\nfour");
    assert_eq!(result["data"]["lines_read"], "3-4");

    let _ = child.kill();
}

#[test]
fn read_file_with_only_end_line_reads_from_start_of_file() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": "f.txt", "end_line": 2}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "ok");
    assert_eq!(result["data"]["content"], "one\ntwo");
    assert_eq!(result["data"]["lines_read"], "1-2");

    let _ = child.kill();
}

#[test]
fn read_file_rejects_negative_line_numbers_instead_of_treating_them_as_absent() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": "f.txt", "start_line": -5}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "INVALID_LINE_RANGE");

    let _ = child.kill();
}

#[test]
fn read_file_rejects_end_line_before_start_line() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(
        &mut child,
        1,
        "read_file",
        serde_json::json!({"path": "f.txt", "start_line": 3, "end_line": 1}),
    );
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "INVALID_LINE_RANGE");

    let _ = child.kill();
}
