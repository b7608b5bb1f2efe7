mod support;

use support::{initialize, inner_result, spawn_server, tool_call};

#[test]
fn path_traversal_outside_the_workspace_root_is_blocked() {
    let workspace = tempfile::tempdir().unwrap();
    let outside = workspace.path().parent().unwrap().join("ward_security_test_outside.txt");
    std::fs::write(&outside, "top secret").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(
        &mut child,
        1,
        "read_file",
        serde_json::json!({"path": "../ward_security_test_outside.txt"}),
    );
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "PATH_SAFETY_ERROR");

    let _ = child.kill();
    let _ = std::fs::remove_file(&outside);
}

#[test]
fn deny_globs_block_dotenv_files_even_inside_the_workspace() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join(".env"), "SECRET=1\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": ".env"}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "PATH_MATCHES_DENY_GLOBS");

    let _ = child.kill();
}

#[cfg(unix)]
#[test]
fn symlink_escaping_the_workspace_root_is_blocked() {
    use std::os::unix::fs::symlink;

    let workspace = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let secret = outside.path().join("secret.txt");
    std::fs::write(&secret, "top secret").unwrap();
    let link = workspace.path().join("escape.txt");
    symlink(&secret, &link).unwrap();

    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": "escape.txt"}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "PATH_SAFETY_ERROR");

    let _ = child.kill();
}

#[test]
fn allow_paths_overlay_restricts_reads_to_the_listed_subdirectory() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(workspace.path().join("src")).unwrap();
    std::fs::write(workspace.path().join("src/lib.rs"), "fn lib() {}\n").unwrap();
    std::fs::create_dir_all(workspace.path().join("docs")).unwrap();
    std::fs::write(workspace.path().join("docs/readme.md"), "hello\n").unwrap();

    let overlay_dir = tempfile::tempdir().unwrap();
    let overlay_path = overlay_dir.path().join("overlay.yaml");
    std::fs::write(&overlay_path, "profiles:\n  dev:\n    allow_paths: [\"src\"]\n").unwrap();

    let mut child = spawn_server(workspace.path(), "dev", Some(&overlay_path), vec![]);
    initialize(&mut child);

    let resp = tool_call(&mut child, 1, "read_file", serde_json::json!({"path": "src/lib.rs"}));
    assert_eq!(inner_result(&resp)["status"], "ok");

    let resp = tool_call(&mut child, 2, "read_file", serde_json::json!({"path": "docs/readme.md"}));
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "PATH_OUTSIDE_ALLOW_PATHS");

    let _ = child.kill();
}

#[test]
fn run_task_never_interprets_an_unlisted_task_name_as_a_shell_command() {
    let workspace = tempfile::tempdir().unwrap();
    let mut child = spawn_server(workspace.path(), "dev", None, vec![]);
    initialize(&mut child);

    let resp = tool_call(
        &mut child,
        1,
        "run_task",
        serde_json::json!({"task_name": "echo hi; rm -rf /"}),
    );
    let result = inner_result(&resp);
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["data"]["policy_violation"]["key"], "TASK_NOT_ALLOWLISTED");

    let _ = child.kill();
}
