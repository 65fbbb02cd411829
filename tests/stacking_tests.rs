use barkeep::stacking::{StackError, WindowStacker};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn raises_every_render_window_above_the_background() {
    let root = temp_workspace("raise");
    let log = root.join("calls.log");
    let tool = write_tool(
        &root,
        &format!(
            "echo \"$@\" >> '{}'\ncase \"$1 $3\" in\n  'id root') printf '0x100\\n0x101\\n' ;;\n  'id lemonbar') printf '0x200\\n0x201\\n' ;;\nesac\n",
            log.display()
        ),
    );

    let outcome = WindowStacker::new(tool.display().to_string(), "root", "lemonbar")
        .run()
        .expect("stack");
    assert_eq!(outcome.background_id, "0x100");
    assert_eq!(outcome.render_ids, vec!["0x200", "0x201"]);

    let calls = fs::read_to_string(&log).expect("log");
    assert_eq!(
        calls.lines().last(),
        Some("above -t 0x100 0x200 0x201")
    );
}

#[test]
fn tool_failure_carries_exit_code_and_stderr() {
    let root = temp_workspace("failure");
    let tool = write_tool(&root, "echo 'no display' >&2\nexit 3\n");

    let err = WindowStacker::new(tool.display().to_string(), "root", "lemonbar")
        .run()
        .expect_err("tool fails");
    match err {
        StackError::Failure { code, stderr, .. } => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("no display"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_render_window_is_reported() {
    let root = temp_workspace("missing-window");
    let tool = write_tool(
        &root,
        "case \"$1 $3\" in\n  'id root') echo 0x100 ;;\nesac\n",
    );

    let err = WindowStacker::new(tool.display().to_string(), "root", "lemonbar")
        .run()
        .expect_err("no render window");
    assert!(matches!(err, StackError::WindowNotFound { ref name } if name == "lemonbar"));
}

#[test]
fn missing_tool_is_a_launch_error() {
    let err = WindowStacker::new("/nonexistent/barkeep-xdo", "root", "lemonbar")
        .run()
        .expect_err("launch fails");
    assert!(matches!(err, StackError::Launch { .. }));
}

fn write_tool(root: &Path, body: &str) -> PathBuf {
    let tool = root.join("xdo");
    fs::write(&tool, format!("#!/bin/sh\n{body}")).expect("write tool");
    let mut perms = fs::metadata(&tool).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&tool, perms).expect("chmod");
    tool
}

fn temp_workspace(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("barkeep-stacking-{name}-{ts}"));
    fs::create_dir_all(&root).expect("mkdir workspace");
    root
}
