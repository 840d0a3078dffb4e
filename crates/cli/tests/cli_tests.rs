//! CLI integration tests

use std::process::Command;

fn mq(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-p", "metrics-query", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = mq(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Query tool for loaded API metrics"));
    assert!(stdout.contains("ping"), "Should show ping command");
    assert!(stdout.contains("top-endpoints"), "Should show top-endpoints");
    assert!(stdout.contains("top-timestamps"), "Should show top-timestamps");
    assert!(stdout.contains("daily-peaks"), "Should show daily-peaks");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = mq(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("mq"), "Should show binary name");
}

/// Test top-endpoints subcommand help
#[test]
fn test_top_endpoints_help() {
    let output = mq(&["top-endpoints", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--limit"), "Should show limit option");
}

/// Test format option
#[test]
fn test_format_option() {
    let output = mq(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("--endpoint"), "Should show endpoint option");
}

/// Test invalid command handling
#[test]
fn test_invalid_command() {
    let output = mq(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

/// Test unreachable server reports an error
#[test]
fn test_ping_unreachable() {
    let output = mq(&["--endpoint", "http://127.0.0.1:1", "ping"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Ping should fail without a server");
    assert!(stderr.contains("/ping"), "Should explain what failed");
}
