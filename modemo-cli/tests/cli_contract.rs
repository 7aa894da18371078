//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("modemo")
}

const MISSING_PORT: &str = "/dev/modemo-test-no-such-port";

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("modemo"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("modemo"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("modemo"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("modemo"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = cli_cmd();
    let assert = cmd.arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for name in [
        "list-ports",
        "detect",
        "diagnose",
        "status",
        "at",
        "scan-networks",
        "data-status",
        "fplmn",
        "clear-fplmn",
        "set-apn",
        "register",
        "completions",
    ] {
        assert!(stdout.contains(name), "help should mention {name}");
    }
}

#[test]
fn help_includes_usage_examples() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("Examples"));
}

// ============================================================================
// JSON Output Purity Tests
// ============================================================================

#[test]
fn list_ports_json_is_array_without_extra_output() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf-8");

    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("list-ports --json should be valid JSON");
    assert!(parsed.is_array(), "list-ports --json should return an array");
    for port in parsed.as_array().into_iter().flatten() {
        assert!(port.get("path").is_some(), "every port should have a path");
        assert!(port.get("priority").is_some(), "every port should have a priority");
    }
    assert!(
        stderr.is_empty(),
        "JSON output should not have stderr: got {stderr}"
    );
}

#[test]
fn list_ports_human_output_succeeds() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("list-ports")
        .assert()
        .success()
        .stdout(predicate::str::contains("Serial ports"));
}

#[test]
fn status_json_error_keeps_stdout_clean() {
    let mut cmd = cli_cmd();
    cmd.args(["--non-interactive", "-p", MISSING_PORT, "status", "--json"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn at_on_missing_port_reports_reason() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", MISSING_PORT, "at", "AT+CSQ"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Port does not exist"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_at_without_commands() {
    let mut cmd = cli_cmd();
    cmd.arg("at")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty().not());
}

#[test]
fn exit_code_two_for_invalid_baud() {
    let mut cmd = cli_cmd();
    cmd.args(["--baud", "fast", "status"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_unknown_shell() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "tcsh-ish"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn clear_fplmn_without_terminal_needs_yes() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", MISSING_PORT, "clear-fplmn"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn clear_fplmn_with_yes_reaches_the_port() {
    let mut cmd = cli_cmd();
    cmd.args(["--non-interactive", "-p", MISSING_PORT, "clear-fplmn", "--yes"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Port does not exist"));
}

#[test]
fn set_apn_rejects_bad_apn_before_connecting() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", MISSING_PORT, "set-apn", "bad\"apn"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unsupported character"))
        .stderr(predicate::str::contains(MISSING_PORT).not());
}

#[test]
fn register_manual_requires_operator() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", MISSING_PORT, "register", "--mode", "manual"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--operator"));
}

#[test]
fn register_rejects_operator_name() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", MISSING_PORT, "register", "--mode", "manual", "--operator", "T-Mobile"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("MCC+MNC"));
}

/// Configuration errors are warnings, not fatal.
#[test]
fn invalid_local_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("modemo.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");
    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn missing_explicit_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("absent.toml");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(missing.as_os_str())
        .arg("list-ports")
        .assert()
        .success()
        .stderr(predicate::str::contains("using defaults"));
}

#[test]
fn configured_port_is_used_without_detection() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("modemo.toml");
    fs::write(&config, format!("[port]\nname = \"{MISSING_PORT}\"\nbaud = 9600\n"))
        .expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--non-interactive", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(MISSING_PORT))
        .stderr(predicate::str::contains("9600"));
}

// ============================================================================
// Unknown Command/Flag Suggestion Tests
// ============================================================================

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("dettect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("detect").or(predicate::str::contains("did you mean")));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("json").or(predicate::str::contains("did you mean")));
}

// ============================================================================
// Completions
// ============================================================================

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_modemo()"))
        .stderr(predicate::str::is_empty());
}

// ============================================================================
// Non-interactive Mode Tests
// ============================================================================

#[test]
fn non_interactive_flag_is_recognized() {
    let mut cmd = cli_cmd();
    cmd.arg("--non-interactive")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn non_interactive_environment_variable_works() {
    // Boolean env values must be "true"/"false".
    let mut cmd = cli_cmd();
    cmd.env("MODEMO_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn skip_ports_environment_variable_is_accepted() {
    let mut cmd = cli_cmd();
    cmd.env("MODEMO_SKIP_PORTS", "/dev/ttyS0,/dev/ttyS1")
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// TTY Detection Tests (colors/animations disabled on non-TTY)
// ============================================================================

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

#[test]
fn error_prefix_is_plain_on_non_tty() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["-p", MISSING_PORT, "status"])
        .output()
        .expect("command should execute");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
    assert!(!stderr.contains("\x1b["), "stderr should carry no ANSI codes");
}
