//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("romflash");
    // Keep the caller's environment out of the contract
    cmd.env_remove("ROMFLASH_PORT")
        .env_remove("ROMFLASH_BAUD")
        .env_remove("ROMFLASH_CHIP")
        .env_remove("ROMFLASH_NON_INTERACTIVE");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("romflash"))
        .stdout(predicate::str::contains("flash"))
        .stdout(predicate::str::contains("list-ports"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("romflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn flash_help_lists_options() {
    let mut cmd = cli_cmd();
    cmd.args(["flash", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--offset"))
        .stdout(predicate::str::contains("--no-reset"))
        .stdout(predicate::str::contains("--no-reboot"));
}

#[test]
fn list_ports_json_returns_valid_json() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["list-ports", "--json", "--all"])
        .output()
        .expect("command should execute");

    assert!(output.status.success(), "list-ports should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be valid JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_firmware_argument() {
    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("FIRMWARE"));
}

#[test]
fn exit_code_two_for_invalid_offset() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("app.bin");
    fs::write(&firmware, [0xE9u8; 64]).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .arg(&firmware)
        .args(["--offset", "0xNOPE"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid address"));
}

#[test]
fn exit_code_two_for_unknown_chip() {
    let mut cmd = cli_cmd();
    cmd.args(["--chip", "esp99", "chip-id"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_empty_firmware() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("empty.bin");
    fs::write(&firmware, b"").expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("flash")
        .arg(&firmware)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("empty"));
}

/// Exit code 1: generic error fallback
#[test]
fn exit_code_one_for_missing_firmware_file() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("flash")
        .arg(&nonexistent)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Failed to read firmware"));
}

#[test]
fn unopenable_port_fails_without_success() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("app.bin");
    fs::write(&firmware, [0xE9u8; 2048]).expect("write firmware");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--non-interactive", "flash"])
        .arg(&firmware)
        .output()
        .expect("command should execute");

    assert!(!output.status.success(), "bad port should not succeed");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("INVALID_PORT_NAME_XYZ"));
}

/// Exit code 3: configuration error
#[test]
fn exit_code_three_for_invalid_explicit_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["list-ports", "--json"])
        .assert()
        .failure()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("custom.toml"));
}

#[test]
fn exit_code_three_for_missing_explicit_config() {
    let dir = tempdir().expect("tempdir should be created");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--config", "absent.toml", "list-ports"])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn exit_code_three_for_unknown_chip_in_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[flash]\nchip = \"esp99\"\n").expect("write config");
    let firmware = dir.path().join("app.bin");
    fs::write(&firmware, [0xE9u8; 16]).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("flash")
        .arg(&firmware)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("esp99"));
}

#[test]
fn exit_code_three_for_zero_sync_attempts() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[flash]\nsync_attempts = 0\n").expect("write config");
    let firmware = dir.path().join("app.bin");
    fs::write(&firmware, [0xE9u8; 16]).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["--chip", "esp8266", "flash"])
        .arg(&firmware)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("sync_attempts"));
}

#[test]
fn list_ports_json_carries_esp_hints() {
    let dir = tempdir().expect("tempdir should be created");
    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json", "--all"])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON");
    for port in parsed.as_array().expect("JSON array") {
        assert!(port["likely_esp"].is_boolean(), "{port}");
        assert!(port["chip"].is_null() || port["chip"].is_string(), "{port}");
    }
}

#[test]
fn malformed_local_config_only_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("romflash.toml"), "invalid toml [[[").expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("romflash.toml"));
}

// ============================================================================
// Suggestions
// ============================================================================

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("falsh")
        .assert()
        .failure()
        .stderr(predicate::str::contains("flash"));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--json"));
}
