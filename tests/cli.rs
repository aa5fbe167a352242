use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

const HQ_SECRET: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn write_config(dir: &Path, file_name: &str, env: &str, extra: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(
        &config_path,
        format!(
            r#"
name = "attendix-cli-test"
env = "{env}"
sqlite_path = "{sqlite}"

[[branches]]
branch_id = "hq"
secrets = ["{HQ_SECRET}"]

[schedule]
shift_start = "09:00"
shift_end = "17:00"
workdays = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]

[observability.log]
output = "console"
{extra}
"#,
            sqlite = dir.join("data").display(),
        ),
    )
    .expect("write config");

    config_path
}

fn write_valid_config(dir: &Path, file_name: &str) -> PathBuf {
    write_config(dir, file_name, "dev", "")
}

fn run_attendix(args: &[&str], current_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_attendix")));
    cmd.args(args);
    cmd.env_remove("RUST_LOG");
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.output().expect("run attendix command")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_command_accepts_explicit_valid_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "valid.toml");
    let output = run_attendix(&["test", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_finds_default_config_in_current_directory() {
    let temp = tempfile::tempdir().expect("temp dir");
    write_valid_config(temp.path(), "attendix.toml");
    let output = run_attendix(&["test"], Some(temp.path()));

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_fails_for_missing_custom_config_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing_path = temp.path().join("missing.toml");
    let output = run_attendix(&["test", missing_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("Config file not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_attendix(&[], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = temp.path().join("bad.toml");
    fs::write(&bad_path, "name = \"broken\"\nbranches = [\n").expect("write invalid toml");

    let output = run_attendix(&["test", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("配置解析失败"), "unexpected stderr: {stderr}");
}

#[test]
fn test_command_fails_for_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "invalid-sync.toml",
        "dev",
        "[sync]\nendpoint = \"ftp://attendance.example.com\"\n",
    );
    let output = run_attendix(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("配置验证失败"), "unexpected stderr: {stderr}");
}

#[test]
fn test_command_succeeds_with_warning_only_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(temp.path(), "warning.toml", "staging", "");
    let output = run_attendix(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "warning-only config should succeed, stderr: {stderr}"
    );
}

#[test]
fn issue_is_refused_outside_dev() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(temp.path(), "prod.toml", "prod", "");
    let config = config_path.to_str().expect("utf8 path");

    let output = run_attendix(&["--config", config, "issue", "--branch", "hq"], None);
    assert!(!output.status.success(), "issue must be dev-only");
}

#[test]
fn issue_scan_replay_and_pending() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "attendix.toml");
    let config = config_path.to_str().expect("utf8 path");

    let issued = run_attendix(&["--config", config, "issue", "--branch", "hq"], None);
    assert!(
        issued.status.success(),
        "issue failed: {}",
        String::from_utf8_lossy(&issued.stderr)
    );
    let code = stdout_of(&issued).trim().to_string();
    assert!(!code.is_empty());

    let scanned = run_attendix(
        &["--config", config, "scan", "--employee", "e-1", "--type", "check-in", &code],
        None,
    );
    assert!(
        scanned.status.success(),
        "scan failed: {}",
        String::from_utf8_lossy(&scanned.stderr)
    );
    let event: serde_json::Value =
        serde_json::from_str(&stdout_of(&scanned)).expect("scan prints the event as JSON");
    assert_eq!(event["employee_id"], "e-1");
    assert_eq!(event["branch_id"], "hq");
    assert_eq!(event["sync_state"], "pending");

    // 同一二维码在新进程中依然被拒绝（持久化账本）
    let replay = run_attendix(
        &["--config", config, "scan", "--employee", "e-2", &code],
        None,
    );
    assert!(!replay.status.success(), "replayed code must be rejected");
    assert!(String::from_utf8_lossy(&replay.stderr).contains("二维码已被使用"));

    let pending = run_attendix(&["--config", config, "pending"], None);
    assert!(pending.status.success());
    let listing = stdout_of(&pending);
    assert_eq!(listing.lines().count(), 1, "only the accepted scan is pending");
    assert!(listing.contains("  e-1  "));

    let history = run_attendix(&["--config", config, "history", "--employee", "e-1"], None);
    assert!(history.status.success());
    assert_eq!(stdout_of(&history).lines().count(), 1);
}

#[test]
fn scan_refuses_memory_ledger() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "attendix.toml",
        "dev",
        "\n[validation]\nledger = \"memory\"\n",
    );
    let config = config_path.to_str().expect("utf8 path");

    let issued = run_attendix(&["--config", config, "issue", "--branch", "hq"], None);
    assert!(issued.status.success());
    let code = stdout_of(&issued).trim().to_string();

    // 内存账本随进程退出丢失，两次调用都不能记录考勤
    for employee in ["e-1", "e-2"] {
        let scanned = run_attendix(
            &["--config", config, "scan", "--employee", employee, &code],
            None,
        );
        assert!(!scanned.status.success(), "memory ledger must not accept one-shot scans");
        assert!(String::from_utf8_lossy(&scanned.stderr).contains("In-memory nonce ledger"));
    }

    let pending = run_attendix(&["--config", config, "pending"], None);
    assert!(pending.status.success());
    assert!(stdout_of(&pending).trim().is_empty());
}

#[test]
fn scan_rejects_garbage_code() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "attendix.toml");
    let config = config_path.to_str().expect("utf8 path");

    let output = run_attendix(
        &["--config", config, "scan", "--employee", "e-1", "not-a-qr-code"],
        None,
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("无法识别的二维码"));
}

#[test]
fn sync_requires_endpoint_and_requeue_validates_id() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "attendix.toml");
    let config = config_path.to_str().expect("utf8 path");

    let sync = run_attendix(&["--config", config, "sync"], None);
    assert!(!sync.status.success());
    assert!(String::from_utf8_lossy(&sync.stderr).contains("Sync endpoint is not configured"));

    let requeue = run_attendix(&["--config", config, "requeue", "not-a-uuid"], None);
    assert!(!requeue.status.success());
}
