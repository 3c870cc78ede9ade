//! Integration tests for the `sofa-query-server` binary entry point.
//!
//! Drives the worker over its standard streams the way a database host
//! would and checks exit statuses and log files.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::{contains, is_empty};
use tempfile::TempDir;

#[test]
fn answers_requests_until_input_closes() {
    let mut command = cargo_bin_cmd!("sofa-query-server");
    command.write_stdin("[\"reset\"]\n[\"add_fun\", \"_count\"]\n");
    command.assert().success().stdout("true\ntrue\n");
}

#[test]
fn unknown_command_exits_with_failure() {
    let mut command = cargo_bin_cmd!("sofa-query-server");
    command.write_stdin("[\"bogus\"]\n[\"reset\"]\n");
    command
        .assert()
        .code(1)
        .stdout("[\"error\",\"unknown_command\",\"unknown command 'bogus'\"]\n");
}

#[test]
fn legacy_revision_uses_object_errors() {
    let mut command = cargo_bin_cmd!("sofa-query-server");
    command.args(["--couchdb-version", "0.10.0"]);
    command.write_stdin("[\"bogus\"]\n");
    command
        .assert()
        .failure()
        .stdout(contains("{\"error\":\"unknown_command\""));
}

#[test]
fn invalid_flags_are_rejected_before_serving() {
    let mut command = cargo_bin_cmd!("sofa-query-server");
    command.args(["--couchdb-version", "one.two"]);
    command
        .assert()
        .code(2)
        .stdout(is_empty())
        .stderr(contains("not a number"));
}

#[test]
fn debug_logs_go_to_the_requested_file() {
    let dir = TempDir::new().expect("temp dir");
    let log_path = dir.path().join("worker.log");
    let mut command = cargo_bin_cmd!("sofa-query-server");
    command
        .arg("--log-file")
        .arg(&log_path)
        .arg("--debug")
        .write_stdin("[\"reset\"]\n");
    command.assert().success().stdout("true\n");

    let logged = std::fs::read_to_string(&log_path).expect("log file written");
    assert!(logged.contains("serving requests"));
    assert!(logged.contains("sofa-query-server::dispatch"));
}

#[test]
fn logging_is_silent_without_a_log_file() {
    let mut command = cargo_bin_cmd!("sofa-query-server");
    command.arg("--debug").write_stdin("[\"reset\"]\n");
    command
        .assert()
        .success()
        .stderr(is_empty());
}
