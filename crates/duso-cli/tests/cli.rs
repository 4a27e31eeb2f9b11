use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn script(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn exit_code_matches_exit_call() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "main.du", "exit(7)");

    let mut cmd = cargo_bin_cmd!("duso");
    cmd.arg(path.to_str().unwrap()).assert().code(7);
}

#[test]
fn successful_completion_without_exit_is_code_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "main.du", "var x = 1 + 1");

    let mut cmd = cargo_bin_cmd!("duso");
    cmd.arg(path.to_str().unwrap()).assert().success();
}

#[test]
fn uncaught_throw_exits_nonzero_and_reports_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "main.du", r#"throw("boom")"#);

    let mut cmd = cargo_bin_cmd!("duso");
    cmd.arg(path.to_str().unwrap())
        .assert()
        .failure()
        .stderr(predicate::str::contains("boom"));
}

#[test]
fn missing_script_file_is_a_clean_failure_not_a_panic() {
    let mut cmd = cargo_bin_cmd!("duso");
    cmd.arg("/nonexistent/path/to/script.du").assert().failure();
}

#[test]
fn no_stdin_flag_makes_input_raise_instead_of_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "main.du", r#"input()"#);

    let mut cmd = cargo_bin_cmd!("duso");
    cmd.args(["--no-stdin", path.to_str().unwrap()]).assert().failure();
}

#[test]
fn config_blob_is_readable_from_the_sys_datastore() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(
        &dir,
        "main.du",
        r#"var sys = datastore("sys")
var cfg = sys.get("config")
exit(cfg.retries)"#,
    );

    let mut cmd = cargo_bin_cmd!("duso");
    cmd.args(["--config", r#"{"retries": 3}"#, path.to_str().unwrap()])
        .assert()
        .code(3);
}
