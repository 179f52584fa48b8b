#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Write a config whose interpreter is a shell script; the source file
/// arrives as `$1`
fn write_config(dir: &Path, script: &str) -> std::io::Result<()> {
    fs::write(dir.join("interp.sh"), script)?;
    fs::write(
        dir.join("playground.yml"),
        r#"
bridge:
  kind: worker
  program: sh
  args: ["interp.sh"]
  protocol: stdio
storage:
  path: "state/storage.json"
samples:
  dir: "samples"
"#,
    )
}

#[test]
fn run_prints_output_and_saves_source() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path(), "cat \"$1\"\n")?;
    fs::write(dir.path().join("hello.lox"), "print \"hi\";\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["run", "hello.lox"])
        .assert()
        .success()
        .stdout(predicate::str::contains("print \"hi\";"));

    let stored: Value = serde_json::from_str(&fs::read_to_string(
        dir.path().join("state/storage.json"),
    )?)?;
    assert_eq!(stored["savedCode"], "print \"hi\";\n");
    Ok(())
}

#[test]
fn run_with_no_save_leaves_storage_alone() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path(), "cat \"$1\"\n")?;
    fs::write(dir.path().join("hello.lox"), "print 1;\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["run", "hello.lox", "--no-save"])
        .assert()
        .success();

    assert!(!dir.path().join("state/storage.json").exists());
    Ok(())
}

#[test]
fn run_reports_errors_with_marked_source() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(
        dir.path(),
        "echo '[line 2] Error at end: Expect expression.' >&2\nexit 65\n",
    )?;
    fs::write(dir.path().join("broken.lox"), "var a = 1;\nprint ;\nprint a;\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["run", "broken.lox"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error at end: Expected expression."))
        .stderr(predicate::str::contains("exit code: 65"))
        .stderr(predicate::str::contains("2 ! print ;"))
        .stderr(predicate::str::contains("1 | var a = 1;"));
    Ok(())
}

#[test]
fn run_splits_escaped_newlines() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path(), "printf '%s\\n' 'first\\nsecond'\n")?;
    fs::write(dir.path().join("prog.lox"), "print 1;\n")?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["run", "prog.lox", "--no-save"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert_eq!(stdout, "first\nsecond\n");
    Ok(())
}

#[test]
fn samples_lists_selector_entries() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path(), "cat \"$1\"\n")?;
    let samples = dir.path().join("samples");
    fs::create_dir_all(&samples)?;
    fs::write(samples.join("hello.lox"), "print \"hello\";")?;
    fs::write(samples.join("fib.lox"), "fun fib(n) {}")?;
    fs::write(samples.join("notes.txt"), "not a sample")?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .arg("samples")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert_eq!(stdout, "choose\ndefault\nfib\nhello\n");
    Ok(())
}

#[test]
fn shell_runs_commands_from_stdin() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path(), "cat \"$1\"\n")?;
    fs::write(dir.path().join("prog.lox"), "print \"from file\";\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["shell", "--file", "prog.lox"])
        .write_stdin("show\nauto maybe\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 | print \"from file\";"))
        .stderr(predicate::str::contains("usage: auto on|off"));
    Ok(())
}

#[test]
fn run_without_sample_dir_still_runs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path(), "cat \"$1\"\n")?;
    fs::write(dir.path().join("prog.lox"), "print 1;\n")?;
    assert!(!dir.path().join("samples").exists());

    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["run", "prog.lox", "--no-save"])
        .assert()
        .success()
        .stdout("print 1;\n");
    Ok(())
}

#[test]
fn module_flag_completes_wasm_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("playground.yml"), "bridge:\n  kind: wasm\n")?;
    fs::write(dir.path().join("prog.lox"), "print 1;\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["run", "prog.lox", "--no-save"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bridge.module is required"));

    // With the module named on the command line the config loads; the run
    // then fails only because the module file does not exist
    #[allow(deprecated)]
    Command::cargo_bin("playground")?
        .current_dir(dir.path())
        .args(["--module", "golox.wasm", "run", "prog.lox", "--no-save"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bridge.module is required").not())
        .stderr(predicate::str::contains("golox.wasm"));
    Ok(())
}
