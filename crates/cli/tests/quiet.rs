use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn quiet_mode_silences_stderr() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let file = tmp.path().join("a.php");
    fs::write(
        &file,
        "<?php class Exec { public $c; function __destruct() { system($this->c); } }\nunserialize($_GET['d']);",
    )?;

    Command::cargo_bin("popchain")?
        .arg("scan")
        .arg(&file)
        .arg("--quiet")
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("Total: 1"));
    Ok(())
}

#[test]
fn debug_mode_logs_parsing() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let file = tmp.path().join("a.php");
    fs::write(&file, "<?php class A {}")?;

    Command::cargo_bin("popchain")?
        .arg("scan")
        .arg(&file)
        .arg("--debug")
        .assert()
        .success()
        .stderr(predicate::str::contains("Debug mode enabled"))
        .stderr(predicate::str::contains("Parsing finished"));
    Ok(())
}
