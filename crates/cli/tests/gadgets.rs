use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

const LIB: &str = r#"<?php
namespace Vendor\Log;

abstract class Handler {
    protected $stream;
}

class FileHandler extends Handler {
    private $buffer;
    function __destruct() { file_put_contents($this->stream, $this->buffer); }
    function __wakeup() {}
}
"#;

#[test]
fn text_catalogue_lists_magic_and_sinks() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    fs::write(tmp.path().join("Log.php"), LIB)?;

    Command::cargo_bin("popchain")?
        .arg("gadgets")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r"Vendor\Log\Handler (abstract)"))
        .stdout(predicate::str::contains("extends Handler"))
        .stdout(predicate::str::contains("magic: __destruct, __wakeup"))
        .stdout(predicate::str::contains("__destruct → file_put_contents (file-write)"))
        .stdout(predicate::str::contains("Total: 2"));
    Ok(())
}

#[test]
fn json_catalogue_counts_classes() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    fs::write(tmp.path().join("Log.php"), LIB)?;

    let assert = Command::cargo_bin("popchain")?
        .arg("gadget")
        .arg(tmp.path())
        .args(["--format", "json"])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(v["total"], 2);
    assert_eq!(v["classes"].as_array().map(Vec::len), Some(2));
    Ok(())
}
