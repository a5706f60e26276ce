use assert_cmd::prelude::*;
use popchain::output::Format;
use std::fs;
use std::process::Command;
use std::str::FromStr;
use tempfile::tempdir;

#[test]
fn invalid_format_argument_errors() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let test_file = tmp.path().join("test.php");
    fs::write(&test_file, "<?php echo 1;")?;

    Command::cargo_bin("popchain")?
        .arg("scan")
        .arg(&test_file)
        .arg("--format")
        .arg("bogus")
        .assert()
        .failure();
    Ok(())
}

#[test]
fn format_from_str_is_case_insensitive() {
    assert_eq!(Format::from_str("JSON").unwrap(), Format::Json);
    assert_eq!(Format::from_str("Sarif").unwrap(), Format::Sarif);
    assert!(Format::from_str("xml").is_err());
}
