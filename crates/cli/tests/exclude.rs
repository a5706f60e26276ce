use assert_cmd::prelude::*;
use popchain::{default_excludes, is_excluded, parse_exclude};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn windows_separators_are_normalised() {
    let patterns = vec![parse_exclude(r"tests\fixtures\").unwrap()];
    assert!(is_excluded(
        Path::new(r"C:\app\tests\fixtures\Gadget.php"),
        &patterns,
        0
    ));
    assert!(!is_excluded(Path::new(r"C:\app\src\Gadget.php"), &patterns, 0));
}

#[test]
fn vendor_is_scanned_by_default() {
    let patterns = default_excludes();
    assert!(is_excluded(Path::new("/app/node_modules/x/a.php"), &patterns, 0));
    assert!(is_excluded(Path::new("/app/.git/hooks/a.php"), &patterns, 0));
    assert!(!is_excluded(
        Path::new("/app/vendor/monolog/src/Handler.php"),
        &patterns,
        0
    ));
}

#[test]
fn star_stays_in_one_segment() {
    let patterns = vec![parse_exclude("/app/*.php").unwrap()];
    assert!(is_excluded(Path::new("/app/index.php"), &patterns, 0));
    assert!(!is_excluded(Path::new("/app/lib/Exec.php"), &patterns, 0));
    assert!(parse_exclude("lib/[ab].php").is_err());
}

fn project(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let root = dir.path().join("app");
    fs::create_dir_all(root.join("gadgets")).unwrap();
    fs::write(
        root.join("gadgets/Exec.php"),
        "<?php class Exec { public $c; function __destruct() { system($this->c); } }",
    )
    .unwrap();
    fs::write(root.join("index.php"), "<?php unserialize($_GET['d']);").unwrap();
    root
}

#[test]
fn excluded_gadget_directory_removes_chain() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let root = project(&tmp);

    Command::cargo_bin("popchain")?
        .arg("scan")
        .arg(&root)
        .args(["--exclude", "gadgets/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No POP chains found"));
    Ok(())
}

#[test]
fn ignore_file_is_honoured() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let root = project(&tmp);
    fs::write(root.join(".popchainignore"), "# fixtures\ngadgets/\n")?;

    Command::cargo_bin("popchain")?
        .arg("scan")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("No POP chains found"));
    Ok(())
}

#[test]
fn oversized_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let root = project(&tmp);
    let big = format!(
        "<?php class Exec {{ public $c; function __destruct() {{ system($this->c); }} }}\n{}",
        "// padding\n".repeat(200)
    );
    fs::write(root.join("gadgets/Exec.php"), big)?;

    Command::cargo_bin("popchain")?
        .arg("scan")
        .arg(&root)
        .args(["--max-file-size", "1024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No POP chains found"));
    Ok(())
}
