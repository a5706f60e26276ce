use super::*;

#[test]
fn empty_and_whitespace_inputs_fail() {
    for src in ["", "   \n\t  "] {
        let err = parse_php(src, "empty.php").unwrap_err();
        assert_eq!(err.reason, "empty input");
        assert_eq!(err.file, "empty.php");
    }
}

#[test]
fn binary_garbage_fails() {
    let err = parse_php("\u{0}\u{1}\u{2}ELF", "bin.php").unwrap_err();
    assert_eq!(err.reason, "binary content");
}

#[test]
fn partial_snippets_are_salvaged() {
    let ast = parse_snippet(
        r#"<?php
class Good {
    public function __destruct() { system($this->cmd); }
}
class Broken {
    public function f( { 
"#,
    );
    assert!(ast.error_count > 0);
    let classes = ast.find_by_kind(ast.root(), "ClassDecl");
    assert!(!classes.is_empty());
    assert_eq!(ast.find_by_kind(ast.root(), "Call").len(), 1);
}

#[test]
fn plain_html_parses_to_an_empty_program() {
    let ast = parse_snippet("<html><body>hello</body></html>");
    assert!(ast.is_empty());
    assert_eq!(ast.error_count, 0);
}

#[test]
fn parse_file_counts_skips() {
    use crate::{parse_file, ParserMetrics};
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("a.php");
    let empty = dir.path().join("b.php");
    let other = dir.path().join("c.txt");
    std::fs::write(&good, "<?php class A {}").unwrap();
    std::fs::write(&empty, "  ").unwrap();
    std::fs::write(&other, "<?php class C {}").unwrap();

    let mut metrics = ParserMetrics::default();
    assert!(parse_file(&good, Some(&mut metrics)).unwrap().is_some());
    assert!(parse_file(&empty, Some(&mut metrics)).unwrap().is_none());
    assert!(parse_file(&other, Some(&mut metrics)).unwrap().is_none());
    assert!(parse_file(&dir.path().join("missing.php"), None).is_err());
    assert_eq!(metrics.files_parsed, 1);
    assert_eq!(metrics.parse_errors, 1);
}
