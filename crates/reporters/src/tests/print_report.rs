use crate::{printable, write_report, Format, ScanInfo};
use engine::AnalysisReport;

fn render(report: &AnalysisReport, fmt: Format, info: Option<&ScanInfo>) -> String {
    let mut buf = Vec::new();
    write_report(&mut buf, report, fmt, info).unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn text_lists_chains_with_payloads() {
    let report = super::sample_report();
    let info = ScanInfo {
        files_analyzed: 1,
        duration_ms: 5,
        failed_files: 0,
    };
    let rendered = render(&report, Format::Text, Some(&info));
    assert!(rendered.contains("Analysis Status"));
    assert!(rendered.contains("Found 2 POP chain(s)"));
    assert!(rendered.contains("Exec::__destruct → system (command-exec)"));
    assert!(rendered.contains("• Payload: O:4:\"Exec\":1:{s:3:\"cmd\";s:2:\"id\";}"));
    assert!(rendered.contains("• __wakeup bypass: Guarded"));
    assert!(rendered.contains("CVE-2016-7124"));
    assert!(rendered.contains("Total: 2"));
}

#[test]
fn text_without_chains() {
    let rendered = render(&AnalysisReport::default(), Format::Text, None);
    assert!(rendered.contains("No POP chains found"));
    assert!(!rendered.contains("Analysis Status"));
}

#[test]
fn json_carries_chains_and_stats() {
    let report = super::sample_report();
    let rendered = render(&report, Format::Json, None);
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value["total"], 2);
    assert_eq!(value["stats"]["controlled_sites"], 1);
    assert_eq!(value["chains"][0]["chain"]["sink"]["function"], "system");
    assert_eq!(value["chains"][1]["chain"]["requires_wakeup_bypass"], true);
    let raw = value["chains"][1]["payload"]["raw"].as_str().unwrap();
    assert!(raw.starts_with("O:7:\"Guarded\":3:{"));
}

#[test]
fn sarif_has_one_result_per_chain() {
    let report = super::sample_report();
    let rendered = render(&report, Format::Sarif, None);
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value["version"], "2.1.0");
    let results = value["runs"][0]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["ruleId"], "php.pop-chain");
    assert_eq!(results[0]["level"], "error");
    assert_eq!(
        results[0]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
        "app.php"
    );
    assert_eq!(results[0]["locations"][0]["physicalLocation"]["region"]["startLine"], 4);
}

#[test]
fn nul_bytes_are_visible() {
    assert_eq!(printable("s:7:\"\0*\0data\";"), "s:7:\"\\0*\\0data\";");
}

#[test]
fn property_injection_is_labelled() {
    let src = r#"<?php
class Gate {
    public $isAdmin = false;
    function __destruct() { if ($this->isAdmin === true) { echo $flag; } }
}
unserialize($_GET['g']);
"#;
    let unit = engine::SourceUnit::new("gate.php", parsers::parse_php(src, "gate.php").unwrap());
    let report = engine::analyze(&[unit], &engine::AnalysisOptions::default());

    let text = render(&report, Format::Text, None);
    assert!(text.contains("Gate::__destruct → echo (disclosure)"));
    assert!(text.contains("• property injection: set the checked properties"));
    assert!(text.contains("s:7:\"isAdmin\";b:1;"));

    let sarif: serde_json::Value = serde_json::from_str(&render(&report, Format::Sarif, None)).unwrap();
    let message = sarif["runs"][0]["results"][0]["message"]["text"].as_str().unwrap();
    assert!(message.starts_with("Property injection Gate::__destruct reaches echo"));
}
