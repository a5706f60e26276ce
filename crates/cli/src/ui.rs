//! Terminal decorations printed on stderr around the report.

use colored::*;
use std::env;

pub fn print_header() {
    let version = env!("CARGO_PKG_VERSION");
    let spaces = " ".repeat(24usize.saturating_sub(version.len()));
    eprintln!(
        r#"
    ╭──────────────────────────────────────╮
    │                                      │
    │        🐘  POPCHAIN  ANALYZER        │
    │                                      │
    │     PHP object injection chains      │
    │     and payload synthesis            │
    │     Version: {version}{spaces}│
    │                                      │
    ╰──────────────────────────────────────╯
"#
    );
}

/// Whether stderr decorations may use ANSI colors.
fn use_colored_output() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    if let Ok(term) = env::var("TERM") {
        if term == "dumb" || term == "unknown" {
            return false;
        }
    }
    if env::var("CI").is_ok() || env::var("CONTINUOUS_INTEGRATION").is_ok() {
        return false;
    }
    true
}

fn tag(tag: &str, paint: fn(&str) -> ColoredString) -> String {
    if use_colored_output() {
        paint(tag).to_string()
    } else {
        tag.to_string()
    }
}

/// One-line outcome of a scan.
pub fn print_scan_summary(chains: usize, controlled_sites: usize, failed_files: usize) {
    if chains > 0 {
        eprintln!(
            "[{}] {chains} exploitable chain(s) across {controlled_sites} user-controlled unserialize() call(s)",
            tag("CHAINS", |s| s.bright_red().bold())
        );
    } else {
        eprintln!("[{}] no exploitable chains", tag("CLEAN", |s| s.bright_green().bold()));
    }
    if failed_files > 0 {
        eprintln!(
            "[{}] {failed_files} file(s) could not be parsed",
            tag("SKIPPED", |s| s.bright_yellow())
        );
    }
}
