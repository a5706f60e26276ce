//! Formatters for POP-chain reports in text, JSON and SARIF.

use engine::{AnalysisReport, Catalogue, Chain, ChainFinding, ChainKind, SoftWarning};
use serde::Serialize;
use std::io::{self, Write};
use tracing::debug;

mod sarif;

pub use sarif::{to_sarif, RULE_ID};

/// Rating shown next to a chain, derived from its exploitability score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn of(chain: &Chain) -> Self {
        match chain.exploitability {
            80.. => Severity::Critical,
            60..=79 => Severity::High,
            40..=59 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Returns the severity colored with simple ANSI codes.
fn color_severity(sev: Severity) -> String {
    let (code, text) = match sev {
        Severity::Low => ("\x1b[32m", "LOW"),
        Severity::Medium => ("\x1b[33m", "MEDIUM"),
        Severity::High => ("\x1b[31m", "HIGH"),
        Severity::Critical => ("\x1b[31m", "CRITICAL"),
    };
    format!("{code}{text}\x1b[0m")
}

fn simple_box(title: &str) -> String {
    let width = title.len() + 2;
    format!(
        "╭{}╮\n│ {} │\n╰{}╯\n",
        "─".repeat(width),
        title,
        "─".repeat(width)
    )
}

const RULE: &str =
    "    ──────────────────────────────────────────────────────────────────────────────\n";

fn create_stats(info: &ScanInfo, report: &AnalysisReport) -> String {
    let stats = &report.stats;
    let mut output = String::new();
    output.push_str(&simple_box("Analysis Status"));
    output.push('\n');
    output.push_str(&format!(
        "    Analyzed {} PHP files, {} classes:\n\n",
        info.files_analyzed, stats.classes
    ));
    output.push_str("    Metric                    Value\n");
    output.push_str(RULE);
    output.push_str(&format!("    unserialize() calls       {}\n", stats.sites));
    output.push_str(&format!(
        "    User-controlled           {}\n",
        stats.controlled_sites
    ));
    output.push_str(&format!("    Trigger templates         {}\n", stats.templates));
    output.push_str(&format!("    Duration                  {}ms\n", info.duration_ms));
    output.push_str(&format!("    Failed files              {}\n", info.failed_files));
    output.push_str(&format!(
        "    Success rate              {:.1}%\n",
        if info.files_analyzed > 0 {
            (info.files_analyzed.saturating_sub(info.failed_files) as f64
                / info.files_analyzed as f64)
                * 100.0
        } else {
            0.0
        }
    ));
    output
}

/// Serialized data with NUL bytes shown as `\0`.
pub fn printable(raw: &str) -> String {
    raw.replace('\0', "\\0")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported output formats.
pub enum Format {
    /// Human-readable output in plain text.
    Text,
    /// JSON structure for integrations.
    Json,
    /// Report conforming to the SARIF specification.
    Sarif,
}

#[derive(Serialize)]
struct ChainsOut<'a> {
    chains: &'a [ChainFinding],
    warnings: &'a [SoftWarning],
    stats: &'a engine::AnalysisStats,
    total: usize,
}

#[derive(Serialize)]
struct GadgetsOut<'a> {
    classes: &'a [engine::ClassEntity],
    total: usize,
}

/// Additional information to display in statistics.
#[derive(Debug, Clone, Default)]
pub struct ScanInfo {
    pub files_analyzed: usize,
    pub duration_ms: u64,
    pub failed_files: usize,
}

/// Prints the chains of `report` in the selected format.
///
/// # Example
/// ```
/// use reporters::{print_report, Format, ScanInfo};
/// let report = engine::AnalysisReport::default();
/// let info = ScanInfo { files_analyzed: 3, duration_ms: 12, failed_files: 0 };
/// print_report(&report, Format::Text, Some(&info)).unwrap();
/// ```
pub fn print_report(report: &AnalysisReport, fmt: Format, scan_info: Option<&ScanInfo>) -> io::Result<()> {
    let mut out = io::stdout();
    write_report(&mut out, report, fmt, scan_info)
}

/// Writes the report to a generic `Write`, used for tests.
pub fn write_report<W: Write>(
    out: &mut W,
    report: &AnalysisReport,
    fmt: Format,
    scan_info: Option<&ScanInfo>,
) -> io::Result<()> {
    debug!(chains = report.chains.len(), format = ?fmt, "Writing report");
    match fmt {
        Format::Text => {
            if let Some(info) = scan_info {
                writeln!(out, "{}", create_stats(info, report))?;
            }
            writeln!(out, "{}", simple_box("Results"))?;
            if report.chains.is_empty() {
                writeln!(out, "✔ No POP chains found.")?;
            } else {
                writeln!(out, "⚠ Found {} POP chain(s):\n", report.chains.len())?;
                for finding in &report.chains {
                    write_chain(out, finding)?;
                    writeln!(out)?;
                }
                writeln!(out, "Total: {}", report.chains.len())?;
            }
            if !report.warnings.is_empty() {
                writeln!(out)?;
                writeln!(out, "{} warning(s):", report.warnings.len())?;
                for w in &report.warnings {
                    writeln!(out, "    {w}")?;
                }
            }
        }
        Format::Json => {
            let json = ChainsOut {
                chains: &report.chains,
                warnings: &report.warnings,
                stats: &report.stats,
                total: report.chains.len(),
            };
            serde_json::to_writer_pretty(&mut *out, &json)?;
            writeln!(out)?;
        }
        Format::Sarif => {
            let sarif = sarif::to_sarif(&report.chains);
            serde_json::to_writer_pretty(&mut *out, &sarif)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_chain<W: Write>(out: &mut W, finding: &ChainFinding) -> io::Result<()> {
    let chain = &finding.chain;
    writeln!(
        out,
        "{} [{}] {}::{} → {} ({})",
        color_severity(Severity::of(chain)),
        chain.exploitability,
        chain.entry_class,
        chain.entry_method,
        chain.sink.function,
        chain.sink.tier
    )?;
    for (i, step) in chain.steps.iter().enumerate() {
        writeln!(
            out,
            "    {}. {}::{}  {}:{}",
            i + 1,
            step.class,
            step.method,
            step.file_id,
            step.location
        )?;
        writeln!(out, "       ↳  {}", step.trigger)?;
    }
    if chain.kind == ChainKind::PropertyInjection {
        writeln!(out, "    • {}: set the checked properties, no nested objects", chain.kind)?;
    }
    if chain.requires_wakeup_bypass {
        writeln!(out, "    • __wakeup bypass: {}", chain.bypass_classes.join(", "))?;
    }
    match (&finding.payload, &finding.payload_error) {
        (Some(payload), _) => {
            writeln!(out, "    • Payload: {}", printable(&payload.raw))?;
            if payload.delivered() != payload.raw {
                writeln!(out, "    • Send: {}", payload.delivered())?;
            }
            for note in &payload.bypass_notes {
                writeln!(out, "    • {note}")?;
            }
        }
        (None, Some(err)) => writeln!(out, "    • Payload failed: {err}")?,
        (None, None) => {}
    }
    Ok(())
}

/// Prints the gadget catalogue.
pub fn print_gadgets(catalogue: &Catalogue, fmt: Format) -> io::Result<()> {
    let mut out = io::stdout();
    write_gadgets(&mut out, catalogue, fmt)
}

pub fn write_gadgets<W: Write>(out: &mut W, catalogue: &Catalogue, fmt: Format) -> io::Result<()> {
    match fmt {
        Format::Json | Format::Sarif => {
            let json = GadgetsOut {
                classes: catalogue.classes(),
                total: catalogue.len(),
            };
            serde_json::to_writer_pretty(&mut *out, &json)?;
            writeln!(out)?;
        }
        Format::Text => {
            writeln!(out, "{}", simple_box("Gadgets"))?;
            for class in catalogue.classes() {
                let magic: Vec<String> = class.magic_methods.keys().map(|k| k.to_string()).collect();
                let abstract_tag = if class.is_abstract { " (abstract)" } else { "" };
                writeln!(
                    out,
                    "{}{}  {}:{}",
                    class.qualified_name(),
                    abstract_tag,
                    class.source_file_id,
                    class.location
                )?;
                if let Some(parent) = &class.parent_name {
                    writeln!(out, "    extends {parent}")?;
                }
                if !magic.is_empty() {
                    writeln!(out, "    magic: {}", magic.join(", "))?;
                }
                for method in class.methods() {
                    for call in &method.dangerous_calls {
                        writeln!(
                            out,
                            "    {} → {} ({}) line {}",
                            method.name, call.function, call.tier, call.location.line
                        )?;
                    }
                }
            }
            writeln!(out, "Total: {}", catalogue.len())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
