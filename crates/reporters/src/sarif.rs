//! Conversion of chains to SARIF 2.1.0.

use engine::{ChainFinding, ChainKind};
use serde_sarif::sarif;

use crate::Severity;

/// Rule identifier of every POP-chain result.
pub const RULE_ID: &str = "php.pop-chain";

fn location(file: &str, line: usize, column: usize, text: Option<String>) -> sarif::Location {
    let physical = sarif::PhysicalLocation::builder()
        .artifact_location(sarif::ArtifactLocation::builder().uri(file.to_string()).build())
        .region(
            sarif::Region::builder()
                .start_line(line as i64)
                .start_column(column as i64)
                .build(),
        )
        .build();
    match text {
        Some(t) => sarif::Location::builder()
            .physical_location(physical)
            .message(sarif::Message::builder().text(t).build())
            .build(),
        None => sarif::Location::builder().physical_location(physical).build(),
    }
}

pub fn to_sarif(findings: &[ChainFinding]) -> sarif::Sarif {
    let results: Vec<sarif::Result> = findings
        .iter()
        .map(|f| {
            let chain = &f.chain;
            let sink_file = chain
                .steps
                .get(chain.sink.step)
                .map(|s| s.file_id.as_str())
                .unwrap_or_default();
            let primary = location(
                sink_file,
                chain.sink.location.line,
                chain.sink.location.column,
                None,
            );
            let related: Vec<sarif::Location> = chain
                .steps
                .iter()
                .map(|s| {
                    location(
                        &s.file_id,
                        s.location.line,
                        s.location.column,
                        Some(format!("{}::{}: {}", s.class, s.method, s.trigger)),
                    )
                })
                .collect();
            let path: Vec<String> = chain
                .steps
                .iter()
                .map(|s| format!("{}::{}", s.class, s.method))
                .collect();
            let label = match chain.kind {
                ChainKind::Gadget => "POP chain",
                ChainKind::PropertyInjection => "Property injection",
            };
            let message = format!(
                "{label} {} reaches {} ({}), exploitability {}",
                path.join(" → "),
                chain.sink.function,
                chain.sink.tier,
                chain.exploitability
            );
            let level = match Severity::of(chain) {
                Severity::Critical | Severity::High => sarif::ResultLevel::Error,
                Severity::Medium => sarif::ResultLevel::Warning,
                Severity::Low => sarif::ResultLevel::Note,
            };

            sarif::Result::builder()
                .rule_id(RULE_ID.to_string())
                .message(sarif::Message::builder().text(message).build())
                .level(level)
                .locations(vec![primary])
                .related_locations(related)
                .build()
        })
        .collect();

    sarif::Sarif::builder()
        .version(serde_json::json!("2.1.0"))
        .schema(sarif::SCHEMA_URL.to_string())
        .runs(vec![sarif::Run::builder()
            .tool(
                sarif::Tool::builder()
                    .driver(sarif::ToolComponent::builder().name("popchain").build())
                    .build(),
            )
            .results(results)
            .build()])
        .build()
}
