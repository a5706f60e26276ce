use clap::ValueEnum;
use engine::{AnalysisReport, Catalogue};
use reporters::{self, ScanInfo};

/// Supported output formats for scan results.
#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Sarif,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            "sarif" => Ok(Format::Sarif),
            _ => Err("invalid format".into()),
        }
    }
}

impl From<Format> for reporters::Format {
    fn from(fmt: Format) -> Self {
        match fmt {
            Format::Text => reporters::Format::Text,
            Format::Json => reporters::Format::Json,
            Format::Sarif => reporters::Format::Sarif,
        }
    }
}

pub fn print_report(report: &AnalysisReport, fmt: Format, info: &ScanInfo) -> anyhow::Result<()> {
    reporters::print_report(report, fmt.into(), Some(info))?;
    Ok(())
}

pub fn print_gadgets(catalogue: &Catalogue, fmt: Format) -> anyhow::Result<()> {
    reporters::print_gadgets(catalogue, fmt.into())?;
    Ok(())
}
