use clap::{Args as ClapArgs, Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;

use crate::output::Format;
use crate::DEFAULT_MAX_FILE_SIZE;

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn parse_threads(s: &str) -> Result<usize, String> {
    let v: usize = s
        .parse()
        .map_err(|e: std::num::ParseIntError| e.to_string())?;
    if v == 0 {
        Err("threads must be greater than 0".into())
    } else {
        Ok(v)
    }
}

fn parse_depth(s: &str) -> Result<usize, String> {
    let v: usize = s
        .parse()
        .map_err(|e: std::num::ParseIntError| e.to_string())?;
    if v == 0 {
        Err("max depth must be at least 1".into())
    } else {
        Ok(v)
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "popchain - finds PHP object injection (POP) chains and builds their payloads",
    long_about = "popchain statically analyses PHP sources for object injection vulnerabilities.

It builds a catalogue of classes and magic methods, tracks which unserialize() calls
receive request data, searches for chains of magic-method triggers that end in a
dangerous function and prints a serialized payload for every chain it finds.

Examples:
  popchain scan .                        # Scan current directory
  popchain scan src/ --format json       # JSON output
  popchain scan app/ --command 'uname -a' # Payloads run a custom command
  popchain gadgets vendor/               # List gadget classes",
    subcommand_required = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Show version information
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search PHP sources for POP chains
    Scan(ScanArgs),
    /// List the gadget catalogue of PHP sources
    #[command(alias = "gadget")]
    Gadgets(GadgetsArgs),
}

/// Options shared by every command that reads a source tree.
#[derive(ClapArgs, Clone)]
pub struct InputArgs {
    /// Path to scan (file or directory)
    pub path: PathBuf,
    /// Exclude files matching these glob patterns
    #[arg(long, value_parser = crate::parse_exclude, value_delimiter = ',')]
    pub exclude: Vec<Regex>,
    /// Don't use default exclusion patterns
    #[arg(long)]
    pub no_default_exclude: bool,
    /// Maximum file size to scan (in bytes)
    #[arg(long)]
    pub max_file_size: Option<u64>,
    /// Number of parallel threads used for parsing
    #[arg(long, default_value_t = default_threads(), value_parser = parse_threads)]
    pub threads: usize,
    /// Configuration file (defaults to ~/.config/popchain/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
    /// Suppress non-essential output
    #[arg(long)]
    pub quiet: bool,
}

impl InputArgs {
    pub fn max_file_size_or(&self, configured: Option<u64>) -> u64 {
        self.max_file_size
            .or(configured)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE)
    }
}

#[derive(ClapArgs)]
pub struct ScanArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Output format for scan results
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
    /// Maximum number of steps in a chain
    #[arg(long, value_parser = parse_depth)]
    pub max_depth: Option<usize>,
    /// Shell command planted in command-execution payloads
    #[arg(long)]
    pub command: Option<String>,
    /// Report chains without synthesizing payloads
    #[arg(long = "no-payloads")]
    pub no_payloads: bool,
    /// Match magic method names ignoring case
    #[arg(long = "case-insensitive-magic")]
    pub case_insensitive_magic: bool,
}

#[derive(ClapArgs)]
pub struct GadgetsArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Output format (text or json)
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
