//! Multi-file coordinator: walks the input, parses PHP files in parallel and
//! hands the resulting units to the engine.

use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use crate::args::{GadgetsArgs, InputArgs, ScanArgs};
use crate::config::{load_config, Config};
use crate::output::{self, Format};
use crate::walk::collect_php_files;
use crate::{default_excludes, load_ignore_patterns, parse_exclude, ui};

use engine::{analyze, extract_classes_with, Catalogue, SourceUnit};
use parsers::ParserMetrics;
use reporters::ScanInfo;

/// Parsed input of one run.
#[derive(Debug, Default)]
pub struct LoadedUnits {
    pub units: Vec<SourceUnit>,
    pub files_analyzed: usize,
    pub failed_files: usize,
}

fn init_tracing(input: &InputArgs) {
    let level = if input.quiet {
        LevelFilter::OFF
    } else if input.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    if input.debug && !input.quiet {
        debug!("Debug mode enabled");
    }
}

fn init_thread_pool(threads: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        error!("Failed to build global thread pool: {e}");
    }
}

/// Command-line patterns, then configured ones, defaults and ignore files.
fn exclude_patterns(input: &InputArgs, config: &Config, root: &Path) -> Result<Vec<Regex>> {
    let mut patterns = input.exclude.clone();
    for pat in &config.scan.exclude {
        let re = parse_exclude(pat)
            .map_err(|e| anyhow::anyhow!("invalid exclude pattern {pat:?} in config: {e}"))?;
        patterns.push(re);
    }
    if !input.no_default_exclude {
        patterns.extend(default_excludes());
    }
    patterns.extend(load_ignore_patterns(root));
    Ok(patterns)
}

/// Identifier of `path` relative to `root`, with `/` separators.
pub fn relative_id(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Walks `input.path` and parses every PHP file it keeps. Unreadable and
/// unparseable files are counted and skipped.
pub fn load_units(input: &InputArgs, config: &Config) -> Result<LoadedUnits> {
    let path = input
        .path
        .canonicalize()
        .with_context(|| format!("cannot access {}", input.path.display()))?;
    let root: PathBuf = if path.is_file() {
        path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone())
    } else {
        path.clone()
    };
    let patterns = exclude_patterns(input, config, &root)?;
    let max_file_size = input.max_file_size_or(config.scan.max_file_size);
    debug!(path = %path.display(), max_file_size, patterns = patterns.len(), "Scanning path");

    let files = collect_php_files(&path, &patterns, max_file_size)?;
    let parsed: Vec<(Option<SourceUnit>, ParserMetrics)> = files
        .par_iter()
        .map(|file| {
            let mut metrics = ParserMetrics::default();
            let unit = match parsers::parse_file(file, Some(&mut metrics)) {
                Ok(Some(mut ast)) => {
                    let id = relative_id(&root, file);
                    ast.file_path = id.clone();
                    Some(SourceUnit::new(id, ast))
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Failed to read file");
                    None
                }
            };
            (unit, metrics)
        })
        .collect();

    let mut metrics = ParserMetrics::default();
    let mut loaded = LoadedUnits {
        files_analyzed: files.len(),
        ..LoadedUnits::default()
    };
    for (unit, m) in parsed {
        metrics.merge(&m);
        match unit {
            Some(u) => loaded.units.push(u),
            None => loaded.failed_files += 1,
        }
    }
    loaded.units.sort_by(|a, b| a.file_id.cmp(&b.file_id));
    debug!(
        parsed = metrics.files_parsed,
        parse_errors = metrics.parse_errors,
        recovered = metrics.recovered_errors,
        "Parsing finished"
    );
    Ok(loaded)
}

pub fn run_scan(args: ScanArgs) -> Result<()> {
    init_tracing(&args.input);
    let config = load_config(args.input.config.as_deref()).context("failed to load configuration")?;
    let mut opts = config.analysis_options();
    if let Some(depth) = args.max_depth {
        opts.max_depth = depth;
    }
    if let Some(command) = &args.command {
        opts.payload.command = command.clone();
    }
    opts.skip_payloads |= args.no_payloads;
    opts.case_insensitive_magic |= args.case_insensitive_magic;

    if args.format == Format::Text && !args.input.quiet {
        ui::print_header();
    }
    init_thread_pool(args.input.threads);
    info!(target = %args.input.path.display(), "Scan started");

    let start = Instant::now();
    let loaded = load_units(&args.input, &config)?;
    let report = analyze(&loaded.units, &opts);
    let duration_ms = start.elapsed().as_millis() as u64;

    let scan_info = ScanInfo {
        files_analyzed: loaded.files_analyzed,
        duration_ms,
        failed_files: loaded.failed_files,
    };
    output::print_report(&report, args.format, &scan_info)?;
    if !args.input.quiet {
        ui::print_scan_summary(
            report.chains.len(),
            report.stats.controlled_sites,
            loaded.failed_files,
        );
    }
    info!(chains = report.chains.len(), duration_ms, "Scan completed");
    Ok(())
}

pub fn run_gadgets(args: GadgetsArgs) -> Result<()> {
    init_tracing(&args.input);
    let config = load_config(args.input.config.as_deref()).context("failed to load configuration")?;
    init_thread_pool(args.input.threads);

    let loaded = load_units(&args.input, &config)?;
    let mut classes = Vec::new();
    for unit in &loaded.units {
        let extraction = extract_classes_with(unit, config.analysis.case_insensitive_magic);
        classes.extend(extraction.classes);
    }
    let catalogue = Catalogue::new(classes);
    info!(classes = catalogue.len(), failed_files = loaded.failed_files, "Catalogue built");
    output::print_gadgets(&catalogue, args.format)
}
