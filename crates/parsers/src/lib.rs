//! Converts PHP source files into the [`ir::FileAst`] arena consumed by the
//! engine.

use serde::Serialize;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::debug;

use anyhow::Context;
use ir::FileAst;

pub mod languages;
pub use languages::*;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ParserMetrics {
    pub files_parsed: usize,
    pub parse_errors: usize,
    /// Syntax errors the grammar recovered from, summed over parsed files.
    pub recovered_errors: usize,
}

impl ParserMetrics {
    pub fn merge(&mut self, other: &ParserMetrics) {
        self.files_parsed += other.files_parsed;
        self.parse_errors += other.parse_errors;
        self.recovered_errors += other.recovered_errors;
    }
}

/// Total failure to produce a tree for one source unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse {file}: {reason}")]
pub struct ParseError {
    pub file: String,
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(file: &str, reason: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}

const PHP_EXTENSIONS: &[&str] = &[
    "php", "phtml", "php3", "php4", "php5", "php7", "php8", "phps", "inc",
];

/// Whether `path` names a PHP source file.
///
/// # Example
/// ```
/// use parsers::is_php_file;
/// assert!(is_php_file(std::path::Path::new("src/Logger.php")));
/// assert!(!is_php_file(std::path::Path::new("README.md")));
/// ```
pub fn is_php_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    let php = ext.as_deref().is_some_and(|e| PHP_EXTENSIONS.contains(&e));
    if !php {
        debug!(file = %path.display(), "Skipping non-PHP file");
    }
    php
}

/// Reads a file and lowers it into a [`FileAst`].
///
/// Returns `Ok(None)` for non-PHP files and for sources that cannot be
/// parsed at all; those are counted in `metrics` and the batch goes on.
///
/// # Example
/// ```
/// use parsers::parse_file;
/// use std::fs;
/// let path = std::env::temp_dir().join("popchain_doc.php");
/// fs::write(&path, "<?php class A { public $x; }").unwrap();
/// let ast = parse_file(&path, None).unwrap().unwrap();
/// assert_eq!(ast.find_by_kind(ast.root(), "ClassDecl").len(), 1);
/// ```
pub fn parse_file(
    path: &Path,
    mut metrics: Option<&mut ParserMetrics>,
) -> anyhow::Result<Option<FileAst>> {
    if !is_php_file(path) {
        return Ok(None);
    }
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let file_id = path.to_string_lossy().into_owned();
    let content = String::from_utf8_lossy(&bytes);
    match parse_php(&content, &file_id) {
        Ok(ast) => {
            if let Some(m) = metrics.as_deref_mut() {
                m.files_parsed += 1;
                m.recovered_errors += ast.error_count;
            }
            Ok(Some(ast))
        }
        Err(e) => {
            debug!(file = %file_id, error = %e, "Skipping unparseable file");
            if let Some(m) = metrics {
                m.parse_errors += 1;
            }
            Ok(None)
        }
    }
}
