use anyhow::{Context, Result};
use engine::{AnalysisOptions, PayloadOptions};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

#[cfg(windows)]
pub fn config_dir() -> PathBuf {
    std::env::var("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("popchain")
}

#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
        .join("popchain")
}

fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// File selection defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Glob patterns excluded in addition to the command-line ones.
    pub exclude: Vec<String>,
    pub max_file_size: Option<u64>,
}

/// `config.toml` with `[scan]`, `[analysis]` and `[payload]` tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub analysis: AnalysisOptions,
    pub payload: PayloadOptions,
}

impl Config {
    /// Analysis options with the `[payload]` table folded in.
    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            payload: self.payload.clone(),
            ..self.analysis.clone()
        }
    }
}

/// Loads `explicit` when given, which must exist, otherwise the user
/// configuration file when present.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = config_file_path();
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_tables_keep_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[analysis]
max_depth = 3

[payload]
command = "uname -a"
"#,
        )
        .unwrap();
        let opts = cfg.analysis_options();
        assert_eq!(opts.max_depth, 3);
        assert_eq!(opts.max_chains, AnalysisOptions::default().max_chains);
        assert_eq!(opts.payload.command, "uname -a");
        assert_eq!(opts.payload.callback, "system");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/popchain.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
