//! Static knowledge about PHP built-ins: dangerous sinks, taint sources,
//! transparent decoding wrappers and functions that coerce their arguments
//! to strings.
//!
//! The tables are built once on first use and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Risk tier of a dangerous function, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkTier {
    CodeExec,
    CommandExec,
    CallbackInvocation,
    FileWrite,
    Deserialization,
    FileRead,
    /// `echo` of secrets behind a property check.
    Disclosure,
}

impl SinkTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkTier::CodeExec => "code-exec",
            SinkTier::CommandExec => "command-exec",
            SinkTier::CallbackInvocation => "callback-invocation",
            SinkTier::FileWrite => "file-write",
            SinkTier::Deserialization => "deserialization",
            SinkTier::FileRead => "file-read",
            SinkTier::Disclosure => "disclosure",
        }
    }

    /// Tiers whose sinks end a chain on their own once an argument is
    /// attacker controlled.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            SinkTier::CodeExec | SinkTier::CommandExec | SinkTier::CallbackInvocation
        )
    }

    /// Points subtracted from a chain's exploitability for this tier.
    pub fn score_penalty(&self) -> u32 {
        match self {
            SinkTier::CodeExec => 0,
            SinkTier::CommandExec => 5,
            SinkTier::CallbackInvocation => 10,
            SinkTier::FileWrite => 20,
            SinkTier::Deserialization => 25,
            SinkTier::FileRead => 35,
            SinkTier::Disclosure => 40,
        }
    }
}

impl std::fmt::Display for SinkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value the payload synthesizer writes into a sink argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkValue {
    Command,
    PhpCode,
    /// Function name handed to a callback-taking sink.
    Callback,
    /// Array holding the command, for callbacks applied to each element.
    CommandList,
    WritePath,
    WriteContent,
    ReadPath,
    /// `data://` URI carrying PHP code, for include-family sinks.
    IncludeUri,
    /// `preg_replace` pattern with the `/e` modifier.
    EvalPattern,
}

#[derive(Debug, Clone, Copy)]
pub struct SinkSpec {
    pub tier: SinkTier,
    /// Argument positions and the payload value each one should carry. The
    /// first entry is the argument that must be controlled for the sink to
    /// be useful.
    pub args: &'static [(usize, SinkValue)],
}

use SinkValue::*;

const SINKS: &[(&str, SinkTier, &[(usize, SinkValue)])] = &[
    ("eval", SinkTier::CodeExec, &[(0, PhpCode)]),
    ("assert", SinkTier::CodeExec, &[(0, PhpCode)]),
    ("create_function", SinkTier::CodeExec, &[(1, PhpCode)]),
    ("preg_replace", SinkTier::CodeExec, &[(0, EvalPattern), (1, PhpCode)]),
    ("include", SinkTier::CodeExec, &[(0, IncludeUri)]),
    ("include_once", SinkTier::CodeExec, &[(0, IncludeUri)]),
    ("require", SinkTier::CodeExec, &[(0, IncludeUri)]),
    ("require_once", SinkTier::CodeExec, &[(0, IncludeUri)]),
    ("system", SinkTier::CommandExec, &[(0, Command)]),
    ("exec", SinkTier::CommandExec, &[(0, Command)]),
    ("shell_exec", SinkTier::CommandExec, &[(0, Command)]),
    ("passthru", SinkTier::CommandExec, &[(0, Command)]),
    ("popen", SinkTier::CommandExec, &[(0, Command)]),
    ("proc_open", SinkTier::CommandExec, &[(0, Command)]),
    ("pcntl_exec", SinkTier::CommandExec, &[(0, Command)]),
    ("call_user_func", SinkTier::CallbackInvocation, &[(0, Callback), (1, Command)]),
    ("call_user_func_array", SinkTier::CallbackInvocation, &[(0, Callback), (1, CommandList)]),
    ("array_map", SinkTier::CallbackInvocation, &[(0, Callback), (1, CommandList)]),
    ("array_filter", SinkTier::CallbackInvocation, &[(1, Callback), (0, CommandList)]),
    ("array_walk", SinkTier::CallbackInvocation, &[(1, Callback), (0, CommandList)]),
    ("array_walk_recursive", SinkTier::CallbackInvocation, &[(1, Callback), (0, CommandList)]),
    ("usort", SinkTier::CallbackInvocation, &[(1, Callback), (0, CommandList)]),
    ("uasort", SinkTier::CallbackInvocation, &[(1, Callback), (0, CommandList)]),
    ("uksort", SinkTier::CallbackInvocation, &[(1, Callback), (0, CommandList)]),
    ("file_put_contents", SinkTier::FileWrite, &[(0, WritePath), (1, WriteContent)]),
    ("fopen", SinkTier::FileWrite, &[(0, WritePath)]),
    ("fwrite", SinkTier::FileWrite, &[(1, WriteContent)]),
    ("copy", SinkTier::FileWrite, &[(1, WritePath), (0, ReadPath)]),
    ("rename", SinkTier::FileWrite, &[(1, WritePath), (0, ReadPath)]),
    ("unlink", SinkTier::FileWrite, &[(0, WritePath)]),
    ("mkdir", SinkTier::FileWrite, &[(0, WritePath)]),
    ("rmdir", SinkTier::FileWrite, &[(0, WritePath)]),
    ("unserialize", SinkTier::Deserialization, &[]),
    ("file_get_contents", SinkTier::FileRead, &[(0, ReadPath)]),
    ("fread", SinkTier::FileRead, &[]),
    ("file", SinkTier::FileRead, &[(0, ReadPath)]),
    ("readfile", SinkTier::FileRead, &[(0, ReadPath)]),
    ("highlight_file", SinkTier::FileRead, &[(0, ReadPath)]),
    ("show_source", SinkTier::FileRead, &[(0, ReadPath)]),
];

/// Functions whose return value carries data from outside the program.
const SOURCE_FUNCTIONS: &[&str] = &[
    "file_get_contents",
    "fread",
    "fgets",
    "fgetc",
    "fgetcsv",
    "file",
    "stream_get_contents",
    "socket_read",
    "socket_recv",
    "curl_exec",
    "getenv",
    "apache_request_headers",
    "getallheaders",
    "mysqli_fetch_assoc",
    "mysqli_fetch_array",
    "mysql_fetch_assoc",
    "pg_fetch_assoc",
];

/// Request superglobals, without the leading `$`.
const SUPERGLOBALS: &[&str] = &[
    "_GET", "_POST", "_COOKIE", "_REQUEST", "_FILES", "_SERVER", "_ENV",
];

/// Decoders that hand their input through unchanged in terms of control.
const WRAPPERS: &[&str] = &[
    "base64_decode",
    "urldecode",
    "rawurldecode",
    "hex2bin",
    "gzuncompress",
    "gzinflate",
    "gzdecode",
    "str_rot13",
    "strrev",
    "trim",
    "stripslashes",
    "html_entity_decode",
    "htmlspecialchars_decode",
];

/// Functions that convert their arguments to strings.
const STRING_CONSUMERS: &[&str] = &[
    "strlen",
    "strtolower",
    "strtoupper",
    "ucfirst",
    "lcfirst",
    "str_replace",
    "str_ireplace",
    "substr",
    "strpos",
    "stripos",
    "strstr",
    "strcmp",
    "strcasecmp",
    "trim",
    "ltrim",
    "rtrim",
    "explode",
    "sprintf",
    "printf",
    "vsprintf",
    "md5",
    "sha1",
    "crc32",
    "hash",
    "htmlspecialchars",
    "htmlentities",
    "addslashes",
    "urlencode",
    "rawurlencode",
    "base64_encode",
    "preg_match",
    "preg_match_all",
    "file_exists",
    "is_file",
    "is_dir",
    "basename",
    "dirname",
    "stristr",
    "str_contains",
    "str_starts_with",
    "str_ends_with",
    "settype",
    "error_log",
];

/// Position of the callable argument for callback-taking functions.
const CALLABLE_ARG: &[(&str, usize)] = &[
    ("call_user_func", 0),
    ("call_user_func_array", 0),
    ("array_map", 0),
    ("array_filter", 1),
    ("array_walk", 1),
    ("array_walk_recursive", 1),
    ("usort", 1),
    ("uasort", 1),
    ("uksort", 1),
    ("forward_static_call", 0),
    ("register_shutdown_function", 0),
];

/// Words that mark echoed text as a secret worth printing.
const SECRET_WORDS: &[&str] = &["flag", "secret", "password", "token", "admin"];

fn sinks() -> &'static HashMap<&'static str, SinkSpec> {
    static SINK_TABLE: OnceLock<HashMap<&'static str, SinkSpec>> = OnceLock::new();
    SINK_TABLE.get_or_init(|| {
        SINKS
            .iter()
            .map(|&(name, tier, args)| (name, SinkSpec { tier, args }))
            .collect()
    })
}

/// Lowercases a function name and drops any namespace qualifier, the way
/// PHP resolves calls to global built-ins.
pub fn normalize_function(name: &str) -> String {
    name.rsplit('\\').next().unwrap_or(name).to_ascii_lowercase()
}

/// Looks up a dangerous function.
///
/// # Example
/// ```
/// use engine::catalog::{sink, SinkTier};
/// assert_eq!(sink("System").map(|s| s.tier), Some(SinkTier::CommandExec));
/// assert!(sink("strlen").is_none());
/// ```
pub fn sink(name: &str) -> Option<SinkSpec> {
    sinks().get(normalize_function(name).as_str()).copied()
}

pub fn is_source_function(name: &str) -> bool {
    SOURCE_FUNCTIONS.contains(&normalize_function(name).as_str())
}

/// `name` is a superglobal; accepts the name with or without `$`.
pub fn is_superglobal(name: &str) -> bool {
    SUPERGLOBALS.contains(&name.trim_start_matches('$'))
}

pub fn is_wrapper(name: &str) -> bool {
    WRAPPERS.contains(&normalize_function(name).as_str())
}

pub fn consumes_strings(name: &str) -> bool {
    STRING_CONSUMERS.contains(&normalize_function(name).as_str())
}

pub fn callable_arg(name: &str) -> Option<usize> {
    let name = normalize_function(name);
    CALLABLE_ARG
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, idx)| idx)
}

/// `text` (a literal, variable or constant name) looks like a secret.
pub fn names_secret(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    SECRET_WORDS.iter().any(|w| lower.contains(w))
}

pub fn superglobals() -> &'static [&'static str] {
    SUPERGLOBALS
}

pub fn source_functions() -> &'static [&'static str] {
    SOURCE_FUNCTIONS
}

pub fn wrappers() -> &'static [&'static str] {
    WRAPPERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_order_by_severity() {
        assert!(SinkTier::CodeExec < SinkTier::CommandExec);
        assert!(SinkTier::CallbackInvocation < SinkTier::FileWrite);
        assert!(SinkTier::FileWrite < SinkTier::FileRead);
        assert!(SinkTier::FileRead < SinkTier::Disclosure);
        assert!(SinkTier::CommandExec.is_execution());
        assert!(!SinkTier::FileWrite.is_execution());
    }

    #[test]
    fn secret_names() {
        assert!(names_secret("FLAG"));
        assert!(names_secret("Welcome admin!"));
        assert!(!names_secret("hello"));
    }

    #[test]
    fn lookups_ignore_case_and_namespace() {
        assert_eq!(sink("\\EVAL").map(|s| s.tier), Some(SinkTier::CodeExec));
        assert_eq!(
            sink("file_put_contents").map(|s| s.args[0]),
            Some((0, SinkValue::WritePath))
        );
        assert!(is_source_function("File_Get_Contents"));
        assert!(is_superglobal("$_GET"));
        assert!(is_superglobal("_COOKIE"));
        assert!(!is_superglobal("$_SESSION"));
        assert!(is_wrapper("base64_decode"));
        assert_eq!(callable_arg("array_filter"), Some(1));
        assert!(consumes_strings("strlen"));
    }
}
