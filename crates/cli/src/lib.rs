//! Common utilities for the command line interface.
use regex::Regex;
use std::fs;
use std::path::Path;

pub mod args;
pub mod config;
pub mod output;
pub mod scan;
pub mod ui;
pub mod walk;

/// Default maximum size: 5 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Converts a basic glob pattern to a regular expression. `**` crosses
/// directories, `*` and `?` stay within one path segment.
///
/// # Example
///
/// ```
/// use popchain::glob_to_regex;
/// let re = glob_to_regex("src/*.php").unwrap();
/// assert!(re.is_match("src/Logger.php"));
/// assert!(!re.is_match("src/Log/Logger.php"));
/// ```
pub fn glob_to_regex(pat: &str) -> Result<Regex, regex::Error> {
    if pat.contains('[') || pat.contains(']') {
        // Character classes are not supported; "[" fails to compile.
        return Regex::new("[");
    }
    let mut regex = String::from("^");
    let mut chars = pat.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches no directory at all.
                if chars.peek() == Some(&'/') {
                    chars.next();
                    regex.push_str("(?:.*/)?");
                } else {
                    regex.push_str(".*");
                }
            }
            // A trailing `/**` covers the directory itself.
            '/' if chars.clone().eq("**".chars()) => {
                regex.push_str("(?:/.*)?");
                break;
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            '.' | '(' | ')' | '+' | '|' | '^' | '$' | '{' | '}' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }
    regex.push('$');
    Regex::new(&regex)
}

/// Transforms a glob-style exclusion string into [`Regex`]. A trailing
/// slash excludes the whole directory, and relative patterns match at any
/// depth.
///
/// # Example
///
/// ```
/// use popchain::parse_exclude;
/// let re = parse_exclude("cache/").unwrap();
/// assert!(re.is_match("/srv/app/cache/views/a.php"));
/// ```
pub fn parse_exclude(s: &str) -> Result<Regex, String> {
    let mut glob = s.replace('\\', "/");
    if glob.ends_with('/') {
        glob.push_str("**");
    }
    if !glob.starts_with('/') && !glob.starts_with("**/") {
        glob = format!("**/{glob}");
    }
    glob_to_regex(&glob).map_err(|e| e.to_string())
}

/// Default exclusion patterns. Composer's `vendor/` is kept: third-party
/// libraries are where most gadgets live.
pub fn default_excludes() -> Vec<Regex> {
    ["**/node_modules/**", "**/.git/**", "**/.svn/**"]
        .iter()
        .filter_map(|p| parse_exclude(p).ok())
        .collect()
}

/// Reads `.gitignore` and `.popchainignore` from `root` and converts their
/// valid entries to regular expressions.
pub fn load_ignore_patterns(root: &Path) -> Vec<Regex> {
    let mut patterns = Vec::new();
    for name in [".gitignore", ".popchainignore"] {
        let Ok(content) = fs::read_to_string(root.join(name)) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            if let Ok(re) = parse_exclude(line.trim_start_matches('/')) {
                patterns.push(re);
            }
        }
    }
    patterns
}

/// Indicates whether a path should be omitted according to patterns or size.
/// Separators are normalised to support Windows and Unix.
///
/// # Example
///
/// ```
/// use popchain::{is_excluded, parse_exclude};
/// use std::path::Path;
/// let patterns = vec![parse_exclude("tests/**").unwrap()];
/// assert!(is_excluded(Path::new("app/tests/Fixture.php"), &patterns, 0));
/// assert!(!is_excluded(Path::new("app/src/Logger.php"), &patterns, 0));
/// ```
pub fn is_excluded(path: &Path, patterns: &[Regex], max_file_size: u64) -> bool {
    let path_str = path.to_string_lossy().replace('\\', "/");
    if patterns.iter().any(|re| re.is_match(&path_str)) {
        return true;
    }
    if max_file_size > 0 {
        if let Ok(meta) = fs::metadata(path) {
            if meta.is_file() && meta.len() > max_file_size {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn double_star_spans_directories() {
        let re = glob_to_regex("**/cache/**").unwrap();
        assert!(re.is_match("cache"));
        assert!(re.is_match("cache/a.php"));
        assert!(re.is_match("/srv/app/cache/views/a.php"));
        assert!(!re.is_match("/srv/app/cached/a.php"));
    }

    #[test]
    fn question_mark_is_one_character() {
        let re = glob_to_regex("v?.php").unwrap();
        assert!(re.is_match("v1.php"));
        assert!(!re.is_match("v10.php"));
        assert!(!re.is_match("v/.php"));
    }

    #[test]
    fn ignore_files_skip_comments_and_negations() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(".gitignore"),
            "# build output\n/storage/\n!storage/keep.php\n\n",
        )
        .unwrap();
        fs::write(tmp.path().join(".popchainignore"), "tests/**\n").unwrap();
        let patterns = load_ignore_patterns(tmp.path());
        assert_eq!(patterns.len(), 2);
        assert!(is_excluded(Path::new("/app/storage/logs/a.php"), &patterns, 0));
        assert!(is_excluded(Path::new("/app/tests/Unit/A.php"), &patterns, 0));
        assert!(!is_excluded(Path::new("/app/src/A.php"), &patterns, 0));
    }
}
