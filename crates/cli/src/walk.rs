//! Source tree traversal.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::is_excluded;
use regex::Regex;

fn permission_denied(e: &io::Error, path: &Path) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied {
        debug!(path = %path.display(), "Permission denied");
        true
    } else {
        false
    }
}

/// Breadth-first walk calling `callback` for every regular file under
/// `path` that `excludes` keeps. Symlinks are never followed and unreadable
/// entries are skipped.
pub fn visit<F, C>(path: &Path, excludes: &F, callback: &mut C) -> anyhow::Result<()>
where
    F: Fn(&Path) -> bool,
    C: FnMut(&Path) -> anyhow::Result<()>,
{
    let mut pending: VecDeque<PathBuf> = VecDeque::from([path.to_path_buf()]);
    let mut visited: HashSet<PathBuf> = HashSet::new();

    while let Some(current) = pending.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if excludes(&current) {
            debug!(path = %current.display(), "Path excluded");
            continue;
        }
        let metadata = match fs::symlink_metadata(&current) {
            Ok(m) => m,
            Err(e) if permission_denied(&e, &current) => continue,
            Err(e) => return Err(e.into()),
        };
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            debug!(path = %current.display(), "Symlink skipped");
        } else if file_type.is_file() {
            callback(&current)?;
        } else if file_type.is_dir() {
            let entries = match fs::read_dir(&current) {
                Ok(e) => e,
                Err(e) if permission_denied(&e, &current) => continue,
                Err(e) => return Err(e.into()),
            };
            let mut children = Vec::new();
            for entry in entries {
                match entry {
                    Ok(e) => children.push(e.path()),
                    Err(e) if permission_denied(&e, &current) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            children.sort();
            pending.extend(children);
        }
    }
    Ok(())
}

/// PHP files under `root`, sorted.
pub fn collect_php_files(root: &Path, patterns: &[Regex], max_file_size: u64) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    visit(
        root,
        &|p| is_excluded(p, patterns, max_file_size),
        &mut |p| {
            if parsers::is_php_file(p) {
                files.push(p.to_path_buf());
            }
            Ok(())
        },
    )?;
    files.sort();
    debug!(root = %root.display(), files = files.len(), "Collected PHP files");
    Ok(files)
}
