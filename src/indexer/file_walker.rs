/// File discovery for indexing
///
/// Walks a root with gitignore semantics, applies the configured glob
/// filters, and skips binary and oversized files. Results are sorted by
/// relative path so every walk of an unchanged tree is identical.
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use tracing::debug;

use crate::config::IndexingConfig;
use crate::error::IndexingError;
use crate::glob_utils::PatternFilter;

/// A file selected for indexing
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    /// Modification time in unix epoch seconds
    pub mtime: i64,
}

/// Discover indexable files under `root`
///
/// `recursive: false` limits the walk to the root's direct children.
pub fn walk_root(
    root: &Path,
    config: &IndexingConfig,
    filter: &PatternFilter,
    recursive: bool,
) -> Result<Vec<WalkedFile>> {
    if !root.exists() {
        return Err(IndexingError::PathNotFound(root.display().to_string()).into());
    }

    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .follow_links(false)
        .max_depth(if recursive { None } else { Some(1) })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let abs_path = entry.path().to_path_buf();
        let rel_path = relative_path(root, &abs_path);
        if !filter.matches(&rel_path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!("Skipping {}: {}", rel_path, e);
                continue;
            }
        };
        let size = metadata.len();
        if size as usize > config.max_file_size {
            debug!("Skipping oversized file {} ({} bytes)", rel_path, size);
            continue;
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        files.push(WalkedFile {
            rel_path,
            abs_path,
            size,
            mtime,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Repo-relative path with forward slashes
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Read a file as UTF-8 text; Ok(None) when the file looks binary
pub fn read_source_file(path: &Path) -> Result<Option<String>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    if looks_binary(&bytes) {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// A null byte in the first 8 KiB marks the file as binary
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}
