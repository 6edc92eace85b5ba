//! Path and filter utilities

use std::path::{Component, Path, PathBuf};

use crate::error::PipelineError;

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Relative path as a `/`-separated string, so documents read the same on every OS.
pub fn path_to_slash_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// True if a relative path stays under its root (no `..`, no absolute components).
pub fn is_contained_relative(rel: &Path) -> bool {
    rel.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Lowercased extension without the dot, or empty.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Check if a file should be excluded based on OS-specific junk files
pub fn is_os_hidden_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match name {
        // macOS
        ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
        // Windows
        "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" => true,
        // Linux
        ".directory" => true,
        // macOS resource forks, Linux trash dirs
        _ => name.starts_with("._") || name.starts_with(".Trash-"),
    }
}

/// True if a directory with this name must not be descended into.
pub fn is_ignored_dir(name: &str, ignore_dirs: &[String]) -> bool {
    ignore_dirs.iter().any(|d| d == name)
}

/// Returns true if the file at `path` should be collected.
/// `exclude_path` is the canonical output file when it sits inside the root.
pub fn should_include_in_walk(
    path: &Path,
    root: &Path,
    exclude_path: &Option<PathBuf>,
    exclude_patterns: &[String],
    include_extensions: &[String],
) -> bool {
    if path == root {
        return false;
    }
    if let Some(out) = exclude_path
        && path == out.as_path()
    {
        return false;
    }
    if is_os_hidden_file(path) {
        return false;
    }
    if !include_extensions.is_empty() {
        let ext = extension_of(path);
        if !include_extensions
            .iter()
            .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        {
            return false;
        }
    }
    if exclude_patterns.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    let path_str = path.to_str().unwrap_or("");
    let rel_str = path
        .strip_prefix(root)
        .ok()
        .and_then(|p| p.to_str())
        .unwrap_or("");
    !exclude_patterns.iter().any(|pattern| {
        glob_match(pattern, name) || glob_match(pattern, rel_str) || glob_match(pattern, path_str)
    })
}

/// Simple glob pattern matching (supports `*` and `?`). A leading `!` is ignored.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    // Last `*` seen and the text position it was tried at, for backtracking.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Canonicalize the root and make sure it is a readable directory.
pub fn canonicalize_root(root: &Path) -> Result<PathBuf, PipelineError> {
    let canonical = root.canonicalize().map_err(|e| PipelineError::FileSystem {
        path: root.to_path_buf(),
        message: format!("cannot resolve root: {e}"),
    })?;
    if !canonical.is_dir() {
        return Err(PipelineError::FileSystem {
            path: canonical,
            message: "root is not a directory".to_string(),
        });
    }
    std::fs::read_dir(&canonical).map_err(|e| PipelineError::FileSystem {
        path: canonical.clone(),
        message: format!("cannot read root: {e}"),
    })?;
    Ok(canonical)
}

/// Canonical form of a path that may not exist yet: the parent is canonicalized and the
/// file name re-attached. `None` if neither resolves.
pub fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Some(p);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent.canonicalize().ok().map(|p| p.join(name))
}
