use std::path::Path;

// Lightweight path display wrapper that renders with forward slashes.
// Avoids allocating strings until actually formatted for logs.
pub(crate) struct DisplayPath<'a>(pub(crate) &'a Path);

impl<'a> std::fmt::Display for DisplayPath<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.to_string_lossy();
        f.write_str(&normalize_path(&s, true))
    }
}

pub(crate) fn display_path(p: &Path) -> DisplayPath<'_> {
    DisplayPath(p)
}

/// Normalize a path-like string into object-key form:
/// - converts backslashes to forward slashes
/// - collapses repeated slashes
/// - optionally preserves a trailing slash (a destination ending in `/` names a "directory")
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        // keep root "/"
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

/// S3 keys never start with `/`.
pub fn strip_leading_slash(key: &str) -> String {
    key.trim_start_matches('/').to_string()
}

/// Key for a single-file copy: a destination ending in `/` gets the source file name appended.
pub fn single_file_key(source: &Path, dest: &str) -> String {
    let dest = normalize_path(dest, true);
    if dest.is_empty() || dest.ends_with('/') {
        let name = source.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        strip_leading_slash(&format!("{}{}", dest, name))
    } else {
        strip_leading_slash(&dest)
    }
}

/// Key for a file at `rel` (relative to the source root) in a tree copy.
pub fn tree_key(dest: &str, rel: &Path) -> String {
    let dest = normalize_path(dest, false);
    let rel = normalize_path(&rel.to_string_lossy(), false);
    let rel = rel.trim_start_matches("./").trim_start_matches('/');
    let dest = dest.trim_end_matches('/');
    if dest.is_empty() {
        strip_leading_slash(rel)
    } else {
        strip_leading_slash(&format!("{}/{}", dest, rel))
    }
}
