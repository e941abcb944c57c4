use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CopyError;
use crate::signal::Done;

use super::helpers::display_path;

/// A regular file found under the source root.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Path relative to the source root.
    pub rel: PathBuf,
    pub size: u64,
}

/// Walk `root` (following symlinks; walkdir detects loops) and hand each
/// regular file to `push`. Walker errors are logged and collected; the walk
/// continues past them and they are returned together at the end.
///
/// Stops early when `push` fails (the consumer is gone) or `done` fires.
pub fn walk_files<F>(root: &Path, done: &Done, mut push: F) -> Result<(), CopyError>
where
    F: FnMut(FileEntry) -> Result<(), CopyError>,
{
    let mut errors: Vec<String> = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        if done.is_done() {
            return Err(CopyError::Cancelled(format!("walk of {}", display_path(root))));
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // 遍历错误不终止整个任务: keep walking, report at the end
                let msg = match e.path() {
                    Some(p) => format!("{}: {}", display_path(p), e),
                    None => e.to_string(),
                };
                tracing::error!("[s3cp][enum] {}", msg);
                errors.push(msg);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(md) => md.len(),
            Err(e) => {
                let msg = format!("{}: {}", display_path(entry.path()), e);
                tracing::error!("[s3cp][enum] {}", msg);
                errors.push(msg);
                continue;
            }
        };
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path()).to_path_buf();
        push(FileEntry { path: entry.path().to_path_buf(), rel, size })?;
    }
    if errors.is_empty() { Ok(()) } else { Err(CopyError::Enumeration(errors)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_nested_regular_files_with_relative_paths() {
        let mut root = std::env::temp_dir();
        root.push(format!("s3cp_enum_{}_{}", std::process::id(), chrono::Utc::now().timestamp_millis()));
        std::fs::create_dir_all(root.join("a/b")).expect("mkdir");
        std::fs::write(root.join("top.txt"), b"1").expect("write");
        std::fs::write(root.join("a/b/deep.txt"), b"22").expect("write");

        let mut found = Vec::new();
        walk_files(&root, &Done::never(), |e| {
            found.push((e.rel.to_string_lossy().replace('\\', "/"), e.size));
            Ok(())
        })
        .expect("walk");
        found.sort();
        assert_eq!(found, vec![("a/b/deep.txt".to_string(), 2), ("top.txt".to_string(), 1)]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_root_is_an_enumeration_error() {
        let root = std::env::temp_dir().join("s3cp_enum_does_not_exist_x9");
        let res = walk_files(&root, &Done::never(), |_| Ok(()));
        assert!(matches!(res, Err(CopyError::Enumeration(ref v)) if v.len() == 1));
    }
}
