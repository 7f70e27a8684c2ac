//! File walker (§4.A). Depth-first traversal of the project root, pruning
//! excluded directories in place and applying an extension include-list and
//! per-file byte limit, via `ignore::WalkBuilder` + `filter_entry` pruning,
//! yielding a flat `(abs_path, rel_path)` stream.

use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::RetrievalConfig;

/// A file found by the walker, below the byte limit, with a project-relative
/// forward-slash-normalized path.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
}

/// Walk `config.project_root`, pruning `config.exclude_dirs` by name and
/// skipping files over `config.max_file_bytes`. When `config.include_exts` is
/// non-empty, only those extensions are yielded (otherwise all files are
/// returned; callers that need a "looks like text" filter should apply one
/// themselves, since the retrieval stages are the right place to decide
/// relevance, not the walker).
pub fn walk_project(config: &RetrievalConfig) -> Vec<WalkedFile> {
    walk_dir(&config.project_root, &config.exclude_dirs, &config.include_exts, config.max_file_bytes)
}

fn walk_dir(
    root: &Path,
    exclude_dirs: &HashSet<String>,
    include_exts: &HashSet<String>,
    max_file_bytes: u64,
) -> Vec<WalkedFile> {
    if !root.exists() {
        return Vec::new();
    }

    let results: Mutex<Vec<WalkedFile>> = Mutex::new(Vec::new());
    let skip = exclude_dirs.clone();

    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(move |entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !skip.contains(name.as_ref());
            }
            true
        })
        .build_parallel()
        .run(|| {
            let root = root.to_path_buf();
            let include_exts = include_exts.clone();
            let results = &results;
            Box::new(move |entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }

                let abs_path = entry.path().to_path_buf();

                if !include_exts.is_empty() {
                    let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
                    if !include_exts.contains(ext) {
                        return ignore::WalkState::Continue;
                    }
                }

                if let Ok(meta) = entry.metadata() {
                    if meta.len() > max_file_bytes {
                        return ignore::WalkState::Continue;
                    }
                }

                let rel_path = abs_path
                    .strip_prefix(&root)
                    .unwrap_or(&abs_path)
                    .to_string_lossy()
                    .replace('\\', "/");

                results.lock().unwrap().push(WalkedFile { abs_path, rel_path });
                ignore::WalkState::Continue
            })
        });

    results.into_inner().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn walks_files_and_prunes_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        let mut f = std::fs::File::create(dir.path().join("src/a.py")).unwrap();
        writeln!(f, "def foo(): pass").unwrap();
        std::fs::write(dir.path().join("node_modules/junk.py"), "junk").unwrap();

        let mut exclude = HashSet::new();
        exclude.insert("node_modules".to_string());
        let files = walk_dir(dir.path(), &exclude, &HashSet::new(), 1_000_000);

        assert!(files.iter().any(|f| f.rel_path == "src/a.py"));
        assert!(!files.iter().any(|f| f.rel_path.contains("node_modules")));
    }

    #[test]
    fn respects_extension_include_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x").unwrap();
        std::fs::write(dir.path().join("b.rs"), "x").unwrap();

        let mut exts = HashSet::new();
        exts.insert("py".to_string());
        let files = walk_dir(dir.path(), &HashSet::new(), &exts, 1_000_000);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "a.py");
    }

    #[test]
    fn skips_files_over_byte_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.py"), vec![b'x'; 100]).unwrap();
        let files = walk_dir(dir.path(), &HashSet::new(), &HashSet::new(), 10);
        assert!(files.is_empty());
    }
}
