//! Open-buffer snapshot reader (§6). The agent's editor layer periodically
//! dumps unsaved buffers to a JSONL file; the `openbuffer` stage searches
//! these the same way `literal` searches on-disk files, so hits can surface
//! text the user hasn't saved yet.

use serde::Deserialize;
use std::path::Path;

/// One unsaved buffer snapshot line.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenBuffer {
    #[serde(alias = "path")]
    pub name: String,
    pub text: String,
}

/// Read `.jinx/memory/open_buffers.jsonl` under `project_root`. Missing file
/// or malformed lines are silently skipped — this is best-effort context,
/// never a hard dependency of any stage.
pub fn read_open_buffers(project_root: &Path) -> Vec<OpenBuffer> {
    let path = project_root.join(".jinx").join("memory").join("open_buffers.jsonl");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<OpenBuffer>(l).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_name_or_path_aliased_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mem_dir = dir.path().join(".jinx").join("memory");
        std::fs::create_dir_all(&mem_dir).unwrap();
        std::fs::write(
            mem_dir.join("open_buffers.jsonl"),
            "{\"path\": \"a.py\", \"text\": \"x = 1\"}\n{\"name\": \"b.py\", \"text\": \"y = 2\"}\n",
        )
        .unwrap();

        let buffers = read_open_buffers(dir.path());
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].name, "a.py");
        assert_eq!(buffers[1].name, "b.py");
    }

    #[test]
    fn missing_snapshot_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_open_buffers(dir.path()).is_empty());
    }
}
