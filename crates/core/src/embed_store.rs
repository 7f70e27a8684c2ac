//! Embedding store reader (§4.B). Iterates chunks previously embedded by an
//! external indexer and persisted under `emb/files/<hashed-rel-path>/<chunk>.json`
//! relative to the project root. Styled after a lazy-parse-on-demand pattern:
//! nothing is read until the caller asks for the next chunk.

use std::path::{Path, PathBuf};

use crate::types::Chunk;

/// Bounds applied while walking the persisted chunk tree so a corrupt or
/// enormous store can't stall a time-budgeted retrieval stage.
pub struct EmbedStoreLimits {
    pub max_files: usize,
    pub max_chunks_per_file: usize,
}

impl Default for EmbedStoreLimits {
    fn default() -> Self {
        Self { max_files: 4000, max_chunks_per_file: 64 }
    }
}

/// On-disk persisted chunk record, one JSON object per file.
#[derive(Debug, serde::Deserialize)]
struct PersistedChunk {
    embedding: Vec<f32>,
    file_rel: String,
    line_start: usize,
    line_end: usize,
    text_preview: String,
    #[serde(default)]
    terms: Vec<String>,
    #[serde(default)]
    ts_ms: i64,
}

/// Lazily iterate every chunk under `<project_root>/emb/files/**/*.json`.
/// Missing directories, unreadable files, and malformed JSON are silently
/// skipped — callers apply their own time budget on top of this iterator.
pub fn iter_project_chunks(project_root: &Path, limits: &EmbedStoreLimits) -> Vec<Chunk> {
    let emb_dir = project_root.join("emb").join("files");
    if !emb_dir.is_dir() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut file_count = 0usize;

    let Ok(file_dirs) = std::fs::read_dir(&emb_dir) else {
        return out;
    };

    for entry in file_dirs.flatten() {
        if file_count >= limits.max_files {
            break;
        }
        if !entry.path().is_dir() {
            continue;
        }
        file_count += 1;

        let Ok(chunk_files) = std::fs::read_dir(entry.path()) else {
            continue;
        };
        let mut chunk_count = 0usize;
        let mut paths: Vec<PathBuf> = chunk_files
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        for path in paths {
            if chunk_count >= limits.max_chunks_per_file {
                break;
            }
            if let Some(chunk) = read_chunk(&path) {
                out.push(chunk);
                chunk_count += 1;
            }
        }
    }

    out
}

fn read_chunk(path: &Path) -> Option<Chunk> {
    let content = std::fs::read_to_string(path).ok()?;
    let persisted: PersistedChunk = serde_json::from_str(&content).ok()?;
    Some(Chunk {
        embedding: persisted.embedding,
        meta: crate::types::ChunkMeta {
            file_rel: persisted.file_rel,
            line_start: persisted.line_start,
            line_end: persisted.line_end,
            text_preview: persisted.text_preview,
            terms: persisted.terms,
            ts_ms: persisted.ts_ms,
        },
    })
}

/// Candidate `.py` files already known to the embedding store (used by
/// refs/callgraph stages to prefer indexed files before falling back to a
/// full project walk).
pub fn known_files(project_root: &Path, limits: &EmbedStoreLimits) -> Vec<String> {
    let mut files: Vec<String> =
        iter_project_chunks(project_root, limits).into_iter().map(|c| c.meta.file_rel).collect();
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_chunk(dir: &Path, file_hash: &str, chunk_name: &str, file_rel: &str) {
        let chunk_dir = dir.join("emb").join("files").join(file_hash);
        std::fs::create_dir_all(&chunk_dir).unwrap();
        let body = serde_json::json!({
            "embedding": [0.1, 0.2, 0.3],
            "file_rel": file_rel,
            "line_start": 1,
            "line_end": 5,
            "text_preview": "def foo(): pass",
            "terms": ["foo"],
            "ts_ms": 0,
        });
        std::fs::write(chunk_dir.join(format!("{chunk_name}.json")), body.to_string()).unwrap();
    }

    #[test]
    fn reads_persisted_chunks() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(dir.path(), "abc123", "0", "pkg/a.py");
        let chunks = iter_project_chunks(dir.path(), &EmbedStoreLimits::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].meta.file_rel, "pkg/a.py");
    }

    #[test]
    fn missing_store_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = iter_project_chunks(dir.path(), &EmbedStoreLimits::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn malformed_chunk_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let chunk_dir = dir.path().join("emb").join("files").join("bad");
        std::fs::create_dir_all(&chunk_dir).unwrap();
        std::fs::write(chunk_dir.join("0.json"), "{not valid json").unwrap();
        write_chunk(dir.path(), "good", "0", "pkg/b.py");

        let chunks = iter_project_chunks(dir.path(), &EmbedStoreLimits::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].meta.file_rel, "pkg/b.py");
    }
}
