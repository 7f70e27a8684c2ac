//! Core data model: file identity, chunks, hits, snippets, programs, and tasks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(high-resolution mtime as millis, size in bytes)` — used to invalidate
/// every cache keyed off a file's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSig {
    pub mtime_ms: i64,
    pub size: u64,
}

impl FileSig {
    pub fn read(path: &std::path::Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime_ms = meta.modified().ok().and_then(|t| {
            t.duration_since(std::time::UNIX_EPOCH).ok().map(|d| d.as_millis() as i64)
        })?;
        Some(Self { mtime_ms, size: meta.len() })
    }
}

/// Metadata for an embedded fragment persisted by an external indexer.
/// Line numbers are 1-based inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub file_rel: String,
    pub line_start: usize,
    pub line_end: usize,
    pub text_preview: String,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub ts_ms: i64,
}

impl ChunkMeta {
    /// True when this chunk's range spans the entire file (no narrowing needed).
    pub fn spans_whole_file(&self, file_line_count: usize) -> bool {
        self.line_start <= 1 && self.line_end >= file_line_count
    }

    /// True when this chunk carries an explicit, non-trivial range.
    pub fn has_explicit_range(&self) -> bool {
        self.line_start >= 1 && self.line_end >= self.line_start
    }
}

/// A persisted embedding chunk: the vector plus its meta.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub embedding: Vec<f32>,
    pub meta: ChunkMeta,
}

/// A single retrieval result. `score` is clamped to `[0, 1]`; structural
/// kernels (AST/token/literal) top out near 0.999, vector/keyword sit in
/// 0.2-0.9.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub score: f64,
    pub file_rel: String,
    pub meta: ChunkMeta,
    pub stage: &'static str,
}

impl Hit {
    pub fn dedup_key(&self) -> (String, usize, usize) {
        (self.file_rel.clone(), self.meta.line_start, self.meta.line_end)
    }
}

/// A materialized code snippet: header, fenced code block, resolved range,
/// and whether the range represents the whole enclosing scope (and so may
/// exceed the per-hit budget by design).
#[derive(Debug, Clone)]
pub struct Snippet {
    pub header: String,
    pub code_block: String,
    pub line_start: usize,
    pub line_end: usize,
    pub is_full_scope: bool,
}

/// A registered micro-program: identity, liveness, and its exports map for
/// prompt macros.
#[derive(Debug, Clone)]
pub struct ProgramInfo {
    pub id: String,
    pub name: String,
    pub alive: bool,
}

/// Maximum length an individual export value is truncated to before being
/// written into a program's exports map (§4.J "Exports").
pub const EXPORT_MAX_CHARS: usize = 6000;

/// Truncate `value` to `EXPORT_MAX_CHARS`, appending an explicit marker when
/// truncation occurs.
pub fn truncate_export(value: &str) -> String {
    if value.chars().count() <= EXPORT_MAX_CHARS {
        return value.to_string();
    }
    let mut out: String = value.chars().take(EXPORT_MAX_CHARS).collect();
    out.push_str("\n...[truncated]");
    out
}

/// A runtime task: `patch.*` / `verify.*` / ... with positional and keyword
/// style arguments carried as JSON for transport-agnostic dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: HashMap<String, serde_json::Value>,
}

/// The closed set of event bus topics (§3 "Event bus topics").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ProgramSpawn,
    ProgramExit,
    ProgramHeartbeat,
    ProgramLog,
    TaskRequest,
    TaskProgress,
    TaskResult,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ProgramSpawn => "program.spawn",
            Topic::ProgramExit => "program.exit",
            Topic::ProgramHeartbeat => "program.heartbeat",
            Topic::ProgramLog => "program.log",
            Topic::TaskRequest => "task.request",
            Topic::TaskProgress => "task.progress",
            Topic::TaskResult => "task.result",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_truncation_adds_marker_past_limit() {
        let long = "x".repeat(EXPORT_MAX_CHARS + 10);
        let truncated = truncate_export(&long);
        assert!(truncated.ends_with("...[truncated]"));
        assert!(truncated.len() < long.len());
    }

    #[test]
    fn export_under_limit_is_unchanged() {
        assert_eq!(truncate_export("short"), "short");
    }

    #[test]
    fn chunk_meta_detects_whole_file_span() {
        let meta = ChunkMeta {
            file_rel: "a.py".into(),
            line_start: 1,
            line_end: 10,
            text_preview: String::new(),
            terms: vec![],
            ts_ms: 0,
        };
        assert!(meta.spans_whole_file(10));
        assert!(!meta.spans_whole_file(11));
    }
}
