//! Shared plumbing for every stage kernel (§4.C): the `(query, k, deadline)
//! -> hits` contract's context object, candidate-file enumeration
//! ("prefers files already known to the embedding store, then falls back to
//! the file walker"), the flex-regex builder from the glossary, and the
//! token-classification skeleton used by the structural stages.

use std::path::Path;

use regex::Regex;

use crate::config::RetrievalConfig;
use crate::embed_store::{self, EmbedStoreLimits};
use crate::types::{Chunk, ChunkMeta, Hit};
use crate::walker::{self, WalkedFile};

/// Read-only context threaded into every stage kernel call.
pub struct StageContext<'a> {
    pub project_root: &'a Path,
    pub config: &'a RetrievalConfig,
    pub known_chunks: &'a [Chunk],
    pub open_buffers: &'a [crate::buffers::OpenBuffer],
}

/// Cheap activation gate: a stage doesn't bother running against an
/// effectively-empty query (§4.C step 1).
pub fn activation_ok(query: &str, min_chars: usize) -> bool {
    query.trim().chars().count() >= min_chars
}

/// Candidate files for a file-scanning stage: files already known to the
/// embedding store first, then the rest of the project walk, deduped by
/// relative path.
pub fn candidate_files(ctx: &StageContext) -> Vec<WalkedFile> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for rel in embed_store::known_files(ctx.project_root, &EmbedStoreLimits::default()) {
        let abs = ctx.project_root.join(&rel);
        if abs.is_file() && seen.insert(rel.clone()) {
            out.push(WalkedFile { abs_path: abs, rel_path: rel });
        }
    }
    for f in walker::walk_project(ctx.config) {
        if seen.insert(f.rel_path.clone()) {
            out.push(f);
        }
    }
    out
}

pub fn read_file(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

pub fn is_python_path(rel_path: &str) -> bool {
    rel_path.ends_with(".py") || rel_path.ends_with(".pyi")
}

/// Markdown fence language tag derived from a file's extension (§4.E step 8,
/// "`code_block` is fenced with a language tag derived from extension").
/// Unknown extensions fence with no tag, matching plain-text code fences.
pub fn lang_tag_for_path(rel_path: &str) -> &'static str {
    match rel_path.rsplit('.').next().unwrap_or("") {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "tsx",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "rb" => "ruby",
        "sh" | "bash" => "bash",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "sql" => "sql",
        _ => "",
    }
}

/// A `(start, end)` 1-based inclusive line window of `radius` lines either
/// side of `line_no`, clamped to `[1, total_lines]`.
pub fn line_window(line_no: usize, radius: usize, total_lines: usize) -> (usize, usize) {
    let total = total_lines.max(1);
    let start = line_no.saturating_sub(radius).max(1);
    let end = (line_no + radius).min(total);
    (start, end)
}

pub fn byte_offset_to_line(content: &str, byte_offset: usize) -> usize {
    content.as_bytes()[..byte_offset.min(content.len())].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Build a `Hit` from a resolved file + line range, slicing the preview text
/// out of the already-split lines.
pub fn make_hit(
    file_rel: &str,
    line_start: usize,
    line_end: usize,
    lines: &[&str],
    score: f64,
    stage: &'static str,
    terms: Vec<String>,
) -> Hit {
    let lo = line_start.saturating_sub(1).min(lines.len());
    let hi = line_end.min(lines.len());
    let preview = lines[lo..hi].join("\n");
    Hit {
        score: score.clamp(0.0, 1.0),
        file_rel: file_rel.to_string(),
        meta: ChunkMeta { file_rel: file_rel.to_string(), line_start, line_end, text_preview: preview, terms, ts_ms: 0 },
        stage,
    }
}

/// A regular expression built from a literal string by collapsing
/// whitespace runs into `\s+` and allowing flexible spacing around
/// punctuation like `.`, `(`, `)`, `,` (glossary: "Flex regex").
pub fn flex_regex(literal: &str) -> Option<Regex> {
    let trimmed = literal.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut pattern = String::from("(?s)");
    let mut prev_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !prev_space {
                pattern.push_str(r"\s+");
            }
            prev_space = true;
            continue;
        }
        prev_space = false;
        if "().,[]{}".contains(c) {
            pattern.push_str(r"\s*");
            pattern.push_str(&regex::escape(&c.to_string()));
            pattern.push_str(r"\s*");
        } else {
            pattern.push_str(&regex::escape(&c.to_string()));
        }
    }
    Regex::new(&pattern).ok()
}

/// Tokenize source into word-runs and single-character punctuation, the
/// granularity the `tokenmatch`/skeleton-matching stages operate on.
pub fn tokenize_code(s: &str) -> Vec<String> {
    static TOK_RE: std::sync::LazyLock<Regex> =
        std::sync::LazyLock::new(|| Regex::new(r"\w+|[^\w\s]").unwrap());
    TOK_RE.find_iter(s).map(|m| m.as_str().to_string()).collect()
}

/// Strip a trailing `#...` Python comment from a single line (naive: does
/// not account for `#` inside string literals, matching this stage's
/// "cheap, fast, best-effort" character).
pub fn strip_py_line_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Ident,
    Number,
    Str,
    Op,
}

pub fn classify_tok(t: &str) -> TokKind {
    let mut chars = t.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => TokKind::Number,
        Some(c) if c == '"' || c == '\'' => TokKind::Str,
        Some(c) if c.is_alphabetic() || c == '_' => TokKind::Ident,
        _ => TokKind::Op,
    }
}

/// Find the first window in `haystack` whose token-kind skeleton matches
/// `pattern`'s; `strict` additionally requires non-identifier tokens to
/// match verbatim ("name-erased" otherwise erases identifier/string/number
/// text and compares kinds only). Returns the index range into `haystack`.
pub fn find_skeleton_match(
    haystack: &[(String, usize)],
    pattern: &[String],
    strict: bool,
) -> Option<(usize, usize)> {
    if pattern.is_empty() || haystack.len() < pattern.len() {
        return None;
    }
    let pattern_kinds: Vec<TokKind> = pattern.iter().map(|t| classify_tok(t)).collect();

    'windows: for start in 0..=(haystack.len() - pattern.len()) {
        for (offset, pk) in pattern_kinds.iter().enumerate() {
            let (tok, _) = &haystack[start + offset];
            if classify_tok(tok) != *pk {
                continue 'windows;
            }
            if strict && *pk != TokKind::Ident && !tok.eq_ignore_ascii_case(&pattern[offset]) {
                continue 'windows;
            }
        }
        let start_line = haystack[start].1;
        let end_line = haystack[start + pattern.len() - 1].1;
        return Some((start_line, end_line));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flex_regex_matches_across_whitespace_variants() {
        let re = flex_regex("return g(x + 1)").unwrap();
        assert!(re.is_match("return g(x + 1)"));
        assert!(re.is_match("return   g( x + 1 )"));
        assert!(!re.is_match("return h(x + 1)"));
    }

    #[test]
    fn tokenize_code_splits_words_and_punctuation() {
        let toks = tokenize_code("foo(x, 1)");
        assert_eq!(toks, vec!["foo", "(", "x", ",", "1", ")"]);
    }

    #[test]
    fn skeleton_match_name_erased_ignores_identifier_text() {
        let haystack: Vec<(String, usize)> =
            vec![("return".into(), 1), ("other_fn".into(), 1), ("(".into(), 1), ("y".into(), 1), (")".into(), 1)];
        let pattern: Vec<String> = vec!["return".into(), "target_fn".into(), "(".into(), "x".into(), ")".into()];
        assert!(find_skeleton_match(&haystack, &pattern, false).is_some());
        assert!(find_skeleton_match(&haystack, &pattern, true).is_none());
    }
}
