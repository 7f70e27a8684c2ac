//! Lexical stage kernels (§4.C): `tokenmatch`, `lineexact`, `literal`,
//! `openbuffer`, `traceback`, `cooccur`, `textscan`, `exact`, `keyword`, and
//! the `regex` fuzzy-phrase stage. `exact`/`keyword` share a BM25-lite
//! token-overlap score.

use std::sync::LazyLock;

use regex::Regex;

use crate::deadline::Deadline;
use crate::query::strong_tokens;
use crate::types::Hit;

use super::common::*;

/// Python token subsequence, whitespace-/comment-agnostic.
pub fn tokenmatch(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    if !activation_ok(query, 4) {
        return Vec::new();
    }
    let q_tokens = tokenize_code(query);
    if q_tokens.len() < 2 {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();

        let mut flat: Vec<(String, usize)> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let stripped = strip_py_line_comment(line);
            for t in tokenize_code(stripped) {
                flat.push((t, i + 1));
            }
        }

        if let Some((ls, le)) = find_token_subsequence(&flat, &q_tokens) {
            hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.999, "tokenmatch", q_tokens.clone()));
        }
    }
    hits
}

fn find_token_subsequence(haystack: &[(String, usize)], pattern: &[String]) -> Option<(usize, usize)> {
    let mut pi = 0usize;
    let mut start_line = None;
    let mut end_line = None;
    for (tok, line) in haystack {
        if pi < pattern.len() && tok.eq_ignore_ascii_case(&pattern[pi]) {
            if pi == 0 {
                start_line = Some(*line);
            }
            end_line = Some(*line);
            pi += 1;
            if pi == pattern.len() {
                return Some((start_line?, end_line?));
            }
        }
    }
    None
}

/// Whitespace-flex literal regex, single line/window granularity.
pub fn lineexact(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let Some(re) = flex_regex(query) else { return Vec::new() };
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let Some(m) = re.find(&content) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let line_no = byte_offset_to_line(&content, m.start());
        let (ls, le) = line_window(line_no, 1, lines.len());
        hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.998, "lineexact", vec![]));
    }
    hits
}

/// Case-sensitive / case-insensitive / flex literal match over on-disk
/// files, at descending score ceilings (0.997 / 0.996 / 0.995).
pub fn literal(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let flex = flex_regex(trimmed);

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();

        let found = if let Some(pos) = content.find(trimmed) {
            Some((pos, 0.997))
        } else if let Some(pos) = content.to_lowercase().find(&trimmed.to_lowercase()) {
            Some((pos, 0.996))
        } else {
            flex.as_ref().and_then(|re| re.find(&content)).map(|m| (m.start(), 0.995))
        };

        if let Some((byte_pos, score)) = found {
            let line_no = byte_offset_to_line(&content, byte_pos);
            let (ls, le) = line_window(line_no, 2, lines.len());
            hits.push(make_hit(&file.rel_path, ls, le, &lines, score, "literal", vec![]));
        }
    }
    hits
}

/// Same three-tier literal match, but over unsaved open-buffer snapshots
/// instead of on-disk files (§6 "Open buffers snapshot").
pub fn openbuffer(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for buf in ctx.open_buffers {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let lines: Vec<&str> = buf.text.lines().collect();
        let pos = buf.text.find(trimmed).or_else(|| buf.text.to_lowercase().find(&trimmed.to_lowercase()));
        if let Some(byte_pos) = pos {
            let line_no = byte_offset_to_line(&buf.text, byte_pos);
            let (ls, le) = line_window(line_no, 2, lines.len());
            hits.push(make_hit(&buf.name, ls, le, &lines, 0.9965, "openbuffer", vec![]));
        }
    }
    hits
}

static TRACEBACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File\s+"([^"]+)",\s+line\s+(\d+)"#).unwrap());

/// Parsed `File "p", line N` frames routed straight to that file/line.
pub fn traceback(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let mut hits = Vec::new();
    for cap in TRACEBACK_RE.captures_iter(query) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let path_str = &cap[1];
        let Ok(line_no) = cap[2].parse::<usize>() else { continue };
        let rel_path = path_str.replace('\\', "/");
        let rel_path = rel_path.trim_start_matches("./").to_string();
        let abs = ctx.project_root.join(&rel_path);
        let Some(content) = read_file(&abs) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let (ls, le) = line_window(line_no, 3, lines.len());
        hits.push(make_hit(&rel_path, ls, le, &lines, 0.996, "traceback", vec![]));
    }
    hits
}

/// Two-or-more query tokens co-occurring within a small line window.
pub fn cooccur(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.len() < 2 {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let lower_lines: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();

        let window_radius = 3usize;
        let mut best: Option<usize> = None;
        for (i, _) in lines.iter().enumerate() {
            let lo = i.saturating_sub(window_radius);
            let hi = (i + window_radius + 1).min(lines.len());
            let joined = lower_lines[lo..hi].join(" ");
            let matched = tokens.iter().filter(|t| joined.contains(&t.to_lowercase())).count();
            if matched >= 2 {
                best = Some(i + 1);
                break;
            }
        }
        if let Some(line_no) = best {
            let (ls, le) = line_window(line_no, window_radius, lines.len());
            let matched_count =
                tokens.iter().filter(|t| lower_lines.join(" ").contains(&t.to_lowercase())).count();
            let score = 0.992 + 0.006 * (matched_count.min(tokens.len()) as f64 / tokens.len() as f64);
            hits.push(make_hit(&file.rel_path, ls, le, &lines, score.min(0.998), "cooccur", tokens.clone()));
        }
    }
    hits
}

/// Generic flex-phrase / token-window scan with a fuzzy-overlap fallback.
pub fn textscan(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let flex = flex_regex(query);

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();

        if let Some(m) = flex.as_ref().and_then(|re| re.find(&content)) {
            let line_no = byte_offset_to_line(&content, m.start());
            let (ls, le) = line_window(line_no, 2, lines.len());
            hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.99, "textscan", tokens.clone()));
            continue;
        }

        let lower = content.to_lowercase();
        let matched = tokens.iter().filter(|t| lower.contains(&t.to_lowercase())).count();
        if matched > 0 {
            let line_no = tokens
                .iter()
                .filter_map(|t| lines.iter().position(|l| l.to_lowercase().contains(&t.to_lowercase())))
                .next()
                .map(|idx| idx + 1)
                .unwrap_or(1);
            let (ls, le) = line_window(line_no, 2, lines.len());
            let score = 0.98 + 0.009 * (matched as f64 / tokens.len() as f64);
            hits.push(make_hit(&file.rel_path, ls, le, &lines, score.min(0.99), "textscan", tokens.clone()));
        }
    }
    hits
}

/// Token substring over a known chunk's preview/terms/path (glossary:
/// "Preview: the cached snippet text of an embedded chunk"). Operates over
/// the embedding store, not a fresh file scan.
pub fn exact(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for chunk in ctx.known_chunks {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let haystack =
            format!("{} {} {}", chunk.meta.text_preview.to_lowercase(), chunk.meta.terms.join(" ").to_lowercase(), chunk.meta.file_rel.to_lowercase());
        let matched = tokens.iter().filter(|t| haystack.contains(&t.to_lowercase())).count();
        if matched > 0 {
            let score = 0.5 + 0.45 * (matched as f64 / tokens.len() as f64);
            hits.push(Hit {
                score: score.min(0.95),
                file_rel: chunk.meta.file_rel.clone(),
                meta: chunk.meta.clone(),
                stage: "exact",
            });
        }
    }
    hits
}

/// Overlap-count heuristic over the same embedding-store chunks, clamped to
/// a low ceiling — the weakest signal in the cascade.
pub fn keyword(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for chunk in ctx.known_chunks {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let haystack = format!("{} {}", chunk.meta.text_preview.to_lowercase(), chunk.meta.terms.join(" ").to_lowercase());
        let matched = tokens.iter().filter(|t| haystack.contains(&t.to_lowercase())).count();
        if matched > 0 {
            let score = 0.38 * (matched as f64 / tokens.len() as f64);
            hits.push(Hit {
                score: score.min(0.38),
                file_rel: chunk.meta.file_rel.clone(),
                meta: chunk.meta.clone(),
                stage: "keyword",
            });
        }
    }
    hits
}

/// `regex` package fuzzy phrase — a flex-regex match allowed to span
/// multiple lines, distinct from `lineexact`'s single-window variant.
pub fn regex_fuzzy(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let Some(re) = flex_regex(query) else { return Vec::new() };
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let Some(m) = re.find(&content) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let start_line = byte_offset_to_line(&content, m.start());
        let end_line = byte_offset_to_line(&content, m.end().saturating_sub(1).max(m.start()));
        let (ls, _) = line_window(start_line, 1, lines.len());
        let (_, le) = line_window(end_line, 1, lines.len());
        hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.993, "regex", vec![]));
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;

    #[test]
    fn lineexact_finds_literal_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def foo(x):\n    return g(x + 1)\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = lineexact(&c, "return g(x + 1)", 1, &Deadline::new(250));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_rel, "a.py");
        assert!(hits[0].score >= 0.995);
    }

    #[test]
    fn tokenmatch_is_whitespace_and_comment_agnostic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "for item in items:\n    # comment\n    process(item)\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = tokenmatch(&c, "for item in items: process(item)", 1, &Deadline::new(250));
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= 0.999);
    }

    #[test]
    fn traceback_routes_to_parsed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (1..=60).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("b.py"), &content).unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = traceback(&c, "File \"b.py\", line 42, in bar", 1, &Deadline::new(100));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_rel, "b.py");
        assert!(hits[0].meta.line_start <= 42 && hits[0].meta.line_end >= 42);
    }
}
