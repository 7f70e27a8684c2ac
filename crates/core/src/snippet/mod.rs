//! Snippet builder (§4.E): turns a `(file_rel, meta, query)` hit into a
//! materialized `Snippet` — header, fenced code, resolved range, and
//! whether the range is a full enclosing scope.

pub mod callees;
pub mod cache;
pub mod segments;

use crate::config::RetrievalConfig;
use crate::py_scope;
use crate::query;
use crate::types::{ChunkMeta, Snippet};

/// Read a file losslessly-tolerant of invalid UTF-8 (`errors='ignore'`
/// equivalent).
pub fn read_lossy(path: &std::path::Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Build a snippet for `meta` inside `content`, given the originating
/// `query` and any extra mid-window centers contributed by other hits in
/// the same file (§4.E step 5's "and on any extra centers from other hits
/// in the same file").
pub fn build_snippet(
    file_rel: &str,
    content: &str,
    meta: &ChunkMeta,
    query_str: &str,
    config: &RetrievalConfig,
    extra_centers: &[usize],
) -> Snippet {
    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    let is_python = crate::stages::common::is_python_path(file_rel);

    if meta.spans_whole_file(total_lines) {
        return finish(file_rel, &lines, 1, total_lines.max(1), true, content, config);
    }

    let (mut line_start, mut line_end) = if meta.has_explicit_range() {
        (meta.line_start, meta.line_end)
    } else {
        locate_window(content, query_str)
    };

    if is_python {
        if let Some((s, e)) = py_scope::find_python_scope(content, line_start) {
            line_start = s;
            line_end = e;
            let scope_text = lines[(s - 1).min(lines.len())..e.min(lines.len())].join("\n");
            if scope_text.chars().count() <= config.scope_max_chars {
                return finish(file_rel, &lines, s, e, true, content, config);
            }
        }
    }

    if config.multi_segment {
        let idents = query::extract_identifiers(query_str, 16);
        let mut centers: Vec<usize> = Vec::new();
        if let Some(line) = find_first_token_line(&lines, &idents) {
            centers.push(line);
        }
        centers.extend(extra_centers.iter().copied());

        let composite = segments::build_head_mid_tail(
            &lines,
            line_start,
            line_end,
            config.head_lines,
            config.tail_lines,
            config.mid_windows,
            config.mid_around,
            &centers,
            config.scope_max_chars,
        );
        let code = if config.strip_comments {
            segments::strip_trivial_comments(&composite)
        } else {
            composite
        };
        let code = if config.expand_callees_top_n > 0 {
            callees::expand_callees(
                config,
                &code,
                line_start,
                line_end,
                config.expand_callees_top_n,
                config.snippet_per_hit_chars / 2,
            )
        } else {
            code
        };
        return Snippet {
            header: header_for(file_rel, content, line_start, line_end),
            code_block: fence(file_rel, &code),
            line_start,
            line_end,
            is_full_scope: false,
        };
    }

    finish(file_rel, &lines, line_start, line_end, false, content, config)
}

/// Wrap `code` in a markdown fence tagged with the language derived from
/// `file_rel`'s extension (§4.E step 8).
fn fence(file_rel: &str, code: &str) -> String {
    let tag = crate::stages::common::lang_tag_for_path(file_rel);
    format!("```{tag}\n{code}\n```")
}

fn finish(
    file_rel: &str,
    lines: &[&str],
    line_start: usize,
    line_end: usize,
    is_full_scope: bool,
    content: &str,
    config: &RetrievalConfig,
) -> Snippet {
    let lo = line_start.saturating_sub(1).min(lines.len());
    let hi = line_end.min(lines.len());
    let raw = lines[lo..hi].join("\n");
    let code = if config.strip_comments { segments::strip_trivial_comments(&raw) } else { raw };
    let code = if config.expand_callees_top_n > 0 {
        callees::expand_callees(
            config,
            &code,
            line_start,
            line_end,
            config.expand_callees_top_n,
            config.snippet_per_hit_chars / 2,
        )
    } else {
        code
    };
    Snippet {
        header: header_for(file_rel, content, line_start, line_end),
        code_block: fence(file_rel, &code),
        line_start,
        line_end,
        is_full_scope,
    }
}

/// `[path:ls-le]`, enriched with `def name` / `class name` for Python hits
/// (§4.E step 6). Public so callers outside the snippet builder (e.g. the
/// verifier's "header string appears in diff" check, §4.K) can compute the
/// same header a snippet would carry without building the whole snippet.
pub fn header_for(file_rel: &str, content: &str, line_start: usize, line_end: usize) -> String {
    if crate::stages::common::is_python_path(file_rel) {
        if let Some((name, kind)) = py_scope::get_python_symbol_at_line(content, line_start) {
            return format!("[{file_rel}:{line_start}-{line_end} {kind} {name}]");
        }
    }
    format!("[{file_rel}:{line_start}-{line_end}]")
}

/// Locate a window when `meta` carries no explicit range: try the
/// whitespace-tolerant code-core regex first, then query identifiers.
fn locate_window(content: &str, query_str: &str) -> (usize, usize) {
    if let Some(core) = query::extract_code_core(query_str) {
        if let Some(re) = crate::stages::common::flex_regex(&core) {
            if let Some(m) = re.find(content) {
                let line = crate::stages::common::byte_offset_to_line(content, m.start());
                return crate::stages::common::line_window(line, 6, content.lines().count());
            }
        }
    }
    let idents = query::extract_identifiers(query_str, 16);
    if let Some((start, end, _)) = crate::line_window::find_line_window(content, &idents, 6) {
        return (start, end);
    }
    (1, content.lines().count().min(20).max(1))
}

/// First line (1-based) containing any of `tokens`, in token order (not
/// earliest-position-in-file, per §4.E's tie-break rule).
fn find_first_token_line(lines: &[&str], tokens: &[String]) -> Option<usize> {
    for token in tokens {
        let needle = token.to_lowercase();
        if let Some(idx) = lines.iter().position(|l| l.to_lowercase().contains(&needle)) {
            return Some(idx + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_file_meta_is_emitted_as_full_scope() {
        let dir = tempfile::tempdir().unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let content = "a\nb\nc\n";
        let meta = ChunkMeta { file_rel: "a.py".into(), line_start: 1, line_end: 3, text_preview: String::new(), terms: vec![], ts_ms: 0 };
        let snip = build_snippet("a.py", content, &meta, "query", &config, &[]);
        assert!(snip.is_full_scope);
    }

    #[test]
    fn python_hit_widens_to_enclosing_function() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RetrievalConfig::load(dir.path()).unwrap();
        config.multi_segment = false;
        let content = "def target():\n    x = 1\n    return x\n";
        let meta = ChunkMeta { file_rel: "a.py".into(), line_start: 2, line_end: 2, text_preview: String::new(), terms: vec![], ts_ms: 0 };
        let snip = build_snippet("a.py", content, &meta, "target", &config, &[]);
        assert_eq!((snip.line_start, snip.line_end), (1, 3));
        assert!(snip.header.contains("def target"));
    }

    #[test]
    fn non_python_explicit_range_is_sliced_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let content = "fn a() {}\nfn b() {}\nfn c() {}\n";
        let meta = ChunkMeta { file_rel: "a.rs".into(), line_start: 2, line_end: 2, text_preview: String::new(), terms: vec![], ts_ms: 0 };
        let snip = build_snippet("a.rs", content, &meta, "b", &config, &[]);
        assert_eq!((snip.line_start, snip.line_end), (2, 2));
        assert!(snip.code_block.contains("fn b"));
    }
}
