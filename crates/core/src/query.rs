//! Query decomposition helpers shared by the reranker, the snippet builder,
//! and the context builder's multi-query path: code-core extraction,
//! identifier extraction, and sub-query generation.

use regex::Regex;
use std::sync::LazyLock;

static CODE_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[A-Za-z0-9_./:\-+*<>=!"'\[\]\(\)\{\},\s]+"#).unwrap());
static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w.]+").unwrap());

/// Look for the longest code-like substring of `query` that plausibly parses
/// as an expression or statement (heuristically: contains an identifier next
/// to an operator/paren/bracket), falling back to the longest code-like span.
pub fn extract_code_core(query: &str) -> Option<String> {
    let mut spans: Vec<&str> =
        CODE_SPAN_RE.find_iter(query).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()).collect();
    spans.sort_by_key(|s| std::cmp::Reverse(s.len()));

    for s in &spans {
        if s.chars().count() >= 6 && looks_like_code(s) {
            return Some((*s).to_string());
        }
    }
    spans.first().map(|s| s.to_string())
}

fn looks_like_code(s: &str) -> bool {
    let has_paren_or_bracket = s.contains('(') || s.contains('[') || s.contains('{');
    let has_operator = s.contains('=') || s.contains('.') || s.contains(':');
    let has_ident = s.chars().any(|c| c.is_alphabetic());
    has_ident && (has_paren_or_bracket || has_operator)
}

/// Identifier-ish tokens from `text`: length >= 4, not all-digit, containing
/// an underscore/dot or otherwise looking camelCase. Deduped, case preserved
/// (first occurrence wins), capped at `max_items`.
pub fn extract_identifiers(text: &str, max_items: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in IDENT_RE.find_iter(text) {
        let tok = m.as_str();
        if tok.chars().count() < 4 || tok.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let has_underscore_or_dot = tok.contains('_') || tok.contains('.');
        let is_camel = {
            let mut seen_lower = false;
            let mut camel = false;
            for c in tok.chars() {
                if c.is_lowercase() {
                    seen_lower = true;
                } else if c.is_uppercase() && seen_lower {
                    camel = true;
                    break;
                }
            }
            camel
        };
        if !has_underscore_or_dot && !is_camel {
            continue;
        }
        let key = tok.to_lowercase();
        if seen.insert(key) {
            out.push(tok.to_string());
            if out.len() >= max_items {
                break;
            }
        }
    }
    out
}

/// "Strong tokens": identifier-like words of length >= 3 extracted from a
/// query for reranking and anchor selection, in first-seen order, deduped.
pub fn strong_tokens(query: &str) -> Vec<String> {
    let re: &Regex = &IDENT_RE;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in re.find_iter(query) {
        let tok = m.as_str();
        if tok.chars().count() < 3 {
            continue;
        }
        let lower = tok.to_lowercase();
        if seen.insert(lower) {
            out.push(tok.to_string());
        }
    }
    out
}

/// Build the rerank/anchor token set, preferring the code-core fragment over
/// the raw query when one is found (§4.D reranker: "prefer the code-core
/// fragment ... fall back to the raw query").
pub fn rerank_tokens(query: &str) -> Vec<String> {
    match extract_code_core(query) {
        Some(core) => strong_tokens(&core),
        None => strong_tokens(query),
    }
}

/// Decompose `query` into a small set of sub-queries for multi-query
/// aggregation: the code-core fragment, a compacted strong-token phrase, and
/// — when both `isinstance` and an `ast.`-prefixed token are present — a
/// targeted `isinstance ast.X` pair. Deduped, order preserved.
pub fn build_codecentric_subqueries(query: &str, max_tokens: usize, max_compact: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |s: String, seen: &mut std::collections::HashSet<String>| {
        let trimmed = s.trim().to_string();
        if !trimmed.is_empty() && seen.insert(trimmed.clone()) {
            out.push(trimmed);
        }
    };

    if let Some(core) = extract_code_core(query) {
        push(core, &mut seen);
    }

    let tokens = strong_tokens(query);
    let compact: Vec<&str> =
        tokens.iter().take(max_tokens.min(tokens.len())).map(|s| s.as_str()).take(max_compact).collect();
    if !compact.is_empty() {
        push(compact.join(" "), &mut seen);
    }

    if tokens.iter().any(|t| t.eq_ignore_ascii_case("isinstance")) {
        if let Some(ast_tok) = tokens.iter().find(|t| t.starts_with("ast.")) {
            push(format!("isinstance {ast_tok}"), &mut seen);
        }
    }

    push(query.to_string(), &mut seen);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_code_core_prefers_longest_parseable_span() {
        let core = extract_code_core("can you find where return g(x + 1) happens?");
        assert_eq!(core.as_deref(), Some("return g(x + 1)"));
    }

    #[test]
    fn extract_identifiers_skips_short_and_all_digit() {
        let ids = extract_identifiers("the build_snippet function calls find_line_window 123", 50);
        assert!(ids.contains(&"build_snippet".to_string()));
        assert!(ids.contains(&"find_line_window".to_string()));
        assert!(!ids.iter().any(|t| t == "123"));
    }

    #[test]
    fn subqueries_include_isinstance_ast_pair() {
        let subs = build_codecentric_subqueries("isinstance(node, ast.Call)", 8, 5);
        assert!(subs.iter().any(|s| s.starts_with("isinstance ast.")));
    }

    #[test]
    fn subqueries_dedup_and_preserve_order() {
        let subs = build_codecentric_subqueries("foo foo foo", 8, 5);
        let unique: std::collections::HashSet<_> = subs.iter().collect();
        assert_eq!(unique.len(), subs.len());
    }
}
