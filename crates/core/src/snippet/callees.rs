//! Callee expansion (§4.E step 7): resolve up to N direct callees of a
//! symbol project-wide and append their clipped definitions after a
//! `# ---- expanded callees ----` banner.

use crate::ast::{self, SymbolKind};
use crate::config::RetrievalConfig;
use crate::walker::{self, WalkedFile};

const CALLEES_BANNER: &str = "# ---- expanded callees ----";

/// Direct call targets referenced textually inside `[scope_start,
/// scope_end]` of `source` (1-based inclusive): identifiers immediately
/// followed by `(`, deduplicated, first-seen order.
pub fn direct_call_names(source: &str, scope_start: usize, scope_end: usize) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let lo = scope_start.saturating_sub(1).min(lines.len());
    let hi = scope_end.min(lines.len());
    let body = lines[lo..hi].join("\n");

    let toks = crate::stages::common::tokenize_code(&body);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for i in 0..toks.len().saturating_sub(1) {
        if toks[i + 1] == "(" {
            let name = &toks[i];
            let is_ident = name.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false);
            if is_ident && seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
    }
    out
}

/// Resolve `call_name`'s definition project-wide: the first file whose AST
/// contains a matching function/method symbol, returning `(file_rel,
/// clipped_body)`. Unique `(file, line)` triples are kept, matching the
/// "keep unique file+line triples" tie-break.
pub fn resolve_callee(
    config: &RetrievalConfig,
    call_name: &str,
    per_callee_char_budget: usize,
) -> Option<(String, String)> {
    let files: Vec<WalkedFile> = walker::walk_project(config)
        .into_iter()
        .filter(|f| ast::is_python(f.rel_path.rsplit('.').next().unwrap_or("")))
        .collect();

    for file in files {
        let Ok(content) = std::fs::read_to_string(&file.abs_path) else { continue };
        let Some(file_ast) = ast::parse_file(&content, "py") else { continue };
        let hit = file_ast
            .find(call_name)
            .into_iter()
            .find(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method));
        if let Some(sym) = hit {
            let lines: Vec<&str> = content.lines().collect();
            let lo = sym.start_line.saturating_sub(1).min(lines.len());
            let hi = sym.end_line.min(lines.len());
            let body = lines[lo..hi].join("\n");
            let clipped: String = body.chars().take(per_callee_char_budget).collect();
            return Some((file.rel_path, clipped));
        }
    }
    None
}

/// Append up to `top_n` resolved callee bodies after the banner. Returns the
/// original code unchanged if no callees resolve.
pub fn expand_callees(
    config: &RetrievalConfig,
    code: &str,
    scope_start: usize,
    scope_end: usize,
    top_n: usize,
    per_callee_char_budget: usize,
) -> String {
    if top_n == 0 {
        return code.to_string();
    }
    let names = direct_call_names(code, scope_start, scope_end);
    let mut seen_locations = std::collections::HashSet::new();
    let mut appended = Vec::new();

    for name in names {
        if appended.len() >= top_n {
            break;
        }
        if let Some((file_rel, body)) = resolve_callee(config, &name, per_callee_char_budget) {
            let key = (file_rel.clone(), name.clone());
            if seen_locations.insert(key) {
                appended.push(format!("# {name} ({file_rel})\n{body}"));
            }
        }
    }

    if appended.is_empty() {
        return code.to_string();
    }
    format!("{code}\n{CALLEES_BANNER}\n{}", appended.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_call_names_extracts_unique_identifiers() {
        let src = "def f():\n    helper(1)\n    helper(2)\n    other()\n";
        let names = direct_call_names(src, 1, 4);
        assert_eq!(names, vec!["helper".to_string(), "other".to_string()]);
    }

    #[test]
    fn resolve_callee_finds_project_wide_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper(x):\n    return x + 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def caller():\n    return helper(1)\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let (file_rel, body) = resolve_callee(&config, "helper", 500).unwrap();
        assert_eq!(file_rel, "a.py");
        assert!(body.contains("return x + 1"));
    }

    #[test]
    fn expand_callees_appends_banner_when_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper(x):\n    return x + 1\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let code = "def caller():\n    return helper(1)\n";
        let out = expand_callees(&config, code, 1, 2, 2, 500);
        assert!(out.contains(CALLEES_BANNER));
        assert!(out.contains("return x + 1"));
    }
}
