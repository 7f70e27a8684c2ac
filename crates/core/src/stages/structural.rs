//! Structural stage kernels (§4.C): `astmatch`, `astcontains`, `pyast`,
//! `pydef`, `pyflow`, `pydoc`/`pyliterals`, and substitutes for Python-
//! ecosystem-only stages (`libcst`'s CST structural query, `jedi`'s
//! identifier reference resolution). All built on `ast.rs`'s tree-sitter
//! backed `FileAst`/`Symbol` index — Rust has no embedded Python analyzer,
//! so those two are implemented against the same token-skeleton/symbol-table
//! machinery `astmatch`/`pydef` use, rather than pulled in as separate
//! dependencies.

use std::sync::LazyLock;

use regex::Regex;

use crate::ast;
use crate::deadline::Deadline;
use crate::query::strong_tokens;
use crate::types::Hit;

use super::common::*;

/// AST-skeleton equality: first strict (non-identifier tokens must match
/// verbatim), then name-erased (identifier/number/string text ignored).
pub fn astmatch(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let pattern = tokenize_code(query);
    if pattern.len() < 2 {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let flat: Vec<(String, usize)> = flatten_tokens(&lines);

        if let Some((ls, le)) = find_skeleton_match(&flat, &pattern, true) {
            hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.999, "astmatch", pattern.clone()));
        } else if let Some((ls, le)) = find_skeleton_match(&flat, &pattern, false) {
            hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.992, "astmatch", pattern.clone()));
        }
    }
    hits
}

fn flatten_tokens(lines: &[&str]) -> Vec<(String, usize)> {
    let mut flat = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        for t in tokenize_code(line) {
            flat.push((t, i + 1));
        }
    }
    flat
}

/// Structural "contains" match (e.g. `isinstance(_, ast.T)`): the query's
/// leading call name appears as a call site in the file, regardless of its
/// argument text.
pub fn astcontains(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = tokenize_code(query);
    let Some(call_name) = tokens.iter().zip(tokens.iter().skip(1)).find(|(_, next)| next.as_str() == "(").map(|(name, _)| name.clone()) else {
        return Vec::new();
    };
    let Ok(re) = Regex::new(&format!(r"\b{}\s*\(", regex::escape(&call_name))) else { return Vec::new() };

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let Some(m) = re.find(&content) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let line_no = byte_offset_to_line(&content, m.start());
        let (ls, le) = line_window(line_no, 2, lines.len());
        hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.998, "astcontains", vec![call_name.clone()]));
    }
    hits
}

/// Call-name matches from the query, restricted to `.py` files and scanned
/// against the tree-sitter symbol table when available.
pub fn pyast(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = tokenize_code(query);
    let call_names: Vec<&String> =
        tokens.iter().zip(tokens.iter().skip(1)).filter(|(_, next)| next.as_str() == "(").map(|(name, _)| name).collect();
    if call_names.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k || !is_python_path(&file.rel_path) {
            continue;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        for name in &call_names {
            let Ok(re) = Regex::new(&format!(r"\b{}\s*\(", regex::escape(name))) else { continue };
            if let Some(m) = re.find(&content) {
                let line_no = byte_offset_to_line(&content, m.start());
                let (ls, le) = line_window(line_no, 3, lines.len());
                hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.995, "pyast", vec![(*name).clone()]));
                break;
            }
        }
        if hits.len() >= k {
            break;
        }
    }
    hits
}

static FLOW_TEMPLATES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"return\s+\w+\(").unwrap(),
        Regex::new(r"\[\s*\w+\s+for\s+\w+\s+in\s+").unwrap(),
        Regex::new(r"\{\s*\w+\s*:\s*\w+\s+for\s+\w+\s+in\s+").unwrap(),
        Regex::new(r"yield\s+from\s+").unwrap(),
    ]
});

/// Python data/control-flow patterns (`return f(x)`, comprehensions),
/// gated to files whose text also contains a query-derived flex match.
pub fn pyflow(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let is_flow_like = FLOW_TEMPLATES.iter().any(|re| re.is_match(query));
    if !is_flow_like {
        return Vec::new();
    }
    let Some(flex) = flex_regex(query) else { return Vec::new() };

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k || !is_python_path(&file.rel_path) {
            continue;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let Some(m) = flex.find(&content) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let line_no = byte_offset_to_line(&content, m.start());
        let (ls, le) = line_window(line_no, 2, lines.len());
        hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.9935, "pyflow", vec![]));
    }
    hits
}

/// CST structural pattern match — the Rust substitute for `libcst`, built
/// against the same token skeleton `astmatch` uses, restricted to `.py`.
pub fn libcst(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let pattern = tokenize_code(query);
    if pattern.len() < 2 {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k || !is_python_path(&file.rel_path) {
            continue;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let flat = flatten_tokens(&lines);
        if let Some((ls, le)) = find_skeleton_match(&flat, &pattern, false) {
            hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.9933, "libcst", pattern.clone()));
        }
    }
    hits
}

/// Definition-by-signature tokens: every strong query token appears in a
/// `.py` symbol's one-line signature (`def foo(x, y):`, decorated or not).
pub fn pydef(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k || !is_python_path(&file.rel_path) {
            continue;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let Some(file_ast) = ast::parse_file(&content, "py") else { continue };
        let lines: Vec<&str> = content.lines().collect();
        for sym in &file_ast.symbols {
            let sig_lower = sym.signature.to_lowercase();
            if tokens.iter().all(|t| sig_lower.contains(&t.to_lowercase())) {
                hits.push(make_hit(&file.rel_path, sym.start_line, sym.end_line, &lines, 0.9931, "pydef", tokens.clone()));
                break;
            }
        }
    }
    hits
}

/// Identifier references via the project's symbol table — the Rust
/// substitute for `jedi`: resolve the strongest query token to a `.py`
/// symbol name and return each reference occurrence.
pub fn jedi(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    let Some(ident) = tokens.first() else { return Vec::new() };
    let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(ident))) else { return Vec::new() };

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k || !is_python_path(&file.rel_path) {
            continue;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        if ast::parse_file(&content, "py").is_none() {
            continue;
        }
        let Some(m) = re.find(&content) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let line_no = byte_offset_to_line(&content, m.start());
        let (ls, le) = line_window(line_no, 2, lines.len());
        hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.992, "jedi", vec![ident.clone()]));
    }
    hits
}

static DOCSTRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)("""|''')(.*?)("""|''')"#).unwrap());
static STRING_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"\n]+)"|'([^'\n]+)'"#).unwrap());

/// Docstring token match (with optional fuzzy fallback via flex-regex).
pub fn pydoc(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k || !is_python_path(&file.rel_path) {
            continue;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        for m in DOCSTRING_RE.captures_iter(&content) {
            let body = m.get(2).map(|g| g.as_str().to_lowercase()).unwrap_or_default();
            if tokens.iter().any(|t| body.contains(&t.to_lowercase())) {
                let lines: Vec<&str> = content.lines().collect();
                let line_no = byte_offset_to_line(&content, m.get(0).unwrap().start());
                let (ls, le) = line_window(line_no, 2, lines.len());
                hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.991, "pydoc", tokens.clone()));
                break;
            }
        }
    }
    hits
}

/// String-literal token match (with optional fuzzy fallback).
pub fn pyliterals(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let tokens = strong_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        for m in STRING_LITERAL_RE.captures_iter(&content) {
            let body = m.get(1).or_else(|| m.get(2)).map(|g| g.as_str().to_lowercase()).unwrap_or_default();
            if tokens.iter().any(|t| body.contains(&t.to_lowercase())) {
                let lines: Vec<&str> = content.lines().collect();
                let line_no = byte_offset_to_line(&content, m.get(0).unwrap().start());
                let (ls, le) = line_window(line_no, 1, lines.len());
                hits.push(make_hit(&file.rel_path, ls, le, &lines, 0.9915, "pyliterals", tokens.clone()));
                break;
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;

    #[test]
    fn astmatch_name_erased_still_matches_renamed_function() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    return other_fn(y)\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = astmatch(&c, "return target_fn(x)", 1, &Deadline::new(250));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn astcontains_finds_isinstance_call() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "if isinstance(node, ast.Call):\n    pass\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = astcontains(&c, "isinstance(x, ast.Name)", 1, &Deadline::new(250));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn pydef_matches_signature_tokens() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def build_snippet(file_rel, meta):\n    pass\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = pydef(&c, "build_snippet file_rel", 1, &Deadline::new(250));
        assert_eq!(hits.len(), 1);
    }
}
