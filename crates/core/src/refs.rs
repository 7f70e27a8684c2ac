//! Usage refs and literal-ref fallback (§4.G step 5): project-wide
//! references to a hit's enclosing symbol, falling back to extra literal
//! hits when no symbol usages are found.

use crate::ast::{self, SymbolKind};
use crate::config::RetrievalConfig;
use crate::stages::common::is_python_path;
use crate::types::Hit;
use crate::walker::{self, WalkedFile};

/// One formatted reference line: `[usage|symbol: name (kind) | origin:
/// origin_path:ls-le -> here: path:ls-le]`.
pub fn format_usage_ref(
    symbol_name: &str,
    symbol_kind: &str,
    origin_path: &str,
    origin_start: usize,
    origin_end: usize,
    here_path: &str,
    here_start: usize,
    here_end: usize,
) -> String {
    format!(
        "[usage|symbol: {symbol_name} ({symbol_kind}) | origin: {origin_path}:{origin_start}-{origin_end} -> here: {here_path}:{here_start}-{here_end}]"
    )
}

/// Project-wide references to `symbol_name`: every file (other than
/// `origin_path`, unless it recurs elsewhere in the same file) whose source
/// text contains the identifier, limited to `max_refs`, each with a
/// `around`-line window.
pub fn usage_refs(
    config: &RetrievalConfig,
    symbol_name: &str,
    symbol_kind: &str,
    origin_path: &str,
    origin_start: usize,
    origin_end: usize,
    max_refs: usize,
    around: usize,
) -> Vec<String> {
    if symbol_name.is_empty() || max_refs == 0 {
        return Vec::new();
    }
    let files: Vec<WalkedFile> =
        walker::walk_project(config).into_iter().filter(|f| is_python_path(&f.rel_path)).collect();

    let mut out = Vec::new();
    for file in files {
        if out.len() >= max_refs {
            break;
        }
        let Ok(content) = std::fs::read_to_string(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if out.len() >= max_refs {
                break;
            }
            let line_no = idx + 1;
            if file.rel_path == origin_path && line_no >= origin_start && line_no <= origin_end {
                continue;
            }
            if contains_identifier(line, symbol_name) {
                let (start, end) =
                    crate::stages::common::line_window(line_no, around, lines.len());
                out.push(format_usage_ref(
                    symbol_name,
                    symbol_kind,
                    origin_path,
                    origin_start,
                    origin_end,
                    &file.rel_path,
                    start,
                    end,
                ));
            }
        }
    }
    out
}

fn contains_identifier(line: &str, name: &str) -> bool {
    crate::stages::common::tokenize_code(line).iter().any(|t| t == name)
}

/// Literal-ref fallback (§4.G step 5): extra literal hits for `query`,
/// excluding the originating hit, headered the same way as usage refs but
/// without symbol metadata.
pub fn literal_refs(extra_hits: &[Hit], origin: &Hit, max_refs: usize) -> Vec<String> {
    extra_hits
        .iter()
        .filter(|h| h.dedup_key() != origin.dedup_key())
        .take(max_refs)
        .map(|h| {
            format!(
                "[usage|literal -> here: {}:{}-{}]",
                h.file_rel, h.meta.line_start, h.meta.line_end
            )
        })
        .collect()
}

/// The enclosing symbol's name/kind for a hit, used to drive `usage_refs`.
pub fn enclosing_symbol(content: &str, line: usize) -> Option<(String, SymbolKind)> {
    let file_ast = ast::parse_file(content, "py")?;
    let sym = file_ast.smallest_enclosing(line)?;
    Some((sym.name.clone(), sym.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMeta;

    #[test]
    fn usage_refs_finds_cross_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper():\n    return 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "from a import helper\nhelper()\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let refs = usage_refs(&config, "helper", "def", "a.py", 1, 2, 5, 1);
        assert!(refs.iter().any(|r| r.contains("b.py")));
    }

    #[test]
    fn usage_refs_excludes_origin_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper():\n    return helper\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let refs = usage_refs(&config, "helper", "def", "a.py", 1, 2, 5, 1);
        assert!(refs.is_empty());
    }

    fn hit(file: &str, ls: usize, le: usize) -> Hit {
        Hit {
            score: 0.5,
            file_rel: file.to_string(),
            meta: ChunkMeta { file_rel: file.to_string(), line_start: ls, line_end: le, text_preview: String::new(), terms: vec![], ts_ms: 0 },
            stage: "literal",
        }
    }

    #[test]
    fn literal_refs_excludes_origin_and_caps_count() {
        let origin = hit("a.py", 1, 2);
        let others = vec![origin.clone(), hit("b.py", 3, 4), hit("c.py", 5, 6)];
        let refs = literal_refs(&others, &origin, 1);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].contains("b.py"));
    }
}
