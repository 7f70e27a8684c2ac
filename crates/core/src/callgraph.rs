//! Callgraph slice (§4.G step 6): up to a few callers and callee
//! definitions of a hit's enclosing symbol, shown as `[CALLER] [path:ls-le]`
//! / `[CALLEE DEF name] [path:ls-le]`. Scans a capped, time-budgeted slice
//! of the project rather than maintaining a persistent call-edge index
//! (§9 design note: "arena of candidate files, not a whole-repo graph").

use crate::ast::{self, SymbolKind};
use crate::config::RetrievalConfig;
use crate::deadline::Deadline;
use crate::snippet::callees::direct_call_names;
use crate::stages::common::is_python_path;
use crate::walker::{self, WalkedFile};

#[derive(Debug, Clone)]
pub enum GraphNode {
    Caller { path: String, line_start: usize, line_end: usize },
    CalleeDef { name: String, path: String, line_start: usize, line_end: usize },
}

impl GraphNode {
    pub fn render(&self) -> String {
        match self {
            GraphNode::Caller { path, line_start, line_end } => {
                format!("[CALLER] [{path}:{line_start}-{line_end}]")
            }
            GraphNode::CalleeDef { name, path, line_start, line_end } => {
                format!("[CALLEE DEF {name}] [{path}:{line_start}-{line_end}]")
            }
        }
    }
}

/// Scan up to `config.callgraph_scan_cap_files` candidate files (capped by
/// `config.callgraph_time_budget_ms`), looking for callers of `symbol_name`
/// and definitions of `symbol_name`'s own direct callees.
pub fn build_slice(
    config: &RetrievalConfig,
    symbol_name: &str,
    origin_path: &str,
    origin_start: usize,
    origin_end: usize,
) -> Vec<GraphNode> {
    if !config.callgraph_enabled || symbol_name.is_empty() {
        return Vec::new();
    }
    let deadline = Deadline::new(config.callgraph_time_budget_ms);
    let files: Vec<WalkedFile> = walker::walk_project(config)
        .into_iter()
        .filter(|f| is_python_path(&f.rel_path))
        .take(config.callgraph_scan_cap_files)
        .collect();

    let mut callers = Vec::new();
    let mut callee_defs = Vec::new();
    let mut origin_callee_names: Vec<String> = Vec::new();

    for file in &files {
        if deadline.expired() {
            break;
        }
        let Ok(content) = std::fs::read_to_string(&file.abs_path) else { continue };

        if file.rel_path == origin_path {
            origin_callee_names = direct_call_names(&content, origin_start, origin_end);
        }

        if callers.len() < config.callgraph_callers_limit {
            if let Some(line) = find_call_line(&content, symbol_name) {
                if !(file.rel_path == origin_path && line >= origin_start && line <= origin_end) {
                    let (s, e) = crate::stages::common::line_window(line, config.callgraph_around, content.lines().count());
                    callers.push(GraphNode::Caller { path: file.rel_path.clone(), line_start: s, line_end: e });
                }
            }
        }
    }

    for name in origin_callee_names.iter().take(config.callgraph_callees_limit * 2) {
        if callee_defs.len() >= config.callgraph_callees_limit || deadline.expired() {
            break;
        }
        for file in &files {
            let Ok(content) = std::fs::read_to_string(&file.abs_path) else { continue };
            let Some(file_ast) = ast::parse_file(&content, "py") else { continue };
            if let Some(sym) = file_ast.find(name).into_iter().find(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method)) {
                callee_defs.push(GraphNode::CalleeDef {
                    name: name.clone(),
                    path: file.rel_path.clone(),
                    line_start: sym.start_line,
                    line_end: sym.end_line,
                });
                break;
            }
        }
    }

    let mut out = callers;
    out.extend(callee_defs);
    out
}

fn find_call_line(content: &str, symbol_name: &str) -> Option<usize> {
    for (idx, line) in content.lines().enumerate() {
        let toks = crate::stages::common::tokenize_code(line);
        for i in 0..toks.len().saturating_sub(1) {
            if toks[i] == symbol_name && toks[i + 1] == "(" {
                return Some(idx + 1);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_caller_and_callee_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target():\n    helper()\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def other():\n    target()\n").unwrap();
        std::fs::write(dir.path().join("c.py"), "def helper():\n    return 1\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let nodes = build_slice(&config, "target", "a.py", 1, 2);

        assert!(nodes.iter().any(|n| matches!(n, GraphNode::Caller { path, .. } if path == "b.py")));
        assert!(nodes.iter().any(|n| matches!(n, GraphNode::CalleeDef { name, path, .. } if name == "helper" && path == "c.py")));
    }

    #[test]
    fn disabled_callgraph_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RetrievalConfig::load(dir.path()).unwrap();
        config.callgraph_enabled = false;
        assert!(build_slice(&config, "target", "a.py", 1, 2).is_empty());
    }
}
