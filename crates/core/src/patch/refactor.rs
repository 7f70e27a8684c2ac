//! `refactor.move` / `refactor.split` (§4.J): synthesize a `patch.batch` that
//! moves one or more Python symbols between modules — a shim re-export is
//! left behind in the source, the destination module gains the symbol's
//! body, and (optionally) the destination's `__init__.py` re-exports it and
//! every project import of the symbol is conservatively rewritten. The
//! mechanics follow `strategies.rs`'s pure-function/no-filesystem-access
//! shape and feed the same `handle_batch` preview/gate/commit pipeline as
//! every other patch task.

use std::path::Path;
use std::sync::Arc;

use regex::Regex;

use crate::ast;
use crate::buffers::OpenBuffer;
use crate::config::RetrievalConfig;
use crate::program::Program;
use crate::types::Chunk;
use crate::walker::{self, WalkedFile};

use super::program::{handle_batch, BatchOp, PatchOutcome};

/// Python dotted module path for a project-relative `.py` file:
/// `"pkg/a.py"` -> `"pkg.a"`, `"pkg/__init__.py"` -> `"pkg"`.
pub fn module_path_for(rel_path: &str) -> String {
    let stem = rel_path.strip_suffix(".py").unwrap_or(rel_path);
    let stem = stem.strip_suffix("/__init__").unwrap_or(stem);
    stem.replace('/', ".")
}

/// Extract `symbol`'s full definition (including contiguous decorator
/// lines), returning `(start_line, end_line, body)`, all 1-based inclusive.
fn extract_symbol(content: &str, symbol: &str) -> Result<(usize, usize, String), String> {
    let file_ast = ast::parse_file(content, "py").ok_or_else(|| "failed to parse python source".to_string())?;
    let sym = file_ast.find(symbol).into_iter().next().ok_or_else(|| format!("symbol {symbol} not found"))?;

    let lines: Vec<&str> = content.lines().collect();
    let mut start = sym.start_line;
    while start > 1 && lines.get(start - 2).map(|l| l.trim_start().starts_with('@')).unwrap_or(false) {
        start -= 1;
    }
    let end = sym.end_line.min(lines.len());
    if start == 0 || end < start {
        return Err("symbol range out of bounds".to_string());
    }
    let body = lines[start - 1..end].join("\n");
    Ok((start, end, body))
}

/// Remove `[start, end]` (1-based inclusive) from `content`, then splice
/// `shim` in at the same position so the source keeps importing the symbol
/// under its old name.
fn remove_and_shim(content: &str, start: usize, end: usize, shim: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<&str> = lines[..start - 1].to_vec();
    out.push(shim);
    out.extend(&lines[end.min(lines.len())..]);
    out.join("\n") + if content.ends_with('\n') { "\n" } else { "" }
}

/// Append `body` to `dest_content` (or start a fresh module if the
/// destination doesn't exist yet), separated by a blank line.
fn append_to_module(dest_content: Option<&str>, body: &str) -> String {
    match dest_content {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}\n\n\n{}\n", existing.trim_end(), body)
        }
        _ => format!("{body}\n"),
    }
}

/// Add `from .<leaf> import <symbol>` to an `__init__.py`'s content if it
/// isn't already re-exported there.
fn add_init_export(init_content: Option<&str>, dest_leaf: &str, symbol: &str) -> String {
    let line = format!("from .{dest_leaf} import {symbol}");
    match init_content {
        Some(existing) if existing.contains(&line) => existing.to_string(),
        Some(existing) if !existing.trim().is_empty() => format!("{}\n{line}\n", existing.trim_end()),
        _ => format!("{line}\n"),
    }
}

use std::sync::LazyLock;

static IMPORT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)from\s+([\w.]+)\s+import\s+(.+)$").unwrap());

/// Conservatively rewrite single-line `from <source_module> import ...`
/// statements that reference `symbol`: split the grouped import so the
/// other names stay bound to `source_module` and `symbol` is imported from
/// `dest_module` instead. Multi-line parenthesized imports are left alone
/// (out of scope for the "conservative" rewrite). Returns `None` when
/// nothing changed.
pub fn rewrite_imports(content: &str, source_module: &str, dest_module: &str, symbol: &str) -> Option<String> {
    let mut changed = false;
    let mut out_lines: Vec<String> = Vec::new();

    for line in content.lines() {
        let Some(caps) = IMPORT_LINE_RE.captures(line) else {
            out_lines.push(line.to_string());
            continue;
        };
        let indent = &caps[1];
        let module = &caps[2];
        let names_part = &caps[3];
        if module != source_module || names_part.contains('(') {
            out_lines.push(line.to_string());
            continue;
        }
        let names: Vec<&str> = names_part.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        if !names.iter().any(|n| n.split(" as ").next().unwrap_or(n).trim() == symbol) {
            out_lines.push(line.to_string());
            continue;
        }
        changed = true;
        let remaining: Vec<&str> = names.iter().copied().filter(|n| n.split(" as ").next().unwrap_or(n).trim() != symbol).collect();
        if !remaining.is_empty() {
            out_lines.push(format!("{indent}from {source_module} import {}", remaining.join(", ")));
        }
        out_lines.push(format!("{indent}from {dest_module} import {symbol}"));
    }

    if !changed {
        return None;
    }
    let mut joined = out_lines.join("\n");
    if content.ends_with('\n') {
        joined.push('\n');
    }
    Some(joined)
}

fn read(abs: &Path) -> Option<String> {
    std::fs::read_to_string(abs).ok()
}

/// `refactor.move` arguments.
pub struct MoveArgs<'a> {
    pub source_path: &'a str,
    pub dest_path: &'a str,
    pub symbol: &'a str,
    pub add_init_export: bool,
    pub rewrite_project_imports: bool,
}

/// `refactor.move`: move a single symbol from `source_path` to `dest_path`,
/// leaving a shim import behind, via the shared `patch.batch` pipeline.
pub async fn handle_move(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    args: MoveArgs<'_>,
    force: bool,
) -> Vec<PatchOutcome> {
    handle_split(
        project_root,
        config,
        known_chunks,
        open_buffers,
        program,
        SplitArgs {
            source_path: args.source_path,
            dest_path: args.dest_path,
            symbols: &[args.symbol.to_string()],
            add_init_export: args.add_init_export,
            rewrite_project_imports: args.rewrite_project_imports,
        },
        force,
    )
    .await
}

/// `refactor.split` arguments: like `refactor.move` but over a list of
/// symbols, so a module can be split into two in one synthesized batch.
pub struct SplitArgs<'a> {
    pub source_path: &'a str,
    pub dest_path: &'a str,
    pub symbols: &'a [String],
    pub add_init_export: bool,
    pub rewrite_project_imports: bool,
}

/// `refactor.split`: move every symbol in `args.symbols` out of
/// `source_path` into `dest_path` in one synthesized `patch.batch`.
pub async fn handle_split(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    args: SplitArgs<'_>,
    force: bool,
) -> Vec<PatchOutcome> {
    let Some(mut source_content) = read(&project_root.join(args.source_path)) else {
        return vec![super::program::failed(program, args.source_path, "refactor", "source file not found")];
    };

    let source_module = module_path_for(args.source_path);
    let dest_module = module_path_for(args.dest_path);
    let dest_leaf = dest_module.rsplit('.').next().unwrap_or(&dest_module).to_string();

    let mut bodies = Vec::new();
    for symbol in args.symbols {
        let (start, end, body) = match extract_symbol(&source_content, symbol) {
            Ok(v) => v,
            Err(e) => return vec![super::program::failed(program, args.source_path, "refactor", &e)],
        };
        let shim = format!("from {dest_module} import {symbol}");
        source_content = remove_and_shim(&source_content, start, end, &shim);
        bodies.push(body);
    }

    let mut dest_content = read(&project_root.join(args.dest_path));
    for body in &bodies {
        dest_content = Some(append_to_module(dest_content.as_deref(), body));
    }
    let dest_content = dest_content.unwrap_or_default();

    let mut write_ops: Vec<(String, String)> =
        vec![(args.source_path.to_string(), source_content), (args.dest_path.to_string(), dest_content)];

    if args.add_init_export {
        let dest_dir = Path::new(args.dest_path).parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        let init_rel = if dest_dir.is_empty() { "__init__.py".to_string() } else { format!("{dest_dir}/__init__.py") };
        let mut init_content = read(&project_root.join(&init_rel));
        for symbol in args.symbols {
            init_content = Some(add_init_export(init_content.as_deref(), &dest_leaf, symbol));
        }
        write_ops.push((init_rel, init_content.unwrap_or_default()));
    }

    if args.rewrite_project_imports {
        let files: Vec<WalkedFile> = walker::walk_project(config)
            .into_iter()
            .filter(|f| ast::is_python(f.rel_path.rsplit('.').next().unwrap_or("")))
            .filter(|f| f.rel_path != args.source_path && f.rel_path != args.dest_path)
            .collect();
        for file in files {
            let Some(content) = read(&file.abs_path) else { continue };
            let mut rewritten = content.clone();
            let mut any = false;
            for symbol in args.symbols {
                if let Some(next) = rewrite_imports(&rewritten, &source_module, &dest_module, symbol) {
                    rewritten = next;
                    any = true;
                }
            }
            if any {
                write_ops.push((file.rel_path, rewritten));
            }
        }
    }

    let goal = format!("move {} from {} to {}", args.symbols.join(", "), args.source_path, args.dest_path);
    let owned_ops: Vec<(String, String)> = write_ops;
    let batch_ops: Vec<BatchOp> = owned_ops
        .iter()
        .map(|(path, text)| BatchOp::Write { rel_path: path.as_str(), text: text.as_str() })
        .collect();

    handle_batch(project_root, config, known_chunks, open_buffers, program, &goal, &batch_ops, force).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_for_strips_py_and_init() {
        assert_eq!(module_path_for("pkg/a.py"), "pkg.a");
        assert_eq!(module_path_for("pkg/__init__.py"), "pkg");
        assert_eq!(module_path_for("top.py"), "top");
    }

    #[test]
    fn rewrite_imports_splits_grouped_import() {
        let content = "from pkg.a import helper, other\nother()\n";
        let out = rewrite_imports(content, "pkg.a", "pkg.b", "helper").unwrap();
        assert!(out.contains("from pkg.a import other"));
        assert!(out.contains("from pkg.b import helper"));
    }

    #[test]
    fn rewrite_imports_drops_source_line_when_symbol_is_sole_import() {
        let content = "from pkg.a import helper\nhelper()\n";
        let out = rewrite_imports(content, "pkg.a", "pkg.b", "helper").unwrap();
        assert!(!out.contains("from pkg.a import"));
        assert!(out.contains("from pkg.b import helper"));
    }

    #[test]
    fn rewrite_imports_is_none_when_symbol_absent() {
        let content = "from pkg.a import other\n";
        assert!(rewrite_imports(content, "pkg.a", "pkg.b", "helper").is_none());
    }

    #[tokio::test]
    async fn handle_move_relocates_symbol_and_leaves_shim() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper(x):\n    return x + 1\n\ndef keep():\n    return 0\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let program = Program::new("patcher");

        let results = handle_move(
            dir.path(),
            &config,
            &[],
            &[],
            &program,
            MoveArgs { source_path: "a.py", dest_path: "b.py", symbol: "helper", add_init_export: false, rewrite_project_imports: false },
            true,
        )
        .await;

        assert!(results.iter().all(|r| r.committed()));
        let source_after = std::fs::read_to_string(dir.path().join("a.py")).unwrap();
        let dest_after = std::fs::read_to_string(dir.path().join("b.py")).unwrap();
        assert!(source_after.contains("from b import helper"));
        assert!(source_after.contains("def keep()"));
        assert!(dest_after.contains("def helper(x):"));
    }

    #[tokio::test]
    async fn handle_split_moves_multiple_symbols() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def one():\n    return 1\n\ndef two():\n    return 2\n\ndef keep():\n    return 0\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let program = Program::new("patcher");

        let results = handle_split(
            dir.path(),
            &config,
            &[],
            &[],
            &program,
            SplitArgs {
                source_path: "a.py",
                dest_path: "b.py",
                symbols: &["one".to_string(), "two".to_string()],
                add_init_export: false,
                rewrite_project_imports: false,
            },
            true,
        )
        .await;

        assert!(results.iter().all(|r| r.committed()));
        let dest_after = std::fs::read_to_string(dir.path().join("b.py")).unwrap();
        assert!(dest_after.contains("def one()"));
        assert!(dest_after.contains("def two()"));
    }
}
