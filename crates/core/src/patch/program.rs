//! Patcher program (§4.J): the `received -> preview -> gate -> (commit |
//! needs_confirmation) -> verify_trigger -> done` state machine over the
//! pure strategies in `strategies.rs`.

use std::path::Path;
use std::sync::Arc;

use crate::buffers::OpenBuffer;
use crate::config::RetrievalConfig;
use crate::orchestrator;
use crate::program::Program;
use crate::types::Chunk;
use crate::verify::{self, VerifyRequest};

use super::strategies::{self, should_autocommit};
use super::watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Committed,
    NeedsConfirmation,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub state: PatchState,
    pub path: String,
    pub diff: String,
    pub strategy: &'static str,
    pub reason: String,
    pub warning: Option<String>,
}

impl PatchOutcome {
    pub fn ok(&self) -> bool {
        self.state != PatchState::Failed
    }

    pub fn committed(&self) -> bool {
        self.state == PatchState::Committed
    }
}

fn record_exports(program: &Arc<Program>, outcome: &PatchOutcome) {
    program.set_export("last_patch_preview", &outcome.diff);
    if outcome.committed() {
        program.set_export("last_patch_commit", &outcome.diff);
    }
    program.set_export("last_patch_strategy", outcome.strategy);
    program.set_export("last_patch_reason", &outcome.reason);
    if let Some(w) = &outcome.warning {
        program.set_export("last_watchdog_warn", w);
    }
}

fn read_existing(abs_path: &Path) -> Option<String> {
    std::fs::read_to_string(abs_path).ok()
}

/// Run the verifier against the files just committed, passing the committed
/// diff, and record its result in the exports map. §4.K: "the verifier is
/// triggered automatically by the patcher after a successful commit".
async fn trigger_verify(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    goal: &str,
    changed_files: &[String],
    diff: &str,
) {
    let result = verify::verify(
        project_root,
        config,
        known_chunks,
        open_buffers,
        VerifyRequest { goal, files: changed_files, diff: Some(diff), topk: config.verify_topk },
    )
    .await;
    program.set_export("last_verify_score", result.score.to_string());
    program.set_export("last_verify_ok", result.ok.to_string());
    program.set_export("last_verify_reason", &result.reason);
    program.set_export("last_verify_files", result.matched_files.join(","));
}

/// Run the common preview -> gate -> commit -> verify_trigger pipeline
/// given an already-built `(new_content, diff)` pair.
#[allow(clippy::too_many_arguments)]
async fn finish_pipeline(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    rel_path: &str,
    strategy: &'static str,
    goal: &str,
    new_content: String,
    diff: String,
    force: bool,
) -> PatchOutcome {
    let (commit_ok, reason) = should_autocommit(strategy, &diff, true);
    let outcome = if commit_ok || force {
        let abs = project_root.join(rel_path);
        match std::fs::write(&abs, &new_content) {
            Ok(()) => {
                let warning = watchdog::check_filesize(&new_content, config.filesize_max_lines, config.filesize_max_bytes);
                PatchOutcome {
                    state: PatchState::Committed,
                    path: rel_path.to_string(),
                    diff,
                    strategy,
                    reason: if force && !commit_ok { format!("forced: {reason}") } else { reason },
                    warning: if config.filesize_warn { warning } else { None },
                }
            }
            Err(e) => PatchOutcome {
                state: PatchState::Failed,
                path: rel_path.to_string(),
                diff,
                strategy,
                reason: format!("write failed: {e}"),
                warning: None,
            },
        }
    } else {
        PatchOutcome { state: PatchState::NeedsConfirmation, path: rel_path.to_string(), diff, strategy, reason, warning: None }
    };
    record_exports(program, &outcome);

    if outcome.committed() {
        trigger_verify(
            project_root,
            config,
            known_chunks,
            open_buffers,
            program,
            goal,
            std::slice::from_ref(&outcome.path),
            &outcome.diff,
        )
        .await;
    }

    outcome
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_write(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    rel_path: &str,
    text: &str,
    force: bool,
) -> PatchOutcome {
    let abs = project_root.join(rel_path);
    let old = read_existing(&abs);
    let (new_content, diff) = strategies::patch_write(old.as_deref(), text, rel_path);
    finish_pipeline(project_root, config, known_chunks, open_buffers, program, rel_path, "write", rel_path, new_content, diff, force).await
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_line(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    rel_path: &str,
    line_start: usize,
    line_end: usize,
    replacement: &str,
    force: bool,
) -> PatchOutcome {
    let abs = project_root.join(rel_path);
    let Some(content) = read_existing(&abs) else {
        return failed(program, rel_path, "line", "file not found");
    };
    match strategies::patch_line(&content, rel_path, line_start, line_end, replacement, config.patch_max_span) {
        Ok((new_content, diff)) => {
            finish_pipeline(project_root, config, known_chunks, open_buffers, program, rel_path, "line", rel_path, new_content, diff, force).await
        }
        Err(e) => failed(program, rel_path, "line", &e),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_symbol(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    rel_path: &str,
    symbol: &str,
    replacement: &str,
    force: bool,
) -> PatchOutcome {
    let abs = project_root.join(rel_path);
    let Some(content) = read_existing(&abs) else {
        return failed(program, rel_path, "symbol", "file not found");
    };
    match strategies::patch_symbol(&content, rel_path, symbol, replacement) {
        Ok((new_content, diff)) => {
            finish_pipeline(project_root, config, known_chunks, open_buffers, program, rel_path, "symbol", symbol, new_content, diff, force).await
        }
        Err(e) => failed(program, rel_path, "symbol", &e),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_anchor(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    rel_path: &str,
    anchor: &str,
    replacement: &str,
    force: bool,
) -> PatchOutcome {
    let abs = project_root.join(rel_path);
    let Some(content) = read_existing(&abs) else {
        return failed(program, rel_path, "anchor", "file not found");
    };
    match strategies::patch_anchor(&content, rel_path, anchor, replacement) {
        Ok((new_content, diff)) => {
            finish_pipeline(project_root, config, known_chunks, open_buffers, program, rel_path, "anchor", anchor, new_content, diff, force).await
        }
        Err(e) => failed(program, rel_path, "anchor", &e),
    }
}

pub(crate) fn failed(program: &Arc<Program>, rel_path: &str, strategy: &'static str, reason: &str) -> PatchOutcome {
    let outcome = PatchOutcome {
        state: PatchState::Failed,
        path: rel_path.to_string(),
        diff: String::new(),
        strategy,
        reason: reason.to_string(),
        warning: None,
    };
    record_exports(program, &outcome);
    outcome
}

/// `patch.auto` arguments: precedence is explicit line range > symbol >
/// anchor > retrieval-resolved `query` > `context_before` > plain `write`
/// (Open Question 3's recorded resolution).
pub struct AutoArgs<'a> {
    pub rel_path: &'a str,
    pub replacement: &'a str,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    pub symbol: Option<&'a str>,
    pub anchor: Option<&'a str>,
    pub query: Option<&'a str>,
    pub context_before: Option<&'a str>,
    pub force: bool,
}

pub async fn handle_auto(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    args: AutoArgs<'_>,
) -> PatchOutcome {
    if let (Some(ls), Some(le)) = (args.line_start, args.line_end) {
        return handle_line(project_root, config, known_chunks, open_buffers, program, args.rel_path, ls, le, args.replacement, args.force).await;
    }
    if let Some(symbol) = args.symbol {
        return handle_symbol(project_root, config, known_chunks, open_buffers, program, args.rel_path, symbol, args.replacement, args.force).await;
    }
    if let Some(anchor) = args.anchor {
        return handle_anchor(project_root, config, known_chunks, open_buffers, program, args.rel_path, anchor, args.replacement, args.force).await;
    }
    if let Some(query) = args.query {
        let hits = orchestrator::retrieve(project_root, config, known_chunks, open_buffers, query, 1, config.overall_single_ms).await;
        if let Some(hit) = hits.into_iter().find(|h| h.file_rel == args.rel_path) {
            return handle_line(
                project_root,
                config,
                known_chunks,
                open_buffers,
                program,
                args.rel_path,
                hit.meta.line_start,
                hit.meta.line_end,
                args.replacement,
                args.force,
            )
            .await;
        }
    }
    if let Some(anchor) = args.context_before {
        return handle_anchor(project_root, config, known_chunks, open_buffers, program, args.rel_path, anchor, args.replacement, args.force).await;
    }
    handle_write(project_root, config, known_chunks, open_buffers, program, args.rel_path, args.replacement, args.force).await
}

/// A single operation inside a `patch.batch` request.
pub enum BatchOp<'a> {
    Write { rel_path: &'a str, text: &'a str },
    Line { rel_path: &'a str, line_start: usize, line_end: usize, replacement: &'a str },
    Symbol { rel_path: &'a str, symbol: &'a str, replacement: &'a str },
    Anchor { rel_path: &'a str, anchor: &'a str, replacement: &'a str },
}

/// `patch.batch`: preview all ops, gate on the combined diff, commit
/// sequentially, then verify once against every committed file.
pub async fn handle_batch(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    goal: &str,
    ops: &[BatchOp<'_>],
    force: bool,
) -> Vec<PatchOutcome> {
    let mut previews: Vec<(String, String, &'static str, String)> = Vec::new();
    for op in ops {
        let preview = match op {
            BatchOp::Write { rel_path, text } => {
                let abs = project_root.join(rel_path);
                let old = read_existing(&abs);
                let (new_content, diff) = strategies::patch_write(old.as_deref(), text, rel_path);
                Some((rel_path.to_string(), new_content, "write", diff))
            }
            BatchOp::Line { rel_path, line_start, line_end, replacement } => {
                let abs = project_root.join(rel_path);
                read_existing(&abs).and_then(|content| {
                    strategies::patch_line(&content, rel_path, *line_start, *line_end, replacement, config.patch_max_span)
                        .ok()
                        .map(|(nc, d)| (rel_path.to_string(), nc, "line", d))
                })
            }
            BatchOp::Symbol { rel_path, symbol, replacement } => {
                let abs = project_root.join(rel_path);
                read_existing(&abs).and_then(|content| {
                    strategies::patch_symbol(&content, rel_path, symbol, replacement).ok().map(|(nc, d)| (rel_path.to_string(), nc, "symbol", d))
                })
            }
            BatchOp::Anchor { rel_path, anchor, replacement } => {
                let abs = project_root.join(rel_path);
                read_existing(&abs).and_then(|content| {
                    strategies::patch_anchor(&content, rel_path, anchor, replacement).ok().map(|(nc, d)| (rel_path.to_string(), nc, "anchor", d))
                })
            }
        };
        if let Some(p) = preview {
            previews.push(p);
        }
    }

    let combined_diff: String = previews.iter().map(|(_, _, _, d)| d.as_str()).collect::<Vec<_>>().join("\n");
    let (commit_ok, reason) = should_autocommit("batch", &combined_diff, true);

    let mut results = Vec::new();
    let mut committed_paths = Vec::new();
    for (rel_path, new_content, strategy, diff) in previews {
        if commit_ok || force {
            let abs = project_root.join(&rel_path);
            let outcome = match std::fs::write(&abs, &new_content) {
                Ok(()) => {
                    committed_paths.push(rel_path.clone());
                    PatchOutcome {
                        state: PatchState::Committed,
                        path: rel_path,
                        diff,
                        strategy,
                        reason: reason.clone(),
                        warning: watchdog::check_filesize(&new_content, config.filesize_max_lines, config.filesize_max_bytes),
                    }
                }
                Err(e) => PatchOutcome { state: PatchState::Failed, path: rel_path, diff, strategy, reason: format!("write failed: {e}"), warning: None },
            };
            record_exports(program, &outcome);
            results.push(outcome);
        } else {
            let outcome = PatchOutcome { state: PatchState::NeedsConfirmation, path: rel_path, diff, strategy, reason: reason.clone(), warning: None };
            record_exports(program, &outcome);
            results.push(outcome);
        }
    }

    if !committed_paths.is_empty() {
        trigger_verify(project_root, config, known_chunks, open_buffers, program, goal, &committed_paths, &combined_diff).await;
    }

    results
}

/// `dump.symbol`: extract a Python symbol's source and write it to
/// `output_path` through the same preview/gate/commit pipeline.
#[allow(clippy::too_many_arguments)]
pub async fn handle_dump_symbol(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    source_path: &str,
    symbol: &str,
    output_path: &str,
    force: bool,
) -> PatchOutcome {
    let abs = project_root.join(source_path);
    let Some(content) = read_existing(&abs) else {
        return failed(program, output_path, "dump", "source file not found");
    };
    let Some(file_ast) = crate::ast::parse_file(&content, "py") else {
        return failed(program, output_path, "dump", "failed to parse source");
    };
    let Some(sym) = file_ast.find(symbol).into_iter().next() else {
        return failed(program, output_path, "dump", &format!("symbol {symbol} not found"));
    };
    let lines: Vec<&str> = content.lines().collect();
    let lo = sym.start_line.saturating_sub(1).min(lines.len());
    let hi = sym.end_line.min(lines.len());
    let extracted = lines[lo..hi].join("\n");

    handle_write(project_root, config, known_chunks, open_buffers, program, output_path, &extracted, force | config.dump_force).await
}

/// Resolve a dump target's enclosing Python scope in `content` and extract
/// its source lines, shared by `dump.query` and `dump.query_global`.
fn extract_scope_at(content: &str, line: usize) -> Option<String> {
    let (start, end) = crate::py_scope::find_python_scope(content, line)?;
    let lines: Vec<&str> = content.lines().collect();
    let lo = start.saturating_sub(1).min(lines.len());
    let hi = end.min(lines.len());
    Some(lines[lo..hi].join("\n"))
}

/// `dump.query`: resolve the dump target via a retrieval query, optionally
/// narrowed to `source_path`, widen the hit to its enclosing Python scope,
/// and write the extracted source to `output_path`.
#[allow(clippy::too_many_arguments)]
pub async fn handle_dump_query(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    query: &str,
    source_path: Option<&str>,
    output_path: &str,
    force: bool,
) -> PatchOutcome {
    let hits = orchestrator::retrieve(project_root, config, known_chunks, open_buffers, query, 5, config.overall_single_ms).await;
    let Some(hit) = hits.into_iter().find(|h| source_path.map_or(true, |p| h.file_rel == p)) else {
        return failed(program, output_path, "dump", "no retrieval hit for query");
    };
    let abs = project_root.join(&hit.file_rel);
    let Some(content) = read_existing(&abs) else {
        return failed(program, output_path, "dump", "resolved file not found");
    };
    let Some(extracted) = extract_scope_at(&content, hit.meta.line_start) else {
        return failed(program, output_path, "dump", "no enclosing scope at resolved hit");
    };
    handle_write(project_root, config, known_chunks, open_buffers, program, output_path, &extracted, force | config.dump_force).await
}

/// `dump.query_global`: same as `dump.query` but never narrows the
/// retrieval results to a single source file — the query alone picks the
/// target anywhere in the project.
#[allow(clippy::too_many_arguments)]
pub async fn handle_dump_query_global(
    project_root: &Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    program: &Arc<Program>,
    query: &str,
    output_path: &str,
    force: bool,
) -> PatchOutcome {
    handle_dump_query(project_root, config, known_chunks, open_buffers, program, query, None, output_path, force).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program as ProgramType;

    fn setup(dir: &std::path::Path) -> (RetrievalConfig, Arc<ProgramType>) {
        let config = RetrievalConfig::load(dir).unwrap();
        let program = ProgramType::new("patcher");
        (config, program)
    }

    #[tokio::test]
    async fn handle_write_commits_small_diff_and_triggers_verify() {
        let dir = tempfile::tempdir().unwrap();
        let (config, program) = setup(dir.path());
        let outcome = handle_write(dir.path(), &config, &[], &[], &program, "a.py", "x = 1\n", false).await;
        assert!(outcome.committed());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "x = 1\n");
        assert!(!program.export("last_patch_commit").unwrap().is_empty());
        assert!(program.export("last_verify_score").is_some());
        assert!(program.export("last_verify_files").is_some());
    }

    #[tokio::test]
    async fn handle_line_rejects_oversized_span_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "a\nb\nc\n").unwrap();
        let (mut config, program) = setup(dir.path());
        config.patch_max_span = 1;
        let outcome = handle_line(dir.path(), &config, &[], &[], &program, "a.py", 1, 3, "x", false).await;
        assert_eq!(outcome.state, PatchState::Failed);
        assert!(program.export("last_verify_score").is_none());
    }

    #[tokio::test]
    async fn handle_symbol_replaces_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target():\n    return 1\n").unwrap();
        let (config, program) = setup(dir.path());
        let outcome = handle_symbol(dir.path(), &config, &[], &[], &program, "a.py", "target", "def target():\n    return 2", false).await;
        assert!(outcome.committed());
        assert!(std::fs::read_to_string(dir.path().join("a.py")).unwrap().contains("return 2"));
    }

    #[tokio::test]
    async fn handle_batch_commits_all_ops_on_gate_pass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "a\nb\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "c\nd\n").unwrap();
        let (config, program) = setup(dir.path());
        let ops = vec![
            BatchOp::Line { rel_path: "a.py", line_start: 1, line_end: 1, replacement: "A" },
            BatchOp::Line { rel_path: "b.py", line_start: 1, line_end: 1, replacement: "C" },
        ];
        let results = handle_batch(dir.path(), &config, &[], &[], &program, "batch update", &ops, false).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.committed()));
        assert!(program.export("last_verify_score").is_some());
    }

    #[tokio::test]
    async fn handle_dump_symbol_writes_extracted_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target():\n    return 1\n").unwrap();
        let (config, program) = setup(dir.path());
        let outcome = handle_dump_symbol(dir.path(), &config, &[], &[], &program, "a.py", "target", "out.py", false).await;
        assert!(outcome.committed());
        assert!(std::fs::read_to_string(dir.path().join("out.py")).unwrap().contains("def target"));
    }

    #[tokio::test]
    async fn handle_dump_query_resolves_and_extracts_scope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper():\n    return 42\n").unwrap();
        let (config, program) = setup(dir.path());
        let outcome =
            handle_dump_query(dir.path(), &config, &[], &[], &program, "def helper(): return 42", Some("a.py"), "out.py", false).await;
        assert!(outcome.committed());
        assert!(std::fs::read_to_string(dir.path().join("out.py")).unwrap().contains("def helper"));
    }

    #[tokio::test]
    async fn handle_dump_query_global_ignores_file_scope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def helper():\n    return 42\n").unwrap();
        let (config, program) = setup(dir.path());
        let outcome =
            handle_dump_query_global(dir.path(), &config, &[], &[], &program, "def helper(): return 42", "out.py", false).await;
        assert!(outcome.committed());
        assert!(std::fs::read_to_string(dir.path().join("out.py")).unwrap().contains("def helper"));
    }
}
