//! Development CLI for the retrieval core — search, context, patch, verify.
//!
//! Calls `retrieval-core` directly with no server overhead.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use retrieval_core::buffers::read_open_buffers;
use retrieval_core::config::RetrievalConfig;
use retrieval_core::context::{build_context, ContextRequest};
use retrieval_core::embed_store::{iter_project_chunks, EmbedStoreLimits};
use retrieval_core::orchestrator::retrieve;
use retrieval_core::patch::program::{self as patch_program, AutoArgs};
use retrieval_core::patch::refactor::{self, MoveArgs, SplitArgs};
use retrieval_core::program::Program;
use retrieval_core::verify::{verify, VerifyRequest};

#[derive(Parser)]
#[command(name = "retr", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve the top-k matches for a query
    Search {
        query: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "10")]
        k: usize,
        #[arg(long, default_value = "280")]
        budget_ms: u64,
    },
    /// Assemble an `<embeddings_code>` context block for a query
    Context {
        query: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "10")]
        k: usize,
        #[arg(long, default_value = "280")]
        budget_ms: u64,
    },
    /// Patch operations (write, line, symbol, anchor, auto, dump-symbol, dump-query, dump-query-global, refactor-move, refactor-split)
    Patch {
        #[command(subcommand)]
        op: PatchOp,
    },
    /// Verify that changed files plausibly satisfy a stated goal
    Verify {
        goal: String,
        #[arg(long)]
        root: Option<PathBuf>,
        /// Changed files, relative to root
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long)]
        diff: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PatchOp {
    /// Replace (or create) a whole file
    Write {
        path: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        text_file: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Replace a 1-based inclusive line range
    Line {
        path: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        start: usize,
        #[arg(long)]
        end: usize,
        #[arg(long)]
        replacement_file: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Replace a Python symbol's definition
    Symbol {
        path: String,
        symbol: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        replacement_file: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Insert text after the first line containing an anchor
    Anchor {
        path: String,
        anchor: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        replacement_file: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Resolve the target (line range / symbol / anchor / query) and patch
    Auto {
        path: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        replacement_file: PathBuf,
        #[arg(long)]
        line_start: Option<usize>,
        #[arg(long)]
        line_end: Option<usize>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        anchor: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Extract a Python symbol's source into a new file
    DumpSymbol {
        source: String,
        symbol: String,
        output: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Resolve a dump target via retrieval query within one file, then extract its scope
    DumpQuery {
        query: String,
        output: String,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Resolve a dump target via retrieval query anywhere in the project, then extract its scope
    DumpQueryGlobal {
        query: String,
        output: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Move a Python symbol from one module to another, leaving a shim import behind
    RefactorMove {
        source: String,
        dest: String,
        symbol: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        init_export: bool,
        #[arg(long)]
        rewrite_imports: bool,
        #[arg(long)]
        force: bool,
    },
    /// Split several Python symbols out of one module into another in one batch
    RefactorSplit {
        source: String,
        dest: String,
        #[arg(long = "symbol")]
        symbols: Vec<String>,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        init_export: bool,
        #[arg(long)]
        rewrite_imports: bool,
        #[arg(long)]
        force: bool,
    },
}

fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| std::env::current_dir().expect("could not determine current directory"))
        .canonicalize()
        .expect("path not found")
}

fn load_chunks(root: &std::path::Path) -> Vec<retrieval_core::types::Chunk> {
    iter_project_chunks(root, &EmbedStoreLimits::default())
}

fn report_patch_outcome(outcome: &patch_program::PatchOutcome, json: bool) {
    if json {
        let value = serde_json::json!({
            "path": outcome.path,
            "strategy": outcome.strategy,
            "state": format!("{:?}", outcome.state),
            "reason": outcome.reason,
            "diff": outcome.diff,
            "warning": outcome.warning,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap());
    } else {
        println!("{}  [{}]  {:?}", outcome.path, outcome.strategy, outcome.state);
        println!("{}", outcome.reason);
        if let Some(w) = &outcome.warning {
            eprintln!("warning: {w}");
        }
        println!("{}", outcome.diff);
    }
    if outcome.state == patch_program::PatchState::Failed {
        std::process::exit(1);
    }
}

fn read_required(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("could not read {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("retrieval_core=warn".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio runtime");

    runtime.block_on(run(cli));
}

async fn run(cli: Cli) {
    match cli.command {
        Commands::Search { query, root, k, budget_ms } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap_or_else(|e| {
                eprintln!("config error: {e}");
                std::process::exit(1);
            });
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let hits = retrieve(&root, &config, &chunks, &buffers, &query, k, budget_ms).await;

            if cli.json {
                let items: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|h| {
                        serde_json::json!({
                            "path": h.file_rel,
                            "line_start": h.meta.line_start,
                            "line_end": h.meta.line_end,
                            "score": h.score,
                            "stage": h.stage,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items).unwrap());
            } else {
                if hits.is_empty() {
                    eprintln!("no results for {query:?}");
                    std::process::exit(1);
                }
                for h in &hits {
                    println!("{:<50} {}-{}  {:>6.3}  {}", h.file_rel, h.meta.line_start, h.meta.line_end, h.score, h.stage);
                }
            }
        }
        Commands::Context { query, root, k, budget_ms } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap_or_else(|e| {
                eprintln!("config error: {e}");
                std::process::exit(1);
            });
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let queries = vec![query];
            let result = build_context(ContextRequest {
                project_root: &root,
                config: &config,
                known_chunks: &chunks,
                open_buffers: &buffers,
                queries: &queries,
                k,
                overall_ms: budget_ms,
                consolidate_per_file: false,
            })
            .await;

            if cli.json {
                let value = serde_json::json!({
                    "embeddings_code": result.embeddings_code,
                    "embeddings_refs": result.embeddings_refs,
                    "embeddings_graph": result.embeddings_graph,
                });
                println!("{}", serde_json::to_string_pretty(&value).unwrap());
            } else {
                println!("{}", result.render());
            }
        }
        Commands::Patch { op } => run_patch(op, cli.json).await,
        Commands::Verify { goal, root, files, diff } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap_or_else(|e| {
                eprintln!("config error: {e}");
                std::process::exit(1);
            });
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let diff_text = diff.map(|p| read_required(&p));

            let result = verify(
                &root,
                &config,
                &chunks,
                &buffers,
                VerifyRequest { goal: &goal, files: &files, diff: diff_text.as_deref(), topk: config.verify_topk },
            )
            .await;

            if cli.json {
                let value = serde_json::json!({ "ok": result.ok, "score": result.score, "reason": result.reason });
                println!("{}", serde_json::to_string_pretty(&value).unwrap());
            } else {
                println!("ok={} score={:.2} {}", result.ok, result.score, result.reason);
            }
            if !result.ok {
                std::process::exit(1);
            }
        }
    }
}

async fn run_patch(op: PatchOp, json: bool) {
    let program = Program::new("patcher");

    match op {
        PatchOp::Write { path, root, text_file, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let text = read_required(&text_file);
            let outcome = patch_program::handle_write(&root, &config, &chunks, &buffers, &program, &path, &text, force).await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::Line { path, root, start, end, replacement_file, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let replacement = read_required(&replacement_file);
            let outcome = patch_program::handle_line(&root, &config, &chunks, &buffers, &program, &path, start, end, &replacement, force).await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::Symbol { path, symbol, root, replacement_file, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let replacement = read_required(&replacement_file);
            let outcome = patch_program::handle_symbol(&root, &config, &chunks, &buffers, &program, &path, &symbol, &replacement, force).await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::Anchor { path, anchor, root, replacement_file, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let replacement = read_required(&replacement_file);
            let outcome = patch_program::handle_anchor(&root, &config, &chunks, &buffers, &program, &path, &anchor, &replacement, force).await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::Auto { path, root, replacement_file, line_start, line_end, symbol, anchor, query, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let replacement = read_required(&replacement_file);
            let outcome = patch_program::handle_auto(
                &root,
                &config,
                &chunks,
                &buffers,
                &program,
                AutoArgs {
                    rel_path: &path,
                    replacement: &replacement,
                    line_start,
                    line_end,
                    symbol: symbol.as_deref(),
                    anchor: anchor.as_deref(),
                    query: query.as_deref(),
                    context_before: None,
                    force,
                },
            )
            .await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::DumpSymbol { source, symbol, output, root, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let outcome = patch_program::handle_dump_symbol(&root, &config, &chunks, &buffers, &program, &source, &symbol, &output, force).await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::DumpQuery { query, output, source, root, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let outcome =
                patch_program::handle_dump_query(&root, &config, &chunks, &buffers, &program, &query, source.as_deref(), &output, force)
                    .await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::DumpQueryGlobal { query, output, root, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let outcome = patch_program::handle_dump_query_global(&root, &config, &chunks, &buffers, &program, &query, &output, force).await;
            report_patch_outcome(&outcome, json);
        }
        PatchOp::RefactorMove { source, dest, symbol, root, init_export, rewrite_imports, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let outcomes = refactor::handle_move(
                &root,
                &config,
                &chunks,
                &buffers,
                &program,
                MoveArgs {
                    source_path: &source,
                    dest_path: &dest,
                    symbol: &symbol,
                    add_init_export: init_export,
                    rewrite_project_imports: rewrite_imports,
                },
                force,
            )
            .await;
            for outcome in &outcomes {
                report_patch_outcome(outcome, json);
            }
        }
        PatchOp::RefactorSplit { source, dest, symbols, root, init_export, rewrite_imports, force } => {
            let root = resolve_root(root);
            let config = RetrievalConfig::load(&root).unwrap();
            let chunks = load_chunks(&root);
            let buffers = read_open_buffers(&root);
            let outcomes = refactor::handle_split(
                &root,
                &config,
                &chunks,
                &buffers,
                &program,
                SplitArgs {
                    source_path: &source,
                    dest_path: &dest,
                    symbols: &symbols,
                    add_init_export: init_export,
                    rewrite_project_imports: rewrite_imports,
                },
                force,
            )
            .await;
            for outcome in &outcomes {
                report_patch_outcome(outcome, json);
            }
        }
    }

    if let Some(score) = program.export("last_verify_score") {
        let reason = program.export("last_verify_reason").unwrap_or_default();
        eprintln!("verify: score={score} {reason}");
    }
}
