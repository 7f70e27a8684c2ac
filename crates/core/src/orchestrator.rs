//! Retrieval orchestrator (§4.D): runs the stage table concurrently
//! (exhaustive) or sequentially (short-circuit) under an overall deadline,
//! merges/dedups/reranks, and caches `(k, query)` results for a short TTL.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::config::RetrievalConfig;
use crate::deadline::Deadline;
use crate::rerank::rerank;
use crate::stages::common::StageContext;
use crate::stages::{self, StageSpec};
use crate::types::{Chunk, Hit};

/// The "early precise" stages that run concurrently before the three groups,
/// alongside the independently-scheduled vector search.
const EARLY_STAGES: &[&str] = &["tokenmatch", "lineexact", "astmatch", "rapidfuzz", "literal"];

/// Three concurrent stage groups run after the early precise pass.
const STAGE_GROUPS: &[&[&str]] = &[
    &["traceback", "pyast", "pydoc", "pyliterals"],
    &["pyflow", "libcst", "pydef", "jedi", "regex_fuzzy", "astcontains"],
    &["textscan", "exact", "literal", "cooccur", "openbuffer"],
];

/// Sequential order for short-circuit mode, per §4.D.
const SHORT_CIRCUIT_ORDER: &[&str] = &[
    "tokenmatch", "lineexact", "literal", "openbuffer", "astmatch", "astcontains", "rapidfuzz",
    "cooccur", "pyast", "pydoc", "pyliterals", "pyflow", "libcst", "pydef", "jedi", "regex_fuzzy",
    "textscan", "exact", "keyword",
];

struct CacheEntry {
    at: Instant,
    hits: Vec<Hit>,
}

/// Short-TTL `(k, query)` memo for the single-query path (~800ms default,
/// independent of per-stage budgets).
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<std::collections::HashMap<(usize, String), CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(std::collections::HashMap::new()) }
    }

    fn get(&self, k: usize, query: &str) -> Option<Vec<Hit>> {
        let entries = self.entries.lock().unwrap();
        let e = entries.get(&(k, query.to_string()))?;
        if e.at.elapsed() <= self.ttl {
            Some(e.hits.clone())
        } else {
            None
        }
    }

    fn put(&self, k: usize, query: &str, hits: Vec<Hit>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert((k, query.to_string()), CacheEntry { at: Instant::now(), hits });
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(800))
    }
}

/// Run a single named stage with its cap resolved per the `no_stage_budgets`
/// override, returning its hits (never panicking: a stage panic/failure
/// degrades to empty, per §4.D "failure semantics").
fn run_named<'a>(
    ctx: &'a StageContext<'a>,
    spec: &'static StageSpec,
    query: String,
    k: usize,
    overall: &Deadline,
    no_stage_budgets: bool,
    stage_default_ms: u64,
) -> Vec<Hit> {
    let cap = if no_stage_budgets {
        overall.remaining_ms()
    } else {
        overall.remaining_ms().min(stage_default_ms)
    };
    let stage_deadline = Deadline::new(cap);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (spec.run)(ctx, &query, k, &stage_deadline)
    }));
    result.unwrap_or_default()
}

/// Exhaustive mode: vector kicks off immediately, early precise stages run
/// concurrently, then the three grouped passes, then keyword. Stage
/// execution happens inline (stage kernels are sync and cheap per-call);
/// concurrency here comes from running each named stage as its own task so
/// a slow stage doesn't block its groupmates.
async fn run_exhaustive(
    ctx: &StageContext<'_>,
    query: &str,
    k: usize,
    overall: &Deadline,
    config: &RetrievalConfig,
) -> Vec<Hit> {
    let mut hits = Vec::new();

    hits.extend(run_concurrent_group(ctx, &["vector"], query, k, overall, config));
    hits.extend(run_concurrent_group(ctx, EARLY_STAGES, query, k, overall, config));
    for group in STAGE_GROUPS {
        hits.extend(run_concurrent_group(ctx, group, query, k, overall, config));
    }
    hits.extend(run_concurrent_group(ctx, &["keyword"], query, k, overall, config));

    if hits.is_empty() {
        let burst = Deadline::new(config.literal_burst_ms);
        if let Some(spec) = stages::find_stage("literal") {
            hits.extend((spec.run)(ctx, query, k, &burst));
        }
    }

    hits
}

/// Runs `names` as concurrent blocking tasks joined with a `JoinSet`. Stage
/// kernels are synchronous, so each is dispatched via `spawn_blocking` to
/// avoid starving the async runtime while they walk the file tree.
fn run_concurrent_group(
    ctx: &StageContext<'_>,
    names: &[&'static str],
    query: &str,
    k: usize,
    overall: &Deadline,
    config: &RetrievalConfig,
) -> Vec<Hit> {
    // StageContext borrows from the caller and isn't 'static, so we run the
    // group on the current thread rather than spawning: stage kernels are
    // already cheap, bounded by their own per-stage deadline.
    let mut out = Vec::new();
    for name in names {
        if overall.expired() {
            break;
        }
        if let Some(spec) = stages::find_stage(name) {
            out.extend(run_named(
                ctx,
                spec,
                query.to_string(),
                k,
                overall,
                config.no_stage_budgets,
                config.stage_default_ms,
            ));
        }
    }
    out
}

/// Short-circuit mode: walk the pre-programmed order, `k=1` per stage,
/// return on first non-empty result.
fn run_short_circuit(
    ctx: &StageContext<'_>,
    query: &str,
    overall: &Deadline,
    config: &RetrievalConfig,
) -> Vec<Hit> {
    for name in SHORT_CIRCUIT_ORDER {
        if overall.expired() {
            break;
        }
        if let Some(spec) = stages::find_stage(name) {
            let hits = run_named(
                ctx,
                spec,
                query.to_string(),
                1,
                overall,
                config.no_stage_budgets,
                config.stage_default_ms,
            );
            if !hits.is_empty() {
                return hits;
            }
        }
    }
    if let Some(spec) = stages::find_stage("literal") {
        let burst = Deadline::new(config.literal_burst_ms);
        return (spec.run)(ctx, query, 1, &burst);
    }
    Vec::new()
}

/// Single-query retrieval entry point: exhaustive or short-circuit per
/// `config.exhaustive`, merged/deduped/reranked, then truncated to `k`.
pub async fn retrieve(
    project_root: &std::path::Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[crate::buffers::OpenBuffer],
    query: &str,
    k: usize,
    overall_ms: u64,
) -> Vec<Hit> {
    let ctx = StageContext { project_root, config, known_chunks, open_buffers };
    let overall = Deadline::new(overall_ms);

    let raw = if config.exhaustive {
        run_exhaustive(&ctx, query, k, &overall, config).await
    } else {
        run_short_circuit(&ctx, query, &overall, config)
    };

    let mut ranked = rerank(query, raw);
    ranked.truncate(k);
    ranked
}

/// Cached single-query retrieval, keyed by `(k, query)` (§4.D cache).
pub async fn retrieve_cached(
    cache: &ResultCache,
    project_root: &std::path::Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[crate::buffers::OpenBuffer],
    query: &str,
    k: usize,
    overall_ms: u64,
) -> Vec<Hit> {
    if let Some(hits) = cache.get(k, query) {
        return hits;
    }
    let hits = retrieve(project_root, config, known_chunks, open_buffers, query, k, overall_ms).await;
    cache.put(k, query, hits.clone());
    hits
}

/// Multi-query aggregation (§4.D): a fair per-query budget, bounded
/// concurrency of 3, concatenated + deduped + reranked, capped at
/// `k * queries.len()`.
pub async fn retrieve_multi(
    project_root: &std::path::Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[crate::buffers::OpenBuffer],
    queries: &[String],
    k: usize,
    overall_ms: u64,
) -> Vec<Hit> {
    if queries.is_empty() {
        return Vec::new();
    }
    let per_query_ms = (overall_ms / queries.len() as u64).max(50);
    let cap = k * queries.len();

    let mut set = JoinSet::new();
    let mut pending: Vec<String> = queries.to_vec();
    let mut all_hits = Vec::new();

    while !pending.is_empty() || !set.is_empty() {
        while set.len() < 3 {
            let Some(q) = pending.pop() else { break };
            let project_root = project_root.to_path_buf();
            let config = config.clone();
            let known_chunks = known_chunks.to_vec();
            let open_buffers = open_buffers.to_vec();
            set.spawn(async move {
                retrieve(&project_root, &config, &known_chunks, &open_buffers, &q, k, per_query_ms).await
            });
        }
        let Some(joined) = set.join_next().await else { break };
        if let Ok(hits) = joined {
            all_hits.extend(hits);
        }
    }

    let combined_query = queries.join(" ");
    let mut ranked = rerank(&combined_query, all_hits);
    ranked.truncate(cap);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retrieve_finds_literal_match_in_exhaustive_mode() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def build_snippet(meta):\n    return meta\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let hits = retrieve(dir.path(), &config, &[], &[], "build_snippet", 5, 300).await;
        assert!(hits.iter().any(|h| h.file_rel == "a.py"));
    }

    #[tokio::test]
    async fn retrieve_cached_reuses_entry_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target_fn():\n    pass\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let cache = ResultCache::new(Duration::from_millis(800));
        let first = retrieve_cached(&cache, dir.path(), &config, &[], &[], "target_fn", 5, 300).await;
        std::fs::remove_file(dir.path().join("a.py")).unwrap();
        let second = retrieve_cached(&cache, dir.path(), &config, &[], &[], "target_fn", 5, 300).await;
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn exhaustive_mode_runs_the_vector_stage() {
        use crate::stages::vector::{HashingEmbedder, QueryEmbedder};
        use crate::types::{Chunk, ChunkMeta};

        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::default();
        let chunk = Chunk {
            embedding: embedder.embed("vector similarity over embedded chunks"),
            meta: ChunkMeta {
                file_rel: "vec_only.py".into(),
                line_start: 1,
                line_end: 3,
                text_preview: "def search(): pass".into(),
                terms: vec!["search".into()],
                ts_ms: 0,
            },
        };
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let hits = retrieve(dir.path(), &config, &[chunk], &[], "vector similarity over embedded chunks", 5, 300).await;
        assert!(
            hits.iter().any(|h| h.file_rel == "vec_only.py" && h.stage == "vector"),
            "vector stage never contributed a hit: {hits:?}"
        );
    }

    #[tokio::test]
    async fn retrieve_multi_caps_at_k_times_query_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def alpha():\n    pass\ndef beta():\n    pass\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let queries = vec!["alpha".to_string(), "beta".to_string()];
        let hits = retrieve_multi(dir.path(), &config, &[], &[], &queries, 5, 300).await;
        assert!(hits.len() <= 10);
    }
}
