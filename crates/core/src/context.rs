//! Context builder (§4.G): retrieves top-k hits, builds snippets in
//! parallel under a small concurrency cap, and assembles the
//! `<embeddings_code>` / `<embeddings_refs>` / `<embeddings_graph>` blocks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::callgraph;
use crate::config::{RefsPolicy, RetrievalConfig};
use crate::orchestrator;
use crate::refs;
use crate::rerank::rerank;
use crate::snippet::{self, cache::SnippetCache};
use crate::types::{Chunk, FileSig, Hit};

pub struct ContextRequest<'a> {
    pub project_root: &'a std::path::Path,
    pub config: &'a RetrievalConfig,
    pub known_chunks: &'a [Chunk],
    pub open_buffers: &'a [crate::buffers::OpenBuffer],
    pub queries: &'a [String],
    pub k: usize,
    pub overall_ms: u64,
    pub consolidate_per_file: bool,
}

pub struct ContextResult {
    pub embeddings_code: String,
    pub embeddings_refs: Option<String>,
    pub embeddings_graph: Option<String>,
}

impl ContextResult {
    /// Join populated blocks with a single blank line between them, per
    /// §4.G step 7.
    pub fn render(&self) -> String {
        let mut blocks = vec![format!("<embeddings_code>\n{}\n</embeddings_code>", self.embeddings_code)];
        if let Some(r) = &self.embeddings_refs {
            blocks.push(format!("<embeddings_refs>\n{r}\n</embeddings_refs>"));
        }
        if let Some(g) = &self.embeddings_graph {
            blocks.push(format!("<embeddings_graph>\n{g}\n</embeddings_graph>"));
        }
        blocks.join("\n\n")
    }
}

struct BuiltSnippet {
    hit: Hit,
    header: String,
    code_block: String,
    is_full_scope: bool,
}

pub async fn build_context(req: ContextRequest<'_>) -> ContextResult {
    let hits = if req.queries.len() <= 1 {
        let query = req.queries.first().map(|s| s.as_str()).unwrap_or("");
        orchestrator::retrieve(
            req.project_root,
            req.config,
            req.known_chunks,
            req.open_buffers,
            query,
            req.k,
            req.overall_ms,
        )
        .await
    } else {
        orchestrator::retrieve_multi(
            req.project_root,
            req.config,
            req.known_chunks,
            req.open_buffers,
            req.queries,
            req.k,
            req.overall_ms,
        )
        .await
    };

    let combined_query = req.queries.join(" ");
    let ranked = rerank(&combined_query, hits);
    if ranked.is_empty() {
        return ContextResult { embeddings_code: String::new(), embeddings_refs: None, embeddings_graph: None };
    }

    let mut centers_by_file: HashMap<String, Vec<usize>> = HashMap::new();
    for h in &ranked {
        centers_by_file.entry(h.file_rel.clone()).or_default().push(h.meta.line_start);
    }

    let cache = SnippetCache::new(req.config.snippet_ttl, req.config.snippet_cache_max, req.config.snippet_coalesce_wait_ms);
    let semaphore = Arc::new(Semaphore::new(req.config.snippet_conc.max(1)));

    let mut built = Vec::new();
    let mut tasks = tokio::task::JoinSet::new();
    for hit in ranked.clone() {
        let semaphore = semaphore.clone();
        let cache = cache.clone();
        let project_root = req.project_root.to_path_buf();
        let config = req.config.clone();
        let extra_centers: Vec<usize> = centers_by_file
            .get(&hit.file_rel)
            .map(|v| v.iter().copied().filter(|&l| l != hit.meta.line_start).collect())
            .unwrap_or_default();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let abs = project_root.join(&hit.file_rel);
            let Some(content) = snippet::read_lossy(&abs) else { return None };
            let sig = FileSig::read(&abs).unwrap_or(FileSig { mtime_ms: 0, size: content.len() as u64 });
            let key = (hit.file_rel.clone(), hit.meta.line_start, hit.meta.line_end, combined_query_key(&hit));
            let query_for_snippet = hit.meta.terms.join(" ");
            let snip = cache
                .get_or_build(key, sig, || {
                    snippet::build_snippet(&hit.file_rel, &content, &hit.meta, &query_for_snippet, &config, &extra_centers)
                })
                .await;
            Some(BuiltSnippet { hit, header: snip.header, code_block: snip.code_block, is_full_scope: snip.is_full_scope })
        });
    }
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(b)) = joined {
            built.push(b);
        }
    }
    built.sort_by(|a, b| b.hit.score.partial_cmp(&a.hit.score).unwrap_or(std::cmp::Ordering::Equal));

    if req.consolidate_per_file {
        let mut seen_files = std::collections::HashSet::new();
        built.retain(|b| seen_files.insert(b.hit.file_rel.clone()));
    }

    let embeddings_code = assemble_code_block(&built, req.config.total_code_budget, req.config.no_code_budget);

    let embeddings_refs = build_refs_block(req.config, &ranked, &built);
    let embeddings_graph = build_graph_block(req.config, &built);

    ContextResult { embeddings_code, embeddings_refs, embeddings_graph }
}

fn combined_query_key(hit: &Hit) -> String {
    hit.meta.terms.join(" ")
}

/// Concatenate `header\ncode_block` per snippet until `budget` is reached;
/// at least one snippet is always included (even if it alone overflows),
/// and `is_full_scope` snippets may exceed the soft cap by design.
fn assemble_code_block(built: &[BuiltSnippet], budget: usize, no_budget: bool) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for (i, b) in built.iter().enumerate() {
        let piece = format!("{}\n{}", b.header, b.code_block);
        let piece_len = piece.chars().count();
        if i > 0 && !no_budget && used + piece_len > budget && !b.is_full_scope {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&piece);
        used += piece_len;
    }
    out
}

fn build_refs_block(config: &RetrievalConfig, ranked: &[Hit], built: &[BuiltSnippet]) -> Option<String> {
    if config.refs_policy == RefsPolicy::Never {
        return None;
    }
    if config.refs_policy == RefsPolicy::Auto && built.len() < config.refs_auto_min {
        return None;
    }

    let mut lines = Vec::new();
    let mut used = 0usize;
    for b in built {
        if !crate::stages::common::is_python_path(&b.hit.file_rel) {
            continue;
        }
        let Some(content) = snippet::read_lossy(&config.project_root.join(&b.hit.file_rel)) else { continue };
        let Some((name, kind)) = refs::enclosing_symbol(&content, b.hit.meta.line_start) else { continue };
        let usage = refs::usage_refs(
            config,
            &name,
            kind.label(),
            &b.hit.file_rel,
            b.hit.meta.line_start,
            b.hit.meta.line_end,
            5,
            2,
        );
        let chosen = if usage.is_empty() { refs::literal_refs(ranked, &b.hit, 3) } else { usage };
        for line in chosen {
            if used + line.chars().count() > config.refs_max_chars {
                break;
            }
            used += line.chars().count();
            lines.push(line);
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn build_graph_block(config: &RetrievalConfig, built: &[BuiltSnippet]) -> Option<String> {
    if !config.callgraph_enabled {
        return None;
    }
    let mut lines = Vec::new();
    for b in built.iter().take(3) {
        if !crate::stages::common::is_python_path(&b.hit.file_rel) {
            continue;
        }
        let Some(content) = snippet::read_lossy(&config.project_root.join(&b.hit.file_rel)) else { continue };
        let Some((name, _)) = refs::enclosing_symbol(&content, b.hit.meta.line_start) else { continue };
        let nodes = callgraph::build_slice(config, &name, &b.hit.file_rel, b.hit.meta.line_start, b.hit.meta.line_end);
        lines.extend(nodes.iter().map(|n| n.render()));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_context_assembles_code_block_for_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target_fn():\n    return 1\n").unwrap();
        let mut config = RetrievalConfig::load(dir.path()).unwrap();
        config.callgraph_enabled = false;

        let req = ContextRequest {
            project_root: dir.path(),
            config: &config,
            known_chunks: &[],
            open_buffers: &[],
            queries: &["target_fn".to_string()],
            k: 5,
            overall_ms: 300,
            consolidate_per_file: false,
        };
        let result = build_context(req).await;
        assert!(result.embeddings_code.contains("target_fn"));
        assert!(result.render().contains("<embeddings_code>"));
    }

    #[tokio::test]
    async fn empty_hits_yields_empty_code_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let req = ContextRequest {
            project_root: dir.path(),
            config: &config,
            known_chunks: &[],
            open_buffers: &[],
            queries: &["nothing_matches_anything".to_string()],
            k: 5,
            overall_ms: 200,
            consolidate_per_file: false,
        };
        let result = build_context(req).await;
        assert!(result.embeddings_code.is_empty());
    }
}
