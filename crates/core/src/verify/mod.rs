//! Verifier program (§4.K): runs a retrieval query for a stated goal and
//! scores whether the changed files plausibly correspond to the top hits.
//! Scoring is intentionally asymmetric: no penalty for files that don't
//! match (see DESIGN.md Open Question 4).

use crate::buffers::OpenBuffer;
use crate::config::RetrievalConfig;
use crate::orchestrator;
use crate::types::Chunk;

pub struct VerifyRequest<'a> {
    pub goal: &'a str,
    pub files: &'a [String],
    pub diff: Option<&'a str>,
    pub topk: usize,
}

#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub ok: bool,
    pub score: f64,
    pub reason: String,
    /// `req.files` entries that appeared among the top-k retrieval hits
    /// (§4.K exports: `last_verify_files`).
    pub matched_files: Vec<String>,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Compute the verifier's score for `req` against `retrieve`'s current top-k
/// hits for `req.goal`.
pub async fn verify(
    project_root: &std::path::Path,
    config: &RetrievalConfig,
    known_chunks: &[Chunk],
    open_buffers: &[OpenBuffer],
    req: VerifyRequest<'_>,
) -> VerifyResult {
    let k = if req.topk > 0 { req.topk } else { config.verify_topk };
    let hits = orchestrator::retrieve(
        project_root,
        config,
        known_chunks,
        open_buffers,
        req.goal,
        k,
        config.verify_ms,
    )
    .await;

    let hit_paths: std::collections::HashSet<String> = hits.iter().map(|h| normalize(&h.file_rel)).collect();
    let changed: Vec<String> = req.files.iter().map(|f| normalize(f)).collect();

    let matched_files: Vec<String> = changed.iter().filter(|f| hit_paths.contains(*f)).cloned().collect();
    let matched = matched_files.len();

    let mut score = 0.0;
    if matched >= 1 {
        score += 0.5;
    }
    if matched >= 2 {
        score += 0.3;
    }
    if let Some(diff) = req.diff {
        if hits.iter().any(|h| {
            crate::snippet::read_lossy(&project_root.join(&h.file_rel))
                .map(|content| {
                    let header = crate::snippet::header_for(&h.file_rel, &content, h.meta.line_start, h.meta.line_end);
                    diff.contains(&header)
                })
                .unwrap_or(false)
        }) {
            score += 0.2;
        }
    }
    score = score.clamp(0.0, 1.0);

    let ok = score >= config.verify_pass;
    let reason = format!("{matched}/{} changed files matched top-{k} hits for {:?}", changed.len(), req.goal);

    VerifyResult { ok, score, reason, matched_files }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_file_scores_at_least_half() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target_fn():\n    return 1\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let result = verify(
            dir.path(),
            &config,
            &[],
            &[],
            VerifyRequest { goal: "target_fn", files: &["a.py".to_string()], diff: None, topk: 5 },
        )
        .await;
        assert!(result.score >= 0.5);
    }

    #[tokio::test]
    async fn unrelated_file_scores_low_without_penalty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target_fn():\n    return 1\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let result = verify(
            dir.path(),
            &config,
            &[],
            &[],
            VerifyRequest { goal: "target_fn", files: &["unrelated.py".to_string()], diff: None, topk: 5 },
        )
        .await;
        assert_eq!(result.score, 0.0);
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn matching_file_is_recorded_in_matched_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target_fn():\n    return 1\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let result = verify(
            dir.path(),
            &config,
            &[],
            &[],
            VerifyRequest { goal: "target_fn", files: &["a.py".to_string()], diff: None, topk: 5 },
        )
        .await;
        assert_eq!(result.matched_files, vec!["a.py".to_string()]);
    }

    #[tokio::test]
    async fn diff_containing_actual_snippet_header_earns_bonus() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target_fn():\n    return 1\n").unwrap();
        let config = RetrievalConfig::load(dir.path()).unwrap();
        let hits = orchestrator::retrieve(dir.path(), &config, &[], &[], "target_fn", 5, config.verify_ms).await;
        let hit = hits.iter().find(|h| h.file_rel == "a.py").expect("retrieval should find a.py");
        let content = std::fs::read_to_string(dir.path().join("a.py")).unwrap();
        let header = crate::snippet::header_for("a.py", &content, hit.meta.line_start, hit.meta.line_end);
        let diff = format!("--- a/a.py\n+++ b/a.py\n{header}\n+def target_fn():\n+    return 1\n");

        let without_diff = verify(
            dir.path(),
            &config,
            &[],
            &[],
            VerifyRequest { goal: "target_fn", files: &["a.py".to_string()], diff: None, topk: 5 },
        )
        .await;
        let with_diff = verify(
            dir.path(),
            &config,
            &[],
            &[],
            VerifyRequest { goal: "target_fn", files: &["a.py".to_string()], diff: Some(&diff), topk: 5 },
        )
        .await;
        assert!(with_diff.score > without_diff.score);
    }
}
