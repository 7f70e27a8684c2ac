//! Post-merge reranker (§4.D): boosts hits by query-token presence in the
//! file path and preview, plus a proximity bonus when tokens co-occur within
//! a small window, then dedups by `(file_rel, line_start, line_end)`.

use std::collections::HashSet;

use crate::query::rerank_tokens;
use crate::types::Hit;

const PATH_TOKEN_BONUS: f64 = 0.3;
const PREVIEW_TOKEN_BONUS: f64 = 0.15;
const PROXIMITY_BONUS: f64 = 0.2;
const PROXIMITY_WINDOW_CHARS: usize = 24;

/// Rerank `hits` in place of a fresh merge: boosts each hit's score, then
/// sorts descending and dedups by `(file_rel, line_start, line_end)`,
/// keeping the first (highest-scoring, since sorted) occurrence — the dedup
/// law from §9 invariant 8.
pub fn rerank(query: &str, hits: Vec<Hit>) -> Vec<Hit> {
    let tokens = rerank_tokens(query);

    let mut boosted: Vec<Hit> = hits
        .into_iter()
        .map(|mut hit| {
            hit.score = (hit.score + bonus(&tokens, &hit)).min(1.0);
            hit
        })
        .collect();

    boosted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen = HashSet::new();
    boosted.into_iter().filter(|h| seen.insert(h.dedup_key())).collect()
}

fn bonus(tokens: &[String], hit: &Hit) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let path_lower = hit.file_rel.to_lowercase();
    let preview_lower = hit.meta.text_preview.to_lowercase();

    let mut score = 0.0;
    for t in tokens {
        if path_lower.contains(t.as_str()) {
            score += PATH_TOKEN_BONUS;
        }
        if preview_lower.contains(t.as_str()) {
            score += PREVIEW_TOKEN_BONUS;
        }
    }

    if proximate(tokens, &preview_lower) {
        score += PROXIMITY_BONUS;
    }
    score
}

/// True when at least two distinct tokens' first-occurrence positions in
/// `preview_lower` fall within `PROXIMITY_WINDOW_CHARS` of each other.
/// Positions are first-occurrence-only and not deduplicated across tokens
/// (see DESIGN.md Open Question 1) rather than a "cleaner" positional-dedup
/// variant.
fn proximate(tokens: &[String], preview_lower: &str) -> bool {
    let positions: Vec<usize> =
        tokens.iter().filter_map(|t| preview_lower.find(t.as_str())).collect();
    if positions.len() < 2 {
        return false;
    }
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            let diff = positions[i].abs_diff(positions[j]);
            if diff <= PROXIMITY_WINDOW_CHARS {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMeta;

    fn hit(file_rel: &str, preview: &str, score: f64) -> Hit {
        Hit {
            score,
            file_rel: file_rel.to_string(),
            meta: ChunkMeta {
                file_rel: file_rel.to_string(),
                line_start: 1,
                line_end: 2,
                text_preview: preview.to_string(),
                terms: vec![],
                ts_ms: 0,
            },
            stage: "test",
        }
    }

    #[test]
    fn path_token_match_increases_score() {
        let h = hit("src/build_snippet.rs", "irrelevant body", 0.5);
        let ranked = rerank("build_snippet", vec![h]);
        assert!(ranked[0].score > 0.5);
    }

    #[test]
    fn dedup_keeps_highest_scoring_of_duplicate_ranges() {
        let a = hit("a.py", "build_snippet here", 0.9);
        let mut b = hit("a.py", "plain", 0.4);
        b.meta.line_start = a.meta.line_start;
        b.meta.line_end = a.meta.line_end;
        let ranked = rerank("query", vec![a, b]);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].score >= 0.9);
    }

    #[test]
    fn proximity_bonus_applies_when_tokens_are_close() {
        let near = hit("a.py", "build_snippet near callgraph node", 0.5);
        let far = hit("b.py", &format!("build_snippet{}callgraph", " ".repeat(40)), 0.5);
        let ranked = rerank("build_snippet callgraph", vec![near.clone(), far.clone()]);
        let near_score = ranked.iter().find(|h| h.file_rel == "a.py").unwrap().score;
        let far_score = ranked.iter().find(|h| h.file_rel == "b.py").unwrap().score;
        assert!(near_score > far_score);
    }
}
