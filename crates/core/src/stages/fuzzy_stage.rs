//! The `rapidfuzz` stage kernel (§4.C): partial-ratio sliding windows over
//! file lines, clamped at 0.986 regardless of how high the underlying ratio
//! climbs. Grounded directly on `crate::fuzzy` (the FZF v2 Smith-Waterman
//! scorer), reused verbatim for its matching core.

use crate::deadline::Deadline;
use crate::fuzzy::partial_ratio;
use crate::types::Hit;

use super::common::*;

const SCORE_CEILING: f64 = 0.986;

pub fn rapidfuzz(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for file in candidate_files(ctx) {
        if deadline.expired() || hits.len() >= k {
            break;
        }
        let Some(content) = read_file(&file.abs_path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            continue;
        }

        let window = 3usize;
        let mut best_ratio = 0.0_f64;
        let mut best_center = 0usize;
        for i in 0..lines.len() {
            let lo = i.saturating_sub(window / 2);
            let hi = (i + window / 2 + 1).min(lines.len());
            let joined = lines[lo..hi].join(" ");
            let ratio = partial_ratio(&joined, trimmed);
            if ratio > best_ratio {
                best_ratio = ratio;
                best_center = i + 1;
            }
        }

        if best_ratio > 0.35 {
            let (ls, le) = line_window(best_center, 2, lines.len());
            let score = (best_ratio * SCORE_CEILING).min(SCORE_CEILING);
            hits.push(make_hit(&file.rel_path, ls, le, &lines, score, "rapidfuzz", vec![]));
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;

    #[test]
    fn rapidfuzz_never_exceeds_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def process_item(item):\n    return item\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = rapidfuzz(&c, "process_item", 5, &Deadline::new(250));
        for h in &hits {
            assert!(h.score <= SCORE_CEILING + 1e-9);
        }
    }

    #[test]
    fn rapidfuzz_finds_fuzzy_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def build_snippet(file_rel, meta_obj):\n    pass\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        let c = StageContext { project_root: dir.path(), config: &cfg, known_chunks: &[], open_buffers: &[] };
        let hits = rapidfuzz(&c, "build snippt", 5, &Deadline::new(250));
        assert!(!hits.is_empty());
    }
}
