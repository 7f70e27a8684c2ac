//! Comment stripping and head/mid/tail composition for the multi-segment
//! snippet path (§4.E step 5).

use std::collections::BTreeSet;

/// Drop whole-line comments, keeping docstrings (triple-quoted string
/// bodies) and any comment line tagged `TODO`/`FIXME`/`NOTE` intact. Inline
/// trailing comments are left untouched (stripping them risks corrupting a
/// `#` inside a string literal the line also contains).
pub fn strip_trivial_comments(code: &str) -> String {
    let mut out = Vec::new();
    let mut in_triple = false;
    let mut triple_marker = "";

    for line in code.lines() {
        let trimmed = line.trim_start();
        if in_triple {
            out.push(line.to_string());
            if trimmed.contains(triple_marker) {
                in_triple = false;
            }
            continue;
        }
        for marker in ["\"\"\"", "'''"] {
            let count = trimmed.matches(marker).count();
            if count % 2 == 1 {
                in_triple = true;
                triple_marker = marker;
            }
        }
        if !in_triple
            && trimmed.starts_with('#')
            && !tagged_comment(trimmed)
        {
            continue;
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

fn tagged_comment(trimmed: &str) -> bool {
    let upper = trimmed.to_uppercase();
    upper.contains("TODO") || upper.contains("FIXME") || upper.contains("NOTE")
}

/// Build a composite head/mid/tail view of `lines` (1-based window
/// `[scope_start, scope_end]`), centered on `centers` for the mid windows,
/// joined by `# ----` separators and truncated to `char_budget`.
pub fn build_head_mid_tail(
    lines: &[&str],
    scope_start: usize,
    scope_end: usize,
    head_lines: usize,
    tail_lines: usize,
    mid_windows: usize,
    mid_around: usize,
    centers: &[usize],
    char_budget: usize,
) -> String {
    let scope_start = scope_start.max(1);
    let scope_end = scope_end.min(lines.len()).max(scope_start);

    let head_end = (scope_start + head_lines.saturating_sub(1)).min(scope_end);
    let tail_start = scope_end.saturating_sub(tail_lines.saturating_sub(1)).max(head_end + 1).min(scope_end);

    let mut excluded: BTreeSet<usize> = (scope_start..=head_end).collect();
    excluded.extend(tail_start..=scope_end);

    let mut mid_ranges: Vec<(usize, usize)> = Vec::new();
    for &center in centers.iter().take(mid_windows) {
        if center < scope_start || center > scope_end {
            continue;
        }
        let lo = center.saturating_sub(mid_around).max(scope_start);
        let hi = (center + mid_around).min(scope_end);
        if lo > head_end && hi < tail_start {
            mid_ranges.push((lo, hi));
        }
    }
    mid_ranges.sort();
    mid_ranges.dedup();

    let slice = |a: usize, b: usize| -> String {
        if a > b || a < 1 || b > lines.len() {
            return String::new();
        }
        lines[a - 1..b].join("\n")
    };

    let mut segments = vec![slice(scope_start, head_end)];
    for &(lo, hi) in &mid_ranges {
        segments.push(slice(lo, hi));
    }
    if tail_start > head_end {
        segments.push(slice(tail_start, scope_end));
    }

    let joined = segments.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n# ----\n");
    truncate_to_budget(&joined, char_budget)
}

fn truncate_to_budget(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let mut out: String = text.chars().take(budget.saturating_sub(20)).collect();
    out.push_str("\n# ---- truncated ----");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bare_comment_lines_but_keeps_tagged_ones() {
        let code = "x = 1\n# a plain note\n# TODO: fix this\ny = 2\n";
        let stripped = strip_trivial_comments(code);
        assert!(!stripped.contains("a plain note"));
        assert!(stripped.contains("TODO"));
    }

    #[test]
    fn preserves_docstring_body() {
        let code = "def f():\n    \"\"\"\n    # not a comment, inside docstring\n    \"\"\"\n    return 1\n";
        let stripped = strip_trivial_comments(code);
        assert!(stripped.contains("not a comment"));
    }

    #[test]
    fn head_mid_tail_never_overlaps_and_respects_budget() {
        let text: Vec<String> = (1..=40).map(|i| format!("line {i}")).collect();
        let lines: Vec<&str> = text.iter().map(|s| s.as_str()).collect();
        let out = build_head_mid_tail(&lines, 1, 40, 3, 3, 2, 2, &[20], 10_000);
        assert!(out.contains("line 1"));
        assert!(out.contains("line 40"));
        assert!(out.contains("line 20"));
    }
}
