//! Fallback line-window location when a hit carries no explicit range.

/// Find the first token (in `tokens` order, not earliest-position-in-file)
/// present in `text`, and return a `(line_start, line_end, snippet)` window
/// spanning `around` lines on either side of its line (1-based, inclusive).
pub fn find_line_window(text: &str, tokens: &[String], around: usize) -> Option<(usize, usize, String)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return None;
    }

    for token in tokens {
        if token.is_empty() {
            continue;
        }
        let needle = token.to_lowercase();
        if let Some(line_idx) = lines.iter().position(|l| l.to_lowercase().contains(&needle)) {
            let line_no = line_idx + 1;
            let start = line_no.saturating_sub(around).max(1);
            let end = (line_no + around).min(lines.len());
            let snippet = lines[start - 1..end].join("\n");
            return Some((start, end, snippet));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_window_around_first_matching_token_in_token_order() {
        let text = "a\nb\nfoo_target\nc\nbar_target\nd";
        let tokens = vec!["bar_target".to_string(), "foo_target".to_string()];
        let (ls, le, snippet) = find_line_window(text, &tokens, 1).unwrap();
        assert_eq!(ls, 4);
        assert_eq!(le, 6);
        assert!(snippet.contains("bar_target"));
    }

    #[test]
    fn returns_none_when_no_token_matches() {
        let text = "a\nb\nc";
        let tokens = vec!["missing".to_string()];
        assert!(find_line_window(text, &tokens, 2).is_none());
    }

    #[test]
    fn window_clamps_to_file_bounds() {
        let text = "target\nb\nc";
        let tokens = vec!["target".to_string()];
        let (ls, le, _) = find_line_window(text, &tokens, 5).unwrap();
        assert_eq!(ls, 1);
        assert_eq!(le, 3);
    }
}
