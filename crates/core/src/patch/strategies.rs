//! Pure patch strategies (§4.J): whole-file write, line-range replace,
//! Python-symbol replace, and anchor-relative insert. Each returns the new
//! file content plus a unified diff; none touch the filesystem — that's
//! the caller's job during the commit step.

use similar::TextDiff;

use crate::ast;

pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// `patch.write`: replace (or create) the whole file.
pub fn patch_write(old: Option<&str>, new_text: &str, path: &str) -> (String, String) {
    let old = old.unwrap_or("");
    (new_text.to_string(), unified_diff(path, old, new_text))
}

/// `patch.line`: replace 1-based inclusive `[ls, le]` with `replacement`,
/// rejecting spans larger than `max_span`.
pub fn patch_line(
    content: &str,
    path: &str,
    line_start: usize,
    line_end: usize,
    replacement: &str,
    max_span: usize,
) -> Result<(String, String), String> {
    if line_start == 0 || line_end < line_start {
        return Err("invalid line range".to_string());
    }
    if line_end - line_start + 1 > max_span {
        return Err(format!("range {line_start}-{line_end} exceeds max_span {max_span}"));
    }
    let lines: Vec<&str> = content.lines().collect();
    if line_end > lines.len() {
        return Err("line range past end of file".to_string());
    }

    let mut out_lines: Vec<&str> = lines[..line_start - 1].to_vec();
    let replacement_lines: Vec<&str> = replacement.lines().collect();
    out_lines.extend(replacement_lines);
    out_lines.extend(&lines[line_end..]);
    let new_content = out_lines.join("\n") + if content.ends_with('\n') { "\n" } else { "" };

    Ok((new_content.clone(), unified_diff(path, content, &new_content)))
}

/// `patch.symbol`: replace the full Python definition of `symbol`,
/// including any contiguous decorator lines directly above it.
pub fn patch_symbol(content: &str, path: &str, symbol: &str, replacement: &str) -> Result<(String, String), String> {
    let file_ast = ast::parse_file(content, "py").ok_or_else(|| "failed to parse python source".to_string())?;
    let sym = file_ast.find(symbol).into_iter().next().ok_or_else(|| format!("symbol {symbol} not found"))?;

    let lines: Vec<&str> = content.lines().collect();
    let mut start = sym.start_line;
    while start > 1 && lines.get(start - 2).map(|l| l.trim_start().starts_with('@')).unwrap_or(false) {
        start -= 1;
    }
    let end = sym.end_line;
    if end > lines.len() || start == 0 {
        return Err("symbol range out of bounds".to_string());
    }

    let mut out_lines: Vec<&str> = lines[..start - 1].to_vec();
    let replacement_lines: Vec<&str> = replacement.lines().collect();
    out_lines.extend(replacement_lines);
    out_lines.extend(&lines[end..]);
    let new_content = out_lines.join("\n") + if content.ends_with('\n') { "\n" } else { "" };

    Ok((new_content.clone(), unified_diff(path, content, &new_content)))
}

/// `patch.anchor`: insert `replacement` immediately after the first line
/// containing `anchor` verbatim.
pub fn patch_anchor(content: &str, path: &str, anchor: &str, replacement: &str) -> Result<(String, String), String> {
    let lines: Vec<&str> = content.lines().collect();
    let idx = lines.iter().position(|l| l.contains(anchor)).ok_or_else(|| format!("anchor {anchor:?} not found"))?;

    let mut out_lines: Vec<&str> = lines[..=idx].to_vec();
    let replacement_lines: Vec<&str> = replacement.lines().collect();
    out_lines.extend(replacement_lines);
    out_lines.extend(&lines[idx + 1..]);
    let new_content = out_lines.join("\n") + if content.ends_with('\n') { "\n" } else { "" };

    Ok((new_content.clone(), unified_diff(path, content, &new_content)))
}

/// Per-strategy diff-size thresholds for `should_autocommit`'s size gate.
fn size_threshold(strategy: &str) -> usize {
    match strategy {
        "write" => 4000,
        "symbol" => 2000,
        "line" => 400,
        "anchor" => 200,
        _ => 400,
    }
}

/// `(strategy, diff) -> (commit_ok, reason)`: a pure gating function
/// (§8 invariant 4 — same inputs always yield the same result). Commit is
/// allowed when the diff is non-trivial, within the strategy's size
/// threshold, and (when applicable) passed an external Python syntax
/// check.
pub fn should_autocommit(strategy: &str, diff: &str, python_syntax_ok: bool) -> (bool, String) {
    if diff.trim().is_empty() {
        return (false, "empty diff".to_string());
    }
    let changed_lines = diff.lines().filter(|l| l.starts_with('+') || l.starts_with('-')).filter(|l| !l.starts_with("+++") && !l.starts_with("---")).count();
    if changed_lines == 0 {
        return (false, "no content change".to_string());
    }
    if !python_syntax_ok {
        return (false, "python syntax check failed".to_string());
    }
    let threshold = size_threshold(strategy);
    if changed_lines > threshold {
        return (false, format!("diff exceeds {strategy} threshold ({changed_lines} > {threshold} lines)"));
    }
    (true, "ok".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_line_rejects_oversized_span() {
        let content = "a\nb\nc\n";
        let err = patch_line(content, "f.py", 1, 3, "x", 1).unwrap_err();
        assert!(err.contains("max_span"));
    }

    #[test]
    fn patch_line_replaces_range() {
        let content = "a\nb\nc\n";
        let (new_content, diff) = patch_line(content, "f.py", 2, 2, "B", 10).unwrap();
        assert_eq!(new_content, "a\nB\nc\n");
        assert!(diff.contains("-b"));
        assert!(diff.contains("+B"));
    }

    #[test]
    fn patch_symbol_replaces_function_including_decorator() {
        let content = "@decorator\ndef target():\n    return 1\n\ndef other():\n    return 2\n";
        let (new_content, _) = patch_symbol(content, "f.py", "target", "def target():\n    return 99").unwrap();
        assert!(new_content.contains("return 99"));
        assert!(!new_content.contains("@decorator"));
        assert!(new_content.contains("def other()"));
    }

    #[test]
    fn patch_anchor_inserts_after_matching_line() {
        let content = "a\nb\nc\n";
        let (new_content, _) = patch_anchor(content, "f.py", "b", "INSERTED").unwrap();
        assert_eq!(new_content, "a\nb\nINSERTED\nc\n");
    }

    #[test]
    fn should_autocommit_rejects_empty_diff() {
        let (ok, reason) = should_autocommit("line", "", true);
        assert!(!ok);
        assert_eq!(reason, "empty diff");
    }

    #[test]
    fn should_autocommit_is_pure() {
        let diff = "+a\n-b\n";
        assert_eq!(should_autocommit("line", diff, true), should_autocommit("line", diff, true));
    }
}
