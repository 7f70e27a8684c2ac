//! Filesize watchdog (§4.J): after a successful write, warn when the
//! resulting file exceeds configured line/byte thresholds.

pub fn check_filesize(content: &str, max_lines: usize, max_bytes: u64) -> Option<String> {
    let line_count = content.lines().count();
    let byte_count = content.len() as u64;

    let mut reasons = Vec::new();
    if line_count > max_lines {
        reasons.push(format!("{line_count} lines (max {max_lines})"));
    }
    if byte_count > max_bytes {
        reasons.push(format!("{byte_count} bytes (max {max_bytes})"));
    }
    if reasons.is_empty() {
        None
    } else {
        Some(format!("file exceeds size thresholds: {}", reasons.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_when_line_count_exceeds_max() {
        let content = "x\n".repeat(10);
        assert!(check_filesize(&content, 5, 1_000_000).is_some());
    }

    #[test]
    fn no_warning_under_both_thresholds() {
        let content = "x\ny\n";
        assert!(check_filesize(&content, 100, 1_000_000).is_none());
    }
}
