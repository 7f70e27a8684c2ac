//! FZF v2 fuzzy matching: Smith-Waterman dynamic programming over a text window
//! with CamelCase, delimiter, and consecutive-character bonuses.
//!
//! Backs the `rapidfuzz` stage kernel's partial-ratio sliding-window match.

// ---------------------------------------------------------------------------
// Scoring constants (fzf v2)
// ---------------------------------------------------------------------------

const SCORE_MATCH: i32 = 16;
const SCORE_GAP_START: i32 = -3;
const SCORE_GAP_EXTENSION: i32 = -1;
const BONUS_BOUNDARY: i32 = 8;
const BONUS_CAMEL_CASE: i32 = 7;
const BONUS_CONSECUTIVE: i32 = 4;
const BONUS_FIRST_CHAR_MULTIPLIER: i32 = 2;
const BONUS_BOUNDARY_WHITE: i32 = 10;
const BONUS_BOUNDARY_DELIMITER: i32 = 9;

// ---------------------------------------------------------------------------
// Character classification
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    White,
    Delimiter,
    NonWord,
}

fn char_class(b: u8) -> CharClass {
    match b {
        b'a'..=b'z' => CharClass::Lower,
        b'A'..=b'Z' => CharClass::Upper,
        b'0'..=b'9' => CharClass::Digit,
        b' ' | b'\t' | b'\n' | b'\r' => CharClass::White,
        b'/' | b'_' | b'-' | b'.' | b':' | b';' | b'|' | b'>' => CharClass::Delimiter,
        _ => CharClass::NonWord,
    }
}

fn compute_bonus(prev: CharClass, curr: CharClass) -> i32 {
    match prev {
        CharClass::White => match curr {
            CharClass::White => 0,
            _ => BONUS_BOUNDARY_WHITE,
        },
        CharClass::Delimiter => match curr {
            CharClass::Delimiter => 0,
            _ => BONUS_BOUNDARY_DELIMITER,
        },
        CharClass::NonWord => match curr {
            CharClass::NonWord => 0,
            _ => BONUS_BOUNDARY,
        },
        CharClass::Lower => match curr {
            CharClass::Upper => BONUS_CAMEL_CASE,
            _ => 0,
        },
        CharClass::Digit => match curr {
            CharClass::Lower | CharClass::Upper => BONUS_BOUNDARY,
            _ => 0,
        },
        CharClass::Upper => 0,
    }
}

#[inline]
fn chars_match(text_byte: u8, pattern_byte: u8, case_sensitive: bool) -> bool {
    if case_sensitive {
        text_byte == pattern_byte
    } else {
        text_byte.eq_ignore_ascii_case(&pattern_byte)
    }
}

fn find_substring(text: &[u8], pattern: &[u8], case_sensitive: bool) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }
    if pattern.len() > text.len() {
        return None;
    }
    'outer: for i in 0..=text.len() - pattern.len() {
        for (j, &pb) in pattern.iter().enumerate() {
            if !chars_match(text[i + j], pb, case_sensitive) {
                continue 'outer;
            }
        }
        return Some(i);
    }
    None
}

// ---------------------------------------------------------------------------
// Smith-Waterman DP fuzzy matcher (fzf v2 style)
// ---------------------------------------------------------------------------

/// Subsequence-match `pattern` against `text`, returning a bonus-weighted score
/// and the matched character indices, or `None` if `pattern` is not a subsequence.
pub fn fuzzy_score_v2(text: &str, pattern: &str, case_sensitive: bool) -> Option<(f64, Vec<usize>)> {
    if pattern.is_empty() {
        return Some((0.0, vec![]));
    }
    let tb = text.as_bytes();
    let pb = pattern.as_bytes();
    let m = pb.len();
    let n = tb.len();
    if m > n {
        return None;
    }

    // Subsequence check + bounds narrowing (left-to-right)
    let mut pi = 0;
    let mut end_bound = 0;
    for (i, &b) in tb.iter().enumerate() {
        if pi < m && chars_match(b, pb[pi], case_sensitive) {
            pi += 1;
            end_bound = i;
        }
    }
    if pi < m {
        return None;
    }

    // Tighten from right-to-left
    pi = m;
    let mut start_bound = end_bound;
    for i in (0..=end_bound).rev() {
        if pi > 0 && chars_match(tb[i], pb[pi - 1], case_sensitive) {
            pi -= 1;
            start_bound = i;
        }
    }

    let w = end_bound - start_bound + 1;

    // Bonus array for the window
    let mut bonus = vec![0i32; w];
    for (j, slot) in bonus.iter_mut().enumerate() {
        let pos = start_bound + j;
        let prev_class = if pos == 0 { CharClass::White } else { char_class(tb[pos - 1]) };
        *slot = compute_bonus(prev_class, char_class(tb[pos]));
    }

    // Fast path: exact substring match
    if let Some(sub_pos) = find_substring(&tb[start_bound..=end_bound], pb, case_sensitive) {
        let abs_pos = start_bound + sub_pos;
        let mut score = SCORE_MATCH * m as i32;
        let first_bonus = if abs_pos == 0 {
            compute_bonus(CharClass::White, char_class(tb[0]))
        } else {
            compute_bonus(char_class(tb[abs_pos - 1]), char_class(tb[abs_pos]))
        };
        score += first_bonus * BONUS_FIRST_CHAR_MULTIPLIER;
        for k in 1..m {
            let b = if abs_pos + k < start_bound + w { bonus[abs_pos + k - start_bound] } else { 0 };
            score += std::cmp::max(b, BONUS_CONSECUTIVE);
        }
        let indices: Vec<usize> = (abs_pos..abs_pos + m).collect();
        return Some((score as f64, indices));
    }

    // DP matrices
    let mut h = vec![i32::MIN / 2; m * w];
    let mut c = vec![0u16; m * w];
    let mut dir = vec![false; m * w];

    for i in 0..m {
        let mut in_gap = false;
        for j in 0..w {
            let pos = start_bound + j;
            let idx = i * w + j;

            if chars_match(tb[pos], pb[i], case_sensitive) {
                let mut score = SCORE_MATCH;
                let b = bonus[j];
                let prev_consec = if i > 0 && j > 0 { c[(i - 1) * w + (j - 1)] } else { 0 };

                if prev_consec > 0 {
                    score += std::cmp::max(b, BONUS_CONSECUTIVE);
                } else {
                    score += b;
                }

                if i == 0 {
                    score += b * (BONUS_FIRST_CHAR_MULTIPLIER - 1);
                }

                let diag = if i > 0 && j > 0 {
                    h[(i - 1) * w + (j - 1)]
                } else if i == 0 {
                    0
                } else {
                    i32::MIN / 2
                };

                let left = if j > 0 {
                    h[idx - 1] + if in_gap { SCORE_GAP_EXTENSION } else { SCORE_GAP_START }
                } else {
                    i32::MIN / 2
                };

                let match_score = diag.saturating_add(score);

                if match_score >= left {
                    h[idx] = match_score;
                    c[idx] = prev_consec + 1;
                    dir[idx] = true;
                } else {
                    h[idx] = left;
                    c[idx] = 0;
                    dir[idx] = false;
                }
                in_gap = false;
            } else {
                h[idx] = if j > 0 {
                    h[idx - 1] + if in_gap { SCORE_GAP_EXTENSION } else { SCORE_GAP_START }
                } else {
                    i32::MIN / 2
                };
                c[idx] = 0;
                dir[idx] = false;
                in_gap = true;
            }
        }
    }

    // Find best end position in last row
    let last_row = (m - 1) * w;
    let mut best_score = i32::MIN;
    let mut best_j = 0;
    for j in 0..w {
        if h[last_row + j] > best_score {
            best_score = h[last_row + j];
            best_j = j;
        }
    }

    if best_score <= 0 {
        return None;
    }

    // Traceback
    let mut indices = Vec::with_capacity(m);
    let mut i = m - 1;
    let mut j = best_j;
    loop {
        let idx = i * w + j;
        if dir[idx] {
            indices.push(start_bound + j);
            if i == 0 {
                break;
            }
            i -= 1;
            j -= 1;
        } else {
            if j == 0 {
                break;
            }
            j -= 1;
        }
    }
    indices.reverse();

    if indices.len() != m {
        return None;
    }

    Some((best_score as f64, indices))
}

/// Normalized [0,1] partial-ratio score of `pattern` against the best-matching
/// window of `text`. Used by the `rapidfuzz` stage, which clamps its final
/// hit score at 0.986 regardless of how high this ratio climbs.
pub fn partial_ratio(text: &str, pattern: &str) -> f64 {
    if pattern.is_empty() {
        return 0.0;
    }
    match fuzzy_score_v2(text, pattern, false) {
        Some((score, indices)) => {
            let span = indices.last().copied().unwrap_or(0) + 1 - indices.first().copied().unwrap_or(0);
            let max_possible = (SCORE_MATCH + BONUS_BOUNDARY_WHITE * BONUS_FIRST_CHAR_MULTIPLIER) as f64
                * pattern.len() as f64;
            let span_penalty = pattern.len() as f64 / span.max(pattern.len()) as f64;
            ((score / max_possible).clamp(0.0, 1.0) * 0.6 + span_penalty * 0.4).clamp(0.0, 1.0)
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camelcase_boundary_bonus() {
        let score = fuzzy_score_v2("SearchModule", "SM", true);
        assert!(score.is_some(), "CamelCase pattern SM should match SearchModule");
        let (s, _) = score.unwrap();
        assert!(s > 0.0, "CamelCase match should have positive score");
    }

    #[test]
    fn non_matching_returns_none() {
        let score = fuzzy_score_v2("hello", "xyz", false);
        assert!(score.is_none(), "non-matching pattern should return None");
    }

    #[test]
    fn partial_ratio_exact_substring_is_high() {
        let r = partial_ratio("def process(item):\n    return item", "process item");
        assert!(r > 0.0);
    }

    #[test]
    fn partial_ratio_empty_pattern_is_zero() {
        assert_eq!(partial_ratio("anything", ""), 0.0);
    }
}
