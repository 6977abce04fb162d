//! Minimal, deterministic text helpers shared by the reducer, locator and ranker.
//!
//! Everything here works on rendered text (what a reader sees), never on markup.

/// Collapse every whitespace run to a single ASCII space and trim both ends.
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Dedup key for anchor text: trimmed, whitespace-collapsed, lowercase.
pub fn anchor_key(s: &str) -> String {
    collapse_ws(s).to_lowercase()
}

/// Find `needle` in `haystack` where each whitespace run in `needle` matches one or more
/// whitespace chars in `haystack`. Everything else is exact and case-sensitive.
///
/// Returns a byte range into `haystack`.
pub fn find_ws_flexible(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let tokens: Vec<&str> = needle.split_whitespace().collect();
    let first = *tokens.first()?;
    let mut from = 0usize;
    while let Some(rel) = haystack[from..].find(first) {
        let start = from + rel;
        let mut pos = start + first.len();
        let mut ok = true;
        for tok in &tokens[1..] {
            let rest = &haystack[pos..];
            let trimmed = rest.trim_start();
            let ws = rest.len() - trimmed.len();
            if ws == 0 || !trimmed.starts_with(tok) {
                ok = false;
                break;
            }
            pos += ws + tok.len();
        }
        if ok {
            return Some((start, pos));
        }
        // Advance past the first char of this attempt (char-boundary safe).
        from = start + first.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
    }
    None
}

/// Truncate on a char boundary. Returns (text, chars kept, clipped).
pub fn truncate_to_chars(s: &str, max_chars: usize) -> (String, usize, bool) {
    let mut out = String::new();
    let mut n = 0usize;
    let mut clipped = false;
    for ch in s.chars() {
        if n >= max_chars {
            clipped = true;
            break;
        }
        out.push(ch);
        n += 1;
    }
    (out, n, clipped)
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().any(|c| c.is_alphabetic()))
}

pub fn word_count(s: &str) -> usize {
    words(s).count()
}

fn sentence_count(s: &str) -> usize {
    let mut n = 0usize;
    let mut in_terminator = false;
    for ch in s.chars() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            if !in_terminator {
                n += 1;
            }
            in_terminator = true;
        } else if !ch.is_whitespace() {
            in_terminator = false;
        }
    }
    // Trailing text without a terminator is still a sentence.
    let tail_has_text = s
        .trim_end()
        .chars()
        .last()
        .is_some_and(|c| !matches!(c, '.' | '!' | '?'));
    if tail_has_text {
        n += 1;
    }
    n.max(1)
}

/// Vowel-group syllable estimate (English-biased; good enough for a readability signal).
fn syllables(word: &str) -> usize {
    let w = word.to_lowercase();
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut n = 0usize;
    let mut prev_vowel = false;
    for ch in w.chars() {
        let v = is_vowel(ch);
        if v && !prev_vowel {
            n += 1;
        }
        prev_vowel = v;
    }
    if w.ends_with('e') && !w.ends_with("le") && n > 1 {
        n -= 1;
    }
    n.max(1)
}

/// Flesch reading ease (higher = easier). Returns `None` for text without words.
pub fn flesch_reading_ease(s: &str) -> Option<f64> {
    let ws: Vec<&str> = words(s).collect();
    if ws.is_empty() {
        return None;
    }
    let n_words = ws.len() as f64;
    let n_sentences = sentence_count(s) as f64;
    let n_syllables = ws.iter().map(|w| syllables(w)).sum::<usize>() as f64;
    Some(206.835 - 1.015 * (n_words / n_sentences) - 84.6 * (n_syllables / n_words))
}
