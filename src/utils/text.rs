//! Text normalization and chunking helpers for indexing and analysis.

use std::sync::OnceLock;

use regex::Regex;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn punct_spacing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+([,.;:?!])").unwrap())
}

/// Clean and normalize text: collapse whitespace, fix spacing before
/// punctuation, and strip control characters.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let collapsed = whitespace_re().replace_all(text, " ");
    let spaced = punct_spacing_re().replace_all(&collapsed, "$1");

    spaced
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Split text into overlapping chunks of `chunk_size` words.
///
/// The window advances by `chunk_size - overlap` words per chunk, clamped to
/// at least 1 so an overlap >= chunk_size cannot produce a zero or negative
/// step (which would loop forever).
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Split text into paragraphs on blank lines.
pub fn split_into_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Count words in text.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate text to a maximum number of characters on a UTF-8 boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
