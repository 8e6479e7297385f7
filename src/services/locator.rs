//! Isolates the text of one chapter inside a whole-book text dump.
//!
//! The search runs in tiers and the first tier that finds a start wins:
//! the exact title, then the first few words of a long title, then a bare
//! `Chapter N` / `Part N` prefix. A title whose first hit falls inside the
//! opening stretch of the book is assumed to be a table-of-contents entry
//! when a later hit exists.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// Share of the document, from the top, treated as table-of-contents territory.
const TOC_WINDOW: f64 = 0.05;
const SHORT_TITLE_WORDS: usize = 3;
const PREFIX_WORDS: usize = 8;
/// Cap on how far past the start the next-title search is pushed.
const NEXT_TITLE_SKIP: usize = 50;

pub const MAX_CHAPTER_CHARS: usize = 1_000_000;
/// Spans shorter than this carry too little signal to analyze.
pub const MIN_USABLE_CHARS: usize = 200;
pub const TRUNCATION_MARKER: &str = "\n\n[... chapter text truncated ...]";

static NUMBERED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"^\s*((?:chapter|part)\s+(?:\d+|[ivxlcdm]+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|thirteen|fourteen|fifteen|sixteen|seventeen|eighteen|nineteen|twenty))\b",
    )
    .case_insensitive(true)
    .build()
    .expect("numbered prefix pattern is valid")
});

/// Returns the trimmed text belonging to `title`, ending before
/// `next_title` when that is found, or `None` if nothing was located.
pub fn locate(full_text: &str, title: &str, next_title: Option<&str>) -> Option<String> {
    let start = find_start(full_text, title)?;
    let end = next_title
        .and_then(|next| find_end(full_text, start, title, next))
        .unwrap_or(full_text.len());

    let span = cap_chars(&full_text[start..end]);
    let trimmed = span.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Like [`locate`], but spans under [`MIN_USABLE_CHARS`] count as not found.
pub fn locate_usable(full_text: &str, title: &str, next_title: Option<&str>) -> Option<String> {
    locate(full_text, title, next_title).filter(|span| span.chars().count() >= MIN_USABLE_CHARS)
}

fn find_start(text: &str, title: &str) -> Option<usize> {
    let words: Vec<&str> = title.split_whitespace().collect();
    let toc_limit = text.chars().count() as f64 * TOC_WINDOW;

    // Tier 1: the full title, skipping a table-of-contents hit.
    if let Some(pattern) = words_pattern(&words, false) {
        if let Some(start) = first_past_toc(text, &pattern, toc_limit) {
            return Some(start);
        }
    }

    // Tier 2: leading words of a long title.
    if words.len() > SHORT_TITLE_WORDS {
        let leading = &words[..words.len().min(PREFIX_WORDS)];
        if let Some(found) = words_pattern(leading, false).and_then(|p| p.find(text)) {
            tracing::debug!(title, "chapter start matched on leading words");
            return Some(found.start());
        }
    }

    // Tier 3: "Chapter N" / "Part N" on its own.
    let prefix = NUMBERED_PREFIX.captures(title)?.get(1)?.as_str();
    let prefix_words: Vec<&str> = prefix.split_whitespace().collect();
    let pattern = words_pattern(&prefix_words, true)?;
    let start = first_past_toc(text, &pattern, toc_limit)?;
    tracing::debug!(title, prefix, "chapter start matched on numbered prefix");
    Some(start)
}

fn find_end(text: &str, start: usize, title: &str, next_title: &str) -> Option<usize> {
    let words: Vec<&str> = next_title.split_whitespace().collect();
    let pattern = words_pattern(&words, false)?;

    let skip = title.chars().count().min(NEXT_TITLE_SKIP);
    let from = text[start..]
        .char_indices()
        .nth(skip)
        .map(|(offset, _)| start + offset)?;

    pattern.find_at(text, from).map(|m| m.start())
}

/// Picks the second hit when the first sits inside the table-of-contents
/// window and a second one exists.
fn first_past_toc(text: &str, pattern: &Regex, toc_limit: f64) -> Option<usize> {
    let mut hits = pattern.find_iter(text);
    let first = hits.next()?;
    match hits.next() {
        Some(second) if (text[..first.start()].chars().count() as f64) < toc_limit => {
            Some(second.start())
        }
        _ => Some(first.start()),
    }
}

/// Case-insensitive pattern matching `words` separated by any run of whitespace.
fn words_pattern(words: &[&str], whole_word: bool) -> Option<Regex> {
    if words.is_empty() {
        return None;
    }

    let mut body = words
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join(r"\s+");
    if whole_word {
        body.push_str(r"\b");
    }

    RegexBuilder::new(&body).case_insensitive(true).build().ok()
}

fn cap_chars(span: &str) -> std::borrow::Cow<'_, str> {
    match span.char_indices().nth(MAX_CHAPTER_CHARS) {
        Some((cut, _)) => {
            tracing::warn!(
                limit = MAX_CHAPTER_CHARS,
                "chapter text exceeds limit, truncating"
            );
            let mut capped = span[..cut].to_string();
            capped.push_str(TRUNCATION_MARKER);
            capped.into()
        }
        None => span.into(),
    }
}
