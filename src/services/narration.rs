//! Turns markdown analysis text into plain prose for speech synthesis.

use regex::Regex;
use std::sync::LazyLock;

struct Rule {
    pattern: LazyLock<Regex>,
    replacement: &'static str,
}

macro_rules! rule {
    ($pattern:expr, $replacement:expr) => {
        Rule {
            pattern: LazyLock::new(|| Regex::new($pattern).expect("narration pattern is valid")),
            replacement: $replacement,
        }
    };
}

// Applied in order; bold must run before italic, rules before bullets.
static MARKUP_RULES: [Rule; 11] = [
    rule!(r"(?m)^[ \t]*```[\w-]*[ \t]*$", ""),
    rule!(r"`", ""),
    rule!(r"!?\[([^\]]*)\]\([^)]*\)", "$1"),
    rule!(r"\*\*(.+?)\*\*", "$1"),
    rule!(r"__(.+?)__", "$1"),
    rule!(r"\*([^*\n]+)\*", "$1"),
    rule!(r"\b_([^_\n]+)_\b", "$1"),
    rule!(r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$", ""),
    rule!(r"(?m)^[ \t]{0,3}#{1,6}[ \t]*", ""),
    rule!(r"(?m)^[ \t]*>[ \t]?", ""),
    rule!(r"(?m)^[ \t]*(?:[-*+•]|\d+[.)])[ \t]+", ""),
];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static REPEATED_STOPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])(?:\s*[.!?:;,])+(\s|$)").expect("stop pattern is valid"));
static ELLIPSIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{3,}").expect("ellipsis pattern is valid"));

/// Words whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "e.g", "i.e", "cf", "fig", "vol",
    "approx",
];

/// Strips markdown so the narrator reads words, not symbols.
///
/// Every non-empty line becomes its own sentence, which is also how list
/// items turn into pauses once their markers are gone.
pub fn clean_for_speech(markdown: &str) -> String {
    let mut text = markdown.replace("\r\n", "\n");
    for rule in MARKUP_RULES.iter() {
        text = rule.pattern.replace_all(&text, rule.replacement).into_owned();
    }
    // Held as a single character so stop collapsing leaves it alone.
    let text = ELLIPSIS.replace_all(&text, "\u{2026}");

    let sentences: Vec<String> = text
        .lines()
        .map(|line| WHITESPACE.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .map(|mut line| {
            if !line.ends_with(['.', '!', '?', ':', ';', '\u{2026}']) {
                line.push('.');
            }
            line
        })
        .collect();

    let joined = sentences.join(" ");
    REPEATED_STOPS
        .replace_all(&joined, "$1$2")
        .replace('\u{2026}', "...")
}

/// Whether the period closing `word` belongs to an abbreviation or an initial.
fn is_abbreviation(word: &str) -> bool {
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());
    let mut chars = word.chars();
    if let (Some(first), None) = (chars.next(), chars.next()) {
        return first.is_uppercase();
    }
    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

/// Splits `text` at sentence ends.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_break = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        let abbreviated = c == '.' && {
            let word = text[start..i].rsplit(char::is_whitespace).next().unwrap_or("");
            is_abbreviation(word)
        };
        if at_break && !abbreviated {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Packs whole sentences, in order, into chunks of at most `ceiling`
/// characters. A single sentence longer than `ceiling` is kept whole as
/// its own chunk.
pub fn chunk_sentences(text: &str, ceiling: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences(text) {
        let len = sentence.chars().count();
        if !current.is_empty() && current_len + 1 + len > ceiling {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(sentence);
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
