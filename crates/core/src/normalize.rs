//! Text cleanup for extracted post bodies.

use regex::Regex;
use std::sync::LazyLock;

// Residual reply markers left over from quote rendering, e.g. ">>108258576"
static REPLY_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">>\d+").unwrap());
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"http\S+").unwrap());
static HORIZONTAL_WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// Normalize a post body while keeping its line structure.
///
/// Greentext and one-thought-per-line posts rely on line breaks, so lines are
/// kept but each is trimmed and blank lines are dropped. Reply markers and
/// URLs are removed before the line cleanup, which makes the function
/// idempotent: a line holding only `>>123` vanishes instead of leaving a gap.
pub fn normalize_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");

    // Removing one marker can splice ">" + ">5" into a fresh marker
    while REPLY_MARKER_RE.is_match(&text) {
        text = REPLY_MARKER_RE.replace_all(&text, "").into_owned();
    }
    text = URL_RE.replace_all(&text, "").into_owned();

    text.split('\n')
        .map(|line| HORIZONTAL_WS_RE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate `text` to at most `max_chars` characters, trimming trailing whitespace
/// left at the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Character count used for every length budget (Unicode scalar values, not bytes).
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}
