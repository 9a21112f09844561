/// Shared text utilities: identifier tokenization and token estimation
///
/// Every component that looks at text (lexical index, ranker, packer,
/// term-vector fallback) goes through these two functions so that scores
/// and budgets agree with each other.
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z_0-9]+").unwrap());

/// Extract lowercase identifier-like tokens from text
///
/// Tokens start with a letter or underscore and are at least two characters
/// long, which skips single-letter loop variables and stray punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Estimate the token cost of a piece of text
///
/// Four characters per token is the usual approximation for code; the
/// floor of one token keeps empty-ish snippets from being free.
pub fn est_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}
