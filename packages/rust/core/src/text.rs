//! Text normalisation shared by scoring, hints and consensus.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

pub use scorchbook_crawler::{collapse_whitespace, truncate_chars};

/// Lowercase, with every run of non-alphanumerics replaced by one space.
pub fn normalize_text(value: &str) -> String {
    static NON_ALNUM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
    NON_ALNUM_RE
        .replace_all(&value.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Distinct normalised tokens longer than two characters, in order.
pub fn tokens_from_value(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let mut tokens: Vec<String> = Vec::new();
    for token in normalize_text(value).split(' ') {
        if token.len() > 2 && !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

pub fn has_all_tokens(text: &str, tokens: &[String]) -> bool {
    tokens.iter().all(|token| text.contains(token.as_str()))
}

/// Lowercased host of a URL without a leading `www.`.
pub fn hostname(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    (!host.is_empty()).then_some(host)
}

/// Up to `before` characters preceding `byte_index` and `after` characters
/// from it onward.
pub fn char_window(text: &str, byte_index: usize, before: usize, after: usize) -> &str {
    let (head, tail) = text.split_at(byte_index);
    let start = if before == 0 {
        byte_index
    } else {
        head.char_indices()
            .rev()
            .nth(before - 1)
            .map_or(0, |(idx, _)| idx)
    };
    let end = tail
        .char_indices()
        .nth(after)
        .map_or(text.len(), |(idx, _)| byte_index + idx);
    &text[start..end]
}

/// A trimmed, non-empty value.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
