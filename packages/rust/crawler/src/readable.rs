//! Readable-text extraction from product page HTML.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node};

/// Elements whose text never counts as page copy.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "svg", "template"];

/// Visible text of an HTML document with entities decoded and whitespace
/// collapsed to single spaces.
pub fn extract_readable_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            parts.push(text);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

/// Whether the markup declares a schema.org Product, via JSON-LD
/// (`"@type": "Product"` or a type array starting with it) or microdata.
pub fn contains_product_schema(html: &str) -> bool {
    static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)"@type"\s*:\s*(\[\s*)?"Product""#).expect("valid regex")
    });
    static MICRODATA_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)itemtype\s*=\s*"https?://schema\.org/Product""#).expect("valid regex")
    });

    JSON_LD_RE.is_match(html) || MICRODATA_RE.is_match(html)
}

/// Whether a body contains at least one tag.
pub fn looks_like_html(body: &str) -> bool {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
    TAG_RE.is_match(body)
}

/// Replace every whitespace run with a single space and trim.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The first `max_chars` characters of `value`.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_PAGE: &str = r#"<!doctype html>
<html><head>
  <title>Los Calientes Rojo</title>
  <style>body { color: red; }</style>
  <script type="application/ld+json">{"@context":"https://schema.org","@type":"Product","name":"Los Calientes Rojo"}</script>
</head><body>
  <nav>Shop &amp; Learn</nav>
  <main>
    <h1>Los Calientes   Rojo</h1>
    <p>Tasting notes: smoky&nbsp;red jalape&ntilde;o with a bright finish.</p>
    <svg><text>icon</text></svg>
    <noscript>Enable JavaScript</noscript>
  </main>
  <script>window.analytics = {};</script>
</body></html>"#;

    #[test]
    fn readable_text_skips_scripts_and_decodes_entities() {
        let text = extract_readable_text(PRODUCT_PAGE);
        assert!(text.contains("Shop & Learn"));
        assert!(text.contains("Los Calientes Rojo"));
        assert!(text.contains("smoky\u{a0}red jalapeño") || text.contains("smoky red jalapeño"));
        assert!(!text.contains("analytics"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("icon"));
        assert!(!text.contains("Enable JavaScript"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn detects_product_schema() {
        assert!(contains_product_schema(PRODUCT_PAGE));
        assert!(contains_product_schema(r#"{"@type": ["Product", "Thing"]}"#));
        assert!(contains_product_schema(
            r#"<div itemscope itemtype="https://schema.org/Product">"#
        ));
        assert!(!contains_product_schema(r#"{"@type": "Organization"}"#));
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<p>hi</p>"));
        assert!(!looks_like_html("plain text, heat 3/5"));
    }

    #[test]
    fn whitespace_and_truncation() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
