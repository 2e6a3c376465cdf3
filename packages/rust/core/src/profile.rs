//! Enrichment profiles: the vocabulary that differs between the hot sauce
//! log and the food/drink log.

use scorchbook_shared::{Result, ScorchbookError, SearchContext};

use crate::text::hostname;

/// Variant-specific search and scoring vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentProfile {
    /// Config name (`hot-sauce`, `drink`).
    pub name: &'static str,
    /// Phrases marking text as being about this product category.
    pub category_terms: &'static [&'static str],
    /// Appended to queries that do not already mention a category term.
    pub search_suffix: &'static str,
    /// Retailers known to carry good product copy, with their weight.
    pub trusted_domains: &'static [(&'static str, i32)],
    /// Social and reference sites never worth fetching.
    pub blocked_domains: &'static [&'static str],
    /// Large marketplaces with thin, noisy listings.
    pub marketplace_domains: &'static [&'static str],
    /// Path fragments typical of product detail pages.
    pub product_url_hints: &'static [&'static str],
    /// Product noun used in prompts ("hot sauce").
    pub product_noun: &'static str,
    /// What the label photos show ("hot sauce bottles").
    pub package_noun: &'static str,
    /// Heat words and their 0..5 level.
    pub heat_words: &'static [(&'static str, f64)],
}

const BLOCKED_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "pinterest.com",
    "reddit.com",
    "youtube.com",
    "wikipedia.org",
];

const MARKETPLACE_DOMAINS: &[&str] = &[
    "amazon.com",
    "walmart.com",
    "ebay.com",
    "etsy.com",
    "target.com",
    "instacart.com",
];

const PRODUCT_URL_HINTS: &[&str] = &["/product/", "/products/", "/shop/", "/store/", "/p/", "/dp/"];

const HEAT_WORDS: &[(&str, f64)] = &[
    ("mild", 2.0),
    ("medium mild", 2.0),
    ("medium", 3.0),
    ("medium hot", 4.0),
    ("medium-hot", 4.0),
    ("hot", 4.0),
    ("very hot", 5.0),
    ("extra hot", 5.0),
    ("extremely hot", 5.0),
];

impl EnrichmentProfile {
    pub fn hot_sauce() -> Self {
        Self {
            name: "hot-sauce",
            category_terms: &["hot sauce", "hotsauce"],
            search_suffix: "hot sauce",
            trusted_domains: &[
                ("heatonist.com", 4),
                ("hotsauce.com", 4),
                ("pepperpalace.com", 4),
                ("amazon.com", 1),
                ("walmart.com", 1),
                ("target.com", 1),
            ],
            blocked_domains: BLOCKED_DOMAINS,
            marketplace_domains: MARKETPLACE_DOMAINS,
            product_url_hints: PRODUCT_URL_HINTS,
            product_noun: "hot sauce",
            package_noun: "hot sauce bottles",
            heat_words: HEAT_WORDS,
        }
    }

    pub fn drink() -> Self {
        Self {
            name: "drink",
            category_terms: &["drink", "beverage", "snack"],
            search_suffix: "drink",
            trusted_domains: &[
                ("wholefoodsmarket.com", 3),
                ("thrivemarket.com", 3),
                ("amazon.com", 1),
                ("walmart.com", 1),
                ("target.com", 1),
            ],
            blocked_domains: BLOCKED_DOMAINS,
            marketplace_domains: MARKETPLACE_DOMAINS,
            product_url_hints: PRODUCT_URL_HINTS,
            product_noun: "food or drink",
            package_noun: "food and drink packaging",
            heat_words: HEAT_WORDS,
        }
    }

    /// Look a profile up by its config name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hot-sauce" | "hotsauce" | "hot_sauce" => Ok(Self::hot_sauce()),
            "drink" | "food" | "food-drink" => Ok(Self::drink()),
            other => Err(ScorchbookError::config(format!(
                "unknown enrichment profile '{other}' (expected hot-sauce or drink)"
            ))),
        }
    }

    /// Highest trusted-domain weight matching the URL's host, or 0.
    pub fn trusted_score(&self, url: &str) -> i32 {
        let Some(host) = hostname(url) else {
            return 0;
        };
        self.trusted_domains
            .iter()
            .filter(|(domain, _)| host_matches(&host, domain))
            .map(|(_, weight)| *weight)
            .max()
            .unwrap_or(0)
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        hostname(url).is_some_and(|host| self.blocked_domains.iter().any(|d| host_matches(&host, d)))
    }

    pub fn is_marketplace(&self, url: &str) -> bool {
        hostname(url)
            .is_some_and(|host| self.marketplace_domains.iter().any(|d| host_matches(&host, d)))
    }

    pub fn has_product_hint(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.product_url_hints.iter().any(|hint| lower.contains(hint))
    }

    /// Whether already-lowercased text mentions a category term.
    pub fn mentions_category(&self, lower_text: &str) -> bool {
        self.category_terms.iter().any(|term| lower_text.contains(term))
    }

    /// Heat level for an exact heat word.
    pub fn heat_word(&self, word: &str) -> Option<f64> {
        self.heat_words
            .iter()
            .find(|(w, _)| *w == word)
            .map(|(_, level)| *level)
    }

    // -----------------------------------------------------------------------
    // Query construction
    // -----------------------------------------------------------------------

    /// Primary web query: name, maker, style and keywords (multi-word parts
    /// quoted), the category suffix when missing, and purchase intent terms.
    /// Empty when the context has nothing to search for.
    pub fn build_search_query(&self, context: &SearchContext) -> String {
        let parts = [&context.name, &context.maker, &context.style]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .chain(context.keywords.iter().map(String::as_str));
        self.compose_query(parts, "official OR buy OR shop OR product")
    }

    /// Query aimed at the maker's own site.
    pub fn build_official_query(&self, context: &SearchContext) -> String {
        let parts = [&context.maker, &context.name]
            .into_iter()
            .filter_map(|v| v.as_deref());
        self.compose_query(parts, "official site")
    }

    fn compose_query<'a>(&self, parts: impl Iterator<Item = &'a str>, tail: &str) -> String {
        let quoted: Vec<String> = parts
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| if p.contains(' ') { format!("\"{p}\"") } else { p.to_string() })
            .collect();
        if quoted.is_empty() {
            return String::new();
        }
        let base = quoted.join(" ");
        let mut query = vec![base.as_str()];
        if !self.mentions_category(&base.to_lowercase()) {
            query.push(self.search_suffix);
        }
        query.push(tail);
        query.join(" ")
    }
}

impl Default for EnrichmentProfile {
    fn default() -> Self {
        Self::hot_sauce()
    }
}

/// Host equals the domain or is one of its subdomains.
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(name: Option<&str>, maker: Option<&str>, style: Option<&str>) -> SearchContext {
        SearchContext {
            name: name.map(String::from),
            maker: maker.map(String::from),
            style: style.map(String::from),
            keywords: Vec::new(),
        }
    }

    #[test]
    fn search_query_quotes_and_appends_suffix() {
        let profile = EnrichmentProfile::hot_sauce();
        let mut ctx = context(Some("Garlic Reaper"), Some("Pepper Co"), Some("garlic"));
        ctx.keywords = vec!["small batch".into(), " ".into()];
        assert_eq!(
            profile.build_search_query(&ctx),
            "\"Garlic Reaper\" \"Pepper Co\" garlic \"small batch\" hot sauce official OR buy OR shop OR product"
        );
    }

    #[test]
    fn search_query_skips_suffix_when_category_present() {
        let profile = EnrichmentProfile::hot_sauce();
        let ctx = context(Some("Rojo Hot Sauce"), None, None);
        assert_eq!(
            profile.build_search_query(&ctx),
            "\"Rojo Hot Sauce\" official OR buy OR shop OR product"
        );
        assert_eq!(profile.build_search_query(&SearchContext::default()), "");
    }

    #[test]
    fn official_query_uses_maker_then_name() {
        let profile = EnrichmentProfile::hot_sauce();
        let ctx = context(Some("Rojo"), Some("Los Calientes"), Some("red"));
        assert_eq!(
            profile.build_official_query(&ctx),
            "\"Los Calientes\" Rojo hot sauce official site"
        );
        assert_eq!(profile.build_official_query(&context(None, None, Some("red"))), "");
    }

    #[test]
    fn domain_checks_respect_label_boundaries() {
        let profile = EnrichmentProfile::hot_sauce();
        assert!(profile.is_blocked("https://www.reddit.com/r/hotsauce"));
        assert!(profile.is_blocked("https://m.facebook.com/page"));
        assert!(profile.is_blocked("https://x.com/maker"));
        assert!(!profile.is_blocked("https://netflix.com/title"));
        assert!(profile.is_marketplace("https://www.amazon.com/dp/B000"));
        assert!(!profile.is_marketplace("not a url"));
        assert_eq!(profile.trusted_score("https://heatonist.com/products/x"), 4);
        assert_eq!(profile.trusted_score("https://amazon.com/dp/1"), 1);
        assert_eq!(profile.trusted_score("https://example.com"), 0);
    }

    #[test]
    fn product_hints_and_heat_words() {
        let profile = EnrichmentProfile::hot_sauce();
        assert!(profile.has_product_hint("https://shop.com/Products/rojo"));
        assert!(!profile.has_product_hint("https://shop.com/blog/rojo"));
        assert_eq!(profile.heat_word("medium hot"), Some(4.0));
        assert_eq!(profile.heat_word("lava"), None);
    }

    #[test]
    fn profiles_by_name() {
        assert_eq!(EnrichmentProfile::from_name("hot-sauce").unwrap().name, "hot-sauce");
        assert_eq!(EnrichmentProfile::from_name("Drink").unwrap().name, "drink");
        assert!(EnrichmentProfile::from_name("wine").is_err());
    }
}
