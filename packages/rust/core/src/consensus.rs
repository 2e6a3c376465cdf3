//! Consensus across page extractions: the best-scored extraction wins, and
//! a runner-up may fill its gaps only when both agree on the product.

use futures::future::join_all;
use scorchbook_shared::{AgentEnrichment, SearchContext};
use tracing::{info, warn};

use crate::extraction::Extractor;
use crate::pages::PageSignals;
use crate::scoring::Scorer;
use crate::text::{has_all_tokens, hostname, non_blank, normalize_text, tokens_from_value};

/// Pages handed to the model for consensus.
pub const PAGE_EXTRACTION_LIMIT: usize = 3;

/// One page's extraction and how much we trust it.
#[derive(Debug, Clone)]
pub struct ExtractionCandidate<'p> {
    pub page: &'p PageSignals,
    pub fields: AgentEnrichment,
    pub score: i32,
}

/// Whether two strings name the same thing: equal once normalised, or the
/// shorter one's tokens mostly (80%) appear in the longer one.
pub fn is_likely_same_value(a: Option<&str>, b: Option<&str>) -> bool {
    let a = normalize_text(a.unwrap_or_default());
    let b = normalize_text(b.unwrap_or_default());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();
    let (shorter, longer) = if a_tokens.len() <= b_tokens.len() {
        (&a_tokens, &b_tokens)
    } else {
        (&b_tokens, &a_tokens)
    };
    let overlap = shorter.iter().filter(|t| longer.contains(t)).count();
    let needed = ((shorter.len() as f64 * 0.8).floor() as usize).max(1);
    overlap >= needed
}

/// Whether a value mentions every context token. No tokens matches anything.
pub fn matches_context_tokens(value: &str, tokens: &[String]) -> bool {
    tokens.is_empty() || has_all_tokens(&normalize_text(value), tokens)
}

/// Page score plus credit for each field found, with extra credit when a
/// field agrees with what we already know.
pub fn score_extraction_candidate(page: &PageSignals, fields: &AgentEnrichment, scorer: &Scorer<'_>) -> i32 {
    let context = scorer.context();
    let mut score = page.score;

    if let Some(name) = non_blank(fields.name.as_deref()) {
        score += 2;
        if context_matches(name, context.name.as_deref()) {
            score += 3;
        }
    }
    if let Some(maker) = non_blank(fields.maker.as_deref()) {
        score += 2;
        if context_matches(maker, context.maker.as_deref()) {
            score += 2;
        }
    }
    if let Some(style) = non_blank(fields.style.as_deref()) {
        score += 1;
        if context_matches(style, context.style.as_deref()) {
            score += 1;
        }
    }
    if fields.heat_vendor.is_some() {
        score += 1;
    }
    if non_blank(fields.tasting_notes_vendor.as_deref()).is_some() {
        score += 1;
    }
    if let Some(url) = non_blank(fields.product_url.as_deref()) {
        score += 1;
        if scorer.score_url_candidate(url) > 0 {
            score += 1;
        }
        if hostname(url).is_some_and(|host| hostname(&page.result.url) == Some(host)) {
            score += 1;
        }
    }
    score
}

fn context_matches(value: &str, context_value: Option<&str>) -> bool {
    matches_context_tokens(value, &tokens_from_value(context_value))
}

/// Fill the primary extraction's gaps from the secondary, but only when
/// the two agree on the name or the maker.
pub fn merge_extractions(
    primary: AgentEnrichment,
    secondary: Option<&AgentEnrichment>,
    scorer: &Scorer<'_>,
) -> AgentEnrichment {
    let Some(secondary) = secondary else {
        return primary;
    };
    let name_match = is_likely_same_value(primary.name.as_deref(), secondary.name.as_deref());
    let maker_match = is_likely_same_value(primary.maker.as_deref(), secondary.maker.as_deref());
    if !name_match && !maker_match {
        return primary;
    }

    let context = scorer.context();
    let name_tokens = tokens_from_value(context.name.as_deref());
    let maker_tokens = tokens_from_value(context.maker.as_deref());
    let style_tokens = tokens_from_value(context.style.as_deref());

    let mut merged = primary;
    adopt_string(&mut merged.name, secondary.name.as_deref(), &name_tokens);
    adopt_string(&mut merged.maker, secondary.maker.as_deref(), &maker_tokens);
    adopt_string(&mut merged.style, secondary.style.as_deref(), &style_tokens);
    adopt_string(&mut merged.tasting_notes_vendor, secondary.tasting_notes_vendor.as_deref(), &[]);
    if merged.heat_vendor.is_none() {
        merged.heat_vendor = secondary.heat_vendor;
    }
    if non_blank(merged.product_url.as_deref()).is_none() {
        if let Some(url) = non_blank(secondary.product_url.as_deref()) {
            if scorer.score_url_candidate(url) >= 0 {
                merged.product_url = Some(url.to_string());
            }
        }
    }
    merged
}

fn adopt_string(current: &mut Option<String>, candidate: Option<&str>, tokens: &[String]) {
    if non_blank(current.as_deref()).is_some() {
        return;
    }
    if let Some(candidate) = non_blank(candidate) {
        if matches_context_tokens(candidate, tokens) {
            *current = Some(candidate.to_string());
        }
    }
}

/// Extract from the top pages concurrently and merge the two best-scored
/// extractions. Failed or irrelevant pages drop out.
pub async fn extract_from_top_pages(
    extractor: &Extractor,
    context: &SearchContext,
    pages: &[PageSignals],
    scorer: &Scorer<'_>,
) -> AgentEnrichment {
    let top = &pages[..pages.len().min(PAGE_EXTRACTION_LIMIT)];
    let outcomes = join_all(top.iter().map(|page| extractor.extract_from_page_content(context, page))).await;

    let mut candidates: Vec<ExtractionCandidate<'_>> = top
        .iter()
        .zip(outcomes)
        .filter_map(|(page, outcome)| match outcome {
            Ok(Some(fields)) => Some((page, fields)),
            Ok(None) => None,
            Err(e) => {
                warn!(url = %page.result.url, error = %e, "agent.search.extract.page.error");
                None
            }
        })
        .map(|(page, fields)| ExtractionCandidate {
            score: score_extraction_candidate(page, &fields, scorer),
            page,
            fields,
        })
        .collect();
    candidates.sort_by(|a, b| b.score.cmp(&a.score));

    let mut ranked = candidates.into_iter();
    let Some(primary) = ranked.next() else {
        return AgentEnrichment::default();
    };
    let secondary = ranked.next();
    if let Some(secondary) = &secondary {
        info!(
            primary_url = %primary.page.result.url,
            secondary_url = %secondary.page.result.url,
            name_match = is_likely_same_value(primary.fields.name.as_deref(), secondary.fields.name.as_deref()),
            maker_match = is_likely_same_value(primary.fields.maker.as_deref(), secondary.fields.maker.as_deref()),
            "agent.search.extract.consensus"
        );
    }
    merge_extractions(primary.fields, secondary.as_ref().map(|c| &c.fields), scorer)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pages::ContentSource;
    use crate::profile::EnrichmentProfile;
    use crate::testing::{FakeModel, search_result};

    fn ctx() -> SearchContext {
        SearchContext {
            name: Some("Garlic Reaper".into()),
            maker: Some("Pepper Forge".into()),
            ..SearchContext::default()
        }
    }

    fn page(url: &str, score: i32, content: &str) -> PageSignals {
        PageSignals {
            result: search_result("", url, ""),
            score,
            content_text: content.into(),
            has_product_schema: false,
            content_source: ContentSource::Raw,
        }
    }

    #[test]
    fn same_value_by_equality_or_overlap() {
        assert!(is_likely_same_value(Some("Garlic Reaper!"), Some("garlic reaper")));
        assert!(is_likely_same_value(Some("Garlic Reaper"), Some("Pepper Forge Garlic Reaper Sauce")));
        assert!(!is_likely_same_value(Some("Garlic Reaper Supreme"), Some("Garlic Ghost Sauce")));
        // short values need only one shared token
        assert!(is_likely_same_value(Some("Garlic Reaper"), Some("Garlic Ghost")));
        assert!(!is_likely_same_value(Some("Mango"), Some("Garlic Reaper")));
        assert!(!is_likely_same_value(Some(""), Some("x")));
        assert!(!is_likely_same_value(None, Some("x")));
    }

    #[test]
    fn context_tokens() {
        let tokens = tokens_from_value(Some("Pepper Forge"));
        assert!(matches_context_tokens("The Pepper Forge Co.", &tokens));
        assert!(!matches_context_tokens("Pepper Palace", &tokens));
        assert!(matches_context_tokens("anything", &[]));
    }

    #[test]
    fn candidate_scoring_rewards_agreement() {
        let profile = EnrichmentProfile::hot_sauce();
        let context = ctx();
        let scorer = Scorer::new(&profile, &context);
        let signals = page("https://pepperforge.com/garlic-reaper", 10, "");

        let fields = AgentEnrichment {
            name: Some("Garlic Reaper".into()),
            maker: Some("Someone Else".into()),
            heat_vendor: Some(4.0),
            product_url: Some("https://pepperforge.com/garlic-reaper".into()),
            ..AgentEnrichment::default()
        };
        // 10 + name 5 + maker 2 + heat 1 + url 1 + positive url 1 + same host 1
        assert_eq!(score_extraction_candidate(&signals, &fields, &scorer), 21);
        assert_eq!(score_extraction_candidate(&signals, &AgentEnrichment::default(), &scorer), 10);
    }

    #[test]
    fn candidate_scoring_credits_fields_missing_from_context() {
        let profile = EnrichmentProfile::hot_sauce();
        let context = SearchContext {
            name: Some("Garlic Reaper".into()),
            ..SearchContext::default()
        };
        let scorer = Scorer::new(&profile, &context);
        let signals = page("https://a.example.com/review", 0, "");

        let fields = AgentEnrichment {
            name: Some("Garlic Reaper".into()),
            maker: Some("Pepper Forge".into()),
            style: Some("Garlic".into()),
            ..AgentEnrichment::default()
        };
        // name 2+3, maker 2+2, style 1+1
        assert_eq!(score_extraction_candidate(&signals, &fields, &scorer), 11);
    }

    #[test]
    fn merge_requires_agreement() {
        let profile = EnrichmentProfile::hot_sauce();
        let context = ctx();
        let scorer = Scorer::new(&profile, &context);

        let primary = AgentEnrichment {
            name: Some("Garlic Reaper".into()),
            ..AgentEnrichment::default()
        };
        let agreeing = AgentEnrichment {
            name: Some("Garlic Reaper Hot Sauce".into()),
            maker: Some("Pepper Forge".into()),
            style: Some("Garlic".into()),
            heat_vendor: Some(4.0),
            tasting_notes_vendor: Some("Big garlic".into()),
            product_url: Some("https://pepperforge.com/garlic-reaper".into()),
            ..AgentEnrichment::default()
        };
        let merged = merge_extractions(primary.clone(), Some(&agreeing), &scorer);
        assert_eq!(merged.name.as_deref(), Some("Garlic Reaper"));
        assert_eq!(merged.maker.as_deref(), Some("Pepper Forge"));
        assert_eq!(merged.style.as_deref(), Some("Garlic"));
        assert_eq!(merged.heat_vendor, Some(4.0));
        assert_eq!(merged.tasting_notes_vendor.as_deref(), Some("Big garlic"));
        assert_eq!(merged.product_url.as_deref(), Some("https://pepperforge.com/garlic-reaper"));

        let unrelated = AgentEnrichment {
            name: Some("Mango Inferno".into()),
            maker: Some("Other Co".into()),
            heat_vendor: Some(2.0),
            ..AgentEnrichment::default()
        };
        assert_eq!(merge_extractions(primary.clone(), Some(&unrelated), &scorer), primary);
        assert_eq!(merge_extractions(primary.clone(), None, &scorer), primary);
    }

    #[test]
    fn merge_skips_makers_outside_context() {
        let profile = EnrichmentProfile::hot_sauce();
        let context = ctx();
        let scorer = Scorer::new(&profile, &context);
        let primary = AgentEnrichment {
            name: Some("Garlic Reaper".into()),
            ..AgentEnrichment::default()
        };
        let secondary = AgentEnrichment {
            name: Some("Garlic Reaper".into()),
            maker: Some("Knockoff Sauces".into()),
            ..AgentEnrichment::default()
        };
        let merged = merge_extractions(primary, Some(&secondary), &scorer);
        assert_eq!(merged.maker, None);
    }

    #[tokio::test]
    async fn top_pages_merge_best_two() {
        let model = Arc::new(
            FakeModel::new()
                .reply("pepperforge.com", r#"{"relevant": true, "name": "Garlic Reaper", "maker": "Pepper Forge"}"#)
                .reply("blog.example.com", r#"{"relevant": true, "name": "Garlic Reaper", "heat_vendor": 4, "tasting_notes_vendor": "Roasted garlic and reaper"}"#)
                .fail("broken.example.com", "overloaded"),
        );
        let extractor = Extractor::new(model.clone(), EnrichmentProfile::hot_sauce());
        let context = ctx();
        let profile = EnrichmentProfile::hot_sauce();
        let scorer = Scorer::new(&profile, &context);
        let pages = vec![
            page("https://pepperforge.com/garlic-reaper", 20, "Pepper Forge Garlic Reaper"),
            page("https://broken.example.com/x", 15, "Garlic Reaper review"),
            page("https://blog.example.com/review", 12, "Garlic Reaper review"),
            page("https://late.example.com/x", 1, "ignored"),
        ];

        let merged = extract_from_top_pages(&extractor, &context, &pages, &scorer).await;
        assert_eq!(merged.maker.as_deref(), Some("Pepper Forge"));
        assert_eq!(merged.heat_vendor, Some(4.0));
        assert_eq!(merged.tasting_notes_vendor.as_deref(), Some("Roasted garlic and reaper"));
        assert_eq!(merged.product_url.as_deref(), Some("https://pepperforge.com/garlic-reaper"));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn no_usable_pages_yield_empty_fields() {
        let model = Arc::new(FakeModel::new().reply("from a webpage", r#"{"relevant": false}"#));
        let extractor = Extractor::new(model, EnrichmentProfile::hot_sauce());
        let context = ctx();
        let profile = EnrichmentProfile::hot_sauce();
        let scorer = Scorer::new(&profile, &context);
        let pages = vec![page("https://a.example.com", 5, "text")];
        assert!(extract_from_top_pages(&extractor, &context, &pages, &scorer).await.is_empty());
    }
}
