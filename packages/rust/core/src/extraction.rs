//! Prompted field extraction: label photos, search results, product pages
//! and voice transcripts.
//!
//! Every call parses a JSON object out of the model's reply; an unparseable
//! reply yields empty fields rather than an error. Transport and API errors
//! propagate.

use std::sync::Arc;

use scorchbook_ai::{
    LanguageModel, bool_field, clamp_score, normalize_number, parse_json_from_text, string_field,
    string_list_field, text_prompt, vision_prompt,
};
use scorchbook_search::SearchResult;
use scorchbook_shared::{AgentEnrichment, NutritionFacts, Result, SearchContext};
use scorchbook_storage::Storage;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::hints::{extract_vendor_hints, pick_relevant_content};
use crate::pages::PageSignals;
use crate::profile::EnrichmentProfile;

/// Fields read from the front label, plus search keywords.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageExtraction {
    pub fields: AgentEnrichment,
    pub keywords: Vec<String>,
}

/// Nutrition panel and ingredient list read from the back label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackExtraction {
    pub nutrition_facts: Option<NutritionFacts>,
    pub ingredients: Vec<String>,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Runs extraction prompts against a [`LanguageModel`]. Page extractions are
/// cached in storage when a cache is attached.
#[derive(Clone)]
pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    cache: Option<Arc<Storage>>,
    profile: EnrichmentProfile,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>, profile: EnrichmentProfile) -> Self {
        Self {
            model,
            cache: None,
            profile,
        }
    }

    pub fn with_cache(mut self, storage: Arc<Storage>) -> Self {
        self.cache = Some(storage);
        self
    }

    pub fn profile(&self) -> &EnrichmentProfile {
        &self.profile
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    /// Read name, maker, style, heat, vendor notes, product URL and search
    /// keywords off a front label photo.
    #[instrument(skip_all, fields(mime_type = image_mime_type))]
    pub async fn run_image_extraction(
        &self,
        image_base64: &str,
        image_mime_type: &str,
    ) -> Result<ImageExtraction> {
        let instructions = format!(
            "You are a data extraction system for {}. Return JSON only with keys: name, maker, style, heat_vendor, tasting_notes_vendor, product_url, keywords (array of strings). Include any brand or product line keywords. Use null for unknowns.",
            self.profile.package_noun
        );
        let request = vision_prompt(&instructions, image_base64, image_mime_type);
        let text = self.model.invoke(&request).await?;
        let Some(parsed) = parse_json_from_text(&text) else {
            warn!(reason = "parse_failed", "agent.image.extract.failed");
            return Ok(ImageExtraction::default());
        };
        Ok(ImageExtraction {
            fields: enrichment_from_json(&parsed),
            keywords: string_list_field(&parsed, "keywords"),
        })
    }

    /// Read the nutrition panel and ingredients off a back label photo.
    #[instrument(skip_all, fields(mime_type = image_mime_type))]
    pub async fn run_back_image_extraction(
        &self,
        image_base64: &str,
        image_mime_type: &str,
    ) -> Result<BackExtraction> {
        let instructions = format!(
            "You are a data extraction system for the back label of {}. Return JSON only with keys: nutrition_facts (object with keys serving_size, calories, total_fat, sodium, total_carbs, sugars, protein), ingredients (array of strings, in label order). Use null for unknowns.",
            self.profile.package_noun
        );
        let request = vision_prompt(&instructions, image_base64, image_mime_type);
        let text = self.model.invoke(&request).await?;
        let Some(parsed) = parse_json_from_text(&text) else {
            warn!(reason = "parse_failed", "agent.back.extract.failed");
            return Ok(BackExtraction::default());
        };
        let nutrition_facts = parsed
            .get("nutrition_facts")
            .and_then(Value::as_object)
            .map(nutrition_from_json)
            .filter(|facts| !facts.is_empty());
        Ok(BackExtraction {
            nutrition_facts,
            ingredients: string_list_field(&parsed, "ingredients"),
        })
    }

    /// Ask the model to pick product details from a list of search hits.
    #[instrument(skip_all, fields(results = results.len()))]
    pub async fn extract_from_search_results(
        &self,
        context: &SearchContext,
        results: &[SearchResult],
        best_url: Option<&str>,
    ) -> Result<AgentEnrichment> {
        info!(result_count = results.len(), best_url, "agent.search.extract.start");
        let instructions = format!(
            "You are selecting the best {} product info from search results. Prefer the official product page. Return JSON only with keys: name, maker, style, heat_vendor, tasting_notes_vendor, product_url. Use null for unknowns.",
            self.profile.product_noun
        );
        let summarized: Vec<Value> = results
            .iter()
            .map(|r| json!({"title": r.title, "url": r.url, "snippet": r.snippet}))
            .collect();
        let input = json!({"context": context, "best_url": best_url, "results": summarized});
        let request = text_prompt(&instructions, &input.to_string());
        let text = self.model.invoke(&request).await?;
        let Some(parsed) = parse_json_from_text(&text) else {
            warn!(reason = "parse_failed", "agent.search.extract.failed");
            return Ok(AgentEnrichment::default());
        };
        let enrichment = enrichment_from_json(&parsed);
        info!(fields = ?enrichment.filled_fields(), "agent.search.extract.complete");
        Ok(enrichment)
    }

    /// Extract product details from one page. `None` when the page has no
    /// text, the reply is unparseable, or the model judges the page
    /// irrelevant. Regex hints backfill heat and notes, and the page URL
    /// stands in for the product URL once a name or maker was found.
    #[instrument(skip_all, fields(url = %page.result.url))]
    pub async fn extract_from_page_content(
        &self,
        context: &SearchContext,
        page: &PageSignals,
    ) -> Result<Option<AgentEnrichment>> {
        if page.content_text.is_empty() {
            return Ok(None);
        }
        let url = page.result.url.as_str();
        info!(url, has_product_schema = page.has_product_schema, "agent.search.extract.page.start");

        let hints = extract_vendor_hints(&page.content_text, &self.profile);
        let instructions = format!(
            "You are extracting {} product details from a webpage. Use the context to verify relevance. If the page is not about the target product, return JSON only with key: relevant set to false. Otherwise return JSON only with keys: relevant, name, maker, style, heat_vendor, tasting_notes_vendor, product_url. Use null for unknowns. Prefer official vendor copy for tasting_notes_vendor and vendor-provided heat level or Scoville when available.",
            self.profile.product_noun
        );
        let input = json!({
            "context": context,
            "url": url,
            "title": page.result.title,
            "content": pick_relevant_content(&page.content_text),
            "hints": hints,
        });

        let text = self.invoke_text_cached(&instructions, &input.to_string()).await?;
        let Some(parsed) = parse_json_from_text(&text) else {
            warn!(reason = "parse_failed", url, "agent.search.extract.page.failed");
            return Ok(None);
        };
        if bool_field(&parsed, "relevant") == Some(false) {
            info!(reason = "irrelevant", url, "agent.search.extract.page.skipped");
            return Ok(None);
        }

        let mut enrichment = enrichment_from_json(&parsed);
        if enrichment.heat_vendor.is_none() {
            enrichment.heat_vendor = hints.heat_vendor;
        }
        if enrichment.tasting_notes_vendor.is_none() {
            enrichment.tasting_notes_vendor = hints.tasting_notes_vendor;
        }
        if enrichment.product_url.is_none() && (enrichment.name.is_some() || enrichment.maker.is_some()) {
            enrichment.product_url = Some(url.to_string());
        }
        info!(url, fields = ?enrichment.filled_fields(), "agent.search.extract.page.complete");
        Ok(Some(enrichment))
    }

    /// Score and heat rating spoken in a voice note.
    #[instrument(skip_all)]
    pub async fn extract_voice_metrics(&self, transcript: &str) -> Result<AgentEnrichment> {
        if transcript.is_empty() {
            return Ok(AgentEnrichment::default());
        }
        let instructions = "Extract user tasting details from this transcript. Return JSON only with keys: score, heat_user. Use null for unknowns.";
        let text = self.model.invoke(&text_prompt(instructions, transcript)).await?;
        let Some(parsed) = parse_json_from_text(&text) else {
            return Ok(AgentEnrichment::default());
        };
        Ok(AgentEnrichment {
            score: clamp_score(normalize_number(parsed.get("score"))),
            heat_user: clamp_score(normalize_number(parsed.get("heat_user"))),
            ..AgentEnrichment::default()
        })
    }

    /// Text prompt, uncached.
    pub(crate) async fn invoke_text(&self, instructions: &str, input: &str) -> Result<String> {
        self.model.invoke(&text_prompt(instructions, input)).await
    }

    /// Text prompt answered from the cache when the same prompt already
    /// produced parseable output for this model.
    async fn invoke_text_cached(&self, instructions: &str, input: &str) -> Result<String> {
        let Some(storage) = self.cache.as_deref() else {
            return self.invoke_text(instructions, input).await;
        };
        let hash = prompt_hash(instructions, input);
        let model_id = self.model.model_id();
        if let Some(cached) = storage.get_enrichment_cache(&hash, model_id).await? {
            debug!(model_id, "extraction cache hit");
            return Ok(cached);
        }
        let text = self.invoke_text(instructions, input).await?;
        if parse_json_from_text(&text).is_some() {
            storage.set_enrichment_cache(&hash, model_id, &text).await?;
        }
        Ok(text)
    }
}

/// Cache key for a prompt.
fn prompt_hash(instructions: &str, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instructions.as_bytes());
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The product fields shared by every extraction reply.
fn enrichment_from_json(parsed: &Map<String, Value>) -> AgentEnrichment {
    AgentEnrichment {
        name: string_field(parsed, "name"),
        maker: string_field(parsed, "maker"),
        style: string_field(parsed, "style"),
        heat_vendor: clamp_score(normalize_number(parsed.get("heat_vendor"))),
        tasting_notes_vendor: string_field(parsed, "tasting_notes_vendor"),
        product_url: string_field(parsed, "product_url"),
        ..AgentEnrichment::default()
    }
}

fn nutrition_from_json(facts: &Map<String, Value>) -> NutritionFacts {
    let text = |key: &str| match facts.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    NutritionFacts {
        serving_size: text("serving_size"),
        calories: normalize_number(facts.get("calories")),
        total_fat: text("total_fat"),
        sodium: text("sodium"),
        total_carbs: text("total_carbs"),
        sugars: text("sugars"),
        protein: text("protein"),
    }
}
