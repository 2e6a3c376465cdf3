//! In-memory stand-ins for the model, search, page and transcription
//! backends used across this crate's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use scorchbook_ai::{LanguageModel, Transcriber};
use scorchbook_search::{SearchProvider, SearchResult};
use scorchbook_shared::{Result, ScorchbookError};
use serde_json::{Value, json};

use crate::pages::PageSource;

/// Replies chosen by the first rule whose needle occurs in the request body.
#[derive(Default)]
pub(crate) struct FakeModel {
    rules: Vec<(String, std::result::Result<String, String>)>,
    pub bodies: Mutex<Vec<Value>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, needle: &str, text: &str) -> Self {
        self.rules.push((needle.into(), Ok(text.into())));
        self
    }

    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules.push((needle.into(), Err(message.into())));
        self
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.to_string().contains(needle))
            .count()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn model_id(&self) -> &str {
        "fake-model"
    }

    async fn invoke_raw(&self, body: Value) -> Result<Value> {
        let haystack = body.to_string();
        self.bodies.lock().unwrap().push(body);
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Ok("{}".into()));
        match reply {
            Ok(text) => Ok(json!({"content": [{"type": "text", "text": text}]})),
            Err(message) => Err(ScorchbookError::Enrichment(message)),
        }
    }
}

/// Canned results per exact query.
#[derive(Default)]
pub(crate) struct FakeSearch {
    pub results: HashMap<String, Vec<SearchResult>>,
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str) -> Vec<SearchResult> {
        self.queries.lock().unwrap().push(query.to_string());
        self.results.get(query).cloned().unwrap_or_default()
    }
}

/// Serves canned HTML and records requested URLs.
#[derive(Default)]
pub(crate) struct FakePages {
    pub pages: HashMap<String, String>,
    pub requested: Mutex<Vec<String>>,
}

#[async_trait]
impl PageSource for FakePages {
    async fn fetch_html(&self, url: &str) -> Option<String> {
        self.requested.lock().unwrap().push(url.to_string());
        self.pages.get(url).cloned()
    }
}

/// Returns a fixed transcript, or fails when none is set.
#[derive(Default)]
pub(crate) struct FakeTranscriber {
    pub transcript: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &[u8], mime_type: &str) -> Result<String> {
        self.calls.lock().unwrap().push(mime_type.to_string());
        self.transcript
            .clone()
            .ok_or_else(|| ScorchbookError::Transcription("Transcribe job failed".into()))
    }
}

pub(crate) fn search_result(title: &str, url: &str, snippet: &str) -> SearchResult {
    SearchResult {
        title: title.into(),
        url: url.into(),
        snippet: snippet.into(),
        content: None,
        raw_content: None,
    }
}
