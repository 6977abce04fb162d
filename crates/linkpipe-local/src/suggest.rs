//! Model boundary: prompt building, lenient output parsing, model adapters and the
//! concurrent fan-out over inventory batches.
//!
//! Everything here happens before the (synchronous) pipeline starts.

use crate::openai_compat::{ChatOptions, OpenAiCompatClient};
use futures_util::future::join_all;
use linkpipe_core::{
    CandidateSuggestion, Error, InventoryEntry, JsonCache, Result, SuggestionModel,
    SuggestionRequest,
};
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You suggest internal links for a web page. \
Only propose anchors that appear word for word in the page content you are given. \
Answer with JSON only: an array of objects with keys \
anchor_text, target_url, target_type, claimed_paragraph, reasoning, \
relevance, anchor_quality, flow. claimed_paragraph must be copied exactly from the \
content and must contain anchor_text. Scores are numbers from 0 to 10.";

/// User message for one request.
pub fn build_prompt(req: &SuggestionRequest) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "Suggest at most {} links.\n\nCandidate targets:\n",
        req.max_suggestions
    ));
    for e in &req.inventory {
        let role = e.role.map(|r| r.as_str()).unwrap_or("standard");
        s.push_str(&format!("- {} | {} | {}\n", e.url, e.title.trim(), role));
    }
    s.push_str("\nPage content:\n<<<\n");
    s.push_str(&req.reduced_content);
    s.push_str("\n>>>\n");
    s
}

fn fenced_body(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn outer_json(raw: &str) -> Option<&str> {
    let open = raw.find(['[', '{'])?;
    let close_char = if raw[open..].starts_with('[') { ']' } else { '}' };
    let close = raw.rfind(close_char)?;
    (close > open).then(|| &raw[open..=close])
}

fn candidates_from_value(v: serde_json::Value) -> Option<Vec<CandidateSuggestion>> {
    let items = match v {
        serde_json::Value::Array(a) => a,
        serde_json::Value::Object(mut o) => {
            match ["suggestions", "links", "candidates"]
                .iter()
                .find_map(|k| o.remove(*k))
            {
                Some(serde_json::Value::Array(a)) => a,
                _ => return None,
            }
        }
        _ => return None,
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<CandidateSuggestion>(item) {
            Ok(c) => out.push(c),
            Err(e) => log::debug!("skipping malformed suggestion record: {e}"),
        }
    }
    Some(out)
}

/// Extract candidates from raw model text.
///
/// Accepts a bare JSON array, an object wrapping the array under `suggestions`, or
/// either of those inside a fenced code block or surrounded by prose. Records that do
/// not deserialize are skipped; records with missing fields are kept (the pipeline
/// rejects them with a reason).
pub fn parse_model_output(raw: &str) -> Result<Vec<CandidateSuggestion>> {
    let trimmed = raw.trim();
    let attempts = [Some(trimmed), fenced_body(trimmed), outer_json(trimmed)];
    for text in attempts.into_iter().flatten() {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(text) {
            if let Some(cs) = candidates_from_value(v) {
                return Ok(cs);
            }
        }
    }
    Err(Error::Llm("model output contains no suggestion array".to_string()))
}

/// `SuggestionModel` backed by an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatModel {
    client: OpenAiCompatClient,
    opts: ChatOptions,
    name: String,
}

impl OpenAiCompatModel {
    pub fn new(client: OpenAiCompatClient, opts: ChatOptions) -> Self {
        let name = format!("openai_compat:{}", client.model());
        Self { client, opts, name }
    }

    pub fn from_env(model_override: Option<String>, opts: ChatOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("linkpipe/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(Self::new(OpenAiCompatClient::from_env(http, model_override)?, opts))
    }
}

#[async_trait::async_trait]
impl SuggestionModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn suggest(&self, req: &SuggestionRequest) -> Result<Vec<CandidateSuggestion>> {
        let raw = self
            .client
            .chat(SYSTEM_PROMPT, &build_prompt(req), &self.opts)
            .await?;
        let mut out = parse_model_output(&raw)?;
        out.truncate(req.max_suggestions);
        Ok(out)
    }
}

/// Fixed suggestions, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticModel {
    suggestions: Vec<CandidateSuggestion>,
}

impl StaticModel {
    pub fn new(suggestions: Vec<CandidateSuggestion>) -> Self {
        Self { suggestions }
    }
}

#[async_trait::async_trait]
impl SuggestionModel for StaticModel {
    fn name(&self) -> &str {
        "static"
    }

    /// Returns the fixed suggestions that target a URL in this request's inventory
    /// (all of them when the inventory is empty).
    async fn suggest(&self, req: &SuggestionRequest) -> Result<Vec<CandidateSuggestion>> {
        Ok(self
            .suggestions
            .iter()
            .filter(|c| req.inventory.is_empty() || req.inventory.iter().any(|e| e.url == c.target_url))
            .take(req.max_suggestions)
            .cloned()
            .collect())
    }
}

/// Caches a model's answers keyed by model name and full request.
pub struct CachedModel<M> {
    inner: M,
    cache: Arc<dyn JsonCache>,
    ttl: Option<Duration>,
}

impl<M: SuggestionModel> CachedModel<M> {
    pub fn new(inner: M, cache: Arc<dyn JsonCache>, ttl: Option<Duration>) -> Self {
        Self { inner, cache, ttl }
    }

    fn key(&self, req: &SuggestionRequest) -> Result<String> {
        let body = serde_json::to_string(req).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(format!("suggest-v1\n{}\n{}", self.inner.name(), body))
    }
}

#[async_trait::async_trait]
impl<M: SuggestionModel> SuggestionModel for CachedModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn suggest(&self, req: &SuggestionRequest) -> Result<Vec<CandidateSuggestion>> {
        let key = self.key(req)?;
        match self.cache.get(&key, self.ttl) {
            Ok(Some(v)) => match serde_json::from_value::<Vec<CandidateSuggestion>>(v) {
                Ok(hit) => {
                    log::debug!("suggestion cache hit ({} records)", hit.len());
                    return Ok(hit);
                }
                Err(e) => log::warn!("ignoring unreadable cache entry: {e}"),
            },
            Ok(None) => {}
            // A broken cache must not take the model down with it.
            Err(e) => log::warn!("suggestion cache read failed: {e}"),
        }

        let out = self.inner.suggest(req).await?;
        match serde_json::to_value(&out) {
            Ok(v) => {
                if let Err(e) = self.cache.put(&key, &v) {
                    log::warn!("suggestion cache write failed: {e}");
                }
            }
            Err(e) => log::warn!("suggestion cache encode failed: {e}"),
        }
        Ok(out)
    }
}

/// Ask the model once per inventory batch, concurrently, and merge the answers in
/// batch order.
///
/// A failing batch is logged and skipped; the call fails only when every batch fails.
pub async fn fan_out_suggestions(
    model: &dyn SuggestionModel,
    reduced_content: &str,
    inventory: &[InventoryEntry],
    batch_size: usize,
    max_suggestions: usize,
) -> Result<Vec<CandidateSuggestion>> {
    let batches: Vec<&[InventoryEntry]> = if inventory.is_empty() {
        vec![inventory]
    } else {
        inventory.chunks(batch_size.max(1)).collect()
    };
    let requests: Vec<SuggestionRequest> = batches
        .iter()
        .map(|b| SuggestionRequest {
            reduced_content: reduced_content.to_string(),
            inventory: b.to_vec(),
            max_suggestions,
        })
        .collect();

    log::info!(
        "asking {} for suggestions over {} inventory batch(es)",
        model.name(),
        requests.len()
    );
    let results = join_all(requests.iter().map(|r| model.suggest(r))).await;

    let mut merged = Vec::new();
    let mut first_err: Option<Error> = None;
    let mut ok_batches = 0usize;
    for (i, r) in results.into_iter().enumerate() {
        match r {
            Ok(mut cs) => {
                ok_batches += 1;
                merged.append(&mut cs);
            }
            Err(e) => {
                log::warn!("suggestion batch {i} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) if ok_batches == 0 => Err(e),
        _ => Ok(merged),
    }
}
