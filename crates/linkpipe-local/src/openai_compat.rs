use linkpipe_core::{Error, Result};
use serde::Serialize;
use std::time::Duration;

const ENV_BASE_URL: &str = "LINKPIPE_OPENAI_COMPAT_BASE_URL";
const ENV_API_KEY: &str = "LINKPIPE_OPENAI_COMPAT_API_KEY";
const ENV_MODEL: &str = "LINKPIPE_OPENAI_COMPAT_MODEL";

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Per-call generation knobs.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub timeout: Duration,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_tokens: Some(4_096),
            temperature: Some(0.2),
        }
    }
}

/// Minimal `chat.completions` client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url =
            env(ENV_BASE_URL).ok_or_else(|| Error::NotConfigured(format!("missing {ENV_BASE_URL}")))?;
        let model = model_override
            .or_else(|| env(ENV_MODEL))
            .ok_or_else(|| {
                Error::NotConfigured(format!("missing model (pass --model or set {ENV_MODEL})"))
            })?;
        Ok(Self::new(client, base_url, env(ENV_API_KEY), model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One system + user exchange; returns the first choice's text.
    pub async fn chat(&self, system: &str, user: &str, opts: &ChatOptions) -> Result<String> {
        let req = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut rb = self
            .client
            .post(url)
            .timeout(opts.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("chat.completions HTTP {status}")));
        }

        let parsed: serde_json::Value = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Llm("chat.completions returned no content".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}
