//! OpenAI-compatible chat/completions adapter (OpenAI, DeepSeek).
//! Bearer auth; one non-streaming request per document.

use futures_util::future::BoxFuture;
use serde::Deserialize;

use super::http::HttpClient;
use super::prompt::{estimate_max_tokens, system_prompt};
use super::{ProviderConfig, ProviderKind, TranslateError, TranslationProvider};

pub struct ChatCompletionsProvider {
    client: HttpClient,
    kind: ProviderKind,
    api_key: String,
    endpoint: String,
    model: String,
    target_language: String,
}

impl ChatCompletionsProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, TranslateError> {
        let api_key = config.require_api_key()?.to_string();
        Ok(Self {
            client: HttpClient::new(config.timeout, config.min_interval)?,
            kind: config.kind,
            api_key,
            endpoint: format!("{}/v1/chat/completions", config.base_url()),
            model: config.model().to_string(),
            target_language: config.target_language.clone(),
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(&self.target_language)},
                {"role": "user", "content": text}
            ],
            "max_tokens": estimate_max_tokens(text),
            "stream": false,
            "temperature": 0.1
        })
    }

    async fn complete(&self, text: &str) -> Result<String, TranslateError> {
        let body = self.request_body(text);
        let response: ChatResponse = self
            .client
            .send_json(|| {
                self.client
                    .inner()
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;
        extract_text(response)
    }
}

impl TranslationProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn translate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.complete(text))
    }
}

/// First choice's content. A reply cut off by `max_tokens` is an error, never
/// a translation.
fn extract_text(response: ChatResponse) -> Result<String, TranslateError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TranslateError::ApiError("response has no message content".into()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        return Err(TranslateError::ApiError(
            "translation truncated: output token limit reached".into(),
        ));
    }

    let content = choice
        .message
        .content
        .ok_or_else(|| TranslateError::ApiError("response has no message content".into()))?;

    if content.trim().is_empty() {
        return Err(TranslateError::ApiError("empty translation".into()));
    }
    Ok(content)
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
