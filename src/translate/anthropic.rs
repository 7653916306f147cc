//! Anthropic Messages API adapter. Auth via `x-api-key`.

use futures_util::future::BoxFuture;
use serde::Deserialize;

use super::http::HttpClient;
use super::prompt::{estimate_max_tokens, system_prompt};
use super::{ProviderConfig, TranslateError, TranslationProvider};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: HttpClient,
    api_key: String,
    endpoint: String,
    model: String,
    target_language: String,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, TranslateError> {
        let api_key = config.require_api_key()?.to_string();
        Ok(Self {
            client: HttpClient::new(config.timeout, config.min_interval)?,
            api_key,
            endpoint: format!("{}/v1/messages", config.base_url()),
            model: config.model().to_string(),
            target_language: config.target_language.clone(),
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "system": system_prompt(&self.target_language),
            "messages": [
                {"role": "user", "content": text}
            ],
            "max_tokens": estimate_max_tokens(text),
            "temperature": 0.1
        })
    }

    async fn complete(&self, text: &str) -> Result<String, TranslateError> {
        let body = self.request_body(text);
        let response: MessagesResponse = self
            .client
            .send_json(|| {
                self.client
                    .inner()
                    .post(&self.endpoint)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", API_VERSION)
                    .json(&body)
            })
            .await?;
        extract_text(response)
    }
}

impl TranslationProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn translate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.complete(text))
    }
}

/// Concatenate the text blocks of the reply. A reply stopped by
/// `max_tokens` is an error, never a translation.
fn extract_text(response: MessagesResponse) -> Result<String, TranslateError> {
    if response.stop_reason.as_deref() == Some("max_tokens") {
        return Err(TranslateError::ApiError(
            "translation truncated: output token limit reached".into(),
        ));
    }

    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if text.trim().is_empty() {
        return Err(TranslateError::ApiError("response has no text content".into()));
    }
    Ok(text)
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}
