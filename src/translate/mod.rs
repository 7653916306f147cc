//! Translation module: provider adapters, content-addressed cache, batch runner.
//!
//! The cache and batch runner only see [`TranslationProvider`]; concrete
//! adapters are picked by [`build_provider`] from configuration.

pub mod anthropic;
pub mod batch;
pub mod cache;
mod http;
pub mod openai;
mod prompt;
pub mod sqlite_store;
pub mod store;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::document::Document;
use crate::events::EventSender;

pub use batch::{BatchReport, BatchTranslator, CacheWrite, JobOutcome, JobReport, JobState};
pub use cache::{fingerprint, Fingerprint, TranslationCache};
pub use store::{CacheEntry, CacheError, CacheStats, CacheStore, MemoryStore};
pub use sqlite_store::SqliteStore;

/// Concurrency used when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("translation timeout")]
    Timeout,

    #[error("translation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no API key for {provider}: set {env_var} or translation.api_key")]
    MissingApiKey { provider: String, env_var: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// A translation capability (one adapter per API).
pub trait TranslationProvider: Send + Sync {
    /// Short provider name for logs, e.g. `openai`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Translate a whole markdown document.
    fn translate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, TranslateError>>;
}

/// Supported translation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    DeepSeek,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn env_key(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::DeepSeek => "https://api.deepseek.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(TranslateError::Config(format!("unknown provider: {other}"))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an adapter needs to talk to its API.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub target_language: String,
    pub timeout: Duration,
    /// Minimum spacing between requests.
    pub min_interval: Duration,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, target_language: impl Into<String>) -> Self {
        Self {
            kind,
            model: None,
            api_key: None,
            base_url: None,
            target_language: target_language.into(),
            timeout: Duration::from_secs(60),
            min_interval: Duration::from_millis(100),
        }
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.kind.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
    }

    /// The credential, or the configuration error reported before any request.
    pub fn require_api_key(&self) -> Result<&str, TranslateError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(TranslateError::MissingApiKey {
                provider: self.kind.to_string(),
                env_var: self.kind.env_key().to_string(),
            }),
        }
    }
}

/// Select and construct the adapter for `config.kind`.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn TranslationProvider>, TranslateError> {
    let provider: Arc<dyn TranslationProvider> = match config.kind {
        ProviderKind::OpenAi | ProviderKind::DeepSeek => {
            Arc::new(openai::ChatCompletionsProvider::new(config)?)
        }
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicProvider::new(config)?),
    };
    info!(provider = provider.name(), model = provider.model(), "translation provider ready");
    Ok(provider)
}

/// Result of translating one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateResult {
    pub document_id: String,
    pub translated_text: String,
    pub cached: bool,
    pub elapsed_ms: f64,
}

/// Single-document and batch translation over one cache and one provider.
pub struct TranslationService {
    provider: Arc<dyn TranslationProvider>,
    cache: Arc<TranslationCache>,
    concurrency: NonZeroUsize,
}

impl TranslationService {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        cache: Arc<TranslationCache>,
        concurrency: NonZeroUsize,
    ) -> Self {
        Self {
            provider,
            cache,
            concurrency,
        }
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    /// Translate one document, serving it from the cache when unchanged.
    /// Provider errors go straight back to the caller.
    pub async fn translate(&self, document: &Document) -> Result<TranslateResult, TranslateError> {
        let start = Instant::now();
        let digest = fingerprint(&document.text);

        if let Some(translated_text) = self.cache.lookup_async(&document.id, &digest).await {
            return Ok(TranslateResult {
                document_id: document.id.clone(),
                translated_text,
                cached: true,
                elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            });
        }

        let translated_text = self.provider.translate(&document.text).await?;

        if let Err(e) = self
            .cache
            .store_async(&document.id, &digest, &document.text, &translated_text)
            .await
        {
            warn!(document_id = %document.id, error = %e, "failed to persist translation");
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(document_id = %document.id, elapsed_ms, "document translated");

        Ok(TranslateResult {
            document_id: document.id.clone(),
            translated_text,
            cached: false,
            elapsed_ms,
        })
    }

    /// Translate a selection of documents. Fails upfront only for an empty
    /// selection; per-document failures are recorded in the report.
    pub async fn translate_batch(
        &self,
        documents: Vec<Document>,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, TranslateError> {
        if documents.is_empty() {
            return Err(TranslateError::InvalidInput("no documents selected".into()));
        }

        let translator = BatchTranslator::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.provider),
            self.concurrency,
        );
        Ok(translator.run(documents, events, cancel).await)
    }
}
