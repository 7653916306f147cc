//! Settings for the translation core.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, else `~/.config/markview/config.toml`)
//! 3. Environment (`MARKVIEW_*` and the provider's API key variable)
//!
//! Command-line flags are applied on top by the binary.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::translate::{ProviderConfig, ProviderKind, DEFAULT_CONCURRENCY};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub translation: TranslationSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub provider: ProviderKind,
    /// Provider default when unset.
    pub model: Option<String>,
    pub target_language: String,
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Prefer the provider's environment variable over storing a key here.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            target_language: "Korean".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: 60,
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Defaults to `<data dir>/markview/translations.db`.
    pub path: Option<PathBuf>,
    /// Size of the in-memory layer; 0 disables it.
    pub hot_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            hot_entries: 128,
        }
    }
}

impl Settings {
    /// Load defaults, then the config file, then the environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::user_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Settings::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&content).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        debug!(path = %path.display(), "config file loaded");
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("markview").join("config.toml"))
    }

    pub fn default_cache_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("markview")
            .join("translations.db")
    }

    /// Override from environment variables. `lookup` is injectable for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("MARKVIEW_PROVIDER") {
            self.translation.provider = provider
                .parse()
                .map_err(|e: crate::translate::TranslateError| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(model) = lookup("MARKVIEW_MODEL") {
            self.translation.model = Some(model);
        }
        if let Some(lang) = lookup("MARKVIEW_TARGET_LANG") {
            self.translation.target_language = lang;
        }
        if let Some(n) = lookup("MARKVIEW_CONCURRENCY") {
            self.translation.concurrency = n.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("MARKVIEW_CONCURRENCY is not a number: {n}"))
            })?;
        }
        if let Some(path) = lookup("MARKVIEW_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(path));
        }
        // Key for the provider finally selected, so MARKVIEW_PROVIDER is honoured.
        if let Some(key) = lookup(self.translation.provider.env_key()) {
            self.translation.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.translation.concurrency == 0 {
            return Err(ConfigError::Invalid("translation.concurrency must be at least 1".into()));
        }
        if self.translation.timeout_secs == 0 {
            return Err(ConfigError::Invalid("translation.timeout_secs must be at least 1".into()));
        }
        if self.translation.target_language.trim().is_empty() {
            return Err(ConfigError::Invalid("translation.target_language is empty".into()));
        }
        Ok(())
    }

    pub fn concurrency(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.translation.concurrency)
            .ok_or_else(|| ConfigError::Invalid("translation.concurrency must be at least 1".into()))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache.path.clone().unwrap_or_else(Self::default_cache_path)
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let t = &self.translation;
        let mut config = ProviderConfig::new(t.provider, t.target_language.clone());
        config.model = t.model.clone();
        config.api_key = t.api_key.clone();
        config.base_url = t.base_url.clone();
        config.timeout = Duration::from_secs(t.timeout_secs);
        config
    }
}
