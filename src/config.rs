//! # Application configuration
//!
//! Two layers of configuration, mirroring how they change:
//!
//! - [`PlotlineConfig`]: process-level settings loaded once from a YAML
//!   file (database path, context/summarization budgets, provider
//!   timeouts). Everything except `database_url` has a serde default, so a
//!   one-line config file works.
//! - Per-provider rows in the store (`provider_configs` table): model,
//!   credentials, endpoint, sampling knobs. These can change at runtime,
//!   so [`ProviderResolver`] reads them per request through a small TTL
//!   cache instead of holding them in ambient global state.
//!
//! ## Cache contract
//!
//! `ProviderResolver` serves a cached resolution for up to
//! `provider_cache_ttl_secs` after the last store read. Writing a provider
//! config through [`ProviderResolver::invalidate`] drops the entry
//! immediately. A request-supplied model override is applied to the
//! returned copy only and never enters the cache.

use crate::api::{Provider, ResolvedProviderConfig};
use crate::context::ContextBudget;
use crate::error::StoryError;
use crate::models::ProviderConfigRow;
use crate::store::StoryStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};
use tracing::debug;

fn default_summary_threshold() -> usize {
    150
}
fn default_max_message_history() -> usize {
    100
}
fn default_recent_with_summary() -> usize {
    15
}
fn default_max_context_tokens() -> usize {
    60_000
}
fn default_provider_cache_ttl() -> u64 {
    60
}

/// Process-level configuration, loaded from `config.yaml`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PlotlineConfig {
    /// Path of the SQLite database file.
    pub database_url: String,

    /// Message count at which summarization is first suggested.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,

    /// History cap when no summary exists.
    #[serde(default = "default_max_message_history")]
    pub max_message_history: usize,

    /// Recent-tail length once a summary exists.
    #[serde(default = "default_recent_with_summary")]
    pub recent_messages_with_summary: usize,

    /// Token ceiling for system prompt plus history.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// How long a provider-config resolution may be served from cache.
    #[serde(default = "default_provider_cache_ttl")]
    pub provider_cache_ttl_secs: u64,

    /// Request timeout override for the local provider, seconds.
    #[serde(default)]
    pub ollama_timeout_secs: Option<u64>,

    /// Request timeout override for the cloud provider, seconds.
    #[serde(default)]
    pub deepseek_timeout_secs: Option<u64>,
}

impl Default for PlotlineConfig {
    fn default() -> Self {
        Self {
            database_url: "plotline.db".to_string(),
            summary_threshold: default_summary_threshold(),
            max_message_history: default_max_message_history(),
            recent_messages_with_summary: default_recent_with_summary(),
            max_context_tokens: default_max_context_tokens(),
            provider_cache_ttl_secs: default_provider_cache_ttl(),
            ollama_timeout_secs: None,
            deepseek_timeout_secs: None,
        }
    }
}

impl PlotlineConfig {
    pub fn context_budget(&self) -> ContextBudget {
        ContextBudget {
            max_message_count: self.max_message_history,
            max_context_tokens: self.max_context_tokens,
            recent_with_summary: self.recent_messages_with_summary,
        }
    }

    /// Effective request timeout for a provider: configured override or the
    /// provider's built-in default. Always finite.
    pub fn timeout_for(&self, provider: Provider) -> Duration {
        let configured = match provider {
            Provider::Ollama => self.ollama_timeout_secs,
            Provider::DeepSeek => self.deepseek_timeout_secs,
        };
        configured
            .map(Duration::from_secs)
            .unwrap_or_else(|| provider.default_timeout())
    }
}

/// Load the application configuration from a YAML file.
pub fn load_config(file: &str) -> Result<PlotlineConfig, StoryError> {
    debug!("loading config from {file}");
    let content = fs::read_to_string(file)
        .map_err(|e| StoryError::Internal(format!("cannot read config {file}: {e}")))?;
    serde_yaml::from_str(&content)
        .map_err(|e| StoryError::Internal(format!("invalid config {file}: {e}")))
}

struct CachedEntry {
    fetched_at: Instant,
    config: ResolvedProviderConfig,
}

/// Resolves per-provider call parameters from the store, with defaults for
/// anything unset and a TTL cache in front of the store read.
pub struct ProviderResolver {
    ttl: Duration,
    timeouts: HashMap<Provider, Duration>,
    cache: HashMap<Provider, CachedEntry>,
}

impl ProviderResolver {
    pub fn new(config: &PlotlineConfig) -> Self {
        let mut timeouts = HashMap::new();
        for provider in [Provider::Ollama, Provider::DeepSeek] {
            timeouts.insert(provider, config.timeout_for(provider));
        }
        Self {
            ttl: Duration::from_secs(config.provider_cache_ttl_secs),
            timeouts,
            cache: HashMap::new(),
        }
    }

    /// Resolve the call parameters for `provider`. A request-supplied
    /// `model_override` replaces the stored default model on the returned
    /// copy only.
    pub fn resolve(
        &mut self,
        store: &mut StoryStore,
        provider: Provider,
        model_override: Option<&str>,
    ) -> Result<ResolvedProviderConfig, StoryError> {
        let cached = self
            .cache
            .get(&provider)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.config.clone());

        let mut resolved = match cached {
            Some(config) => config,
            None => {
                let row = store.get_provider_config(provider.as_str())?;
                let config = self.resolve_row(provider, row);
                self.cache.insert(
                    provider,
                    CachedEntry {
                        fetched_at: Instant::now(),
                        config: config.clone(),
                    },
                );
                config
            }
        };

        if let Some(model) = model_override {
            resolved.model = model.to_string();
        }

        Ok(resolved)
    }

    /// Drop a cached resolution, e.g. after writing the provider's stored
    /// config.
    pub fn invalidate(&mut self, provider: Provider) {
        self.cache.remove(&provider);
    }

    fn resolve_row(
        &self,
        provider: Provider,
        row: Option<ProviderConfigRow>,
    ) -> ResolvedProviderConfig {
        let timeout = self
            .timeouts
            .get(&provider)
            .copied()
            .unwrap_or_else(|| provider.default_timeout());

        let row = row.unwrap_or(ProviderConfigRow {
            id: None,
            provider: provider.as_str().to_string(),
            model: None,
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            created_at: String::new(),
            updated_at: String::new(),
        });

        ResolvedProviderConfig {
            provider,
            model: row
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| provider.default_model().to_string()),
            api_key: row.api_key.unwrap_or_default(),
            base_url: row
                .base_url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            max_tokens: row.max_tokens.map(|t| t.max(1) as u32).unwrap_or(2048),
            temperature: row.temperature.unwrap_or(0.7),
            timeout,
        }
    }
}
