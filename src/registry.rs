//! # Model registry
//!
//! Turns the configured list of completion backends into the single,
//! immutable [`ModelConfig`] used for one exchange.
//!
//! The model list is injected (usually straight from
//! [`HomieConfig::models`](crate::config::HomieConfig)) rather than looked up
//! from global state, so tests can hand in whatever fixed set they need.
//!
//! ```rust
//! use homie::registry::{ModelDefinition, ModelRegistry, Provider};
//!
//! let registry = ModelRegistry::new(
//!     vec![ModelDefinition {
//!         id: "gpt".into(),
//!         name: "GPT-4o mini".into(),
//!         provider: Provider::OpenAi,
//!         api_key: "sk-test".into(),
//!         api_endpoint: None,
//!         model: "gpt-4o-mini".into(),
//!         temperature: None,
//!         max_tokens: None,
//!     }],
//!     None,
//! );
//! let config = registry.resolve(None).unwrap();
//! assert_eq!(config.endpoint, "https://api.openai.com/v1");
//! assert_eq!(config.max_tokens, 2000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{HomieError, Result};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Known provider families. Everything except `Custom` has a default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "custom")]
    Custom,
}

impl Provider {
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("https://api.openai.com/v1"),
            Provider::Anthropic => Some("https://api.anthropic.com/v1"),
            Provider::DeepSeek => Some("https://api.deepseek.com/v1"),
            Provider::Custom => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::DeepSeek => "deepseek",
            Provider::Custom => "custom",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A backend as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Stable id used to select the model.
    pub id: String,
    /// Human readable name, stored in history records.
    pub name: String,
    pub provider: Provider,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    /// Model identifier sent to the backend (e.g. `gpt-4o-mini`).
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Fully resolved settings for one exchange. Never mutated after resolution.
#[derive(Clone, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub api_key: String,
    /// Base URL without a trailing slash, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

// Hand-written so the key never lands in logs.
impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ModelDefinition {
    /// Fill in provider defaults and produce the per-exchange value.
    pub fn resolve(&self) -> Result<ModelConfig> {
        let endpoint = match self.api_endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
            _ => self
                .provider
                .default_endpoint()
                .ok_or_else(|| HomieError::MissingEndpoint(self.provider.to_string()))?
                .to_string(),
        };

        Ok(ModelConfig {
            id: self.id.clone(),
            name: self.name.clone(),
            provider: self.provider,
            api_key: self.api_key.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: self.model.clone(),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }
}

/// The configured backends plus the user's current selection.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDefinition>,
    selected: Option<String>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDefinition>, selected: Option<String>) -> Self {
        Self { models, selected }
    }

    pub fn list(&self) -> &[ModelDefinition] {
        &self.models
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn find(&self, id: &str) -> Option<&ModelDefinition> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Pick the model for the next exchange.
    ///
    /// An explicit `requested` id must exist. Without one, the stored
    /// selection is used, falling back to the first configured model when the
    /// selection is missing or stale.
    pub fn resolve(&self, requested: Option<&str>) -> Result<ModelConfig> {
        if self.models.is_empty() {
            return Err(HomieError::NoModelsConfigured);
        }

        let definition = match requested {
            Some(id) => self
                .find(id)
                .ok_or_else(|| HomieError::UnknownModel(id.to_string()))?,
            None => self
                .selected
                .as_deref()
                .and_then(|id| self.find(id))
                .unwrap_or(&self.models[0]),
        };

        let config = definition.resolve()?;
        debug!("Resolved model: {:?}", config);
        Ok(config)
    }
}
