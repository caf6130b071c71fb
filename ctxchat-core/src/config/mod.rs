//! Session configuration: context budget, generation settings, model choice.
//!
//! All structs deserialize with full defaults so a `ctxchat.toml` only needs
//! to name the fields it overrides.

pub mod constants;

use std::path::Path;

use serde::{Deserialize, Serialize};

use constants::{defaults, models};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Budget parameters driving context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudgetConfig {
    /// Maximum context tokens the backend accepts per request.
    pub max_context_tokens: usize,
    /// Characters-per-token ratio for the local estimator.
    pub chars_per_token: usize,
    /// Pre-trim target for the degraded assembly path.
    pub approximate_token_ceiling: usize,
    /// Uncached lookups tolerated before the degraded path takes over.
    pub cache_miss_threshold: usize,
}

impl Default for ContextBudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: defaults::MAX_CONTEXT_TOKENS,
            chars_per_token: defaults::CHARS_PER_TOKEN,
            approximate_token_ceiling: defaults::APPROXIMATE_TOKEN_CEILING,
            cache_miss_threshold: defaults::CACHE_MISS_THRESHOLD,
        }
    }
}

/// One per-category safety threshold forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn new(category: impl Into<String>, threshold: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            threshold: threshold.into(),
        }
    }
}

/// Generation parameters sent alongside the assembled message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub safety_settings: Vec<SafetySetting>,
    /// Request incremental delivery of the reply.
    pub stream: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            top_k: None,
            max_output_tokens: None,
            stop_sequences: Vec::new(),
            safety_settings: default_safety_settings(),
            stream: true,
        }
    }
}

fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    ]
    .into_iter()
    .map(|category| SafetySetting::new(category, "BLOCK_NONE"))
    .collect()
}

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub budget: ContextBudgetConfig,
    pub generation: GenerationSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: models::DEFAULT_MODEL.to_string(),
            budget: ContextBudgetConfig::default(),
            generation: GenerationSettings::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}
