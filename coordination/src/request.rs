//! Normalized request and result types shared by every provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// One generation request. Immutable once handed to the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Names the structured payload the caller expects back, if any.
    #[serde(default)]
    pub schema_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            schema_id: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_schema(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    pub fn expects_structured(&self) -> bool {
        self.schema_id.is_some()
    }
}

/// One provider's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    pub provider: ProviderId,
    /// The model that actually produced `content` (the fallback when `retried`).
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    pub cost: f64,
    pub latency: Duration,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub retried: bool,
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,
}

impl GenerationResult {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cached_input_tokens
    }

    /// Re-stamps a stored result as served from the response cache.
    pub fn into_cache_hit(mut self, latency: Duration) -> Self {
        self.cache_hit = true;
        self.cost = 0.0;
        self.latency = latency;
        self
    }
}
