//! Declarative provider descriptions: identity, models, pricing, budgets.
//!
//! A [`ProviderSpec`] is everything the ensemble needs to know about a
//! backend before it talks to it. The built-in roster mirrors the five
//! providers the pipeline was tuned against.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EnsembleError;

/// Fraction of the input price waived for tokens served from a provider's
/// prompt cache.
pub const CACHED_INPUT_DISCOUNT: f64 = 0.9;

/// Default number of in-flight calls allowed against a single provider.
pub const DEFAULT_PROVIDER_BUDGET: usize = 4;

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Identity of a remote text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anthropic,
    OpenAi,
    Google,
    Xai,
    DeepSeek,
}

impl ProviderId {
    /// Every supported provider, in default roster order.
    pub const ALL: [ProviderId; 5] = [
        Self::Anthropic,
        Self::OpenAi,
        Self::Google,
        Self::Xai,
        Self::DeepSeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Xai => "xai",
            Self::DeepSeek => "deepseek",
        }
    }

    /// Environment variable that conventionally holds this provider's key.
    pub fn credential_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::Xai => "XAI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com",
            Self::Xai => "https://api.x.ai/v1",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }

    /// Request/response dialect spoken by this provider.
    pub fn wire_format(&self) -> WireFormat {
        match self {
            Self::Anthropic => WireFormat::AnthropicMessages,
            Self::Google => WireFormat::GeminiGenerate,
            Self::OpenAi | Self::Xai | Self::DeepSeek => WireFormat::OpenAiChat,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "google" | "gemini" => Ok(Self::Google),
            "xai" | "grok" => Ok(Self::Xai),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Wire dialects. xAI and DeepSeek both speak OpenAI chat completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    AnthropicMessages,
    OpenAiChat,
    GeminiGenerate,
}

/// Price of one model in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub input: f64,
    pub output: f64,
}

impl PricingTier {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }
}

/// Per-model price list with a provider-wide default row.
///
/// Lookups match the longest model-id prefix, so dated snapshots such as
/// `gpt-4o-2024-08-06` resolve to the `gpt-4o` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub default: PricingTier,
    #[serde(default)]
    pub models: BTreeMap<String, PricingTier>,
}

impl PricingTable {
    pub fn new(default: PricingTier) -> Self {
        Self {
            default,
            models: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, model_id: &str, tier: PricingTier) -> Self {
        self.models.insert(model_id.to_string(), tier);
        self
    }

    pub fn tier_for(&self, model_id: &str) -> PricingTier {
        self.models
            .iter()
            .filter(|(prefix, _)| model_id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, tier)| *tier)
            .unwrap_or(self.default)
    }

    /// Cost of one call. `input_tokens` excludes cache-served tokens, which
    /// are billed separately at the discounted rate.
    pub fn cost(
        &self,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cached_input_tokens: u64,
    ) -> f64 {
        let tier = self.tier_for(model_id);
        let cached_rate = tier.input * (1.0 - CACHED_INPUT_DISCOUNT);
        (input_tokens as f64 * tier.input
            + cached_input_tokens as f64 * cached_rate
            + output_tokens as f64 * tier.output)
            / TOKENS_PER_PRICE_UNIT
    }

    /// What the cache-served tokens would have cost at the full input price
    /// minus what they actually cost.
    pub fn cached_savings(&self, model_id: &str, cached_input_tokens: u64) -> f64 {
        let tier = self.tier_for(model_id);
        cached_input_tokens as f64 * tier.input * CACHED_INPUT_DISCOUNT / TOKENS_PER_PRICE_UNIT
    }
}

/// Static description of one roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: ProviderId,
    pub default_model_id: String,
    #[serde(default)]
    pub fallback_model_id: Option<String>,
    pub pricing: PricingTable,
    #[serde(default = "default_budget")]
    pub concurrency_budget: usize,
    /// Name of the environment variable holding the API key.
    pub credential_env: String,
    /// Overrides [`ProviderId::default_base_url`].
    #[serde(default)]
    pub base_url: Option<String>,
    /// Tier name (`opus`, `flagship`, `chat`, ...) to model id. Names are
    /// stored lowercase.
    #[serde(default)]
    pub tiers: BTreeMap<String, String>,
}

fn default_budget() -> usize {
    DEFAULT_PROVIDER_BUDGET
}

impl ProviderSpec {
    pub fn new(provider: ProviderId, default_model_id: &str, pricing: PricingTable) -> Self {
        Self {
            provider,
            default_model_id: default_model_id.to_string(),
            fallback_model_id: None,
            pricing,
            concurrency_budget: DEFAULT_PROVIDER_BUDGET,
            credential_env: provider.credential_env().to_string(),
            base_url: None,
            tiers: BTreeMap::new(),
        }
    }

    pub fn with_fallback(mut self, model_id: &str) -> Self {
        self.fallback_model_id = Some(model_id.to_string());
        self
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.concurrency_budget = budget.max(1);
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_tier(mut self, tier: &str, model_id: &str) -> Self {
        self.tiers
            .insert(tier.trim().to_ascii_lowercase(), model_id.to_string());
        self
    }

    /// Model id registered for `tier`, matched case-insensitively.
    pub fn resolve_tier(&self, tier: &str) -> Result<&str, EnsembleError> {
        self.tiers
            .get(&tier.trim().to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| {
                EnsembleError::Configuration(format!(
                    "tier '{}' not found for provider {}; available tiers: {}",
                    tier,
                    self.provider,
                    self.tiers.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Make `tier`'s model the primary. The fallback is dropped when it would
    /// point at the new primary.
    pub fn with_model_tier(mut self, tier: &str) -> Result<Self, EnsembleError> {
        let model_id = self.resolve_tier(tier)?.to_string();
        if self.fallback_model_id.as_deref() == Some(model_id.as_str()) {
            self.fallback_model_id = None;
        }
        self.default_model_id = model_id;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Built-in model ids, fallbacks and price lists.
    pub fn builtin(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Anthropic => Self::new(
                provider,
                "claude-opus-4-20250514",
                PricingTable::new(PricingTier::new(3.0, 15.0))
                    .with_model("claude-opus-4", PricingTier::new(15.0, 75.0))
                    .with_model("claude-sonnet-4", PricingTier::new(3.0, 15.0))
                    .with_model("claude-3-5-haiku", PricingTier::new(0.8, 4.0)),
            )
            .with_fallback("claude-sonnet-4-20250514")
            .with_tier("opus", "claude-opus-4-20250514")
            .with_tier("sonnet", "claude-sonnet-4-20250514")
            .with_tier("haiku", "claude-3-5-haiku-20241022"),
            ProviderId::OpenAi => Self::new(
                provider,
                "gpt-4o",
                PricingTable::new(PricingTier::new(2.5, 10.0))
                    .with_model("gpt-4o", PricingTier::new(2.5, 10.0))
                    .with_model("gpt-4o-mini", PricingTier::new(0.15, 0.6))
                    .with_model("o1", PricingTier::new(15.0, 60.0)),
            )
            .with_fallback("gpt-4o-mini")
            .with_tier("flagship", "gpt-4o")
            .with_tier("pro", "gpt-4o")
            .with_tier("mini", "gpt-4o-mini"),
            ProviderId::Google => Self::new(
                provider,
                "gemini-1.5-pro",
                PricingTable::new(PricingTier::new(0.075, 0.3))
                    .with_model("gemini-2.0-flash", PricingTier::new(0.075, 0.3))
                    .with_model("gemini-1.5-pro", PricingTier::new(1.25, 5.0)),
            )
            .with_fallback("gemini-2.0-flash")
            .with_tier("pro", "gemini-1.5-pro")
            .with_tier("flash", "gemini-2.0-flash"),
            ProviderId::Xai => Self::new(
                provider,
                "grok-3",
                PricingTable::new(PricingTier::new(3.0, 15.0))
                    .with_model("grok-3", PricingTier::new(3.0, 15.0))
                    .with_model("grok-3-fast", PricingTier::new(5.0, 25.0)),
            )
            .with_fallback("grok-3-fast")
            .with_tier("flagship", "grok-3")
            .with_tier("standard", "grok-3")
            .with_tier("fast", "grok-3-fast"),
            ProviderId::DeepSeek => Self::new(
                provider,
                "deepseek-chat",
                PricingTable::new(PricingTier::new(0.27, 1.10))
                    .with_model("deepseek-chat", PricingTier::new(0.27, 1.10))
                    .with_model("deepseek-reasoner", PricingTier::new(0.55, 2.19)),
            )
            .with_tier("chat", "deepseek-chat")
            .with_tier("reasoner", "deepseek-reasoner"),
        }
    }

    /// The full built-in roster in [`ProviderId::ALL`] order.
    pub fn builtin_roster() -> Vec<Self> {
        ProviderId::ALL.iter().map(|p| Self::builtin(*p)).collect()
    }
}
