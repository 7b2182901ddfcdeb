//! Ensemble configuration.
//!
//! Resolution order: TOML file values, then `ENSEMBLE_*` environment
//! variables, then built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consensus::Strategy;
use crate::error::EnsembleError;
use crate::provider::catalog::DETECTED_MODELS_FILE;
use crate::provider::{model_listers, Credentials, ModelCatalog, ProviderId, ProviderSpec};
use crate::rate_limit::DEFAULT_RATE_LIMIT;

pub const ENV_CACHE_DIR: &str = "ENSEMBLE_CACHE_DIR";
pub const ENV_RATE_LIMIT: &str = "ENSEMBLE_RATE_LIMIT";
pub const ENV_TIMEOUT_SECS: &str = "ENSEMBLE_TIMEOUT_SECS";
pub const ENV_MIN_QUORUM: &str = "ENSEMBLE_MIN_QUORUM";
pub const ENV_SYNTHESIZER: &str = "ENSEMBLE_SYNTHESIZER";
pub const ENV_DEBATE_ROUNDS: &str = "ENSEMBLE_DEBATE_ROUNDS";
/// Comma-separated provider names restricting the built-in roster.
pub const ENV_PROVIDERS: &str = "ENSEMBLE_PROVIDERS";
/// Comma-separated `provider=tier` pairs, e.g. `anthropic=sonnet,openai=mini`.
pub const ENV_MODEL_TIERS: &str = "ENSEMBLE_MODEL_TIERS";

pub const DEFAULT_CACHE_DIR: &str = "data/cache";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MIN_QUORUM: usize = 3;
pub const MAX_DEBATE_ROUNDS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Roster, in dispatch order.
    pub providers: Vec<ProviderSpec>,
    /// Global in-flight call budget.
    pub rate_limit: usize,
    /// Per-call timeout applied to every provider attempt.
    pub call_timeout_secs: u64,
    /// Votes needed before `parallel_vote` synthesizes.
    pub min_quorum: usize,
    /// Preferred synthesizer; the first roster client is used if absent.
    pub synthesizer: ProviderId,
    pub debate_rounds: u32,
    pub default_strategy: Strategy,
    pub cache_dir: PathBuf,
    /// Provider name to the tier whose model becomes its primary.
    pub model_tiers: BTreeMap<String, String>,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> T {
    match lookup(var) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var, value = %raw, "ignoring unparseable environment override");
            default
        }),
        None => default,
    }
}

fn parse_model_tiers(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((provider, tier)) if !provider.trim().is_empty() && !tier.trim().is_empty() => {
                Some((provider.trim().to_ascii_lowercase(), tier.trim().to_string()))
            }
            _ => {
                warn!(var = ENV_MODEL_TIERS, entry = pair, "expected provider=tier");
                None
            }
        })
        .collect()
}

/// Point `provider`'s roster entry at `tier`. Providers outside the roster
/// are ignored.
fn select_tier(providers: &mut [ProviderSpec], provider: &str, tier: &str) -> Result<(), EnsembleError> {
    let id: ProviderId = provider.parse().map_err(EnsembleError::Configuration)?;
    if let Some(slot) = providers.iter_mut().find(|spec| spec.provider == id) {
        *slot = slot.clone().with_model_tier(tier)?;
    }
    Ok(())
}

impl EnsembleConfig {
    /// Build from an arbitrary variable source. [`Default`] reads the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let providers = match lookup(ENV_PROVIDERS) {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .filter_map(|name| match name.parse::<ProviderId>() {
                    Ok(id) => Some(ProviderSpec::builtin(id)),
                    Err(e) => {
                        warn!(var = ENV_PROVIDERS, error = %e, "skipping roster entry");
                        None
                    }
                })
                .collect(),
            None => ProviderSpec::builtin_roster(),
        };

        let model_tiers = lookup(ENV_MODEL_TIERS)
            .map(|raw| parse_model_tiers(&raw))
            .unwrap_or_default();

        let mut config = Self {
            providers,
            rate_limit: parse_or(&lookup, ENV_RATE_LIMIT, DEFAULT_RATE_LIMIT),
            call_timeout_secs: parse_or(&lookup, ENV_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS),
            min_quorum: parse_or(&lookup, ENV_MIN_QUORUM, DEFAULT_MIN_QUORUM),
            synthesizer: parse_or(&lookup, ENV_SYNTHESIZER, ProviderId::Anthropic),
            debate_rounds: parse_or(&lookup, ENV_DEBATE_ROUNDS, MAX_DEBATE_ROUNDS),
            default_strategy: Strategy::ParallelVote,
            cache_dir: lookup(ENV_CACHE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            model_tiers,
        };
        config.select_tiers_leniently();
        config
    }

    fn select_tiers_leniently(&mut self) {
        for (provider, tier) in &self.model_tiers {
            if let Err(e) = select_tier(&mut self.providers, provider, tier) {
                warn!(var = ENV_MODEL_TIERS, error = %e, "ignoring model tier selection");
            }
        }
    }

    /// Apply [`Self::model_tiers`] to the roster. Unknown providers or tiers
    /// are configuration errors.
    pub fn apply_model_tiers(&mut self) -> Result<(), EnsembleError> {
        for (provider, tier) in &self.model_tiers {
            select_tier(&mut self.providers, provider, tier)?;
        }
        Ok(())
    }

    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, EnsembleError> {
        let mut config: Self = toml::from_str(raw)
            .map_err(|e| EnsembleError::Configuration(format!("invalid ensemble config: {e}")))?;
        config.validate()?;
        config.apply_model_tiers()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EnsembleError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EnsembleError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), EnsembleError> {
        if self.call_timeout_secs == 0 {
            return Err(EnsembleError::Configuration(
                "call_timeout_secs must be positive".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.providers {
            if !seen.insert(spec.provider) {
                return Err(EnsembleError::Configuration(format!(
                    "provider {} listed more than once",
                    spec.provider
                )));
            }
        }
        for (provider, tier) in &self.model_tiers {
            let id: ProviderId = provider.parse().map_err(EnsembleError::Configuration)?;
            if let Some(spec) = self.providers.iter().find(|spec| spec.provider == id) {
                spec.resolve_tier(tier)?;
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// Debate rounds clamped to `1..=3`.
    pub fn debate_rounds(&self) -> u32 {
        self.debate_rounds.clamp(1, MAX_DEBATE_ROUNDS)
    }

    pub fn min_quorum(&self) -> usize {
        self.min_quorum.max(1)
    }

    pub fn with_providers(mut self, providers: Vec<ProviderSpec>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Where the detected model catalog is persisted.
    pub fn catalog_path(&self) -> PathBuf {
        self.cache_dir.join(DETECTED_MODELS_FILE)
    }

    /// Overlay detected tiers onto the roster, then re-apply the tier
    /// selection so a selected tier follows its detected model.
    pub fn with_catalog(mut self, catalog: &ModelCatalog) -> Self {
        self.providers = self
            .providers
            .into_iter()
            .map(|spec| catalog.apply(spec))
            .collect();
        self.select_tiers_leniently();
        self
    }

    /// Detect current models for every credentialed provider, reusing the
    /// persisted catalog while it is fresh.
    pub async fn detect_models(self, credentials: &Credentials, force: bool) -> Self {
        let listers = model_listers(&self.providers, credentials);
        let catalog =
            ModelCatalog::load_or_detect(&self.catalog_path(), &self.providers, &listers, force).await;
        self.with_catalog(&catalog)
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }
}
