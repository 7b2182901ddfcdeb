//! Model catalog: which concrete model id each provider tier maps to.
//!
//! Detection asks each provider for its model list and picks, per tier, the
//! first preferred id it offers. Tiers a provider cannot confirm keep the
//! id from its [`ProviderSpec`]. The result is written to
//! `detected_models.json` and reused until it is a day old.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::spec::{ProviderId, ProviderSpec};
use crate::cache::CacheError;
use crate::error::{EnsembleError, ModelError};

/// File name of the persisted catalog inside the cache directory.
pub const DETECTED_MODELS_FILE: &str = "detected_models.json";

/// How long a persisted catalog is trusted.
pub const CATALOG_MAX_AGE_HOURS: i64 = 24;

/// Lists the model ids a provider currently serves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelLister: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, ModelError>;
}

pub type TierPreferences = &'static [(&'static str, &'static [&'static str])];

const ANTHROPIC_TIERS: TierPreferences = &[
    ("opus", &["claude-opus-4-20250514"]),
    ("sonnet", &["claude-sonnet-4-5-20250929", "claude-sonnet-4-20250514"]),
    ("haiku", &["claude-3-5-haiku-20241022"]),
];

const OPENAI_TIERS: TierPreferences = &[
    ("flagship", &["gpt-5.2", "gpt-5", "gpt-4o", "gpt-4-turbo"]),
    ("pro", &["gpt-4o", "gpt-4-turbo", "gpt-4"]),
    ("mini", &["gpt-4o-mini", "gpt-3.5-turbo"]),
    ("codex", &["gpt-4o", "gpt-4-turbo"]),
];

const GOOGLE_TIERS: TierPreferences = &[
    ("pro", &["gemini-2.5-pro", "gemini-2.0-pro", "gemini-1.5-pro"]),
    ("flash", &["gemini-2.0-flash", "gemini-1.5-flash"]),
];

const XAI_TIERS: TierPreferences = &[
    ("flagship", &["grok-4-1-fast-reasoning", "grok-4-fast-reasoning", "grok-3"]),
    ("standard", &["grok-3", "grok-2"]),
    ("fast", &["grok-3-fast"]),
    ("mini", &["grok-2-mini"]),
];

const DEEPSEEK_TIERS: TierPreferences = &[
    ("chat", &["deepseek-chat", "deepseek-v3"]),
    ("reasoner", &["deepseek-reasoner", "deepseek-chat"]),
];

/// Preferred model ids per tier, best first.
pub fn tier_preferences(provider: ProviderId) -> TierPreferences {
    match provider {
        ProviderId::Anthropic => ANTHROPIC_TIERS,
        ProviderId::OpenAi => OPENAI_TIERS,
        ProviderId::Google => GOOGLE_TIERS,
        ProviderId::Xai => XAI_TIERS,
        ProviderId::DeepSeek => DEEPSEEK_TIERS,
    }
}

/// Provider → tier → model id, stamped with when it was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub cached_at: DateTime<Utc>,
    pub models: BTreeMap<String, BTreeMap<String, String>>,
}

impl ModelCatalog {
    /// The tiers declared by `specs`, without asking any provider.
    pub fn from_specs(specs: &[ProviderSpec]) -> Self {
        Self {
            cached_at: Utc::now(),
            models: specs
                .iter()
                .map(|spec| (spec.provider.as_str().to_string(), spec.tiers.clone()))
                .collect(),
        }
    }

    /// Query every provider that has a lister. A listing failure leaves that
    /// provider's declared tiers untouched.
    pub async fn detect(
        specs: &[ProviderSpec],
        listers: &HashMap<ProviderId, Arc<dyn ModelLister>>,
    ) -> Self {
        let detected = join_all(specs.iter().map(|spec| async move {
            let mut tiers = spec.tiers.clone();
            let Some(lister) = listers.get(&spec.provider) else {
                return (spec.provider, tiers);
            };
            match lister.list_models().await {
                Ok(available) => {
                    let available: HashSet<&str> = available.iter().map(String::as_str).collect();
                    for (tier, preferred) in tier_preferences(spec.provider) {
                        if let Some(model) = preferred.iter().find(|m| available.contains(**m)) {
                            tiers.insert((*tier).to_string(), (*model).to_string());
                        }
                    }
                    debug!(provider = %spec.provider, tiers = tiers.len(), "models detected");
                }
                Err(e) => {
                    warn!(provider = %spec.provider, error = %e, "model listing failed, keeping declared tiers");
                }
            }
            (spec.provider, tiers)
        }))
        .await;

        Self {
            cached_at: Utc::now(),
            models: detected
                .into_iter()
                .map(|(provider, tiers)| (provider.as_str().to_string(), tiers))
                .collect(),
        }
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        Utc::now() - self.cached_at < max_age
    }

    /// Read a persisted catalog. Missing, unreadable and stale files all
    /// read as `None`.
    pub async fn load(path: &Path, max_age: Duration) -> Option<Self> {
        let raw = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice::<Self>(&raw) {
            Ok(catalog) if catalog.is_fresh(max_age) => Some(catalog),
            Ok(catalog) => {
                debug!(path = %path.display(), cached_at = %catalog.cached_at, "model catalog expired");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable model catalog, ignoring");
                None
            }
        }
    }

    /// Write to `path` through a temporary sibling and a rename.
    pub async fn save(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CacheError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    /// Reuse the catalog at `path` while it is fresh, otherwise detect and
    /// persist a new one. `force` skips the persisted copy.
    pub async fn load_or_detect(
        path: &Path,
        specs: &[ProviderSpec],
        listers: &HashMap<ProviderId, Arc<dyn ModelLister>>,
        force: bool,
    ) -> Self {
        let max_age = Duration::hours(CATALOG_MAX_AGE_HOURS);
        if !force {
            if let Some(catalog) = Self::load(path, max_age).await {
                debug!(path = %path.display(), "using persisted model catalog");
                return catalog;
            }
        }

        let catalog = Self::detect(specs, listers).await;
        match catalog.save(path).await {
            Ok(()) => info!(path = %path.display(), providers = catalog.models.len(), "model catalog refreshed"),
            Err(e) => warn!(error = %e, "failed to persist model catalog"),
        }
        catalog
    }

    /// Model id for `tier`, matched case-insensitively.
    pub fn resolve(&self, provider: ProviderId, tier: &str) -> Result<&str, EnsembleError> {
        let tiers = self.models.get(provider.as_str()).ok_or_else(|| {
            EnsembleError::Configuration(format!(
                "provider {} not in model catalog; available: {}",
                provider,
                self.models.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;
        tiers
            .get(&tier.trim().to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| {
                EnsembleError::Configuration(format!(
                    "tier '{}' not found for provider {}; available tiers: {}",
                    tier,
                    provider,
                    tiers.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Overlay this catalog's tiers onto `spec`.
    pub fn apply(&self, mut spec: ProviderSpec) -> ProviderSpec {
        if let Some(tiers) = self.models.get(spec.provider.as_str()) {
            for (tier, model) in tiers {
                spec = spec.with_tier(tier, model);
            }
        }
        spec
    }
}
