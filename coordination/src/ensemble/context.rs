//! Shared state for every dispatch in a process.
//!
//! Holds the rate limiter, response cache, cost ledger and provider specs.
//! Built once and handed down explicitly; nothing here is global.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::cache::ResponseCache;
use crate::config::EnsembleConfig;
use crate::error::EnsembleError;
use crate::ledger::CostLedger;
use crate::provider::{ProviderId, ProviderSpec};
use crate::rate_limit::RateLimiter;

/// Shared reference to an [`EnsembleContext`].
pub type SharedEnsembleContext = Arc<EnsembleContext>;

#[derive(Debug)]
pub struct EnsembleContext {
    pub limiter: RateLimiter,
    pub cache: ResponseCache,
    pub ledger: CostLedger,
    pub config: EnsembleConfig,
    specs: HashMap<ProviderId, ProviderSpec>,
}

impl EnsembleContext {
    /// Open the cache under `config.cache_dir` and size the limiter from
    /// the config's rate limit and per-provider budgets.
    pub async fn open(config: EnsembleConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        let cache = ResponseCache::open(&config.cache_dir).await?;
        Ok(Self::with_cache(config, cache))
    }

    pub fn with_cache(config: EnsembleConfig, cache: ResponseCache) -> Self {
        let limiter = RateLimiter::with_provider_budgets(
            config.rate_limit,
            config
                .providers
                .iter()
                .map(|spec| (spec.provider, spec.concurrency_budget)),
        );
        let specs = config
            .providers
            .iter()
            .map(|spec| (spec.provider, spec.clone()))
            .collect();

        info!(
            providers = config.providers.len(),
            rate_limit = limiter.capacity(),
            cache = %cache.root().display(),
            "ensemble context ready"
        );

        Self {
            limiter,
            cache,
            ledger: CostLedger::new(),
            config,
            specs,
        }
    }

    pub fn shared(self) -> SharedEnsembleContext {
        Arc::new(self)
    }

    pub fn spec(&self, provider: ProviderId) -> Option<&ProviderSpec> {
        self.specs.get(&provider)
    }
}
