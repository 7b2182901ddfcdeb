//! Running token, cost and latency totals per provider.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;
use crate::request::GenerationResult;

/// Totals for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTotals {
    pub calls: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub retried: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Provider prompt-cache reads.
    pub cached_input_tokens: u64,
    pub cost: f64,
    pub max_latency: Duration,
    /// Tokens not re-billed thanks to the response cache.
    pub tokens_saved: u64,
    /// Dollars not spent thanks to either cache.
    pub cost_saved: f64,
}

/// Serializable point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub providers: BTreeMap<ProviderId, ProviderTotals>,
}

impl LedgerSnapshot {
    pub fn total_cost(&self) -> f64 {
        self.providers.values().map(|t| t.cost).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.providers
            .values()
            .map(|t| t.input_tokens + t.output_tokens + t.cached_input_tokens)
            .sum()
    }

    pub fn total_calls(&self) -> u64 {
        self.providers.values().map(|t| t.calls).sum()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let calls = self.total_calls();
        if calls == 0 {
            return 0.0;
        }
        let hits: u64 = self.providers.values().map(|t| t.cache_hits).sum();
        hits as f64 / calls as f64
    }
}

/// Shared accumulator. Not interpreted by the ensemble itself.
#[derive(Debug, Default)]
pub struct CostLedger {
    totals: Mutex<BTreeMap<ProviderId, ProviderTotals>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_totals<R>(&self, provider: ProviderId, f: impl FnOnce(&mut ProviderTotals) -> R) -> R {
        let mut totals = self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(totals.entry(provider).or_default())
    }

    /// Record a fresh (network) result. `prompt_cache_savings` is what the
    /// provider's own prompt cache saved on this call.
    pub fn record_call(&self, result: &GenerationResult, prompt_cache_savings: f64) {
        self.with_totals(result.provider, |t| {
            t.calls += 1;
            if result.retried {
                t.retried += 1;
            }
            t.input_tokens += result.input_tokens;
            t.output_tokens += result.output_tokens;
            t.cached_input_tokens += result.cached_input_tokens;
            t.cost += result.cost;
            t.max_latency = t.max_latency.max(result.latency);
            t.cost_saved += prompt_cache_savings;
        });
    }

    /// Record a response-cache hit. `avoided_cost` is what the original
    /// call cost when it was stored.
    pub fn record_cache_hit(&self, result: &GenerationResult, avoided_cost: f64) {
        self.with_totals(result.provider, |t| {
            t.calls += 1;
            t.cache_hits += 1;
            t.tokens_saved += result.total_tokens();
            t.cost_saved += avoided_cost;
        });
    }

    pub fn record_failure(&self, provider: ProviderId) {
        self.with_totals(provider, |t| {
            t.calls += 1;
            t.failures += 1;
        });
    }

    pub fn totals(&self, provider: ProviderId) -> ProviderTotals {
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&provider)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let totals = self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        LedgerSnapshot {
            taken_at: Utc::now(),
            providers: totals.clone(),
        }
    }

    pub fn reset(&self) {
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
