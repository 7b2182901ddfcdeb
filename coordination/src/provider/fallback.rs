//! Primary → fallback model retry.
//!
//! ```text
//! complete(primary)
//!   ├─ Ok                           → Served { retried: false }
//!   ├─ Err(eligible) + fallback set → complete(fallback)
//!   │                                   ├─ Ok  → Served { retried: true }
//!   │                                   └─ Err → surfaced
//!   └─ Err(other) or no fallback    → surfaced
//! ```
//!
//! Exactly one retry, driven by [`ProviderSpec`] rather than per-provider
//! conditionals. Eligibility comes from [`ModelError::is_fallback_eligible`].

use std::future::Future;

use tracing::warn;

use super::backends::RawCompletion;
use super::spec::{ProviderId, ProviderSpec};
use crate::error::ModelError;

/// Which model served a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub completion: RawCompletion,
    pub served_by: String,
    pub retried: bool,
    /// Why the primary was skipped, when `retried`.
    pub primary_error: Option<ModelError>,
}

/// Ordered model ids for one provider: the primary and at most one fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChain {
    provider: ProviderId,
    primary: String,
    fallback: Option<String>,
}

impl ModelChain {
    pub fn new(provider: ProviderId, primary: &str, fallback: Option<&str>) -> Self {
        Self {
            provider,
            primary: primary.to_string(),
            // A fallback identical to the primary would just repeat the call.
            fallback: fallback.filter(|f| *f != primary).map(str::to_string),
        }
    }

    pub fn from_spec(spec: &ProviderSpec) -> Self {
        Self::new(
            spec.provider,
            &spec.default_model_id,
            spec.fallback_model_id.as_deref(),
        )
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Run `attempt` against the primary model, then once against the
    /// fallback if the primary's error allows it.
    pub async fn execute<F, Fut>(&self, mut attempt: F) -> Result<Served, ModelError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<RawCompletion, ModelError>>,
    {
        let primary_error = match attempt(self.primary.clone()).await {
            Ok(completion) => {
                return Ok(Served {
                    completion,
                    served_by: self.primary.clone(),
                    retried: false,
                    primary_error: None,
                })
            }
            Err(e) => e,
        };

        let fallback = match &self.fallback {
            Some(fallback) if primary_error.is_fallback_eligible() => fallback,
            _ => return Err(primary_error),
        };

        warn!(
            provider = %self.provider,
            primary = %self.primary,
            fallback = %fallback,
            error = %primary_error,
            "primary model failed, retrying on fallback"
        );

        let completion = attempt(fallback.clone()).await?;
        Ok(Served {
            completion,
            served_by: fallback.clone(),
            retried: true,
            primary_error: Some(primary_error),
        })
    }
}
