//! Per-provider model clients.
//!
//! A [`ModelClient`] issues one request to one backend and returns a
//! normalized [`GenerationResult`]. [`ProviderClient`] is the production
//! implementation: it layers the per-call timeout, the primary → fallback
//! retry and pricing on top of a [`CompletionBackend`].

pub mod backends;
pub mod catalog;
pub mod fallback;
pub mod spec;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

pub use backends::{CompletionBackend, HttpBackend, RawCompletion};
pub use catalog::{ModelCatalog, ModelLister};
pub use fallback::{ModelChain, Served};
pub use spec::{PricingTable, PricingTier, ProviderId, ProviderSpec, WireFormat};

use crate::error::{EnsembleError, ModelError};
use crate::request::{GenerationRequest, GenerationResult};
use crate::structured;

/// One request to one backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// The primary model id. Cache keys are derived from it.
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ModelError>;
}

/// Where API keys come from.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// Read from the process environment.
    #[default]
    Environment,
    /// A fixed map of variable name → key, for tests and embedding.
    Static(HashMap<String, String>),
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::Environment
    }

    pub fn from_map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Static(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn lookup(&self, var: &str) -> Option<String> {
        let value = match self {
            Self::Environment => std::env::var(var).ok(),
            Self::Static(map) => map.get(var).cloned(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// The key for `spec`, or a configuration error naming the variable.
    pub fn require(&self, spec: &ProviderSpec) -> Result<String, EnsembleError> {
        self.lookup(&spec.credential_env).ok_or_else(|| {
            EnsembleError::Configuration(format!(
                "{}: credential {} is not set",
                spec.provider, spec.credential_env
            ))
        })
    }
}

/// HTTP model listers for every spec whose credential is present. Providers
/// without one are left out and keep their declared tiers.
pub fn model_listers(
    specs: &[ProviderSpec],
    credentials: &Credentials,
) -> HashMap<ProviderId, Arc<dyn ModelLister>> {
    let mut listers: HashMap<ProviderId, Arc<dyn ModelLister>> = HashMap::new();
    for spec in specs {
        let Some(api_key) = credentials.lookup(&spec.credential_env) else {
            debug!(provider = %spec.provider, "no credential, skipping model detection");
            continue;
        };
        match HttpBackend::new(spec, api_key) {
            Ok(backend) => {
                listers.insert(spec.provider, Arc::new(backend));
            }
            Err(e) => debug!(provider = %spec.provider, error = %e, "model lister unavailable"),
        }
    }
    listers
}

/// Production [`ModelClient`] over any [`CompletionBackend`].
pub struct ProviderClient {
    spec: ProviderSpec,
    chain: ModelChain,
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl ProviderClient {
    /// Build an HTTP client for `spec`. Fails if the credential is missing,
    /// so no call is ever attempted without one.
    pub fn from_spec(
        spec: ProviderSpec,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, EnsembleError> {
        let api_key = credentials.require(&spec)?;
        let backend = HttpBackend::new(&spec, api_key)?;
        Ok(Self::with_backend(spec, Arc::new(backend), timeout))
    }

    pub fn with_backend(
        spec: ProviderSpec,
        backend: Arc<dyn CompletionBackend>,
        timeout: Duration,
    ) -> Self {
        let chain = ModelChain::from_spec(&spec);
        Self {
            spec,
            chain,
            backend,
            timeout,
        }
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    fn provider(&self) -> ProviderId {
        self.spec.provider
    }

    fn model_id(&self) -> &str {
        &self.spec.default_model_id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ModelError> {
        let start = Instant::now();
        let timeout = self.timeout;
        let backend = &self.backend;

        let served = self
            .chain
            .execute(|model_id| async move {
                match tokio::time::timeout(timeout, backend.complete(&model_id, request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::Timeout(timeout)),
                }
            })
            .await?;

        let raw = served.completion;
        let cost = self.spec.pricing.cost(
            &served.served_by,
            raw.input_tokens,
            raw.output_tokens,
            raw.cached_input_tokens,
        );
        let parsed = if request.expects_structured() {
            structured::decode(&raw.content).ok()
        } else {
            None
        };
        let latency = start.elapsed();

        debug!(
            provider = %self.spec.provider,
            model = %served.served_by,
            retried = served.retried,
            input_tokens = raw.input_tokens,
            output_tokens = raw.output_tokens,
            cost,
            latency_ms = latency.as_millis() as u64,
            "generation complete"
        );

        Ok(GenerationResult {
            content: raw.content,
            provider: self.spec.provider,
            model_id: served.served_by,
            input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            cached_input_tokens: raw.cached_input_tokens,
            cost,
            latency,
            cache_hit: false,
            retried: served.retried,
            parsed,
        })
    }
}
