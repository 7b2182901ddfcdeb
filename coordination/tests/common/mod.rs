//! Scripted provider doubles shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ensemble_coordination::consensus::prompts::DEBATE_SCHEMA;
use ensemble_coordination::{
    EnsembleConfig, EnsembleContext, GenerationRequest, GenerationResult, ModelClient, ModelError,
    ProviderId, ProviderSpec, SharedEnsembleContext,
};

pub const SYNTHESIS_MARKER: &str = "## Independent answers";

type Script = Arc<dyn Fn(&GenerationRequest) -> Result<String, ModelError> + Send + Sync>;

/// Tracks how many scripted calls are running at once across clients.
#[derive(Debug, Default)]
pub struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`ModelClient`] that answers from a closure instead of the network.
pub struct ScriptedClient {
    provider: ProviderId,
    model_id: String,
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    concurrency: Option<Arc<Concurrency>>,
}

impl ScriptedClient {
    pub fn new(
        provider: ProviderId,
        script: impl Fn(&GenerationRequest) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider,
            model_id: ProviderSpec::builtin(provider).default_model_id,
            script: Arc::new(script),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            concurrency: None,
        }
    }

    /// Always answers `content`.
    pub fn answering(provider: ProviderId, content: &str) -> Self {
        let content = content.to_string();
        Self::new(provider, move |_| Ok(content.clone()))
    }

    /// Always fails with `error`.
    pub fn failing(provider: ProviderId, error: ModelError) -> Self {
        Self::new(provider, move |_| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn tracking(mut self, concurrency: Arc<Concurrency>) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ModelError> {
        let start = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(c) = &self.concurrency {
            c.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = (self.script)(request);
        if let Some(c) = &self.concurrency {
            c.exit();
        }

        let content = outcome?;
        Ok(GenerationResult {
            content,
            provider: self.provider,
            model_id: self.model_id.clone(),
            input_tokens: 100,
            output_tokens: 50,
            cached_input_tokens: 0,
            cost: 0.01,
            latency: start.elapsed(),
            cache_hit: false,
            retried: false,
            parsed: None,
        })
    }
}

pub fn is_synthesis(request: &GenerationRequest) -> bool {
    request.prompt.contains(SYNTHESIS_MARKER)
}

pub fn is_debate_round(request: &GenerationRequest) -> bool {
    request.schema_id.as_deref() == Some(DEBATE_SCHEMA)
}

pub fn transport(message: &str) -> ModelError {
    ModelError::Transport(message.to_string())
}

pub fn config(dir: &Path, providers: &[ProviderId]) -> EnsembleConfig {
    EnsembleConfig::from_lookup(|_| None)
        .with_cache_dir(dir)
        .with_providers(providers.iter().map(|p| ProviderSpec::builtin(*p)).collect())
}

pub async fn context(dir: &Path, providers: &[ProviderId]) -> SharedEnsembleContext {
    EnsembleContext::open(config(dir, providers))
        .await
        .expect("context should open")
        .shared()
}

pub fn roster(clients: &[Arc<ScriptedClient>]) -> Vec<Arc<dyn ModelClient>> {
    clients
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn ModelClient>)
        .collect()
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}
