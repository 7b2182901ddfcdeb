//! Concurrent fan-out to the provider roster.
//!
//! ```text
//! dispatch(request)
//!   ├─ spawn one task per client ───────────────┐
//!   │    cache hit?  → stored result, no permit │  isolated: one failure never
//!   │    else permit → generate → cache + ledger│  cancels or delays siblings
//!   ├─ join all, partition votes / errors ◄─────┘
//!   └─ ConsensusBuilder::build(votes, strategy)
//! ```

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::SharedEnsembleContext;
use super::EnsembleContext;
use crate::cache::{CacheCategory, CacheKey};
use crate::consensus::{prompts, ConsensusBuilder, ConsensusReport, Strategy, Verdict};
use crate::error::{EnsembleError, ModelError};
use crate::provider::{Credentials, ModelClient, ProviderClient, ProviderId};
use crate::request::{GenerationRequest, GenerationResult};

static OPTION_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("OPTION_NUMBER regex should compile"));

/// One provider's failure within a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub model_id: String,
    pub error: ModelError,
}

/// Everything a pipeline stage learns from one dispatch.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub dispatch_id: Uuid,
    /// Strategy the caller asked for.
    pub strategy: Strategy,
    /// Strategy that produced the consensus. Differs from `strategy` when
    /// `hybrid` escalates or `debate` has too few participants.
    pub applied: Strategy,
    pub providers_attempted: usize,
    /// Successful results, in roster order.
    pub votes: Vec<GenerationResult>,
    /// Failed providers, in roster order.
    pub errors: Vec<ProviderFailure>,
    pub consensus: String,
    /// In `[0, 1]`; 0 means inconclusive.
    pub confidence: f64,
    pub verdict: Option<Verdict>,
    pub synthesized: bool,
    /// Synthesizer and debate calls made while building consensus.
    pub auxiliary: Vec<GenerationResult>,
    pub total_cost: f64,
    /// Tokens billed by this dispatch; cache-served results contribute none.
    pub total_tokens: u64,
    /// Slowest successful fan-out call; calls run in parallel.
    pub max_latency: Duration,
}

impl EnsembleOutcome {
    fn assemble(
        strategy: Strategy,
        providers_attempted: usize,
        votes: Vec<GenerationResult>,
        errors: Vec<ProviderFailure>,
        report: ConsensusReport,
    ) -> Self {
        let all_calls = || votes.iter().chain(report.auxiliary.iter());
        let total_cost: f64 = all_calls().map(|r| r.cost).sum();
        let total_tokens: u64 = all_calls()
            .filter(|r| !r.cache_hit)
            .map(GenerationResult::total_tokens)
            .sum();
        let max_latency = votes
            .iter()
            .map(|v| v.latency)
            .max()
            .unwrap_or(Duration::ZERO);

        Self {
            dispatch_id: Uuid::new_v4(),
            strategy,
            providers_attempted,
            total_cost,
            total_tokens,
            max_latency,
            applied: report.applied,
            consensus: report.consensus,
            confidence: report.confidence,
            verdict: report.verdict,
            synthesized: report.synthesized,
            auxiliary: report.auxiliary,
            votes,
            errors,
        }
    }

    /// Confidence 0: the caller should treat the result as inconclusive.
    pub fn is_inconclusive(&self) -> bool {
        self.confidence == 0.0
    }

    /// Whether a `hybrid` dispatch went on to debate.
    pub fn escalated(&self) -> bool {
        matches!(self.strategy, Strategy::Hybrid { .. }) && self.applied == Strategy::Debate
    }

    pub fn cache_hits(&self) -> usize {
        self.votes.iter().filter(|v| v.cache_hit).count()
    }

    pub fn vote_from(&self, provider: ProviderId) -> Option<&GenerationResult> {
        self.votes.iter().find(|v| v.provider == provider)
    }
}

/// Tally of a numbered-option poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub options: Vec<String>,
    /// Votes per option, same order as `options`.
    pub counts: Vec<usize>,
    /// Zero-based option each provider picked.
    pub choices: BTreeMap<ProviderId, usize>,
    /// Providers that failed or answered with no usable option number.
    pub abstained: Vec<ProviderId>,
}

impl PollOutcome {
    /// Index of the most-voted option; the lowest index wins ties.
    pub fn winner(&self) -> Option<usize> {
        let max = *self.counts.iter().max()?;
        if max == 0 {
            return None;
        }
        self.counts.iter().position(|c| *c == max)
    }
}

/// Parse the first option number in `answer`, 1-based, into a zero-based index.
pub fn parse_option(answer: &str, option_count: usize) -> Option<usize> {
    let n: usize = OPTION_NUMBER.find(answer)?.as_str().parse().ok()?;
    (1..=option_count).contains(&n).then(|| n - 1)
}

/// One call through the response cache, rate limiter and ledger.
///
/// A cache hit returns the stored result with `cache_hit = true` and zero
/// cost, without taking a rate permit or touching the network.
pub async fn call_client(
    ctx: &EnsembleContext,
    client: &dyn ModelClient,
    request: &GenerationRequest,
) -> Result<GenerationResult, ModelError> {
    let start = Instant::now();
    let provider = client.provider();
    let key = CacheKey::for_request(request, client.model_id());

    match ctx.cache.get(CacheCategory::AiResponses, &key).await {
        Ok(Some(entry)) => match serde_json::from_value::<GenerationResult>(entry.payload) {
            Ok(stored) => {
                let avoided = stored.cost;
                let hit = stored.into_cache_hit(start.elapsed());
                ctx.ledger.record_cache_hit(&hit, avoided);
                debug!(%provider, key = %key, "served from response cache");
                return Ok(hit);
            }
            Err(e) => warn!(%provider, key = %key, error = %e, "cached result unreadable, refetching"),
        },
        Ok(None) => {}
        Err(e) => warn!(%provider, error = %e, "cache lookup failed, calling provider"),
    }

    let permit = ctx.limiter.acquire(provider).await;
    let outcome = client.generate(request).await;
    drop(permit);

    match outcome {
        Ok(result) => {
            let prompt_cache_savings = ctx
                .spec(provider)
                .map(|spec| spec.pricing.cached_savings(&result.model_id, result.cached_input_tokens))
                .unwrap_or(0.0);
            ctx.ledger.record_call(&result, prompt_cache_savings);

            match serde_json::to_value(&result) {
                Ok(payload) => {
                    if let Err(e) = ctx.cache.put(CacheCategory::AiResponses, &key, payload).await {
                        warn!(%provider, error = %e, "failed to cache result");
                    }
                }
                Err(e) => warn!(%provider, error = %e, "failed to encode result for cache"),
            }
            Ok(result)
        }
        Err(e) => {
            ctx.ledger.record_failure(provider);
            Err(e)
        }
    }
}

/// The configured roster plus the shared context.
pub struct Ensemble {
    ctx: SharedEnsembleContext,
    clients: Vec<Arc<dyn ModelClient>>,
    skipped: Vec<(ProviderId, String)>,
}

impl Ensemble {
    /// An ensemble over explicit clients. Fails on an empty roster.
    pub fn new(
        ctx: SharedEnsembleContext,
        clients: Vec<Arc<dyn ModelClient>>,
    ) -> Result<Self, EnsembleError> {
        if clients.is_empty() {
            return Err(EnsembleError::Configuration(
                "ensemble roster is empty".into(),
            ));
        }
        Ok(Self {
            ctx,
            clients,
            skipped: Vec::new(),
        })
    }

    /// Build one HTTP client per configured provider. Providers whose
    /// credentials are missing are skipped and remembered.
    pub fn from_config(
        ctx: SharedEnsembleContext,
        credentials: &Credentials,
    ) -> Result<Self, EnsembleError> {
        if ctx.config.providers.is_empty() {
            return Err(EnsembleError::Configuration(
                "ensemble roster is empty".into(),
            ));
        }

        let timeout = ctx.config.call_timeout();
        let mut clients: Vec<Arc<dyn ModelClient>> = Vec::new();
        let mut skipped = Vec::new();
        for spec in &ctx.config.providers {
            let provider = spec.provider;
            match ProviderClient::from_spec(spec.clone(), credentials, timeout) {
                Ok(client) => clients.push(Arc::new(client)),
                Err(e) => {
                    warn!(%provider, error = %e, "provider skipped");
                    let reason = match e {
                        EnsembleError::Configuration(reason) => reason,
                        other => other.to_string(),
                    };
                    skipped.push((provider, reason));
                }
            }
        }

        if clients.is_empty() {
            let reasons = skipped
                .iter()
                .map(|(_, reason)| reason.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EnsembleError::NoProviders(reasons));
        }

        info!(
            active = clients.len(),
            skipped = skipped.len(),
            "ensemble roster built"
        );
        Ok(Self {
            ctx,
            clients,
            skipped,
        })
    }

    pub fn context(&self) -> &SharedEnsembleContext {
        &self.ctx
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.clients.iter().map(|c| c.provider()).collect()
    }

    /// Providers left out of the roster, with the reason.
    pub fn skipped(&self) -> &[(ProviderId, String)] {
        &self.skipped
    }

    /// Dispatch with the configured default strategy.
    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
    ) -> Result<EnsembleOutcome, EnsembleError> {
        let strategy = self.ctx.config.default_strategy.clone();
        self.dispatch_with(request, strategy).await
    }

    pub async fn dispatch_with(
        &self,
        request: &GenerationRequest,
        strategy: Strategy,
    ) -> Result<EnsembleOutcome, EnsembleError> {
        if let Strategy::SingleAiCall { provider } = strategy {
            return self.single_ai_call(provider, request).await;
        }

        let (votes, errors) = self.fan_out(request).await;
        let attempted = self.clients.len();

        let builder = ConsensusBuilder::new(&self.ctx, &self.clients, attempted);
        let report = builder.build(request, &votes, &strategy).await;

        let outcome = EnsembleOutcome::assemble(strategy, attempted, votes, errors, report);
        info!(
            dispatch_id = %outcome.dispatch_id,
            strategy = %outcome.strategy,
            applied = %outcome.applied,
            votes = outcome.votes.len(),
            errors = outcome.errors.len(),
            confidence = outcome.confidence,
            cost = outcome.total_cost,
            "dispatch complete"
        );
        Ok(outcome)
    }

    /// One request to one named provider, no aggregation. Confidence is 1.0
    /// on success; failure is returned as an error.
    pub async fn single_ai_call(
        &self,
        provider: ProviderId,
        request: &GenerationRequest,
    ) -> Result<EnsembleOutcome, EnsembleError> {
        let Some(client) = self.clients.iter().find(|c| c.provider() == provider) else {
            let reason = self
                .skipped
                .iter()
                .find(|(p, _)| *p == provider)
                .map(|(_, reason)| reason.clone())
                .unwrap_or_else(|| format!("{provider} is not in the ensemble roster"));
            return Err(EnsembleError::Configuration(reason));
        };

        let result = call_client(&self.ctx, client.as_ref(), request)
            .await
            .map_err(|source| EnsembleError::Model { provider, source })?;

        let strategy = Strategy::SingleAiCall { provider };
        let report = ConsensusReport {
            consensus: result.content.clone(),
            confidence: 1.0,
            applied: strategy.clone(),
            verdict: None,
            synthesized: false,
            rounds: 0,
            auxiliary: Vec::new(),
        };
        Ok(EnsembleOutcome::assemble(
            strategy,
            1,
            vec![result],
            Vec::new(),
            report,
        ))
    }

    /// Ask every provider to pick one of `options` and tally the answers.
    /// `system` frames the question for every provider.
    pub async fn poll(
        &self,
        question: &str,
        options: &[String],
        system: Option<&str>,
    ) -> Result<PollOutcome, EnsembleError> {
        if options.is_empty() {
            return Err(EnsembleError::Configuration(
                "poll needs at least one option".into(),
            ));
        }

        let request = prompts::poll(question, options, system);
        let (votes, errors) = self.fan_out(&request).await;

        let mut counts = vec![0; options.len()];
        let mut choices = BTreeMap::new();
        let mut abstained: Vec<ProviderId> = errors.iter().map(|e| e.provider).collect();
        for vote in &votes {
            match parse_option(&vote.content, options.len()) {
                Some(choice) => {
                    counts[choice] += 1;
                    choices.insert(vote.provider, choice);
                }
                None => {
                    debug!(provider = %vote.provider, answer = %vote.content, "unusable poll answer");
                    abstained.push(vote.provider);
                }
            }
        }

        Ok(PollOutcome {
            options: options.to_vec(),
            counts,
            choices,
            abstained,
        })
    }

    /// Run `request` on every client concurrently. Every client yields
    /// exactly one vote or one error, in roster order.
    pub async fn fan_out(
        &self,
        request: &GenerationRequest,
    ) -> (Vec<GenerationResult>, Vec<ProviderFailure>) {
        let request = Arc::new(request.clone());
        let mut join_set = JoinSet::new();

        for (idx, client) in self.clients.iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let client = Arc::clone(client);
            let request = Arc::clone(&request);
            join_set.spawn(async move {
                let call = call_client(&ctx, client.as_ref(), &request);
                let result = match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::Transport("provider task panicked".into())),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Result<GenerationResult, ModelError>>> =
            (0..self.clients.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(error = %e, "provider task did not complete"),
            }
        }

        let mut votes = Vec::new();
        let mut errors = Vec::new();
        for (client, slot) in self.clients.iter().zip(slots) {
            let result = slot
                .unwrap_or_else(|| Err(ModelError::Transport("provider task was cancelled".into())));
            match result {
                Ok(vote) => votes.push(vote),
                Err(error) => {
                    warn!(provider = %client.provider(), kind = error.kind(), %error, "provider failed");
                    errors.push(ProviderFailure {
                        provider: client.provider(),
                        model_id: client.model_id().to_string(),
                        error,
                    });
                }
            }
        }
        (votes, errors)
    }
}
