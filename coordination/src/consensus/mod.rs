//! Reducing many provider votes to one consensus answer.
//!
//! | Strategy         | Extra calls                         | Confidence                      |
//! |------------------|-------------------------------------|---------------------------------|
//! | `parallel_vote`  | one synthesizer call if quorum met  | votes / attempted               |
//! | `debate`         | up to 3 rounds × participants       | agreeing / attempted            |
//! | `hybrid`         | parallel vote, debate if below bar  | whichever ran last              |
//! | `single_ai_call` | none (bypasses fan-out)             | 1.0 on success                  |
//!
//! Aggregating strategies cap confidence at [`MAX_AGGREGATE_CONFIDENCE`];
//! only a successful single call reports 1.0. An empty vote set always
//! yields an empty consensus with confidence 0.

pub mod debate;
pub mod parallel;
pub mod prompts;
pub mod verdict;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use verdict::{DebateTurn, Verdict};

use crate::ensemble::{call_client, EnsembleContext};
use crate::error::ModelError;
use crate::provider::{ModelClient, ProviderId};
use crate::request::{GenerationRequest, GenerationResult};

pub const MAX_AGGREGATE_CONFIDENCE: f64 = 0.95;

/// How votes are reduced to a consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    ParallelVote,
    Debate,
    SingleAiCall { provider: ProviderId },
    /// Parallel vote, escalating to debate below `min_confidence`.
    Hybrid { min_confidence: f64 },
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParallelVote => write!(f, "parallel_vote"),
            Self::Debate => write!(f, "debate"),
            Self::SingleAiCall { provider } => write!(f, "single_ai_call({provider})"),
            Self::Hybrid { min_confidence } => write!(f, "hybrid({min_confidence})"),
        }
    }
}

/// Result of reducing a vote set.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusReport {
    pub consensus: String,
    pub confidence: f64,
    /// The strategy that actually produced `consensus`.
    pub applied: Strategy,
    /// Aggregated verdict, debate only.
    pub verdict: Option<Verdict>,
    pub synthesized: bool,
    pub rounds: u32,
    /// Second-order calls (synthesizer, debate rounds) made on the way.
    pub auxiliary: Vec<GenerationResult>,
}

impl ConsensusReport {
    pub fn inconclusive(applied: Strategy) -> Self {
        Self {
            consensus: String::new(),
            confidence: 0.0,
            applied,
            verdict: None,
            synthesized: false,
            rounds: 0,
            auxiliary: Vec::new(),
        }
    }

    fn from_vote(applied: Strategy, content: &str, confidence: f64) -> Self {
        Self {
            consensus: content.to_string(),
            confidence,
            ..Self::inconclusive(applied)
        }
    }
}

/// `votes / attempted`, capped. Zero exactly when there are no votes.
pub fn participation_confidence(votes: usize, attempted: usize) -> f64 {
    if votes == 0 || attempted == 0 {
        return 0.0;
    }
    (votes as f64 / attempted.max(votes) as f64).min(MAX_AGGREGATE_CONFIDENCE)
}

/// The most verbose vote; the earliest wins ties.
pub fn longest_vote(votes: &[GenerationResult]) -> Option<&GenerationResult> {
    votes.iter().fold(None, |best: Option<&GenerationResult>, v| match best {
        Some(b) if b.content.chars().count() >= v.content.chars().count() => Some(b),
        _ => Some(v),
    })
}

/// Runs a [`Strategy`] over a completed fan-out.
pub struct ConsensusBuilder<'a> {
    ctx: &'a EnsembleContext,
    clients: &'a [Arc<dyn ModelClient>],
    attempted: usize,
}

impl<'a> ConsensusBuilder<'a> {
    pub fn new(
        ctx: &'a EnsembleContext,
        clients: &'a [Arc<dyn ModelClient>],
        attempted: usize,
    ) -> Self {
        Self {
            ctx,
            clients,
            attempted,
        }
    }

    pub fn context(&self) -> &EnsembleContext {
        self.ctx
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn client_for(&self, provider: ProviderId) -> Option<&Arc<dyn ModelClient>> {
        self.clients.iter().find(|c| c.provider() == provider)
    }

    /// The configured synthesizer if rostered, else the first client.
    pub fn synthesizer(&self) -> Option<&Arc<dyn ModelClient>> {
        self.client_for(self.ctx.config.synthesizer)
            .or_else(|| self.clients.first())
    }

    /// Second-order call through the same cache, limiter and ledger as
    /// the fan-out.
    pub async fn call(
        &self,
        client: &Arc<dyn ModelClient>,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ModelError> {
        call_client(self.ctx, client.as_ref(), request).await
    }

    pub async fn build(
        &self,
        request: &GenerationRequest,
        votes: &[GenerationResult],
        strategy: &Strategy,
    ) -> ConsensusReport {
        match strategy {
            Strategy::ParallelVote => parallel::parallel_vote(self, request, votes).await,
            Strategy::Debate => debate::debate(self, request, votes).await,
            Strategy::Hybrid { min_confidence } => {
                let first = parallel::parallel_vote(self, request, votes).await;
                if first.confidence >= *min_confidence || votes.len() < 2 {
                    return first;
                }
                tracing::info!(
                    confidence = first.confidence,
                    min_confidence,
                    "parallel vote below threshold, escalating to debate"
                );
                let mut escalated = debate::debate(self, request, votes).await;
                let mut auxiliary = first.auxiliary;
                auxiliary.append(&mut escalated.auxiliary);
                escalated.auxiliary = auxiliary;
                escalated
            }
            Strategy::SingleAiCall { .. } => match votes.first() {
                Some(vote) => ConsensusReport::from_vote(strategy.clone(), &vote.content, 1.0),
                None => ConsensusReport::inconclusive(strategy.clone()),
            },
        }
    }
}
