//! `parallel_vote`: first vote below quorum, synthesized answer above it.

use tracing::{debug, warn};

use super::{
    longest_vote, participation_confidence, prompts, ConsensusBuilder, ConsensusReport, Strategy,
};
use crate::request::{GenerationRequest, GenerationResult};

pub async fn parallel_vote(
    builder: &ConsensusBuilder<'_>,
    request: &GenerationRequest,
    votes: &[GenerationResult],
) -> ConsensusReport {
    let Some(first) = votes.first() else {
        return ConsensusReport::inconclusive(Strategy::ParallelVote);
    };
    let confidence = participation_confidence(votes.len(), builder.attempted());
    let quorum = builder.context().config.min_quorum();

    if votes.len() < quorum {
        debug!(
            votes = votes.len(),
            quorum, "below quorum, using first vote verbatim"
        );
        return ConsensusReport::from_vote(Strategy::ParallelVote, &first.content, confidence);
    }

    let fallback = |auxiliary: Vec<GenerationResult>| {
        let best = longest_vote(votes).unwrap_or(first);
        ConsensusReport {
            auxiliary,
            ..ConsensusReport::from_vote(Strategy::ParallelVote, &best.content, confidence)
        }
    };

    let Some(synthesizer) = builder.synthesizer() else {
        return fallback(Vec::new());
    };

    let synthesis = prompts::synthesis(request, votes);
    match builder.call(synthesizer, &synthesis).await {
        Ok(result) if !result.content.trim().is_empty() => {
            debug!(
                synthesizer = %result.provider,
                votes = votes.len(),
                "votes synthesized"
            );
            ConsensusReport {
                consensus: result.content.clone(),
                synthesized: true,
                auxiliary: vec![result],
                ..ConsensusReport::from_vote(Strategy::ParallelVote, "", confidence)
            }
        }
        Ok(result) => {
            warn!(synthesizer = %result.provider, "synthesizer returned empty text, using longest vote");
            fallback(vec![result])
        }
        Err(e) => {
            warn!(
                synthesizer = %synthesizer.provider(),
                error = %e,
                "synthesizer failed, using longest vote"
            );
            fallback(Vec::new())
        }
    }
}
