//! `debate`: bounded critique rounds ending in a structured verdict.
//!
//! Each round every surviving participant sees all current answers and
//! replies with a [`DebateTurn`]. A reply that fails to decode leaves the
//! participant's previous turn in place. Rounds stop early once every
//! participant holds a decoded verdict and those verdicts agree. The aggregate verdict is fail-wins; the consensus is the
//! highest-scored answer among participants holding that verdict.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::verdict::{self, DebateTurn, Verdict};
use super::{
    longest_vote, parallel, participation_confidence, prompts, ConsensusBuilder, ConsensusReport,
    Strategy, MAX_AGGREGATE_CONFIDENCE,
};
use crate::provider::ModelClient;
use crate::request::{GenerationRequest, GenerationResult};
use crate::structured;

struct Participant {
    client: Arc<dyn ModelClient>,
    label: String,
    answer: String,
    turn: Option<DebateTurn>,
}

fn decoded_verdicts(participants: &[Participant]) -> Vec<Verdict> {
    participants
        .iter()
        .filter_map(|p| p.turn.as_ref().map(|t| t.verdict))
        .collect()
}

pub async fn debate(
    builder: &ConsensusBuilder<'_>,
    request: &GenerationRequest,
    votes: &[GenerationResult],
) -> ConsensusReport {
    let mut participants: Vec<Participant> = votes
        .iter()
        .filter_map(|vote| {
            builder.client_for(vote.provider).map(|client| Participant {
                client: Arc::clone(client),
                label: vote.provider.to_string(),
                answer: vote.content.clone(),
                turn: None,
            })
        })
        .collect();

    if participants.len() < 2 {
        debug!(
            participants = participants.len(),
            "too few participants to debate, falling back to parallel vote"
        );
        return parallel::parallel_vote(builder, request, votes).await;
    }

    let max_rounds = builder.context().config.debate_rounds();
    let mut auxiliary = Vec::new();
    let mut rounds = 0;

    for round in 1..=max_rounds {
        let answers: Vec<(String, String)> = participants
            .iter()
            .map(|p| (p.label.clone(), p.answer.clone()))
            .collect();
        let round_request = prompts::debate_round(request, round, &answers);

        let replies = join_all(
            participants
                .iter()
                .map(|p| builder.call(&p.client, &round_request)),
        )
        .await;
        rounds = round;

        let mut survivors = Vec::with_capacity(participants.len());
        for (mut participant, reply) in participants.into_iter().zip(replies) {
            match reply {
                Ok(result) => {
                    match structured::decode_as::<DebateTurn>(&result.content) {
                        Ok(turn) => {
                            if !turn.answer.trim().is_empty() {
                                participant.answer = turn.answer.clone();
                            }
                            participant.turn = Some(turn);
                        }
                        Err(e) => {
                            // The previous decoded turn stands.
                            debug!(participant = %participant.label, round, error = %e, "undecodable debate turn");
                        }
                    }
                    auxiliary.push(result);
                    survivors.push(participant);
                }
                Err(e) => {
                    warn!(participant = %participant.label, round, error = %e, "participant dropped from debate");
                }
            }
        }
        participants = survivors;

        let verdicts = decoded_verdicts(&participants);
        if verdicts.len() == participants.len() && verdict::is_unanimous(&verdicts) {
            debug!(round, verdict = %verdicts[0], "debate converged");
            break;
        }
        if participants.len() < 2 {
            break;
        }
    }

    let verdicts = decoded_verdicts(&participants);
    let Some(aggregate) = verdict::aggregate(verdicts.iter().copied()) else {
        // Nothing decoded: recover with the most verbose original vote.
        warn!(rounds, "no structured verdicts from debate, using longest vote");
        let best = longest_vote(votes).map(|v| v.content.clone()).unwrap_or_default();
        return ConsensusReport {
            consensus: best,
            confidence: participation_confidence(votes.len(), builder.attempted()),
            applied: Strategy::Debate,
            verdict: None,
            synthesized: false,
            rounds,
            auxiliary,
        };
    };

    let holders: Vec<&Participant> = participants
        .iter()
        .filter(|p| p.turn.as_ref().map(|t| t.verdict) == Some(aggregate))
        .collect();
    let score = |p: &Participant| p.turn.as_ref().map(|t| t.score).unwrap_or(0.0);
    let best = holders
        .iter()
        .copied()
        .fold(None, |best: Option<&Participant>, p| match best {
            Some(b) if score(b) >= score(p) => Some(b),
            _ => Some(p),
        });

    let consensus = best
        .map(|p| p.answer.clone())
        .filter(|a| !a.trim().is_empty())
        .or_else(|| longest_vote(votes).map(|v| v.content.clone()))
        .unwrap_or_default();

    let attempted = builder.attempted().max(votes.len());
    let confidence = (holders.len() as f64 / attempted as f64).min(MAX_AGGREGATE_CONFIDENCE);

    info!(
        rounds,
        verdict = %aggregate,
        agreeing = holders.len(),
        confidence,
        "debate concluded"
    );

    ConsensusReport {
        consensus,
        confidence,
        applied: Strategy::Debate,
        verdict: Some(aggregate),
        synthesized: false,
        rounds,
        auxiliary,
    }
}
