//! Consensus strategies over scripted votes: synthesis, quorum, debate
//! verdicts, hybrid escalation and numbered polls.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{context, is_debate_round, is_synthesis, roster, transport, ScriptedClient};
use ensemble_coordination::consensus::MAX_AGGREGATE_CONFIDENCE;
use ensemble_coordination::{Ensemble, GenerationRequest, ProviderId, Strategy, Verdict};

/// Votes `vote` on the task and replies `turn` in every debate round.
fn debater(provider: ProviderId, vote: &'static str, turn: &'static str) -> ScriptedClient {
    ScriptedClient::new(provider, move |req| {
        if is_debate_round(req) {
            Ok(turn.to_string())
        } else {
            Ok(vote.to_string())
        }
    })
}

fn task() -> GenerationRequest {
    GenerationRequest::new("Is clip A ready to publish?")
}

#[tokio::test]
async fn test_below_quorum_uses_first_vote_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let clients = vec![
        ScriptedClient::answering(ProviderId::Anthropic, "short").shared(),
        ScriptedClient::answering(ProviderId::OpenAi, "a much longer second answer").shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::ParallelVote).await.unwrap();
    assert_eq!(outcome.consensus, "short");
    assert!(!outcome.synthesized);
    assert!(outcome.auxiliary.is_empty());
    assert_eq!(outcome.confidence, MAX_AGGREGATE_CONFIDENCE);
}

#[tokio::test]
async fn test_failed_synthesizer_falls_back_to_longest_vote() {
    let dir = tempfile::tempdir().unwrap();
    let providers = [ProviderId::Anthropic, ProviderId::OpenAi, ProviderId::Google];
    let ctx = context(dir.path(), &providers).await;
    let clients = vec![
        ScriptedClient::new(ProviderId::Anthropic, |req| {
            if is_synthesis(req) {
                Err(transport("synthesizer unreachable"))
            } else {
                Ok("yes".to_string())
            }
        })
        .shared(),
        ScriptedClient::answering(ProviderId::OpenAi, "yes, the pacing is good").shared(),
        ScriptedClient::answering(ProviderId::Google, "yes, ship it").shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::ParallelVote).await.unwrap();
    assert_eq!(outcome.consensus, "yes, the pacing is good");
    assert!(!outcome.synthesized);
    assert_eq!(outcome.votes.len(), 3);
    assert!(outcome.confidence > 0.0);
}

#[tokio::test]
async fn test_first_client_synthesizes_when_preferred_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let providers = [ProviderId::OpenAi, ProviderId::Google, ProviderId::Xai];
    let ctx = context(dir.path(), &providers).await;
    let clients = vec![
        ScriptedClient::new(ProviderId::OpenAi, |req| {
            if is_synthesis(req) {
                Ok("merged by openai".to_string())
            } else {
                Ok("openai vote".to_string())
            }
        })
        .shared(),
        ScriptedClient::answering(ProviderId::Google, "google vote").shared(),
        ScriptedClient::answering(ProviderId::Xai, "xai vote").shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::ParallelVote).await.unwrap();
    assert_eq!(outcome.consensus, "merged by openai");
    assert_eq!(outcome.auxiliary[0].provider, ProviderId::OpenAi);
}

#[tokio::test]
async fn test_debate_disagreement_resolves_to_fail() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let clients = vec![
        debater(
            ProviderId::Anthropic,
            "Clip A works",
            r#"{"verdict": "pass", "score": 9, "answer": "Clip A works"}"#,
        )
        .shared(),
        debater(
            ProviderId::OpenAi,
            "Clip B",
            "My assessment:\n```json\n{\"verdict\": \"fail\", \"score\": 4, \"answer\": \"Clip B, A has dead air\", \"critique\": \"silence at 0:12\"}\n```",
        )
        .shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.verdict, Some(Verdict::Fail));
    assert_eq!(outcome.consensus, "Clip B, A has dead air");
    assert!((outcome.confidence - 0.5).abs() < 1e-9);
    // Never unanimous, so every allowed round runs.
    assert_eq!(outcome.auxiliary.len(), 6);
}

#[tokio::test]
async fn test_undecodable_reply_keeps_earlier_fail_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let openai_rounds = AtomicUsize::new(0);
    let clients = vec![
        debater(
            ProviderId::Anthropic,
            "ship A",
            r#"{"verdict": "pass", "score": 9, "answer": "ship A"}"#,
        )
        .shared(),
        ScriptedClient::new(ProviderId::OpenAi, move |req| {
            if !is_debate_round(req) {
                return Ok("hold A".to_string());
            }
            if openai_rounds.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(r#"{"verdict": "fail", "score": 3, "answer": "hold A, the audio clips"}"#.to_string())
            } else {
                Ok("I stand by what I said earlier.".to_string())
            }
        })
        .shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.verdict, Some(Verdict::Fail));
    assert_eq!(outcome.consensus, "hold A, the audio clips");
    assert!((outcome.confidence - 0.5).abs() < 1e-9);
    assert_eq!(outcome.auxiliary.len(), 6);
}

#[tokio::test]
async fn test_debate_continues_while_a_verdict_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let clients = vec![
        debater(
            ProviderId::Anthropic,
            "ship",
            r#"{"verdict": "pass", "score": 7, "answer": "ship it"}"#,
        )
        .shared(),
        debater(ProviderId::OpenAi, "ship", "Looks fine to me.").shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.verdict, Some(Verdict::Pass));
    assert_eq!(outcome.consensus, "ship it");
    // One decoded verdict is not unanimity, so no early stop.
    assert_eq!(outcome.auxiliary.len(), 6);
    assert!((outcome.confidence - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_debate_stops_once_unanimous() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let clients = vec![
        debater(
            ProviderId::Anthropic,
            "ship",
            r#"{"verdict": "pass", "score": 7, "answer": "ship it"}"#,
        )
        .shared(),
        debater(
            ProviderId::OpenAi,
            "ship",
            r#"{"verdict": "PASS", "score": 8.5, "best_response": "ship it today"}"#,
        )
        .shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.verdict, Some(Verdict::Pass));
    assert_eq!(outcome.consensus, "ship it today");
    assert_eq!(outcome.auxiliary.len(), 2);
    assert_eq!(outcome.confidence, MAX_AGGREGATE_CONFIDENCE);
}

#[tokio::test]
async fn test_undecodable_debate_recovers_longest_vote() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let clients = vec![
        debater(ProviderId::Anthropic, "brief", "I think both are fine.").shared(),
        debater(
            ProviderId::OpenAi,
            "a considerably longer original answer",
            "No strong opinion here.",
        )
        .shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.verdict, None);
    assert_eq!(outcome.consensus, "a considerably longer original answer");
    assert!(outcome.confidence > 0.0);
}

#[tokio::test]
async fn test_failing_participant_is_dropped_from_debate() {
    let dir = tempfile::tempdir().unwrap();
    let providers = [ProviderId::Anthropic, ProviderId::OpenAi, ProviderId::Google];
    let ctx = context(dir.path(), &providers).await;
    let clients = vec![
        debater(
            ProviderId::Anthropic,
            "A",
            r#"{"verdict": "pass", "score": 8, "answer": "answer from anthropic"}"#,
        )
        .shared(),
        ScriptedClient::new(ProviderId::OpenAi, |req| {
            if is_debate_round(req) {
                Err(transport("mid-debate outage"))
            } else {
                Ok("B".to_string())
            }
        })
        .shared(),
        debater(
            ProviderId::Google,
            "C",
            r#"{"verdict": "pass", "score": 6, "answer": "answer from google"}"#,
        )
        .shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.verdict, Some(Verdict::Pass));
    assert_eq!(outcome.consensus, "answer from anthropic");
    assert!((outcome.confidence - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_debate_with_one_vote_degrades_to_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), &[ProviderId::Anthropic, ProviderId::OpenAi]).await;
    let clients = vec![
        ScriptedClient::failing(ProviderId::Anthropic, transport("down")).shared(),
        ScriptedClient::answering(ProviderId::OpenAi, "lone answer").shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let outcome = ensemble.dispatch_with(&task(), Strategy::Debate).await.unwrap();
    assert_eq!(outcome.consensus, "lone answer");
    assert_eq!(outcome.verdict, None);
    assert!(outcome.auxiliary.is_empty());
    assert!((outcome.confidence - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_hybrid_escalates_below_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let providers = [ProviderId::Anthropic, ProviderId::OpenAi, ProviderId::Google];
    let ctx = context(dir.path(), &providers).await;
    let clients = vec![
        debater(
            ProviderId::Anthropic,
            "yes",
            r#"{"verdict": "pass", "score": 9, "answer": "yes, publish"}"#,
        )
        .shared(),
        debater(
            ProviderId::OpenAi,
            "yes",
            r#"{"verdict": "pass", "score": 7, "answer": "yes"}"#,
        )
        .shared(),
        ScriptedClient::failing(ProviderId::Google, transport("down")).shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();

    let escalated = ensemble
        .dispatch_with(&task(), Strategy::Hybrid { min_confidence: 0.8 })
        .await
        .unwrap();
    assert_eq!(escalated.verdict, Some(Verdict::Pass));
    assert_eq!(escalated.consensus, "yes, publish");
    assert_eq!(escalated.auxiliary.len(), 2);
    assert_eq!(escalated.applied, Strategy::Debate);
    assert!(escalated.escalated());

    let settled = ensemble
        .dispatch_with(&task(), Strategy::Hybrid { min_confidence: 0.5 })
        .await
        .unwrap();
    assert_eq!(settled.verdict, None);
    assert_eq!(settled.consensus, "yes");
    assert!(settled.auxiliary.is_empty());
    assert_eq!(settled.applied, Strategy::ParallelVote);
    assert!(!settled.escalated());
}

#[tokio::test]
async fn test_poll_tallies_numbered_answers() {
    let dir = tempfile::tempdir().unwrap();
    let providers = [
        ProviderId::Anthropic,
        ProviderId::OpenAi,
        ProviderId::Google,
        ProviderId::Xai,
    ];
    let ctx = context(dir.path(), &providers).await;
    let clients = vec![
        ScriptedClient::answering(ProviderId::Anthropic, "2").shared(),
        ScriptedClient::answering(ProviderId::OpenAi, "Option 2.").shared(),
        ScriptedClient::answering(ProviderId::Google, "1").shared(),
        ScriptedClient::failing(ProviderId::Xai, transport("down")).shared(),
    ];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();
    let options = vec![
        "Opening hook".to_string(),
        "Punchline".to_string(),
        "Outro".to_string(),
    ];

    let poll = ensemble
        .poll("Which segment makes the best clip?", &options, None)
        .await
        .unwrap();
    assert_eq!(poll.counts, vec![1, 2, 0]);
    assert_eq!(poll.winner(), Some(1));
    assert_eq!(poll.choices.get(&ProviderId::Google), Some(&0));
    assert_eq!(poll.abstained, vec![ProviderId::Xai]);

    let err = ensemble.poll("anything?", &[], None).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_poll_forwards_system_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let providers = [ProviderId::Anthropic, ProviderId::OpenAi];
    let ctx = context(dir.path(), &providers).await;
    let by_system = |provider| {
        ScriptedClient::new(provider, |req| {
            Ok(match req.system.as_deref() {
                Some(system) if system.contains("editor") => "2".to_string(),
                _ => "1".to_string(),
            })
        })
        .shared()
    };
    let clients = vec![by_system(ProviderId::Anthropic), by_system(ProviderId::OpenAi)];
    let ensemble = Ensemble::new(ctx, roster(&clients)).unwrap();
    let options = vec!["Opening hook".to_string(), "Punchline".to_string()];

    let framed = ensemble
        .poll("Which segment?", &options, Some("You are a video editor."))
        .await
        .unwrap();
    assert_eq!(framed.counts, vec![0, 2]);

    let plain = ensemble.poll("Which segment?", &options, None).await.unwrap();
    assert_eq!(plain.counts, vec![2, 0]);
}
