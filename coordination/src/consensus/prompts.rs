//! Prompt templates for the second-order calls consensus makes.

use crate::request::{GenerationRequest, GenerationResult};

/// Longest slice of a vote quoted back to the synthesizer.
pub const MAX_VOTE_CHARS: usize = 2000;

pub const SYNTHESIS_TEMPERATURE: f32 = 0.3;
pub const DEBATE_TEMPERATURE: f32 = 0.3;
pub const POLL_TEMPERATURE: f32 = 0.1;
pub const POLL_MAX_TOKENS: u32 = 10;

pub const DEBATE_SCHEMA: &str = "debate_turn";

const SYNTHESIS_SYSTEM: &str = "You reconcile answers from several independent analysts into one \
answer. Keep points most analysts agree on, resolve contradictions explicitly, and do not invent \
facts none of them stated.";

const DEBATE_SYSTEM: &str = "You are one of several reviewers debating the best answer to a task. \
Be strict: if any answer has a real flaw, say so.";

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Reconcile all votes for `original` into one answer.
pub fn synthesis(original: &GenerationRequest, votes: &[GenerationResult]) -> GenerationRequest {
    let answers = votes
        .iter()
        .enumerate()
        .map(|(i, v)| {
            format!(
                "### Analyst {} ({})\n{}",
                i + 1,
                v.provider,
                clip(&v.content, MAX_VOTE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = format!(
        "## Task\n\n{}\n\n## Independent answers\n\n{}\n\n## Instructions\n\n\
         Produce the single best answer to the task, reconciling the answers above.",
        original.prompt, answers
    );
    if original.schema_id.is_some() {
        prompt.push_str(" Reply in the same structured JSON format the task asks for.");
    }

    let mut request = GenerationRequest::new(prompt)
        .with_system(SYNTHESIS_SYSTEM)
        .with_temperature(SYNTHESIS_TEMPERATURE)
        .with_max_output_tokens(original.max_output_tokens);
    request.schema_id = original.schema_id.clone();
    request
}

/// One debate round: every participant sees every current answer.
pub fn debate_round(
    original: &GenerationRequest,
    round: u32,
    answers: &[(String, String)],
) -> GenerationRequest {
    let listed = answers
        .iter()
        .map(|(who, answer)| format!("### {}\n{}", who, clip(answer, MAX_VOTE_CHARS)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "## Task\n\n{}\n\n## Round {} answers\n\n{}\n\n## Instructions\n\n\
         Critique the answers above. Decide whether the best of them is acceptable.\n\
         Respond with JSON only:\n\
         {{\"verdict\": \"pass\" | \"fail\", \"score\": <0-10>, \"answer\": \"<your improved best answer>\", \"critique\": \"<main problems>\"}}",
        original.prompt, round, listed
    );

    GenerationRequest::new(prompt)
        .with_system(DEBATE_SYSTEM)
        .with_temperature(DEBATE_TEMPERATURE)
        .with_max_output_tokens(original.max_output_tokens)
        .with_schema(DEBATE_SCHEMA)
}

/// Ask for a single option number.
pub fn poll(question: &str, options: &[String], system: Option<&str>) -> GenerationRequest {
    let listed = options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}. {}", i + 1, o))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "{}\n\nOptions:\n{}\n\nRespond with ONLY the number of your choice (1-{}).",
        question,
        listed,
        options.len()
    );
    let request = GenerationRequest::new(prompt)
        .with_temperature(POLL_TEMPERATURE)
        .with_max_output_tokens(POLL_MAX_TOKENS);
    match system {
        Some(system) => request.with_system(system),
        None => request,
    }
}
