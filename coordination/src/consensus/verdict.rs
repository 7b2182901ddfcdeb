//! Structured debate verdicts and their aggregation.

use serde::{Deserialize, Deserializer, Serialize};

/// Pass/fail judgement from one debate participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// The stricter of two verdicts.
    pub fn stricter(self, other: Verdict) -> Verdict {
        if self == Verdict::Fail || other == Verdict::Fail {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Disagreement always resolves to [`Verdict::Fail`]; verdicts are never
/// averaged. `None` when there is nothing to aggregate.
pub fn aggregate(verdicts: impl IntoIterator<Item = Verdict>) -> Option<Verdict> {
    verdicts.into_iter().reduce(Verdict::stricter)
}

/// Whether every verdict is the same (vacuously false when empty).
pub fn is_unanimous(verdicts: &[Verdict]) -> bool {
    match verdicts.split_first() {
        Some((first, rest)) => rest.iter().all(|v| v == first),
        None => false,
    }
}

/// Models write verdicts in many spellings; anything not clearly a pass is
/// read as a fail.
fn lenient_verdict<'de, D: Deserializer<'de>>(de: D) -> Result<Verdict, D::Error> {
    let raw = String::deserialize(de)?;
    let normalized = raw.trim().to_ascii_lowercase();
    Ok(match normalized.as_str() {
        "pass" | "passed" | "approve" | "approved" | "accept" | "yes" => Verdict::Pass,
        _ => Verdict::Fail,
    })
}

/// One participant's structured reply in a debate round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTurn {
    #[serde(deserialize_with = "lenient_verdict")]
    pub verdict: Verdict,
    /// 0 to 10 quality score of the best answer seen.
    #[serde(default)]
    pub score: f64,
    /// The participant's current best answer.
    #[serde(default, alias = "best_response")]
    pub answer: String,
    #[serde(default)]
    pub critique: String,
}
