//! Error taxonomy for provider calls and ensemble setup.

use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheError;
use crate::provider::ProviderId;

/// Failure of a single provider call.
///
/// These never escape [`crate::ensemble::Ensemble::dispatch`]; they are
/// recorded per provider in the outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{provider} rejected credentials: {message}")]
    Auth { provider: ProviderId, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model {model_id} unavailable: {message}")]
    ModelUnavailable { model_id: String, message: String },

    #[error("provider rejected request ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ModelError {
    /// Whether a provider's fallback model should be tried after this error.
    ///
    /// Credential and request rejections are not retried; the request is not
    /// assumed safe to replay against a different model.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::ModelUnavailable { .. }
        )
    }

    /// Short stable label for logs and ledger keys.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::Provider { .. } => "provider",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Crate-level error. Only setup problems surface from dispatch.
#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no provider could be constructed: {0}")]
    NoProviders(String),

    #[error("{provider} call failed: {source}")]
    Model {
        provider: ProviderId,
        #[source]
        source: ModelError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl EnsembleError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::NoProviders(_))
    }
}

pub type EnsembleResult<T> = Result<T, EnsembleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_eligibility() {
        assert!(ModelError::Transport("reset".into()).is_fallback_eligible());
        assert!(ModelError::Timeout(Duration::from_secs(1)).is_fallback_eligible());
        assert!(ModelError::ModelUnavailable {
            model_id: "m".into(),
            message: "deprecated".into()
        }
        .is_fallback_eligible());

        assert!(!ModelError::Auth {
            provider: ProviderId::OpenAi,
            message: "bad key".into()
        }
        .is_fallback_eligible());
        assert!(!ModelError::Provider {
            status: 400,
            message: "bad request".into()
        }
        .is_fallback_eligible());
        assert!(!ModelError::MalformedResponse("no content".into()).is_fallback_eligible());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(EnsembleError::Configuration("x".into()).is_configuration());
        assert!(EnsembleError::NoProviders("x".into()).is_configuration());
        let model = EnsembleError::Model {
            provider: ProviderId::Google,
            source: ModelError::Transport("down".into()),
        };
        assert!(!model.is_configuration());
        assert!(model.to_string().contains("google"));
    }
}
