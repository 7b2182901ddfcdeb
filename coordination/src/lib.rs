//! Multi-provider LLM ensemble coordination.
//!
//! This library turns several independent, unreliable text-generation
//! backends into one judgement per request:
//!
//! - [`provider`]: per-provider [`ModelClient`] adapters (Anthropic, OpenAI,
//!   Gemini, xAI, DeepSeek) with one-shot model fallback, pricing and
//!   tier-based model selection
//! - [`ensemble`]: concurrent fan-out with isolated per-provider failures
//! - [`consensus`]: `parallel_vote`, `debate`, `hybrid` and `single_ai_call`
//! - [`rate_limit`]: process-wide backpressure on in-flight calls
//! - [`cache`]: durable content-addressed response cache
//! - [`ledger`]: token, cost and latency accounting
//! - [`structured`]: tolerant decoding of JSON embedded in model prose
//!
//! # Usage
//!
//! ```ignore
//! use ensemble_coordination::{
//!     telemetry, Credentials, Ensemble, EnsembleConfig, EnsembleContext, GenerationRequest,
//!     Strategy,
//! };
//!
//! telemetry::init_tracing();
//! let ctx = EnsembleContext::open(EnsembleConfig::from_env()).await?.shared();
//! let ensemble = Ensemble::from_config(ctx.clone(), &Credentials::from_env())?;
//!
//! let request = GenerationRequest::new("Which segment makes the best clip?")
//!     .with_schema("clip_choice");
//! let outcome = ensemble.dispatch_with(&request, Strategy::Debate).await?;
//! println!("{} ({:.2})", outcome.consensus, outcome.confidence);
//! println!("{:?}", ctx.ledger.snapshot());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod config;
pub mod consensus;
pub mod ensemble;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod structured;
pub mod telemetry;

pub use cache::{CacheCategory, CacheEntry, CacheError, CacheKey, CacheStats, ResponseCache};
pub use config::EnsembleConfig;
pub use consensus::{ConsensusBuilder, ConsensusReport, Strategy, Verdict};
pub use ensemble::{
    Ensemble, EnsembleContext, EnsembleOutcome, PollOutcome, ProviderFailure,
    SharedEnsembleContext,
};
pub use error::{EnsembleError, EnsembleResult, ModelError};
pub use ledger::{CostLedger, LedgerSnapshot, ProviderTotals};
pub use provider::{
    CompletionBackend, Credentials, ModelCatalog, ModelClient, ModelLister, PricingTable,
    PricingTier, ProviderClient, ProviderId, ProviderSpec, RawCompletion,
};
pub use rate_limit::{RateLimiter, RatePermit};
pub use request::{GenerationRequest, GenerationResult};
pub use structured::ParseError;
