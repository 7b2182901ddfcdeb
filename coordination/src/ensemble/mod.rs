//! Multi-provider ensemble dispatch.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    Pipeline stage                          │
//! │  • builds GenerationRequest                                │
//! │  • reads EnsembleOutcome (consensus + confidence)          │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                       Ensemble                             │
//! │  • fans out to every ModelClient concurrently              │
//! │  • isolates per-provider failures                          │
//! │  • hands votes to ConsensusBuilder                         │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!           ┌───────────────┼───────────────┐
//!           ▼               ▼               ▼
//!     ┌───────────┐   ┌───────────┐   ┌───────────┐
//!     │ Response  │   │   Rate    │   │   Cost    │
//!     │  Cache    │   │  Limiter  │   │  Ledger   │
//!     └───────────┘   └───────────┘   └───────────┘
//!            (all held by one EnsembleContext)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ensemble_coordination::{Credentials, Ensemble, EnsembleConfig, EnsembleContext};
//!
//! let ctx = EnsembleContext::open(EnsembleConfig::from_env()).await?.shared();
//! let ensemble = Ensemble::from_config(ctx, &Credentials::from_env())?;
//! let outcome = ensemble.dispatch(&GenerationRequest::new(prompt)).await?;
//! if outcome.is_inconclusive() { /* stage-specific handling */ }
//! ```

pub mod context;
pub mod dispatch;

pub use context::{EnsembleContext, SharedEnsembleContext};
pub use dispatch::{call_client, Ensemble, EnsembleOutcome, PollOutcome, ProviderFailure};
