//! Process-wide backpressure on outbound provider calls.
//!
//! Every provider call holds a [`RatePermit`] for its whole duration. The
//! global budget bounds total in-flight calls no matter how many dispatches
//! run at once; optional per-provider budgets bound each backend further.
//! Acquisition only ever waits, it never rejects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

use crate::provider::ProviderId;

/// Default global concurrency budget.
pub const DEFAULT_RATE_LIMIT: usize = 10;

#[derive(Debug)]
struct LimiterState {
    global: Arc<Semaphore>,
    capacity: usize,
    per_provider: HashMap<ProviderId, Arc<Semaphore>>,
    acquisitions: AtomicU64,
    in_flight: AtomicUsize,
}

/// Cloneable handle; clones share one budget.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<LimiterState>,
}

/// Held for the duration of one provider call. Dropping it releases the slot.
#[derive(Debug)]
pub struct RatePermit {
    _global: Option<OwnedSemaphorePermit>,
    _provider: Option<OwnedSemaphorePermit>,
    state: Arc<LimiterState>,
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        Self::with_provider_budgets(capacity, std::iter::empty())
    }

    /// Global budget plus per-provider budgets. A budget of zero is treated
    /// as one so that a provider can never deadlock.
    pub fn with_provider_budgets(
        capacity: usize,
        budgets: impl IntoIterator<Item = (ProviderId, usize)>,
    ) -> Self {
        let capacity = capacity.max(1);
        let per_provider = budgets
            .into_iter()
            .map(|(provider, budget)| (provider, Arc::new(Semaphore::new(budget.max(1)))))
            .collect();
        Self {
            state: Arc::new(LimiterState {
                global: Arc::new(Semaphore::new(capacity)),
                capacity,
                per_provider,
                acquisitions: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a slot for `provider`. The provider slot is taken first so a
    /// saturated provider never pins global slots while it waits.
    pub async fn acquire(&self, provider: ProviderId) -> RatePermit {
        let provider_permit = match self.state.per_provider.get(&provider) {
            Some(sem) => Self::wait(Arc::clone(sem), provider).await,
            None => None,
        };
        let global_permit = Self::wait(Arc::clone(&self.state.global), provider).await;

        self.state.acquisitions.fetch_add(1, Ordering::AcqRel);
        let in_flight = self.state.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(%provider, in_flight, "rate permit acquired");

        RatePermit {
            _global: global_permit,
            _provider: provider_permit,
            state: Arc::clone(&self.state),
        }
    }

    async fn wait(sem: Arc<Semaphore>, provider: ProviderId) -> Option<OwnedSemaphorePermit> {
        match sem.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                // Semaphores here are never closed; degrade to unbounded
                // rather than reject the call.
                warn!(%provider, "rate limiter semaphore closed, proceeding unbounded");
                None
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    /// Free global slots right now.
    pub fn available(&self) -> usize {
        self.state.global.available_permits()
    }

    /// Total permits ever granted.
    pub fn total_acquisitions(&self) -> u64 {
        self.state.acquisitions.load(Ordering::Acquire)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT)
    }
}
