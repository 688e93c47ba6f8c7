//! Backpressure for de-identification calls.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{MigrateError, Result};

type CallLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Bounds in-flight service calls and their rate across the whole run.
pub struct CallGate {
    permits: Arc<Semaphore>,
    limiter: CallLimiter,
    max_concurrent: usize,
}

impl std::fmt::Debug for CallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGate")
            .field("max_concurrent", &self.max_concurrent)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl CallGate {
    pub fn new(max_concurrent: usize, requests_per_second: u32) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            max_concurrent,
        }
    }

    /// Wait for a call slot; the slot is released when the permit drops.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| MigrateError::deid_fatal("call gate closed"))?,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MigrateError::Cancelled),
            _ = self.limiter.until_ready() => Ok(permit),
        }
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }
}
