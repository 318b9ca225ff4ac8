//! Per-host rate limiting and global concurrency control
//!
//! Each host gets a token bucket (configured capacity and refill rate); a
//! global semaphore additionally caps total in-flight fetches. Workers must
//! acquire both before fetching. Acquisition waits are bounded: a worker
//! that cannot be admitted in time reports a synthetic RATE_LIMITED soft
//! failure and the job is rescheduled.
//!
//! Ordering: no FIFO guarantee across hosts; within one host, waiters are
//! admitted in arrival order.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission failed within the wait bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDenied {
    /// Per-host bucket had no token within the bound
    HostSaturated,
    /// Global concurrency cap not acquired within the bound
    GloballySaturated,
}

impl std::fmt::Display for RateDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostSaturated => write!(f, "per-host rate limit wait exceeded"),
            Self::GloballySaturated => write!(f, "global concurrency wait exceeded"),
        }
    }
}

/// Admission ticket; dropping it releases the global slot.
///
/// Host tokens are consumed, not held, so only the semaphore permit lives
/// inside.
pub struct RatePermit {
    _global: OwnedSemaphorePermit,
}

/// Per-host token buckets plus a global concurrency cap
pub struct RateGovernor {
    per_host: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    global: Arc<Semaphore>,
    wait_bound: Duration,
}

impl RateGovernor {
    /// Create a governor.
    ///
    /// `capacity` is the per-host burst size, `refill_per_sec` the sustained
    /// per-host rate, `global_concurrency` the total in-flight fetch cap,
    /// and `wait_bound` the maximum time a worker may wait for admission.
    pub fn new(
        capacity: u32,
        refill_per_sec: u32,
        global_concurrency: usize,
        wait_bound: Duration,
    ) -> Self {
        let refill = NonZeroU32::new(refill_per_sec.max(1)).expect("non-zero refill");
        let burst = NonZeroU32::new(capacity.max(1)).expect("non-zero capacity");
        let quota = Quota::per_second(refill).allow_burst(burst);

        Self {
            per_host: RateLimiter::keyed(quota),
            global: Arc::new(Semaphore::new(global_concurrency.max(1))),
            wait_bound,
        }
    }

    /// Acquire a global slot and a token for `host`, waiting at most the
    /// configured bound for each.
    ///
    /// # Errors
    ///
    /// [`RateDenied`] when either acquisition exceeds the bound; nothing is
    /// leaked in that case (an acquired global permit is dropped).
    pub async fn admit(&self, host: &str) -> Result<RatePermit, RateDenied> {
        let global = tokio::time::timeout(
            self.wait_bound,
            Arc::clone(&self.global).acquire_owned(),
        )
        .await
        .map_err(|_| RateDenied::GloballySaturated)?
        .expect("governor semaphore never closes");

        tokio::time::timeout(
            self.wait_bound,
            self.per_host.until_key_ready(&host.to_string()),
        )
        .await
        .map_err(|_| RateDenied::HostSaturated)?;

        Ok(RatePermit { _global: global })
    }

    /// Non-waiting probe used by tests and admission metrics
    pub fn check(&self, host: &str) -> bool {
        self.per_host.check_key(&host.to_string()).is_ok()
    }

    /// Free slots under the global cap
    pub fn available_slots(&self) -> usize {
        self.global.available_permits()
    }
}
