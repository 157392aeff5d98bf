//! Token bucket capability and its GCRA implementation
//!
//! The engine only needs one thing from a bucket: an atomic "take `n` tokens
//! if you have them". [`GcraBucket`] provides that with the Generic Cell Rate
//! Algorithm, which tracks a single theoretical arrival time (TAT) per bucket
//! instead of a token count plus a refill timestamp.

use super::Instant;
use super::rate::BucketParams;
use std::sync::atomic::{AtomicI64, Ordering};

/// A refill-rate/burst-limited counter that is safe to share between threads
///
/// Time is always passed in explicitly so callers (and tests) control the
/// clock.
pub trait TokenBucket: Send + Sync + 'static {
    /// Create a full bucket. `origin` is the earliest instant the bucket will
    /// be asked about.
    fn with_params(params: BucketParams, origin: Instant) -> Self
    where
        Self: Sized;

    /// Take `n` tokens if at least `n` are available at `now`
    ///
    /// Returns `false` without consuming anything otherwise.
    fn try_consume(&self, n: u32, now: Instant) -> bool;

    /// Whole tokens available at `now`, without consuming any
    fn remaining(&self, now: Instant) -> u32;

    /// Maximum number of tokens the bucket can hold
    fn capacity(&self) -> u32;
}

/// Lock-free GCRA token bucket
///
/// The bucket stores the theoretical arrival time as nanoseconds since its
/// origin. A request for `n` tokens advances the TAT by `n` emission
/// intervals; it is allowed when the advanced TAT stays within `burst`
/// intervals of now.
///
/// # Example
///
/// ```
/// use loadgate::{BucketParams, GcraBucket, Instant, TokenBucket};
///
/// let now = Instant::now();
/// let bucket = GcraBucket::new(BucketParams::per_second(1.0, 3).unwrap(), now);
///
/// assert!(bucket.try_consume(1, now));
/// assert!(bucket.try_consume(2, now));
/// assert!(!bucket.try_consume(1, now));
/// ```
#[derive(Debug)]
pub struct GcraBucket {
    origin: Instant,
    emission_interval_ns: i64,
    tolerance_ns: i64,
    burst: u32,
    tat: AtomicI64,
}

impl GcraBucket {
    /// Create a full bucket
    pub fn new(params: BucketParams, origin: Instant) -> Self {
        let emission_interval_ns = i64::try_from(params.rate().period().as_nanos())
            .unwrap_or(i64::MAX)
            .max(1);
        GcraBucket {
            origin,
            emission_interval_ns,
            tolerance_ns: emission_interval_ns.saturating_mul(params.burst() as i64),
            burst: params.burst(),
            tat: AtomicI64::new(0),
        }
    }

    fn offset_ns(&self, now: Instant) -> i64 {
        i64::try_from(now.saturating_duration_since(self.origin).as_nanos()).unwrap_or(i64::MAX)
    }
}

impl TokenBucket for GcraBucket {
    fn with_params(params: BucketParams, origin: Instant) -> Self {
        GcraBucket::new(params, origin)
    }

    fn try_consume(&self, n: u32, now: Instant) -> bool {
        if n == 0 {
            return true;
        }
        if n > self.burst {
            return false;
        }

        let now_ns = self.offset_ns(now);
        let increment = self.emission_interval_ns.saturating_mul(n as i64);

        let mut current = self.tat.load(Ordering::Acquire);
        loop {
            let new_tat = current.max(now_ns).saturating_add(increment);
            if new_tat.saturating_sub(now_ns) > self.tolerance_ns {
                return false;
            }

            match self.tat.compare_exchange_weak(
                current,
                new_tat,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn remaining(&self, now: Instant) -> u32 {
        let now_ns = self.offset_ns(now);
        let debt = self.tat.load(Ordering::Acquire).max(now_ns) - now_ns;
        let room = self.tolerance_ns.saturating_sub(debt).max(0);
        ((room / self.emission_interval_ns) as u32).min(self.burst)
    }

    fn capacity(&self) -> u32 {
        self.burst
    }
}
