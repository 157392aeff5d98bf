//! Rate calculation for the token buckets
//!
//! This module provides the [`Rate`] type which represents emission intervals
//! for token-based rate limiting, and [`BucketParams`] which pairs a rate with
//! a burst size. Human-friendly specifications such as "0.5 requests per
//! second" are converted into precise emission intervals.

use std::time::Duration;

use super::ConfigError;


/// Rate defines the emission interval of a token bucket
///
/// A `Rate` represents how frequently tokens are replenished. It encapsulates
/// "N requests per time period" as the duration between two token emissions.
///
/// # Examples
///
/// ```
/// use loadgate::Rate;
/// use std::time::Duration;
///
/// // 10 requests per second
/// let rate = Rate::per_second(10.0).unwrap();
/// assert_eq!(rate.period(), Duration::from_millis(100));
///
/// // Half a request per second (one every 2 seconds)
/// let rate = Rate::per_second(0.5).unwrap();
/// assert_eq!(rate.period(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    period: Duration,
}

impl Rate {
    /// Creates a rate with a custom period between token emissions
    ///
    /// Returns [`ConfigError::InvalidRate`] for a zero period, which would
    /// mean an infinitely fast refill.
    pub fn new(period: Duration) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::InvalidRate(f64::INFINITY));
        }
        Ok(Rate { period })
    }

    /// Creates a rate of `n` requests per second
    ///
    /// Fractional rates are allowed. Zero, negative, and non-finite values
    /// are rejected.
    pub fn per_second(n: f64) -> Result<Self, ConfigError> {
        Self::per_duration(n, Duration::from_secs(1))
    }

    /// Creates a rate of `n` requests per minute
    ///
    /// ```
    /// use loadgate::Rate;
    /// use std::time::Duration;
    ///
    /// let rate = Rate::per_minute(60.0).unwrap();
    /// assert_eq!(rate.period(), Duration::from_secs(1));
    /// ```
    pub fn per_minute(n: f64) -> Result<Self, ConfigError> {
        Self::per_duration(n, Duration::from_secs(60))
    }

    /// Creates a rate from a count and a period in seconds
    ///
    /// ```
    /// use loadgate::Rate;
    /// use std::time::Duration;
    ///
    /// // 100 requests per 60 seconds = 1 request every 0.6 seconds
    /// let rate = Rate::from_count_and_period(100, 60).unwrap();
    /// assert_eq!(rate.period(), Duration::from_millis(600));
    /// ```
    pub fn from_count_and_period(count: u64, period_seconds: u64) -> Result<Self, ConfigError> {
        if period_seconds == 0 {
            return Err(ConfigError::InvalidRate(f64::INFINITY));
        }
        Self::per_duration(count as f64, Duration::from_secs(period_seconds))
    }

    fn per_duration(n: f64, window: Duration) -> Result<Self, ConfigError> {
        if !n.is_finite() || n <= 0.0 {
            return Err(ConfigError::InvalidRate(n));
        }
        let period_ns = window.as_nanos() as f64 / n;
        if period_ns < 1.0 || period_ns > i64::MAX as f64 {
            return Err(ConfigError::InvalidRate(n));
        }
        Ok(Rate {
            period: Duration::from_nanos(period_ns.round() as u64),
        })
    }

    /// Returns the emission interval (period) of this rate
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tokens emitted per second, mostly for display purposes
    pub fn as_per_second(&self) -> f64 {
        1.0 / self.period.as_secs_f64()
    }
}

/// Refill rate plus burst capacity of a token bucket
///
/// # Example
///
/// ```
/// use loadgate::{BucketParams, Rate};
///
/// let params = BucketParams::new(Rate::per_second(1.0).unwrap(), 5).unwrap();
/// assert_eq!(params.burst(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    rate: Rate,
    burst: u32,
}

impl BucketParams {
    /// Pairs a rate with a burst size; a zero burst is rejected
    pub fn new(rate: Rate, burst: u32) -> Result<Self, ConfigError> {
        if burst == 0 {
            return Err(ConfigError::ZeroBurst);
        }
        Ok(BucketParams { rate, burst })
    }

    /// Shorthand for `BucketParams::new(Rate::per_second(per_second)?, burst)`
    pub fn per_second(per_second: f64, burst: u32) -> Result<Self, ConfigError> {
        Self::new(Rate::per_second(per_second)?, burst)
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}
