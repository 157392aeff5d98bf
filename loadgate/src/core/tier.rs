//! Tier configuration
//!
//! A tier binds an ordinal rank to two sets of bucket parameters: the trigger
//! budget that watches aggregate demand, and the per-visitor limits enforced
//! while the tier is active.

use super::bucket::TokenBucket;
use super::rate::BucketParams;
use super::{ConfigError, Instant};

/// Static definition of one tier, as supplied by configuration
///
/// # Example
///
/// ```
/// use loadgate::{BucketParams, TierConfig};
///
/// // Activate when more than 10 req/s arrive in aggregate (burst 10);
/// // visitors then get 0.5 req/s with a burst of 3.
/// let tier = TierConfig::new(
///     0,
///     BucketParams::per_second(10.0, 10).unwrap(),
///     BucketParams::per_second(0.5, 3).unwrap(),
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    /// Rank of the tier; higher orders take precedence when several trigger
    pub order: usize,
    /// Aggregate budget drained once per admitted request
    pub trigger: BucketParams,
    /// Per-visitor limits applied while this tier is active
    pub visitor: BucketParams,
}

impl TierConfig {
    pub fn new(order: usize, trigger: BucketParams, visitor: BucketParams) -> Self {
        TierConfig {
            order,
            trigger,
            visitor,
        }
    }
}

/// A configured tier with its live trigger budget
#[derive(Debug)]
pub struct Tier<B> {
    order: usize,
    trigger: B,
    visitor: BucketParams,
}

impl<B: TokenBucket> Tier<B> {
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn trigger(&self) -> &B {
        &self.trigger
    }

    pub fn visitor_params(&self) -> BucketParams {
        self.visitor
    }

    /// Validate a set of tier definitions and instantiate their trigger budgets
    ///
    /// Definitions may arrive in any order; they are sorted by `order`, which
    /// must then read exactly `0, 1, .., N-1`. A gap or a duplicate is
    /// reported as [`ConfigError::NonContiguousTiers`] naming the first
    /// offending position.
    pub fn build_all(
        mut configs: Vec<TierConfig>,
        origin: Instant,
    ) -> Result<Vec<Tier<B>>, ConfigError> {
        configs.sort_by_key(|c| c.order);

        configs
            .into_iter()
            .enumerate()
            .map(|(expected, config)| {
                if config.order != expected {
                    return Err(ConfigError::NonContiguousTiers {
                        expected,
                        found: config.order,
                    });
                }
                Ok(Tier {
                    order: config.order,
                    trigger: B::with_params(config.trigger, origin),
                    visitor: config.visitor,
                })
            })
            .collect()
    }
}
