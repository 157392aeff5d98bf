//! Global load-state machine
//!
//! Every admitted request drains one unit from each tier's trigger budget.
//! A trigger that cannot be drained means aggregate demand has outrun that
//! tier's budget, so the tier becomes a candidate. Tiers are scanned in
//! ascending order and the last triggered one wins, i.e. the highest-order
//! triggered tier is active. With nothing triggered the state falls back to
//! [`LoadState::Default`].

use super::Instant;
use super::bucket::TokenBucket;
use super::tier::Tier;
use parking_lot::Mutex;
use std::fmt;

/// Which rate-limiting regime is currently enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadState {
    /// No tier is triggered; visitors are held to the default bucket
    #[default]
    Default,
    /// The tier with this order is active
    Tier(usize),
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Default => write!(f, "default"),
            LoadState::Tier(order) => write!(f, "tier{order}"),
        }
    }
}

/// Holds the ordered tiers and the derived active state
pub struct LoadStateMachine<B> {
    tiers: Vec<Tier<B>>,
    state: Mutex<LoadState>,
}

impl<B: TokenBucket> LoadStateMachine<B> {
    /// `tiers` must already be validated and sorted (see [`Tier::build_all`])
    pub fn new(tiers: Vec<Tier<B>>) -> Self {
        LoadStateMachine {
            tiers,
            state: Mutex::new(LoadState::Default),
        }
    }

    /// Drain every trigger budget once and recompute the active state
    ///
    /// The scan and the state write happen under one lock, so concurrent
    /// callers never interleave half-scans. The returned state is the one
    /// the caller must gate its own request on.
    pub fn refresh(&self, now: Instant) -> LoadState {
        let mut state = self.state.lock();

        let mut next = LoadState::Default;
        for tier in &self.tiers {
            if !tier.trigger().try_consume(1, now) {
                next = LoadState::Tier(tier.order());
            }
        }

        if next != *state {
            tracing::info!(from = %*state, to = %next, "load state changed");
            *state = next;
        }
        next
    }

    /// The state computed by the most recent [`refresh`](Self::refresh)
    pub fn current(&self) -> LoadState {
        *self.state.lock()
    }

    pub fn tiers(&self) -> &[Tier<B>] {
        &self.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BucketParams, GcraBucket, TierConfig};
    use std::time::Duration;

    fn machine(triggers: &[(f64, u32)]) -> LoadStateMachine<GcraBucket> {
        let configs = triggers
            .iter()
            .enumerate()
            .map(|(order, &(rate, burst))| {
                TierConfig::new(
                    order,
                    BucketParams::per_second(rate, burst).unwrap(),
                    BucketParams::per_second(1.0, 1).unwrap(),
                )
            })
            .collect();
        LoadStateMachine::new(Tier::build_all(configs, Instant::now()).unwrap())
    }

    #[test]
    fn test_no_tiers_is_always_default() {
        let m = machine(&[]);
        let now = Instant::now();
        for _ in 0..100 {
            assert_eq!(m.refresh(now), LoadState::Default);
        }
    }

    #[test]
    fn test_tier_activates_after_trigger_burst() {
        let m = machine(&[(10.0, 10)]);
        let now = Instant::now();

        for i in 0..10 {
            assert_eq!(m.refresh(now), LoadState::Default, "request {}", i + 1);
        }
        assert_eq!(m.refresh(now), LoadState::Tier(0));
        assert_eq!(m.current(), LoadState::Tier(0));

        // Stays active while demand keeps outrunning the refill
        assert_eq!(m.refresh(now), LoadState::Tier(0));
    }

    #[test]
    fn test_reverts_to_default_once_trigger_refills() {
        let m = machine(&[(10.0, 2)]);
        let now = Instant::now();

        m.refresh(now);
        m.refresh(now);
        assert_eq!(m.refresh(now), LoadState::Tier(0));

        let later = now + Duration::from_secs(1);
        assert_eq!(m.refresh(later), LoadState::Default);
        assert_eq!(m.current(), LoadState::Default);
    }

    #[test]
    fn test_highest_triggered_order_wins() {
        // Tier 1 triggers first (smaller burst), then tier 0 as well
        let m = machine(&[(10.0, 5), (10.0, 3)]);
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(m.refresh(now), LoadState::Default);
        }
        assert_eq!(m.refresh(now), LoadState::Tier(1));
        assert_eq!(m.refresh(now), LoadState::Tier(1));

        // Both triggered now: order 1 still takes precedence over order 0
        assert_eq!(m.refresh(now), LoadState::Tier(1));
    }

    #[test]
    fn test_lower_tier_alone() {
        let m = machine(&[(10.0, 2), (10.0, 50)]);
        let now = Instant::now();

        m.refresh(now);
        m.refresh(now);
        assert_eq!(m.refresh(now), LoadState::Tier(0));
    }

    #[test]
    fn test_display() {
        assert_eq!(LoadState::Default.to_string(), "default");
        assert_eq!(LoadState::Tier(2).to_string(), "tier2");
    }
}
