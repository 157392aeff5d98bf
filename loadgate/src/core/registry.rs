//! Per-client visitor registry
//!
//! The registry partitions visitors across shards, each behind its own lock.
//! A lookup only ever locks one shard, and the idle sweep walks the shards
//! one at a time, so a sweep never holds up request-path lookups for longer
//! than one shard's worth of iteration.

use super::bucket::TokenBucket;
use super::load_state::LoadState;
use super::rate::BucketParams;
use super::tier::Tier;
use super::{ConfigError, Instant};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[cfg(feature = "ahash")]
use ahash::{AHashMap as HashMap, RandomState};
#[cfg(not(feature = "ahash"))]
use std::collections::{HashMap, hash_map::RandomState};
#[cfg(not(feature = "ahash"))]
use std::hash::BuildHasher;

/// Rate-limiting state of a single client identifier
///
/// Holds one default bucket plus one bucket per configured tier, in tier
/// order. The tier buckets are built by mapping over the tier list, so their
/// count always matches it.
pub struct VisitorState<B> {
    default: B,
    tiers: Vec<B>,
    last_seen: Instant,
}

impl<B: TokenBucket> VisitorState<B> {
    fn new(default: BucketParams, tiers: &[BucketParams], now: Instant) -> Self {
        VisitorState {
            default: B::with_params(default, now),
            tiers: tiers.iter().map(|p| B::with_params(*p, now)).collect(),
            last_seen: now,
        }
    }

    /// Drain one unit from every bucket, then report whether the bucket
    /// matching `state` had one to give
    ///
    /// All buckets are drained regardless of the active state so that a tier
    /// escalation never hands a visitor a full, unused strict-tier bucket.
    pub fn consume(&self, state: LoadState, now: Instant) -> bool {
        let default_ok = self.default.try_consume(1, now);

        let mut gated = match state {
            LoadState::Default => Some(default_ok),
            LoadState::Tier(_) => None,
        };
        for (order, bucket) in self.tiers.iter().enumerate() {
            let ok = bucket.try_consume(1, now);
            if state == LoadState::Tier(order) {
                gated = Some(ok);
            }
        }

        // A state naming an unknown tier cannot come out of the load-state
        // machine sharing our tier list; deny rather than fall back.
        gated.unwrap_or(false)
    }

    /// Remaining tokens per bucket, without consuming
    pub fn budget(&self, now: Instant) -> VisitorBudget {
        VisitorBudget {
            default: self.default.remaining(now),
            tiers: self.tiers.iter().map(|b| b.remaining(now)).collect(),
        }
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

/// Snapshot of a visitor's remaining budgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorBudget {
    /// Tokens left in the default bucket
    pub default: u32,
    /// Tokens left in each tier bucket, indexed by tier order
    pub tiers: Vec<u32>,
}

/// Concurrent map from client identifier to [`VisitorState`]
pub struct VisitorRegistry<B> {
    shards: Vec<Mutex<HashMap<String, VisitorState<B>>>>,
    hasher: RandomState,
    default_params: BucketParams,
    tier_params: Vec<BucketParams>,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl<B: TokenBucket> VisitorRegistry<B> {
    /// Create a registry whose visitors get `default_params` plus one bucket
    /// per tier in `tiers`
    pub fn new(
        default_params: BucketParams,
        tiers: &[Tier<B>],
        shard_count: usize,
    ) -> Result<Self, ConfigError> {
        if shard_count == 0 {
            return Err(ConfigError::ZeroShards);
        }

        Ok(VisitorRegistry {
            shards: (0..shard_count)
                .map(|_| Mutex::new(HashMap::default()))
                .collect(),
            hasher: RandomState::new(),
            default_params,
            tier_params: tiers.iter().map(Tier::visitor_params).collect(),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        })
    }

    /// Default shard count: four shards per available CPU
    pub fn default_shard_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            * 4
    }

    fn shard(&self, id: &str) -> &Mutex<HashMap<String, VisitorState<B>>> {
        let index = (self.hasher.hash_one(id) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Look up the visitor for `id`, creating it on first contact, and run
    /// `f` on it
    ///
    /// The existence check, the creation, the last-seen update and `f` all
    /// run under the visitor's shard lock. Two concurrent first contacts for
    /// the same identifier therefore produce exactly one visitor, and one
    /// visitor's buckets are never drained by two requests at once.
    pub fn get_or_create<R>(
        &self,
        id: &str,
        now: Instant,
        f: impl FnOnce(&VisitorState<B>) -> R,
    ) -> R {
        let mut shard = self.shard(id).lock();

        if let Some(visitor) = shard.get_mut(id) {
            visitor.last_seen = now;
            return f(visitor);
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        let visitor = shard
            .entry(id.to_owned())
            .or_insert_with(|| VisitorState::new(self.default_params, &self.tier_params, now));
        f(visitor)
    }

    /// Budgets of an existing visitor, without touching its last-seen time
    pub fn peek(&self, id: &str, now: Instant) -> Option<VisitorBudget> {
        self.shard(id).lock().get(id).map(|v| v.budget(now))
    }

    /// Remove every visitor idle for longer than `idle_threshold`
    ///
    /// Returns the number of visitors removed.
    pub fn sweep(&self, idle_threshold: Duration, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, v| now.saturating_duration_since(v.last_seen) <= idle_threshold);
            removed += before - shard.len();
        }

        self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of live visitors
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Total visitors ever created
    pub fn created_total(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Total visitors removed by sweeps
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GcraBucket, TierConfig};
    use std::sync::{Arc, Barrier};

    fn registry(shards: usize) -> VisitorRegistry<GcraBucket> {
        let tiers = Tier::build_all(
            vec![TierConfig::new(
                0,
                BucketParams::per_second(10.0, 10).unwrap(),
                BucketParams::per_second(0.5, 3).unwrap(),
            )],
            Instant::now(),
        )
        .unwrap();
        VisitorRegistry::new(BucketParams::per_second(1.0, 5).unwrap(), &tiers, shards).unwrap()
    }

    #[test]
    fn test_zero_shards_rejected() {
        let tiers: Vec<Tier<GcraBucket>> = Vec::new();
        let result =
            VisitorRegistry::new(BucketParams::per_second(1.0, 5).unwrap(), &tiers, 0);
        assert!(matches!(result, Err(ConfigError::ZeroShards)));
    }

    #[test]
    fn test_visitor_created_once_and_reused() {
        let reg = registry(4);
        let now = Instant::now();

        reg.get_or_create("10.0.0.1", now, |_| ());
        reg.get_or_create("10.0.0.1", now, |_| ());
        reg.get_or_create("10.0.0.2", now, |_| ());

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.created_total(), 2);
    }

    #[test]
    fn test_tier_buckets_match_tier_count() {
        let reg = registry(1);
        let now = Instant::now();

        let tier_count = reg.get_or_create("a", now, |v| v.budget(now).tiers.len());
        assert_eq!(tier_count, 1);
        assert_eq!(
            reg.peek("a", now),
            Some(VisitorBudget {
                default: 5,
                tiers: vec![3]
            })
        );
        assert_eq!(reg.peek("missing", now), None);
    }

    #[test]
    fn test_consume_drains_all_buckets() {
        let reg = registry(1);
        let now = Instant::now();

        assert!(reg.get_or_create("a", now, |v| v.consume(LoadState::Default, now)));
        assert!(reg.get_or_create("a", now, |v| v.consume(LoadState::Default, now)));

        let budget = reg.peek("a", now).unwrap();
        assert_eq!(budget.default, 3);
        assert_eq!(budget.tiers, vec![1]);
    }

    #[test]
    fn test_consume_gates_on_active_bucket_only() {
        let reg = registry(1);
        let now = Instant::now();

        // Three requests exhaust the tier bucket (burst 3)
        for _ in 0..3 {
            assert!(reg.get_or_create("a", now, |v| v.consume(LoadState::Default, now)));
        }

        // Default still has 2 left, tier 0 has none
        assert!(reg.get_or_create("a", now, |v| v.consume(LoadState::Default, now)));
        assert!(!reg.get_or_create("a", now, |v| v.consume(LoadState::Tier(0), now)));
    }

    #[test]
    fn test_unknown_tier_is_denied() {
        let reg = registry(1);
        let now = Instant::now();
        assert!(!reg.get_or_create("a", now, |v| v.consume(LoadState::Tier(7), now)));
    }

    #[test]
    fn test_concurrent_first_contact_creates_one_visitor() {
        let reg = Arc::new(registry(8));
        let now = Instant::now();
        let barrier = Arc::new(Barrier::new(16));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let reg = Arc::clone(&reg);
                    let barrier = Arc::clone(&barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        reg.get_or_create("shared", now, |v| v.consume(LoadState::Default, now))
                            as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.created_total(), 1);
        // A duplicate visitor would have handed out a second default burst
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_sweep_removes_only_idle_visitors() {
        let reg = registry(4);
        let start = Instant::now();

        reg.get_or_create("idle", start, |_| ());
        reg.get_or_create("active", start, |_| ());

        let later = start + Duration::from_secs(120);
        reg.get_or_create("active", later, |_| ());

        let removed = reg.sweep(Duration::from_secs(60), later + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert_eq!(reg.len(), 1);
        assert!(reg.peek("idle", later).is_none());
        assert!(reg.peek("active", later).is_some());
        assert_eq!(reg.evicted_total(), 1);
    }

    #[test]
    fn test_sweep_keeps_visitor_at_exact_threshold() {
        let reg = registry(1);
        let start = Instant::now();
        reg.get_or_create("edge", start, |_| ());

        assert_eq!(reg.sweep(Duration::from_secs(60), start + Duration::from_secs(60)), 0);
        assert_eq!(reg.sweep(Duration::from_secs(60), start + Duration::from_secs(61)), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_evicted_visitor_starts_fresh() {
        let reg = registry(1);
        let start = Instant::now();

        for _ in 0..5 {
            reg.get_or_create("a", start, |v| v.consume(LoadState::Default, start));
        }
        assert_eq!(reg.peek("a", start).unwrap().default, 0);

        let later = start + Duration::from_secs(1);
        reg.sweep(Duration::ZERO, later);
        reg.get_or_create("a", later, |_| ());
        assert_eq!(reg.peek("a", later).unwrap().default, 5);
        assert_eq!(reg.created_total(), 2);
    }
}
