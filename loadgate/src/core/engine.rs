//! The admission engine
//!
//! [`AdmissionEngine`] turns a client identifier into a [`Verdict`]:
//!
//! 1. an enabled allow-list must contain the identifier;
//! 2. an enabled deny-list must not contain it;
//! 3. the load-state machine drains its trigger budgets and picks the tier;
//! 4. the visitor for the identifier is looked up or created;
//! 5. every one of the visitor's buckets is drained;
//! 6. the bucket of the active tier (or the default bucket) decides.
//!
//! Engines are ordinary values. Several independently configured engines can
//! live in one process.

use super::access_list::{AccessList, ListKind};
use super::bucket::{GcraBucket, TokenBucket};
use super::load_state::{LoadState, LoadStateMachine};
use super::rate::BucketParams;
use super::registry::{VisitorBudget, VisitorRegistry};
use super::source::ListSource;
use super::task::BackgroundTask;
use super::tier::{Tier, TierConfig};
use super::{ConfigError, Instant};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DEFAULT_RATE_PER_SECOND: f64 = 1.0;
const DEFAULT_BURST: u32 = 5;
const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(3 * 60);
const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(3 * 60);
const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(3 * 60);

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Pass the request through
    Admit,
    /// Rejected by the allow-list or deny-list
    RejectPolicy,
    /// Rejected because the client's active budget is exhausted
    RejectRate,
}

impl Verdict {
    pub fn is_admitted(self) -> bool {
        matches!(self, Verdict::Admit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Admit => "admit",
            Verdict::RejectPolicy => "reject_policy",
            Verdict::RejectRate => "reject_rate",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one access list
#[derive(Clone)]
pub struct ListConfig {
    enabled: bool,
    source: Option<Arc<dyn ListSource>>,
    refresh_period: Duration,
}

impl ListConfig {
    /// An enabled list with no source yet; building an engine from it fails
    /// until [`source`](Self::source) is set
    pub fn enabled() -> Self {
        ListConfig {
            enabled: true,
            source: None,
            refresh_period: DEFAULT_REFRESH_PERIOD,
        }
    }

    pub fn disabled() -> Self {
        ListConfig {
            enabled: false,
            ..Self::enabled()
        }
    }

    /// Shorthand for an enabled list reading from `source`
    pub fn from_source(source: impl ListSource + 'static) -> Self {
        Self::enabled().source(Arc::new(source))
    }

    pub fn source(mut self, source: Arc<dyn ListSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period = period;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl fmt::Debug for ListConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListConfig")
            .field("enabled", &self.enabled)
            .field("source", &self.source.as_ref().map(|s| s.describe()))
            .field("refresh_period", &self.refresh_period)
            .finish()
    }
}

/// Settings for the idle-visitor sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    pub enabled: bool,
    /// How often the sweep runs
    pub period: Duration,
    /// Visitors idle for longer than this are removed
    pub idle_threshold: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            enabled: true,
            period: DEFAULT_SWEEP_PERIOD,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

impl SweepConfig {
    pub fn disabled() -> Self {
        SweepConfig {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Counters and gauges describing an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub admitted: u64,
    pub rejected_policy: u64,
    pub rejected_rate: u64,
    pub visitors: usize,
    pub visitors_created: u64,
    pub visitors_evicted: u64,
    pub list_refresh_failures: u64,
    pub state: LoadState,
    pub tiers: usize,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    rejected_policy: AtomicU64,
    rejected_rate: AtomicU64,
}

/// Builder for an [`AdmissionEngine`]
///
/// Unset values fall back to: default rate 1 req/s, default burst 5, no
/// tiers, both lists disabled, sweep every 3 minutes for visitors idle
/// longer than 3 minutes. Lists refresh every 3 minutes unless configured
/// otherwise.
///
/// # Example
///
/// ```
/// use loadgate::{AdmissionEngine, BucketParams, SweepConfig, TierConfig, Verdict};
///
/// # tokio_test_block_on(async {
/// let engine = AdmissionEngine::builder()
///     .default_limit(BucketParams::per_second(1.0, 5).unwrap())
///     .tier(TierConfig::new(
///         0,
///         BucketParams::per_second(10.0, 10).unwrap(),
///         BucketParams::per_second(0.5, 3).unwrap(),
///     ))
///     .sweep(SweepConfig::disabled())
///     .start()
///     .await
///     .unwrap();
///
/// assert_eq!(engine.admit("10.0.0.1"), Verdict::Admit);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct EngineBuilder<B = GcraBucket> {
    default_limit: Option<BucketParams>,
    tiers: Vec<TierConfig>,
    allow_list: ListConfig,
    deny_list: ListConfig,
    sweep: SweepConfig,
    shards: Option<usize>,
    _bucket: PhantomData<fn() -> B>,
}

impl<B: TokenBucket> Default for EngineBuilder<B> {
    fn default() -> Self {
        EngineBuilder {
            default_limit: None,
            tiers: Vec::new(),
            allow_list: ListConfig::disabled(),
            deny_list: ListConfig::disabled(),
            sweep: SweepConfig::default(),
            shards: None,
            _bucket: PhantomData,
        }
    }
}

impl EngineBuilder {
    /// Builder for an engine backed by [`GcraBucket`]s
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: TokenBucket> EngineBuilder<B> {
    /// Limits applied to every visitor while no tier is active
    pub fn default_limit(mut self, params: BucketParams) -> Self {
        self.default_limit = Some(params);
        self
    }

    /// Add one tier; orders must end up contiguous from 0
    pub fn tier(mut self, tier: TierConfig) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn tiers(mut self, tiers: impl IntoIterator<Item = TierConfig>) -> Self {
        self.tiers.extend(tiers);
        self
    }

    pub fn allow_list(mut self, config: ListConfig) -> Self {
        self.allow_list = config;
        self
    }

    pub fn deny_list(mut self, config: ListConfig) -> Self {
        self.deny_list = config;
        self
    }

    pub fn sweep(mut self, config: SweepConfig) -> Self {
        self.sweep = config;
        self
    }

    /// Number of registry shards (defaults to four per CPU)
    pub fn registry_shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (kind, list) in [
            (ListKind::Allow, &self.allow_list),
            (ListKind::Deny, &self.deny_list),
        ] {
            if !list.enabled {
                continue;
            }
            if list.source.is_none() {
                return Err(ConfigError::MissingListSource(kind));
            }
            if list.refresh_period.is_zero() {
                return Err(ConfigError::ZeroDuration(match kind {
                    ListKind::Allow => "allow-list refresh period",
                    ListKind::Deny => "deny-list refresh period",
                }));
            }
        }

        if self.sweep.enabled {
            if self.sweep.period.is_zero() {
                return Err(ConfigError::ZeroDuration("sweep period"));
            }
            if self.sweep.idle_threshold.is_zero() {
                return Err(ConfigError::ZeroDuration("idle threshold"));
            }
        }
        Ok(())
    }

    /// Validate the configuration, load the enabled lists and start the
    /// background tasks
    ///
    /// Fails without leaving anything running: if a later step fails, tasks
    /// already started by earlier steps are stopped and have exited before
    /// the error is returned. Background tasks need a tokio runtime; an engine with both
    /// lists and the sweep disabled does not.
    pub async fn start(self) -> Result<AdmissionEngine<B>, ConfigError> {
        self.validate()?;

        let default_limit = match self.default_limit {
            Some(params) => params,
            None => BucketParams::per_second(DEFAULT_RATE_PER_SECOND, DEFAULT_BURST)?,
        };
        let origin = Instant::now();
        let tiers = Tier::<B>::build_all(self.tiers, origin)?;
        let registry = Arc::new(VisitorRegistry::new(
            default_limit,
            &tiers,
            self.shards.unwrap_or_else(VisitorRegistry::<B>::default_shard_count),
        )?);

        let mut tasks = Vec::new();

        let allow_list = open_list(ListKind::Allow, self.allow_list, &mut tasks).await?;

        let deny_list = match open_list(ListKind::Deny, self.deny_list, &mut tasks).await {
            Ok(list) => list,
            Err(e) => {
                stop_all(&tasks).await;
                return Err(e);
            }
        };

        if self.sweep.enabled {
            match start_sweeper(Arc::clone(&registry), self.sweep) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    stop_all(&tasks).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            default_rate = default_limit.rate().as_per_second(),
            default_burst = default_limit.burst(),
            tiers = tiers.len(),
            allow_list = allow_list.is_some(),
            deny_list = deny_list.is_some(),
            sweep = self.sweep.enabled,
            shards = registry.shard_count(),
            "admission engine started"
        );

        Ok(AdmissionEngine {
            load: LoadStateMachine::new(tiers),
            registry,
            allow_list,
            deny_list,
            tasks,
            counters: Counters::default(),
        })
    }
}

async fn open_list(
    kind: ListKind,
    config: ListConfig,
    tasks: &mut Vec<BackgroundTask>,
) -> Result<Option<Arc<AccessList>>, ConfigError> {
    if !config.enabled {
        return Ok(None);
    }
    let source = config.source.ok_or(ConfigError::MissingListSource(kind))?;

    let entries = source
        .fetch()
        .await
        .map_err(|source| ConfigError::ListUnavailable { kind, source })?;
    tracing::info!(list = %kind, source = %source.describe(), entries = entries.len(), "list loaded");

    let list = Arc::new(AccessList::new(kind, entries));
    tasks.push(list.start_refresh(source, config.refresh_period)?);
    Ok(Some(list))
}

fn start_sweeper<B: TokenBucket>(
    registry: Arc<VisitorRegistry<B>>,
    config: SweepConfig,
) -> Result<BackgroundTask, ConfigError> {
    BackgroundTask::spawn("visitor sweep", move |mut stop| async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = tokio::time::sleep(config.period) => {
                    let removed = registry.sweep(config.idle_threshold, Instant::now());
                    tracing::debug!(removed, remaining = registry.len(), "idle visitors swept");
                }
            }
        }
    })
}

async fn stop_all(tasks: &[BackgroundTask]) {
    for task in tasks {
        task.stop();
    }
    for task in tasks {
        task.join().await;
        tracing::debug!(task = task.name(), "stopped during failed setup");
    }
}

/// Adaptive multi-tier admission engine
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AdmissionEngine<B: TokenBucket = GcraBucket> {
    load: LoadStateMachine<B>,
    registry: Arc<VisitorRegistry<B>>,
    allow_list: Option<Arc<AccessList>>,
    deny_list: Option<Arc<AccessList>>,
    tasks: Vec<BackgroundTask>,
    counters: Counters,
}

impl AdmissionEngine {
    /// Start configuring an engine backed by [`GcraBucket`]s
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }
}

impl<B: TokenBucket> AdmissionEngine<B> {
    /// Decide on a request from `id` at the current time
    pub fn admit(&self, id: &str) -> Verdict {
        self.admit_at(id, Instant::now())
    }

    /// Decide on a request from `id` at `now`
    pub fn admit_at(&self, id: &str, now: Instant) -> Verdict {
        let verdict = self.decide(id, now);
        let counter = match verdict {
            Verdict::Admit => &self.counters.admitted,
            Verdict::RejectPolicy => &self.counters.rejected_policy,
            Verdict::RejectRate => &self.counters.rejected_rate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        verdict
    }

    fn decide(&self, id: &str, now: Instant) -> Verdict {
        for list in [&self.allow_list, &self.deny_list].into_iter().flatten() {
            if !list.permits(id) {
                return Verdict::RejectPolicy;
            }
        }

        let state = self.load.refresh(now);
        let allowed = self
            .registry
            .get_or_create(id, now, |visitor| visitor.consume(state, now));

        if allowed {
            Verdict::Admit
        } else {
            Verdict::RejectRate
        }
    }

    /// The load state computed by the latest admitted request
    pub fn load_state(&self) -> LoadState {
        self.load.current()
    }

    /// Remaining budgets of a known visitor, without consuming anything
    pub fn visitor_budget(&self, id: &str, now: Instant) -> Option<VisitorBudget> {
        self.registry.peek(id, now)
    }

    pub fn visitor_count(&self) -> usize {
        self.registry.len()
    }

    /// Run one idle sweep immediately; returns the number of visitors removed
    pub fn sweep_idle(&self, idle_threshold: Duration, now: Instant) -> usize {
        self.registry.sweep(idle_threshold, now)
    }

    pub fn tier_count(&self) -> usize {
        self.load.tiers().len()
    }

    pub fn list(&self, kind: ListKind) -> Option<&Arc<AccessList>> {
        match kind {
            ListKind::Allow => self.allow_list.as_ref(),
            ListKind::Deny => self.deny_list.as_ref(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let list_refresh_failures = [&self.allow_list, &self.deny_list]
            .into_iter()
            .flatten()
            .map(|list| list.failure_count())
            .sum();

        EngineStats {
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            rejected_policy: self.counters.rejected_policy.load(Ordering::Relaxed),
            rejected_rate: self.counters.rejected_rate.load(Ordering::Relaxed),
            visitors: self.registry.len(),
            visitors_created: self.registry.created_total(),
            visitors_evicted: self.registry.evicted_total(),
            list_refresh_failures,
            state: self.load.current(),
            tiers: self.load.tiers().len(),
        }
    }

    /// Whether every background task has finished
    pub fn is_stopped(&self) -> bool {
        self.tasks.iter().all(BackgroundTask::is_finished)
    }

    /// Signal every background task to stop; calling it again is a no-op
    ///
    /// Admission keeps working afterwards, with lists frozen at their last
    /// snapshot and no idle sweep.
    pub fn stop(&self) {
        for task in &self.tasks {
            task.stop();
        }
    }

    /// Stop every background task and wait for all of them to finish
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.join().await;
        }
        tracing::info!("admission engine stopped");
    }
}
