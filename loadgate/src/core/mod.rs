//! Core components of the loadgate admission engine
//!
//! This module contains the building blocks, leaves first:
//! - [`rate`]: Rate calculation and bucket parameters
//! - [`bucket`]: The token bucket capability and its GCRA implementation
//! - [`tier`]: Tier configuration and validation
//! - [`load_state`]: The global load-state machine selecting the active tier
//! - [`registry`]: Per-client visitor state with lazy creation and idle eviction
//! - [`access_list`]: Allow/deny list snapshots and their refresh loop
//! - [`source`]: Where list snapshots come from
//! - [`engine`]: The admission engine composing all of the above

pub mod access_list;
pub mod bucket;
pub mod engine;
pub mod load_state;
pub mod rate;
pub mod registry;
pub mod source;
pub mod tier;

mod task;


pub use access_list::{AccessList, ListKind, ListSnapshot};
pub use bucket::{GcraBucket, TokenBucket};
pub use engine::{AdmissionEngine, EngineBuilder, EngineStats, ListConfig, SweepConfig, Verdict};
pub use load_state::{LoadState, LoadStateMachine};
pub use rate::{BucketParams, Rate};
pub use registry::{VisitorBudget, VisitorRegistry};
pub use source::{FileListSource, ListSource, SourceError, StaticListSource};
pub use tier::{Tier, TierConfig};

/// Monotonic clock used by every bucket and timestamp in the engine
///
/// This is tokio's `Instant`, so paused test clocks drive the buckets,
/// the sweep and the list refresh consistently.
pub use tokio::time::Instant;

use thiserror::Error;

/// Errors that prevent an engine from being built
///
/// Every variant is a setup-time failure. Once an engine is running, requests
/// only ever produce [`Verdict`]s.
///
/// # Example
///
/// ```
/// use loadgate::{ConfigError, Rate};
///
/// match Rate::per_second(0.0) {
///     Err(ConfigError::InvalidRate(r)) => println!("rejected rate {r}"),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A rate was zero, negative, non-finite or too small to represent
    #[error("invalid rate {0}: must be a positive, finite number of tokens per period")]
    InvalidRate(f64),
    /// A bucket was configured with no capacity
    #[error("burst must be greater than zero")]
    ZeroBurst,
    /// Tier orders must be exactly 0..N-1
    #[error("tier orders must be contiguous from 0: expected order {expected}, found {found}")]
    NonContiguousTiers { expected: usize, found: usize },
    /// A period or threshold was zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    /// The visitor registry needs at least one shard
    #[error("visitor registry shard count must be greater than zero")]
    ZeroShards,
    /// A list was enabled without a source to read it from
    #[error("{0} is enabled but no source is configured")]
    MissingListSource(ListKind),
    /// The initial fetch of an enabled list failed
    #[error("{kind} could not be loaded: {source}")]
    ListUnavailable {
        kind: ListKind,
        #[source]
        source: SourceError,
    },
    /// Background tasks were requested outside a tokio runtime
    #[error("{0} requires a running tokio runtime")]
    NoRuntime(&'static str),
}
