//! # loadgate
//!
//! Adaptive multi-tier admission control for network services.
//!
//! ## Overview
//!
//! Every client identifier (usually the peer IP address) gets its own token
//! buckets. Which bucket decides a request depends on the aggregate load on
//! the whole service:
//! - **Default state**: each client is limited by the default rate and burst
//! - **Tiers**: each tier has a global *trigger* budget. When the traffic of
//!   all clients together exhausts a tier's trigger budget, the tier becomes
//!   active and every client is judged by its (usually stricter) tier bucket
//! - **Access lists**: an optional allow-list and deny-list, refreshed
//!   periodically from a [`ListSource`], are checked before any rate limiting
//!
//! Each request drains one token from *every* bucket a client has, so a
//! client that has been busy in the default state is already constrained
//! when a stricter tier kicks in.
//!
//! ## Quick Start
//!
//! ```
//! use loadgate::{AdmissionEngine, BucketParams, TierConfig, Verdict};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), loadgate::ConfigError> {
//! let engine = AdmissionEngine::builder()
//!     // 1 request per second, bursts of up to 5
//!     .default_limit(BucketParams::per_second(1.0, 5)?)
//!     // Above 10 req/s in aggregate, allow each client 1 request every 2s
//!     .tier(TierConfig::new(
//!         0,
//!         BucketParams::per_second(10.0, 10)?,
//!         BucketParams::per_second(0.5, 3)?,
//!     ))
//!     .start()
//!     .await?;
//!
//! match engine.admit("203.0.113.7") {
//!     Verdict::Admit => println!("serve the request"),
//!     Verdict::RejectPolicy => println!("blocked by an access list"),
//!     Verdict::RejectRate => println!("too many requests"),
//! }
//! # engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Access Lists
//!
//! ```no_run
//! use loadgate::{AdmissionEngine, FileListSource, ListConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), loadgate::ConfigError> {
//! let engine = AdmissionEngine::builder()
//!     .deny_list(
//!         ListConfig::from_source(FileListSource::new("/etc/loadgate/deny.txt"))
//!             .refresh_period(Duration::from_secs(60)),
//!     )
//!     .start()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! An enabled list whose first fetch fails is a configuration error. Later
//! refresh failures are logged and the last good snapshot stays in effect.
//!
//! ## Background Tasks
//!
//! The list refresh loops and the idle-visitor sweep run on the tokio runtime
//! that calls [`EngineBuilder::start`]. They stop on [`AdmissionEngine::stop`],
//! [`AdmissionEngine::shutdown`], or when the engine is dropped.
//!
//! ## Thread Safety
//!
//! [`AdmissionEngine`] is `Send + Sync` and all of its methods take `&self`.
//! Share it with an `Arc`:
//!
//! ```
//! use std::sync::Arc;
//! use loadgate::{AdmissionEngine, SweepConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = Arc::new(
//!     AdmissionEngine::builder()
//!         .sweep(SweepConfig::disabled())
//!         .start()
//!         .await
//!         .unwrap(),
//! );
//! # }
//! ```
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing

pub mod core;

pub use core::{
    AccessList, AdmissionEngine, BucketParams, ConfigError, EngineBuilder, EngineStats,
    FileListSource, GcraBucket, Instant, ListConfig, ListKind, ListSnapshot, ListSource,
    LoadState, LoadStateMachine, Rate, SourceError, StaticListSource, SweepConfig, Tier,
    TierConfig, TokenBucket, Verdict, VisitorBudget, VisitorRegistry,
};
