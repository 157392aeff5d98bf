//! # loadgate server
//!
//! A standalone admission gate built on the [`loadgate`] engine. It sits in
//! front of a service and decides, per client, whether a request or
//! connection gets through.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! loadgate --help
//!
//! # Gate HTTP traffic and forward admitted requests to a local app,
//! # with /health and /metrics on a separate admin port
//! loadgate --http --http-port 8080 --http-upstream http://127.0.0.1:3000 \
//!     --http-admin-port 9100
//!
//! # Gate raw TCP connections to a database
//! loadgate --tcp --tcp-port 6432 --tcp-upstream 127.0.0.1:5432
//!
//! # Tighten limits as aggregate load grows
//! loadgate --http --rate 2 --burst 10 \
//!     --tier 200:200:0.5:3 \
//!     --tier 1000:1000:0.1:1
//! ```
//!
//! ## Configuration
//!
//! Configure via CLI arguments or environment variables (CLI takes
//! precedence). Run `loadgate --list-env-vars` for the full list.
//!
//! - **Transports**: `--http`, `--tcp` (at least one required)
//! - **Default limit**: `--rate 1 --burst 5` per client
//! - **Tiers**: `--tier TRIGGER_RATE:TRIGGER_BURST:VISITOR_RATE:VISITOR_BURST`,
//!   repeatable, or `[[tiers]]` in a `--config` file
//! - **Access lists**: `--allow-list FILE`, `--deny-list FILE`, one client per line
//! - **Identity**: `--identity peer-ip|peer-addr|forwarded-for|real-ip`
//!
//! ## Verdicts
//!
//! | Verdict         | HTTP                    | TCP               |
//! |-----------------|-------------------------|-------------------|
//! | `admit`         | forwarded / `200 OK`    | piped upstream    |
//! | `reject_policy` | `401 Unauthorized`      | connection closed |
//! | `reject_rate`   | `429 Too Many Requests` | connection closed |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐
//! │    HTTP     │   │     TCP     │
//! │  Transport  │   │  Transport  │
//! └──────┬──────┘   └──────┬──────┘
//!        │                 │
//!        └────────┬────────┘
//!                 │
//!           ┌─────▼─────┐
//!           │   Gate    │  identity + metrics
//!           └─────┬─────┘
//!                 │
//!        ┌────────▼────────┐
//!        │ AdmissionEngine │  lists, tiers, visitors
//!        └─────────────────┘
//! ```

pub mod config;
pub mod gate;
pub mod identity;
pub mod metrics;
pub mod transport;
