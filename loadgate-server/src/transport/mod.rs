//! Transport layer implementations for the admission gate
//!
//! Every transport identifies the client, asks the shared [`Gate`] for a
//! verdict and acts on it. All transports share one engine, so a client is
//! limited across all of them together.
//!
//! # Available Transports
//!
//! - [`http`]: Middleware for axum routers plus a JSON decision service
//! - [`tcp`]: Connection-level gate piping admitted connections upstream

pub mod http;
pub mod tcp;

#[cfg(test)]
mod http_test;

use crate::gate::Gate;
use anyhow::Result;
use async_trait::async_trait;

/// Common interface for all transport implementations
///
/// Each transport is responsible for:
/// - Accepting client connections
/// - Extracting the client identity
/// - Admitting or rejecting through the gate
#[async_trait]
pub trait Transport {
    /// Bind and serve until an error occurs or the server shuts down
    async fn start(self, gate: Gate) -> Result<()>;
}
