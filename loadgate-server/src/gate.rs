//! Shared handle the transports use to ask the engine for verdicts

use crate::identity::IdentitySource;
use crate::metrics::{Metrics, Transport};
use loadgate::{AdmissionEngine, Verdict};
use std::sync::Arc;
use std::time::Instant;

/// The engine, the identity extractor and the metrics, cheap to clone into
/// every connection task and request handler
#[derive(Clone)]
pub struct Gate {
    engine: Arc<AdmissionEngine>,
    identity: IdentitySource,
    metrics: Arc<Metrics>,
}

impl Gate {
    pub fn new(engine: Arc<AdmissionEngine>, identity: IdentitySource, metrics: Arc<Metrics>) -> Self {
        Gate {
            engine,
            identity,
            metrics,
        }
    }

    pub fn engine(&self) -> &AdmissionEngine {
        &self.engine
    }

    pub fn identity(&self) -> IdentitySource {
        self.identity
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ask the engine about `client` and record the outcome
    pub fn check(&self, transport: Transport, client: &str) -> Verdict {
        let start = Instant::now();
        let verdict = self.engine.admit(client);
        let latency_us = start.elapsed().as_micros() as u64;

        self.metrics.record_verdict(transport, verdict, latency_us);
        if !verdict.is_admitted() {
            tracing::debug!(client, ?transport, %verdict, "request rejected");
        }
        verdict
    }

    /// Prometheus text for the server metrics and the engine statistics
    pub fn export_prometheus(&self) -> String {
        self.metrics.export_prometheus(&self.engine.stats())
    }
}
