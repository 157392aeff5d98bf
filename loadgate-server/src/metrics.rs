//! Simple metrics collection for observability
//!
//! Lightweight atomic counters, exported together with the engine's own
//! statistics in Prometheus text format.

use loadgate::{EngineStats, LoadState, Verdict};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Core metrics collected by the server
pub struct Metrics {
    /// Server start time
    start_time: Instant,

    /// Total admission checks
    pub total_requests: AtomicU64,

    /// Checks by transport
    pub http_requests: AtomicU64,
    pub tcp_requests: AtomicU64,

    /// Verdicts
    pub requests_admitted: AtomicU64,
    pub requests_rejected_policy: AtomicU64,
    pub requests_rejected_rate: AtomicU64,

    /// TCP connections currently being proxied
    pub tcp_connections: AtomicUsize,
    /// Upstream connection failures
    pub upstream_errors: AtomicU64,

    /// Admission latency buckets (in microseconds)
    pub latency_under_10us: AtomicU64,
    pub latency_under_100us: AtomicU64,
    pub latency_under_1ms: AtomicU64,
    pub latency_over_1ms: AtomicU64,

    pub latency_sum_micros: AtomicU64,
    pub latency_count: AtomicU64,
}

/// Transport type for metrics tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Tcp,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            tcp_requests: AtomicU64::new(0),
            requests_admitted: AtomicU64::new(0),
            requests_rejected_policy: AtomicU64::new(0),
            requests_rejected_rate: AtomicU64::new(0),
            tcp_connections: AtomicUsize::new(0),
            upstream_errors: AtomicU64::new(0),
            latency_under_10us: AtomicU64::new(0),
            latency_under_100us: AtomicU64::new(0),
            latency_under_1ms: AtomicU64::new(0),
            latency_over_1ms: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    /// Record one admission check and how long it took
    pub fn record_verdict(&self, transport: Transport, verdict: Verdict, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match transport {
            Transport::Http => self.http_requests.fetch_add(1, Ordering::Relaxed),
            Transport::Tcp => self.tcp_requests.fetch_add(1, Ordering::Relaxed),
        };

        match verdict {
            Verdict::Admit => self.requests_admitted.fetch_add(1, Ordering::Relaxed),
            Verdict::RejectPolicy => self.requests_rejected_policy.fetch_add(1, Ordering::Relaxed),
            Verdict::RejectRate => self.requests_rejected_rate.fetch_add(1, Ordering::Relaxed),
        };

        match latency_us {
            0..=9 => self.latency_under_10us.fetch_add(1, Ordering::Relaxed),
            10..=99 => self.latency_under_100us.fetch_add(1, Ordering::Relaxed),
            100..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1ms.fetch_add(1, Ordering::Relaxed),
        };

        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.tcp_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.tcp_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export server metrics and `engine` statistics in Prometheus text format
    pub fn export_prometheus(&self, engine: &EngineStats) -> String {
        let mut out = String::with_capacity(2048);

        gauge(
            &mut out,
            "loadgate_uptime_seconds",
            "Time since server start in seconds",
            self.uptime_seconds(),
        );
        counter(
            &mut out,
            "loadgate_requests_total",
            "Total number of admission checks",
            self.total_requests.load(Ordering::Relaxed),
        );

        header(
            &mut out,
            "loadgate_requests_by_transport",
            "Admission checks by transport type",
            "counter",
        );
        labelled(
            &mut out,
            "loadgate_requests_by_transport",
            "transport",
            &[
                ("http", self.http_requests.load(Ordering::Relaxed)),
                ("tcp", self.tcp_requests.load(Ordering::Relaxed)),
            ],
        );

        header(
            &mut out,
            "loadgate_verdicts_total",
            "Admission verdicts by outcome",
            "counter",
        );
        labelled(
            &mut out,
            "loadgate_verdicts_total",
            "verdict",
            &[
                (
                    Verdict::Admit.as_str(),
                    self.requests_admitted.load(Ordering::Relaxed),
                ),
                (
                    Verdict::RejectPolicy.as_str(),
                    self.requests_rejected_policy.load(Ordering::Relaxed),
                ),
                (
                    Verdict::RejectRate.as_str(),
                    self.requests_rejected_rate.load(Ordering::Relaxed),
                ),
            ],
        );

        gauge(
            &mut out,
            "loadgate_tcp_connections_active",
            "TCP connections currently proxied upstream",
            self.tcp_connections.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "loadgate_upstream_errors_total",
            "Failures reaching the protected upstream",
            self.upstream_errors.load(Ordering::Relaxed),
        );

        // Latency distribution (cumulative)
        header(
            &mut out,
            "loadgate_admission_duration",
            "Admission check latency distribution",
            "histogram",
        );
        let mut cumulative = 0;
        for (le, bucket) in [
            ("0.00001", &self.latency_under_10us),
            ("0.0001", &self.latency_under_100us),
            ("0.001", &self.latency_under_1ms),
        ] {
            cumulative += bucket.load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "loadgate_admission_duration_bucket{{le=\"{le}\"}} {cumulative}"
            );
        }
        let count = self.latency_count.load(Ordering::Relaxed);
        let _ = writeln!(out, "loadgate_admission_duration_bucket{{le=\"+Inf\"}} {count}");
        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "loadgate_admission_duration_sum {latency_sum_seconds:.6}");
        let _ = writeln!(out, "loadgate_admission_duration_count {count}\n");

        // Engine state
        gauge(
            &mut out,
            "loadgate_visitors",
            "Clients currently tracked by the engine",
            engine.visitors,
        );
        counter(
            &mut out,
            "loadgate_visitors_created_total",
            "Clients ever added to the registry",
            engine.visitors_created,
        );
        counter(
            &mut out,
            "loadgate_visitors_evicted_total",
            "Idle clients removed by the sweep",
            engine.visitors_evicted,
        );
        counter(
            &mut out,
            "loadgate_list_refresh_failures_total",
            "Failed access list refreshes",
            engine.list_refresh_failures,
        );
        gauge(
            &mut out,
            "loadgate_tiers",
            "Configured tiers",
            engine.tiers,
        );
        gauge(
            &mut out,
            "loadgate_load_state",
            "Active load state: 0 for default, N+1 for tier N",
            match engine.state {
                LoadState::Default => 0,
                LoadState::Tier(order) => order + 1,
            },
        );

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn counter(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    header(out, name, help, "counter");
    let _ = writeln!(out, "{name} {value}\n");
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    header(out, name, help, "gauge");
    let _ = writeln!(out, "{name} {value}\n");
}

fn labelled(out: &mut String, name: &str, label: &str, values: &[(&str, u64)]) {
    for (value, count) in values {
        let _ = writeln!(out, "{name}{{{label}=\"{value}\"}} {count}");
    }
    out.push('\n');
}
