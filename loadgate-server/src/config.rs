//! Server configuration and CLI argument parsing
//!
//! This module handles all server configuration through:
//! - Command-line arguments
//! - Environment variables (with LOADGATE_ prefix)
//! - An optional configuration file holding tier definitions
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! Tiers given with `--tier` come first; tiers from `--config` are appended
//! after them. A tier's order is its position in the combined list.
//!
//! # Example Usage
//!
//! ```bash
//! # Gate HTTP traffic in front of a local app, tightening above 100 req/s
//! loadgate --http --http-upstream http://127.0.0.1:3000 --tier 100:100:0.5:3
//!
//! # Using environment variables
//! export LOADGATE_TCP=true
//! export LOADGATE_TCP_UPSTREAM=127.0.0.1:5432
//! export LOADGATE_DENY_LIST=/etc/loadgate/deny.txt
//! loadgate
//! ```

use crate::identity::IdentitySource;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use loadgate::{
    BucketParams, EngineBuilder, FileListSource, ListConfig, SweepConfig, TierConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for the server
#[derive(Debug, Clone)]
pub struct Config {
    pub transports: TransportConfig,
    pub limits: LimitsConfig,
    pub allow_list: Option<ListFileConfig>,
    pub deny_list: Option<ListFileConfig>,
    pub sweep: SweepConfig,
    /// How clients are identified, for both list checks and rate limiting
    pub identity: IdentitySource,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// Transport layer configuration
///
/// At least one transport must be enabled for the server to function.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub http: Option<HttpConfig>,
    pub tcp: Option<TcpConfig>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Base URL admitted requests are forwarded to; without one they get `200 OK`
    pub upstream: Option<String>,
    /// Port on the same host serving `/admit`, `/health` and `/metrics`
    pub admin_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    /// Address admitted connections are piped to
    pub upstream: String,
}

/// Default limit and tiers
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Default requests per second per client
    pub rate: f64,
    /// Default burst per client
    pub burst: u32,
    pub tiers: Vec<TierSpec>,
}

/// An access list file and how often to re-read it
#[derive(Debug, Clone)]
pub struct ListFileConfig {
    pub path: PathBuf,
    pub refresh: Duration,
}

/// One tier as written in configuration
///
/// On the command line: `TRIGGER_RATE:TRIGGER_BURST:VISITOR_RATE:VISITOR_BURST`,
/// with rates in requests per second.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierSpec {
    /// Aggregate requests per second before the tier activates
    pub trigger_rate: f64,
    pub trigger_burst: u32,
    /// Per-client requests per second while the tier is active
    pub visitor_rate: f64,
    pub visitor_burst: u32,
}

impl TierSpec {
    fn to_tier_config(self, order: usize) -> Result<TierConfig> {
        let trigger = BucketParams::per_second(self.trigger_rate, self.trigger_burst)
            .with_context(|| format!("tier {order} trigger"))?;
        let visitor = BucketParams::per_second(self.visitor_rate, self.visitor_burst)
            .with_context(|| format!("tier {order} visitor limit"))?;
        Ok(TierConfig::new(order, trigger, visitor))
    }
}

impl std::str::FromStr for TierSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let [trigger_rate, trigger_burst, visitor_rate, visitor_burst] = parts[..] else {
            return Err(anyhow!(
                "Invalid tier: {}. Expected TRIGGER_RATE:TRIGGER_BURST:VISITOR_RATE:VISITOR_BURST",
                s
            ));
        };

        Ok(TierSpec {
            trigger_rate: trigger_rate
                .parse()
                .with_context(|| format!("invalid trigger rate in tier {s}"))?,
            trigger_burst: trigger_burst
                .parse()
                .with_context(|| format!("invalid trigger burst in tier {s}"))?,
            visitor_rate: visitor_rate
                .parse()
                .with_context(|| format!("invalid visitor rate in tier {s}"))?,
            visitor_burst: visitor_burst
                .parse()
                .with_context(|| format!("invalid visitor burst in tier {s}"))?,
        })
    }
}

/// Contents of the `--config` file
///
/// ```toml
/// [[tiers]]
/// trigger_rate = 100.0
/// trigger_burst = 100
/// visitor_rate = 0.5
/// visitor_burst = 3
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub tiers: Vec<TierSpec>,
}

impl FileConfig {
    /// Load a TOML, YAML or JSON file, picked by extension
    pub fn load(path: &Path) -> Result<Self> {
        ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("failed to load config file {}", path.display()))
    }
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// LOADGATE_ prefix. CLI arguments take precedence over environment variables.
///
/// Periods and thresholds are in minutes.
#[derive(Parser, Debug)]
#[command(
    name = "loadgate",
    about = "Adaptive multi-tier admission gate",
    long_about = "Admission gate that limits each client with token buckets and tightens the limits when aggregate load crosses configured tiers.\n\nAt least one transport must be specified.\n\nEnvironment variables with LOADGATE_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP Transport
    #[arg(long, help = "Enable HTTP transport", env = "LOADGATE_HTTP")]
    pub http: bool,
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "LOADGATE_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "LOADGATE_HTTP_PORT"
    )]
    pub http_port: u16,
    #[arg(
        long,
        value_name = "URL",
        help = "Forward admitted HTTP requests to this base URL",
        env = "LOADGATE_HTTP_UPSTREAM"
    )]
    pub http_upstream: Option<String>,
    #[arg(
        long,
        value_name = "PORT",
        help = "Serve /admit, /health and /metrics on this port",
        env = "LOADGATE_HTTP_ADMIN_PORT"
    )]
    pub http_admin_port: Option<u16>,

    // TCP Transport
    #[arg(long, help = "Enable TCP transport", env = "LOADGATE_TCP")]
    pub tcp: bool,
    #[arg(
        long,
        value_name = "HOST",
        help = "TCP host",
        default_value = "127.0.0.1",
        env = "LOADGATE_TCP_HOST"
    )]
    pub tcp_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "TCP port",
        default_value_t = 8090,
        env = "LOADGATE_TCP_PORT"
    )]
    pub tcp_port: u16,
    #[arg(
        long,
        value_name = "ADDR",
        help = "Pipe admitted TCP connections to this address",
        env = "LOADGATE_TCP_UPSTREAM"
    )]
    pub tcp_upstream: Option<String>,

    // Limits
    #[arg(
        long,
        value_name = "RATE",
        help = "Default requests per second per client",
        default_value_t = 1.0,
        env = "LOADGATE_RATE"
    )]
    pub rate: f64,
    #[arg(
        long,
        value_name = "N",
        help = "Default burst per client",
        default_value_t = 5,
        env = "LOADGATE_BURST"
    )]
    pub burst: u32,
    #[arg(
        long = "tier",
        value_name = "SPEC",
        help = "Tier as TRIGGER_RATE:TRIGGER_BURST:VISITOR_RATE:VISITOR_BURST (repeatable, in order)",
        value_delimiter = ',',
        env = "LOADGATE_TIERS"
    )]
    pub tiers: Vec<TierSpec>,
    #[arg(
        long,
        value_name = "FILE",
        help = "Configuration file with additional tiers (TOML, YAML or JSON)",
        env = "LOADGATE_CONFIG"
    )]
    pub config: Option<PathBuf>,

    // Identity
    #[arg(
        long,
        value_name = "SOURCE",
        help = "Client identity: peer-ip, peer-addr, forwarded-for, real-ip",
        default_value = "peer-ip",
        env = "LOADGATE_IDENTITY"
    )]
    pub identity: IdentitySource,

    // Access lists
    #[arg(
        long,
        value_name = "FILE",
        help = "Only admit clients listed in this file",
        env = "LOADGATE_ALLOW_LIST"
    )]
    pub allow_list: Option<PathBuf>,
    #[arg(
        long,
        value_name = "MINS",
        help = "Allow-list refresh period (minutes)",
        default_value_t = 3,
        env = "LOADGATE_ALLOW_LIST_REFRESH"
    )]
    pub allow_list_refresh: u64,
    #[arg(
        long,
        value_name = "FILE",
        help = "Reject clients listed in this file",
        env = "LOADGATE_DENY_LIST"
    )]
    pub deny_list: Option<PathBuf>,
    #[arg(
        long,
        value_name = "MINS",
        help = "Deny-list refresh period (minutes)",
        default_value_t = 3,
        env = "LOADGATE_DENY_LIST_REFRESH"
    )]
    pub deny_list_refresh: u64,

    // Idle sweep
    #[arg(long, help = "Disable the idle client sweep", env = "LOADGATE_NO_SWEEP")]
    pub no_sweep: bool,
    #[arg(
        long,
        value_name = "MINS",
        help = "Idle client sweep period (minutes)",
        default_value_t = 3,
        env = "LOADGATE_SWEEP_PERIOD"
    )]
    pub sweep_period: u64,
    #[arg(
        long,
        value_name = "MINS",
        help = "Forget clients idle for longer than this (minutes)",
        default_value_t = 3,
        env = "LOADGATE_IDLE_THRESHOLD"
    )]
    pub idle_threshold: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "LOADGATE_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Build and validate configuration from already parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let mut tiers = args.tiers;
        if let Some(path) = &args.config {
            tiers.extend(FileConfig::load(path)?.tiers);
        }

        let mut transports = TransportConfig::default();
        if args.http {
            transports.http = Some(HttpConfig {
                host: args.http_host,
                port: args.http_port,
                upstream: args.http_upstream,
                admin_port: args.http_admin_port,
            });
        }
        if args.tcp {
            let upstream = args
                .tcp_upstream
                .ok_or_else(|| anyhow!("--tcp requires --tcp-upstream <ADDR>"))?;
            transports.tcp = Some(TcpConfig {
                host: args.tcp_host,
                port: args.tcp_port,
                upstream,
            });
        }

        let config = Config {
            transports,
            limits: LimitsConfig {
                rate: args.rate,
                burst: args.burst,
                tiers,
            },
            allow_list: args.allow_list.map(|path| ListFileConfig {
                path,
                refresh: minutes(args.allow_list_refresh),
            }),
            deny_list: args.deny_list.map(|path| ListFileConfig {
                path,
                refresh: minutes(args.deny_list_refresh),
            }),
            sweep: SweepConfig {
                enabled: !args.no_sweep,
                period: minutes(args.sweep_period),
                idle_threshold: minutes(args.idle_threshold),
            },
            identity: args.identity,
            log_level: args.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check if at least one transport is configured
    pub fn has_any_transport(&self) -> bool {
        self.transports.http.is_some() || self.transports.tcp.is_some()
    }

    /// Validate the configuration
    ///
    /// Catches everything the engine would reject at startup, so a bad
    /// configuration fails before any listener is bound.
    pub fn validate(&self) -> Result<()> {
        if !self.has_any_transport() {
            return Err(anyhow!(
                "At least one transport must be specified.\n\n\
                Available transports:\n  \
                --http       Enable HTTP transport\n  \
                --tcp        Enable TCP transport (requires --tcp-upstream)\n\n\
                Example:\n  \
                loadgate --http --http-upstream http://127.0.0.1:3000\n  \
                loadgate --tcp --tcp-upstream 127.0.0.1:5432\n\n\
                For more information, try '--help'"
            ));
        }

        if let Some(http) = &self.transports.http {
            if http.admin_port == Some(http.port) {
                return Err(anyhow!("--http-admin-port must differ from --http-port"));
            }
        }

        BucketParams::per_second(self.limits.rate, self.limits.burst)
            .context("default limit")?;
        for (order, tier) in self.limits.tiers.iter().enumerate() {
            tier.to_tier_config(order)?;
        }

        for (name, list) in [("allow-list", &self.allow_list), ("deny-list", &self.deny_list)] {
            if let Some(list) = list {
                if list.refresh.is_zero() {
                    return Err(anyhow!("{} refresh period must be greater than zero", name));
                }
            }
        }

        if self.sweep.enabled && (self.sweep.period.is_zero() || self.sweep.idle_threshold.is_zero())
        {
            return Err(anyhow!(
                "sweep period and idle threshold must be greater than zero (or use --no-sweep)"
            ));
        }

        Ok(())
    }

    /// An engine builder carrying this configuration
    pub fn engine_builder(&self) -> Result<EngineBuilder> {
        let tiers = self
            .limits
            .tiers
            .iter()
            .enumerate()
            .map(|(order, tier)| tier.to_tier_config(order))
            .collect::<Result<Vec<_>>>()?;

        let mut builder = EngineBuilder::new()
            .default_limit(BucketParams::per_second(self.limits.rate, self.limits.burst)?)
            .tiers(tiers)
            .sweep(self.sweep);

        if let Some(list) = &self.allow_list {
            builder = builder.allow_list(list_config(list));
        }
        if let Some(list) = &self.deny_list {
            builder = builder.deny_list(list_config(list));
        }
        Ok(builder)
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("loadgate Environment Variables");
        println!("==============================");
        println!();
        println!("All environment variables use the LOADGATE_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("Transport Configuration:");
        println!("  LOADGATE_HTTP=true|false              Enable HTTP transport");
        println!("  LOADGATE_HTTP_HOST=<host>             HTTP host [default: 127.0.0.1]");
        println!("  LOADGATE_HTTP_PORT=<port>             HTTP port [default: 8080]");
        println!("  LOADGATE_HTTP_UPSTREAM=<url>          Forward admitted requests to <url>");
        println!("  LOADGATE_HTTP_ADMIN_PORT=<port>       Serve /admit, /health and /metrics on <port>");
        println!();
        println!("  LOADGATE_TCP=true|false               Enable TCP transport");
        println!("  LOADGATE_TCP_HOST=<host>              TCP host [default: 127.0.0.1]");
        println!("  LOADGATE_TCP_PORT=<port>              TCP port [default: 8090]");
        println!("  LOADGATE_TCP_UPSTREAM=<addr>          Pipe admitted connections to <addr>");
        println!();

        println!("Limits:");
        println!("  LOADGATE_RATE=<rate>                  Requests per second per client [default: 1]");
        println!("  LOADGATE_BURST=<n>                    Burst per client [default: 5]");
        println!(
            "  LOADGATE_TIERS=<spec>[,<spec>...]     Tiers as TRIGGER_RATE:TRIGGER_BURST:VISITOR_RATE:VISITOR_BURST"
        );
        println!("  LOADGATE_CONFIG=<file>                Config file with additional tiers");
        println!();

        println!("Client Identity:");
        println!(
            "  LOADGATE_IDENTITY=<source>            peer-ip, peer-addr, forwarded-for, real-ip [default: peer-ip]"
        );
        println!();

        println!("Access Lists:");
        println!("  LOADGATE_ALLOW_LIST=<file>            Only admit listed clients");
        println!("  LOADGATE_ALLOW_LIST_REFRESH=<mins>    Allow-list refresh period [default: 3]");
        println!("  LOADGATE_DENY_LIST=<file>             Reject listed clients");
        println!("  LOADGATE_DENY_LIST_REFRESH=<mins>     Deny-list refresh period [default: 3]");
        println!();

        println!("Idle Client Sweep:");
        println!("  LOADGATE_NO_SWEEP=true|false          Disable the sweep");
        println!("  LOADGATE_SWEEP_PERIOD=<mins>          Sweep period [default: 3]");
        println!("  LOADGATE_IDLE_THRESHOLD=<mins>        Idle time before a client is forgotten [default: 3]");
        println!();

        println!("General Configuration:");
        println!(
            "  LOADGATE_LOG_LEVEL=<level>            Log level: error, warn, info, debug, trace [default: info]"
        );
        println!();

        println!("Examples:");
        println!("  # Gate HTTP traffic to a local app");
        println!("  export LOADGATE_HTTP=true");
        println!("  export LOADGATE_HTTP_UPSTREAM=http://127.0.0.1:3000");
        println!();
        println!("  # Tighten to 1 request every 2s per client above 100 req/s overall");
        println!("  export LOADGATE_TIERS=100:100:0.5:3");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  loadgate --http-port 9090  # Will use port 9090, not 8080");
    }
}

fn list_config(list: &ListFileConfig) -> ListConfig {
    ListConfig::from_source(FileListSource::new(&list.path)).refresh_period(list.refresh)
}
