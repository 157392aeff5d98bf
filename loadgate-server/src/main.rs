use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinSet;

use loadgate_server::config::Config;
use loadgate_server::gate::Gate;
use loadgate_server::metrics::Metrics;
use loadgate_server::transport::{Transport, http::HttpTransport, tcp::TcpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("loadgate={}", config.log_level).parse()?)
                .add_directive(format!("loadgate_server={}", config.log_level).parse()?),
        )
        .init();

    let engine = Arc::new(config.engine_builder()?.start().await?);
    let gate = Gate::new(Arc::clone(&engine), config.identity, Arc::new(Metrics::new()));

    let mut transport_tasks = JoinSet::new();

    if let Some(http_config) = &config.transports.http {
        let transport = HttpTransport::new(&http_config.host, http_config.port)?
            .with_upstream(http_config.upstream.clone())?
            .with_admin_port(http_config.admin_port);
        let gate = gate.clone();
        transport_tasks.spawn(async move { transport.start(gate).await });
    }

    if let Some(tcp_config) = &config.transports.tcp {
        let transport = TcpTransport::new(&tcp_config.host, tcp_config.port, &tcp_config.upstream);
        let gate = gate.clone();
        transport_tasks.spawn(async move { transport.start(gate).await });
    }

    tracing::info!(
        tiers = config.limits.tiers.len(),
        identity = %config.identity,
        "loadgate server started"
    );

    let result = tokio::select! {
        result = wait_for_transports(&mut transport_tasks) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    transport_tasks.abort_all();
    engine.stop();
    result
}

/// Wait for all transport tasks; they only return on failure
async fn wait_for_transports(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }
    Ok(())
}
