//! Gateway shard manager binary
//!
//! Runs one shard pool for a bot:
//! - Opens every shard with a staggered start
//! - Keeps a status message and a lifecycle log in Discord channels
//! - Mirrors lifecycle events to NATS when configured
//! - Exposes health/ready/status endpoints and Prometheus metrics

use anyhow::Result;
use gateway_shard_manager::discord::{
    DiscordLogSink, DiscordStatusSink, GatewayBotShardCount, TwilightConnectionFactory,
};
use gateway_shard_manager::health::{self, AppState};
use gateway_shard_manager::metrics::PoolMetrics;
use gateway_shard_manager::nats::NatsEventSink;
use gateway_shard_manager::{GatewayConfig, ShardManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(
                    format!("gateway_shard_manager={}", gateway_config.log_level).parse()?,
                )
                .add_directive("twilight_gateway=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        total_shards = ?gateway_config.total_shards,
        bot_name = ?gateway_config.bot_name,
        "Starting gateway shard manager"
    );

    let metrics = PoolMetrics::install()?;
    info!("Prometheus metrics initialized");

    let intents = GatewayConfig::intents();
    info!(?intents, "Using Discord intents");

    let mut builder = ShardManager::builder(
        gateway_config.pool_config(),
        Arc::new(TwilightConnectionFactory::new(intents)),
        Arc::new(GatewayBotShardCount),
    );

    let http = Arc::new(twilight_http::Client::new(gateway_config.discord_token.clone()));
    if let Some(channel_id) = gateway_config.status_channel_id {
        let sink = DiscordStatusSink::new(Arc::clone(&http), channel_id)?;
        builder = builder.status_sink(Arc::new(sink));
    }
    if let Some(channel_id) = gateway_config.log_channel_id {
        let sink = DiscordLogSink::new(Arc::clone(&http), channel_id)?;
        builder = builder.log_sink(Arc::new(sink));
    }

    let nats = match gateway_config.nats_url {
        Some(ref url) => match NatsEventSink::connect(url).await {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                error!(error = %e.report(), "Failed to connect to NATS - events stay local");
                None
            }
        },
        None => {
            info!("No NATS_URL configured - events stay local");
            None
        }
    };
    if let Some(ref nats) = nats {
        builder = builder.log_sink(nats.clone());
    }

    let manager = builder.build()?;

    let app_state = AppState {
        manager: manager.clone(),
        metrics: Some(metrics),
    };
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();
    info!(port = gateway_config.http_port, "Starting HTTP server");

    let http_server = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        health::router(app_state),
    );

    // Shards run on their own tasks once opened; keep serving after start returns
    let run_pool = async {
        if let Err(e) = manager.start().await {
            error!(error = %e.report(), "Shard pool failed to start");
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = run_pool => {}
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down shard pool...");
    if let Err(e) = manager.stop_all().await {
        warn!(error = %e.report(), "Some shards failed to close");
    }

    if let Some(ref nats) = nats {
        nats.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
