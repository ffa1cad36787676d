//! School Billing Engine - Worker Binary
//!
//! Connects the billing engine to PostgreSQL and Midtrans, then runs the
//! expiry sweep on a schedule until interrupted.
//!
//! # Usage
//!
//! ```bash
//! BILLING_DATABASE__URL=postgres://... BILLING_MIDTRANS__SERVER_KEY=... cargo run --bin billing-worker
//! ```
//!
//! # Environment Variables
//!
//! * `BILLING_DATABASE__URL` - PostgreSQL connection string
//! * `BILLING_DATABASE__MIGRATE` - Apply migrations on startup (default: true)
//! * `BILLING_MIDTRANS__SERVER_KEY` - Midtrans server key (required)
//! * `BILLING_MIDTRANS__CORE_BASE_URL` / `BILLING_MIDTRANS__SNAP_BASE_URL` - API hosts (default: sandbox)
//! * `BILLING_SWEEPER__ENABLED` - Run the expiry sweep (default: true)
//! * `BILLING_SWEEPER__STALE_AFTER_HOURS` - Pending age that counts as expired (default: 24)
//! * `BILLING_SWEEPER__INTERVAL_SECS` - Pause between sweeps (default: 3600)
//! * `BILLING_LOG_LEVEL` - Log filter when `RUST_LOG` is unset (default: info)
//! * `BILLING_LOG_JSON` - JSON log lines (default: false)

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use billing_service::{connect, run_sweeper, ServiceConfig};
use core_kernel::AdapterHealth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env().context("loading BILLING_* configuration")?;
    init_tracing(&config.log_level, config.log_json);

    tracing::info!(
        sweeper_enabled = config.sweeper.enabled,
        stale_after_hours = config.sweeper.stale_after_hours,
        "Starting billing worker"
    );

    let engine = Arc::new(connect(&config).await.context("connecting the billing engine")?);

    for result in engine.health_check().await {
        match result.status {
            AdapterHealth::Healthy => tracing::info!(adapter = %result.adapter_id, latency_ms = result.latency_ms, "Adapter healthy"),
            status => tracing::warn!(adapter = %result.adapter_id, ?status, message = ?result.message, "Adapter not healthy"),
        }
    }
    if !engine.is_ready().await {
        anyhow::bail!("an adapter is unhealthy, refusing to start");
    }

    if config.sweeper.enabled {
        run_sweeper(engine, shutdown_signal()).await;
    } else {
        shutdown_signal().await;
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).init();
    }
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
