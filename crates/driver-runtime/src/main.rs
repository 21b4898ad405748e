//! # Driver Runtime
//!
//! Boots a [`DriverContext`] and keeps it alive until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG`, default `info`)
//! 2. Load configuration from `DRIVER_*` environment variables
//! 3. Build every component (fail fast on configuration or wiring errors)
//! 4. Register contact points with the metadata manager
//! 5. Log driver events until shutdown
//!
//! Context operations block (builders, coordination jobs), so they run on
//! the blocking pool rather than on runtime worker threads.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use driver_core::metadata::{contact_points, DEFAULT_PORT};
use driver_core::{DriverConfig, DriverContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("===========================================");
    info!("  Cluster Driver Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let config = DriverConfig::from_env();
    let context = tokio::task::spawn_blocking(move || boot(config))
        .await
        .context("boot task panicked")??;

    let mut events = context.event_bus()?.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("[Runtime] {:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[Runtime] Event log lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Driver is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    event_logger.abort();
    let closing = Arc::clone(&context);
    tokio::task::spawn_blocking(move || closing.close())
        .await
        .context("shutdown task panicked")?;
    info!("Driver stopped");

    Ok(())
}

/// Build the context and seed membership with the contact points.
fn boot(config: DriverConfig) -> Result<Arc<DriverContext>> {
    let mut points = contact_points(&config)?;
    if points.is_empty() {
        let fallback = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT);
        warn!("[Runtime] No contact points configured, using {}", fallback);
        points.push(fallback);
    }

    let context = DriverContext::new(config);
    context
        .init_all()
        .context("driver context failed to initialize")?;

    let nodes = context
        .metadata_manager()?
        .add_contact_points(points)
        .context("registering contact points")?;
    for node in &nodes {
        info!(
            "[Runtime] Contact point {}",
            serde_json::to_string(&node.snapshot())?
        );
    }

    context.load_balancing_policy_wrapper()?.init()?;

    if let Some(settings) = context.control_connection()?.next_channel() {
        info!(
            "[Runtime] Control channel target {} (protocol {})",
            settings.address, settings.protocol_version
        );
    }

    context.print_status();
    Ok(context)
}
