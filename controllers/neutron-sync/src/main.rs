//! neutron-sync Controller
//!
//! Keeps OpenStack Neutron ports in step with MetalLB:
//! - L2Advertisement / BGPAdvertisement: which VIPs are announced from which nodes
//! - IPAddressPool: the addresses behind each pool name
//! - OpenStackLoadBalanceService: enables the engine while at least one exists
//!
//! Every VIP announced from a node is added to the allowed address pairs of
//! that node's ports, so Neutron does not drop traffic sourced from it.

mod cache;
mod config;
mod controller;
mod diff;
mod error;
mod gate;
mod http;
mod metrics;
mod node;
mod pool_index;
mod reconciler;
mod resolver;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Ignore the error when a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting neutron-sync controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Neutron URL: {}", config.neutron_url);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
