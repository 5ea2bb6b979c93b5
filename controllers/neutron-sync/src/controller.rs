//! Main controller implementation.
//!
//! Wires configuration, the Kubernetes and Neutron clients, the metrics
//! server and the enablement gate together, then runs until interrupted.

use crate::config::Config;
use crate::error::ControllerError;
use crate::gate::{KubeEngineLauncher, LifecycleGate};
use crate::http;
use crate::metrics::EngineMetrics;
use crds::OpenStackLoadBalanceService;
use kube::{Api, Client};
use neutron_client::{NetworkClientTrait, NeutronClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Process-level controller.
pub struct Controller {
    gate: LifecycleGate,
    enablement_api: Api<OpenStackLoadBalanceService>,
    metrics: EngineMetrics,
    metrics_addr: SocketAddr,
    root: CancellationToken,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("gate", &self.gate)
            .field("metrics_addr", &self.metrics_addr)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing neutron-sync controller");

        let kube_client = Client::try_default().await?;

        let neutron_client = NeutronClient::new(config.neutron_url.clone(), config.neutron_token)?;

        // Validate token and connectivity before proceeding
        info!("Validating Neutron token and connectivity...");
        neutron_client.validate_token().await.map_err(|e| {
            error!("Failed to validate Neutron token: {}", e);
            error!("Please ensure:");
            error!("  1. OS_AUTH_TOKEN is set to a valid, unexpired token");
            error!("  2. Neutron is reachable at {}", config.neutron_url);
            ControllerError::Neutron(e)
        })?;
        info!("Neutron token validated and connectivity established");

        let metrics = EngineMetrics::new()?;
        let root = CancellationToken::new();
        let launcher = KubeEngineLauncher::new(
            kube_client.clone(),
            Arc::new(neutron_client),
            metrics.clone(),
        );
        let gate = LifecycleGate::new(Arc::new(launcher), metrics.clone(), root.clone());

        Ok(Self {
            gate,
            enablement_api: Api::all(kube_client),
            metrics,
            metrics_addr: config.metrics_addr,
            root,
        })
    }

    /// Runs the gate and the metrics server until ctrl-c.
    pub async fn run(self) -> Result<(), ControllerError> {
        let ready = CancellationToken::new();
        let state = Arc::new(http::State::new(self.metrics.clone(), ready.clone()));
        let server = {
            let cancel = self.root.clone();
            let addr = self.metrics_addr;
            tokio::spawn(async move {
                if let Err(e) = http::serve(addr, state, cancel).await {
                    error!("Metrics server failed: {}", e);
                }
            })
        };

        let root = self.root.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
            root.cancel();
        });

        let result = self.gate.run(self.enablement_api.clone(), ready).await;
        self.root.cancel();
        if let Err(e) = server.await {
            warn!("Metrics server task ended abnormally: {}", e);
        }

        info!("neutron-sync controller stopped");
        result
    }
}
