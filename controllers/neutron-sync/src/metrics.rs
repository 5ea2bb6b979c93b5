//! Prometheus metrics for the sync engine.

use crate::error::ControllerError;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::fmt;

const NAMESPACE: &str = "neutron_sync";

/// Outcome of a single port convergence step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortResult {
    Updated,
    Unchanged,
    Failed,
}

impl PortResult {
    fn as_str(self) -> &'static str {
        match self {
            PortResult::Updated => "updated",
            PortResult::Unchanged => "unchanged",
            PortResult::Failed => "failed",
        }
    }
}

/// Registry plus every metric the engine exports.
///
/// Cheap to clone; clones share the same underlying collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    advertisement_events: IntCounterVec,
    pool_events: IntCounterVec,
    port_updates: IntCounterVec,
    engine_running: IntGauge,
}

impl fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("engine_running", &self.engine_running.get())
            .finish_non_exhaustive()
    }
}

impl EngineMetrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let advertisement_events = IntCounterVec::new(
            Opts::new(
                "advertisement_events_total",
                "Advertisement events processed, by kind and event",
            ),
            &["kind", "event"],
        )?;
        let pool_events = IntCounterVec::new(
            Opts::new("pool_events_total", "IPAddressPool events processed, by event"),
            &["event"],
        )?;
        let port_updates = IntCounterVec::new(
            Opts::new("port_updates_total", "Port convergence steps, by result"),
            &["result"],
        )?;
        let engine_running = IntGauge::new(
            "engine_running",
            "1 while an enablement object exists and the engine is running",
        )?;

        registry.register(Box::new(advertisement_events.clone()))?;
        registry.register(Box::new(pool_events.clone()))?;
        registry.register(Box::new(port_updates.clone()))?;
        registry.register(Box::new(engine_running.clone()))?;

        Ok(Self {
            registry,
            advertisement_events,
            pool_events,
            port_updates,
            engine_running,
        })
    }

    pub fn advertisement_event(&self, kind: &str, event: &str) {
        self.advertisement_events.with_label_values(&[kind, event]).inc();
    }

    pub fn pool_event(&self, event: &str) {
        self.pool_events.with_label_values(&[event]).inc();
    }

    pub fn port_update(&self, result: PortResult) {
        self.port_updates.with_label_values(&[result.as_str()]).inc();
    }

    pub fn set_running(&self, running: bool) {
        self.engine_running.set(i64::from(running));
    }

    pub fn port_update_count(&self, result: PortResult) -> u64 {
        self.port_updates.with_label_values(&[result.as_str()]).get()
    }

    pub fn is_running(&self) -> bool {
        self.engine_running.get() == 1
    }

    /// Text exposition of all registered metrics.
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
