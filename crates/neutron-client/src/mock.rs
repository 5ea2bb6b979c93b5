//! Mock NeutronClient for unit testing
//!
//! This module provides a mock implementation of NetworkClientTrait that can be used
//! in unit tests without requiring a running Neutron endpoint.

use crate::error::NeutronError;
use crate::models::*;
use crate::network_trait::NetworkClientTrait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// A recorded `update_port` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortUpdate {
    pub port_id: String,
    pub allowed_address_pairs: Vec<AllowedAddressPair>,
}

impl PortUpdate {
    /// IP addresses of the update, sorted
    pub fn ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .allowed_address_pairs
            .iter()
            .map(|pair| pair.ip_address.clone())
            .collect();
        ips.sort();
        ips
    }
}

/// Mock NeutronClient for testing
///
/// Ports live in memory and every update is recorded. Failures can be
/// injected per device (for `list_ports`) or per port (for `update_port`).
#[derive(Debug, Clone)]
pub struct MockNeutronClient {
    base_url: String,
    ports: Arc<Mutex<BTreeMap<String, Port>>>,
    updates: Arc<Mutex<Vec<PortUpdate>>>,
    list_calls: Arc<Mutex<Vec<String>>>,
    failing_devices: Arc<Mutex<HashSet<String>>>,
    failing_ports: Arc<Mutex<HashSet<String>>>,
    reject_token: Arc<Mutex<bool>>,
}

impl MockNeutronClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ports: Arc::new(Mutex::new(BTreeMap::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            list_calls: Arc::new(Mutex::new(Vec::new())),
            failing_devices: Arc::new(Mutex::new(HashSet::new())),
            failing_ports: Arc::new(Mutex::new(HashSet::new())),
            reject_token: Arc::new(Mutex::new(false)),
        }
    }

    /// Add a port to the mock store (for test setup)
    pub fn add_port(&self, id: &str, device_id: &str, ips: &[&str]) {
        let port = Port {
            id: id.to_string(),
            device_id: device_id.to_string(),
            allowed_address_pairs: ips.iter().map(|ip| AllowedAddressPair::new(*ip)).collect(),
            ..Default::default()
        };
        self.insert_port(port);
    }

    /// Insert a fully specified port (for test setup)
    pub fn insert_port(&self, port: Port) {
        self.ports.lock().unwrap().insert(port.id.clone(), port);
    }

    /// Current port state
    pub fn port(&self, id: &str) -> Option<Port> {
        self.ports.lock().unwrap().get(id).cloned()
    }

    /// Current allowed IPs of a port, sorted
    pub fn allowed_ips(&self, id: &str) -> Vec<String> {
        let mut ips: Vec<String> = self
            .port(id)
            .map(|port| {
                port.allowed_address_pairs
                    .into_iter()
                    .map(|pair| pair.ip_address)
                    .collect()
            })
            .unwrap_or_default();
        ips.sort();
        ips
    }

    /// All `update_port` calls so far, in order
    pub fn updates(&self) -> Vec<PortUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Device IDs passed to `list_ports`, in order
    pub fn list_calls(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }

    /// Forget recorded calls, keeping port state
    pub fn clear_calls(&self) {
        self.updates.lock().unwrap().clear();
        self.list_calls.lock().unwrap().clear();
    }

    /// Make `list_ports` fail for a device
    pub fn fail_list_for_device(&self, device_id: &str) {
        self.failing_devices.lock().unwrap().insert(device_id.to_string());
    }

    /// Make `update_port` fail for a port
    pub fn fail_update_for_port(&self, port_id: &str) {
        self.failing_ports.lock().unwrap().insert(port_id.to_string());
    }

    /// Undo `fail_list_for_device` and `fail_update_for_port`
    pub fn clear_failures(&self) {
        self.failing_devices.lock().unwrap().clear();
        self.failing_ports.lock().unwrap().clear();
    }

    /// Make `validate_token` fail
    pub fn reject_token(&self) {
        *self.reject_token.lock().unwrap() = true;
    }
}

#[async_trait::async_trait]
impl NetworkClientTrait for MockNeutronClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), NeutronError> {
        if *self.reject_token.lock().unwrap() {
            return Err(NeutronError::Authentication("token rejected".to_string()));
        }
        Ok(())
    }

    async fn list_ports(&self, device_id: &str) -> Result<Vec<Port>, NeutronError> {
        self.list_calls.lock().unwrap().push(device_id.to_string());

        if self.failing_devices.lock().unwrap().contains(device_id) {
            return Err(NeutronError::Api(format!(
                "injected list failure for device {}",
                device_id
            )));
        }

        Ok(self
            .ports
            .lock()
            .unwrap()
            .values()
            .filter(|port| port.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn update_port(
        &self,
        id: &str,
        allowed_address_pairs: Vec<AllowedAddressPair>,
    ) -> Result<Port, NeutronError> {
        if self.failing_ports.lock().unwrap().contains(id) {
            return Err(NeutronError::Api(format!("injected update failure for port {}", id)));
        }

        let mut ports = self.ports.lock().unwrap();
        let port = ports
            .get_mut(id)
            .ok_or_else(|| NeutronError::NotFound(format!("Port {} not found", id)))?;
        port.allowed_address_pairs = allowed_address_pairs.clone();
        let updated = port.clone();
        drop(ports);

        self.updates.lock().unwrap().push(PortUpdate {
            port_id: id.to_string(),
            allowed_address_pairs,
        });
        Ok(updated)
    }
}
