//! Controller-specific error types.
//!
//! This module defines error types specific to the sync engine that are not
//! covered by upstream library errors.

use crds::CrdError;
use kube::Error as KubeError;
use neutron_client::NeutronError;
use thiserror::Error;

/// Errors that can occur in the sync engine.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Neutron API error
    #[error("Neutron error: {0}")]
    Neutron(#[from] NeutronError),

    /// Event payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] CrdError),

    /// Node providerID has no usable instance UUID
    #[error("Invalid providerID: {0:?}")]
    InvalidProviderId(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Listener / socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
