//! Runtime configuration loaded from environment variables.

use crate::error::ControllerError;
use std::env;
use std::fmt;
use std::net::SocketAddr;

pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Engine configuration.
///
/// Cloud credentials come from the deployment (a token issued by the
/// credential collaborator); MetalLB and enablement resource identities are
/// compiled in.
#[derive(Clone)]
pub struct Config {
    pub neutron_url: String,
    pub neutron_token: String,
    pub metrics_addr: SocketAddr,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("neutron_url", &self.neutron_url)
            .field("metrics_addr", &self.metrics_addr)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "{} environment variable is required",
                        key
                    ))
                })
        };

        let neutron_url = required("NEUTRON_URL")?;
        let neutron_token = required("OS_AUTH_TOKEN")?;

        let metrics_addr = lookup("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "METRICS_ADDR {:?} is not a socket address: {}",
                metrics_addr, e
            ))
        })?;

        Ok(Self {
            neutron_url,
            neutron_token,
            metrics_addr,
        })
    }
}
