//! Neutron API models
//!
//! These models cover the subset of the Networking v2 port resource used by
//! the sync engine. Unknown fields are ignored on deserialization.
//! See: https://docs.openstack.org/api-ref/network/v2/#ports

use serde::{Deserialize, Serialize};

/// Port model matching the Neutron port resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// UUID of the instance the port is attached to
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub allowed_address_pairs: Vec<AllowedAddressPair>,
}

/// Allowed address pair on a port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowedAddressPair {
    /// IP address or CIDR
    pub ip_address: String,
    /// MAC address; Neutron defaults it to the port's MAC when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

impl AllowedAddressPair {
    /// Pair carrying only an IP address
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            mac_address: None,
        }
    }
}

/// Pagination link (`ports_links`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
}

/// Response body of `GET /v2.0/ports`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortList {
    pub ports: Vec<Port>,
    #[serde(default)]
    pub ports_links: Vec<Link>,
}

impl PortList {
    /// `href` of the `next` page link, if any
    pub fn next_page(&self) -> Option<&str> {
        self.ports_links
            .iter()
            .find(|link| link.rel == "next")
            .map(|link| link.href.as_str())
    }
}

/// Response body of `GET`/`PUT /v2.0/ports/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEnvelope {
    pub port: Port,
}

/// Request body for updating a port's allowed address pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePortRequest {
    pub port: UpdatePortFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePortFields {
    pub allowed_address_pairs: Vec<AllowedAddressPair>,
}

impl UpdatePortRequest {
    pub fn allowed_address_pairs(pairs: Vec<AllowedAddressPair>) -> Self {
        Self {
            port: UpdatePortFields {
                allowed_address_pairs: pairs,
            },
        }
    }
}
