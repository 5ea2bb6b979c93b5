//! MetalLB resource projections
//!
//! The engine never writes MetalLB objects, so only the fields it reads are
//! modelled here. Everything else in the upstream schema is ignored on
//! deserialization.

use crate::error::CrdError;
use kube::api::GroupVersionKind;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a watched resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVersionResource {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl GroupVersionResource {
    /// Build the `ApiResource` used for `Api<DynamicObject>` access.
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(self.group, self.version, self.kind);
        ApiResource::from_gvk_with_plural(&gvk, self.plural)
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Resource={}", self.group, self.version, self.plural)
    }
}

pub const L2_ADVERTISEMENT: GroupVersionResource = GroupVersionResource {
    group: "metallb.io",
    version: "v1beta1",
    kind: "L2Advertisement",
    plural: "l2advertisements",
};

pub const BGP_ADVERTISEMENT: GroupVersionResource = GroupVersionResource {
    group: "metallb.io",
    version: "v1beta1",
    kind: "BGPAdvertisement",
    plural: "bgpadvertisements",
};

pub const IP_ADDRESS_POOL: GroupVersionResource = GroupVersionResource {
    group: "metallb.io",
    version: "v1beta1",
    kind: "IPAddressPool",
    plural: "ipaddresspools",
};

/// Advertisement flavour. L2 and BGP share the fields the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdvKind {
    L2,
    Bgp,
}

impl AdvKind {
    pub const ALL: [AdvKind; 2] = [AdvKind::L2, AdvKind::Bgp];

    pub fn resource(self) -> GroupVersionResource {
        match self {
            AdvKind::L2 => L2_ADVERTISEMENT,
            AdvKind::Bgp => BGP_ADVERTISEMENT,
        }
    }

    /// Map an object's `kind` to an advertisement flavour.
    pub fn from_kind(kind: &str) -> Result<Self, CrdError> {
        match kind {
            "L2Advertisement" => Ok(AdvKind::L2),
            "BGPAdvertisement" => Ok(AdvKind::Bgp),
            other => Err(CrdError::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for AdvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource().kind)
    }
}

/// Shared `spec` of L2Advertisement and BGPAdvertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementSpec {
    /// Names of the IPAddressPools announced by this advertisement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address_pools: Option<Vec<String>>,

    /// Node selectors; only the first entry is consulted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selectors: Option<Vec<NodeSelector>>,
}

impl AdvertisementSpec {
    pub fn pools(&self) -> &[String] {
        self.ip_address_pools.as_deref().unwrap_or_default()
    }

    /// `matchLabels` of the first node selector, empty when absent.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        self.node_selectors
            .as_deref()
            .and_then(|selectors| selectors.first())
            .and_then(|selector| selector.match_labels.clone())
            .unwrap_or_default()
    }

    pub fn selector_count(&self) -> usize {
        self.node_selectors.as_ref().map_or(0, Vec::len)
    }
}

/// Label selector entry of an advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,
}

/// `spec` of an IPAddressPool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressPoolSpec {
    /// IPs, ranges or CIDRs; opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
}

impl IPAddressPoolSpec {
    pub fn addresses(&self) -> &[String] {
        self.addresses.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adv_kind_from_kind() {
        assert_eq!(AdvKind::from_kind("L2Advertisement").unwrap(), AdvKind::L2);
        assert_eq!(AdvKind::from_kind("BGPAdvertisement").unwrap(), AdvKind::Bgp);
        assert!(matches!(
            AdvKind::from_kind("IPAddressPool"),
            Err(CrdError::UnsupportedKind(k)) if k == "IPAddressPool"
        ));
    }

    #[test]
    fn test_api_resource_uses_explicit_plural() {
        let ar = L2_ADVERTISEMENT.api_resource();
        assert_eq!(ar.api_version, "metallb.io/v1beta1");
        assert_eq!(ar.plural, "l2advertisements");
        assert_eq!(ar.kind, "L2Advertisement");
        assert_eq!(IP_ADDRESS_POOL.api_resource().plural, "ipaddresspools");
    }

    #[test]
    fn test_advertisement_spec_first_selector_only() {
        let spec: AdvertisementSpec = serde_json::from_value(json!({
            "ipAddressPools": ["pool-a", "pool-b"],
            "nodeSelectors": [
                {"matchLabels": {"role": "worker"}},
                {"matchLabels": {"role": "edge"}}
            ],
            "interfaces": ["eth0"]
        }))
        .unwrap();

        assert_eq!(spec.pools(), ["pool-a", "pool-b"]);
        let labels = spec.selector_labels();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("role").map(String::as_str), Some("worker"));
        assert_eq!(spec.selector_count(), 2);
    }

    #[test]
    fn test_advertisement_spec_missing_fields() {
        let spec: AdvertisementSpec = serde_json::from_value(json!({})).unwrap();
        assert!(spec.pools().is_empty());
        assert!(spec.selector_labels().is_empty());

        let spec: AdvertisementSpec =
            serde_json::from_value(json!({"ipAddressPools": null, "nodeSelectors": [{}]})).unwrap();
        assert!(spec.pools().is_empty());
        assert!(spec.selector_labels().is_empty());
    }

    #[test]
    fn test_advertisement_spec_rejects_wrong_types() {
        let result: Result<AdvertisementSpec, _> =
            serde_json::from_value(json!({"ipAddressPools": "pool-a"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_pool_spec_addresses() {
        let spec: IPAddressPoolSpec = serde_json::from_value(json!({
            "addresses": ["10.0.0.1/32", "10.0.1.0/24"],
            "autoAssign": false
        }))
        .unwrap();
        assert_eq!(spec.addresses(), ["10.0.0.1/32", "10.0.1.0/24"]);
    }
}
