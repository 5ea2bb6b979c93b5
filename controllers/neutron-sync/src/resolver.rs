//! Advertisement resolution.
//!
//! Projects L2Advertisement and BGPAdvertisement objects onto the two facts
//! the reconciler needs (node selector, referenced pools) and expands pool
//! names into addresses through the pool index.

use crate::error::ControllerError;
use crate::node::LabelSelector;
use crate::pool_index::Addresses;
use crds::{AdvKind, AdvertisementSpec, CrdError};
use kube::api::DynamicObject;
use std::fmt;
use tracing::debug;

/// Identity of an advertisement across both kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdvertisementKey {
    pub kind: AdvKind,
    pub namespace: String,
    pub name: String,
}

impl AdvertisementKey {
    /// Key of a watched object, read from metadata only.
    ///
    /// Works for delete tombstones whose spec can no longer be decoded.
    pub fn from_dynamic(obj: &DynamicObject, kind: AdvKind) -> Result<Self, ControllerError> {
        let name = obj.metadata.name.clone().ok_or(CrdError::MissingName)?;
        Ok(Self {
            kind,
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name,
        })
    }
}

impl fmt::Display for AdvertisementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Resolved view of one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub key: AdvertisementKey,
    pub selector: LabelSelector,
    pub pools: Vec<String>,
}

impl Advertisement {
    pub fn references(&self, pool: &str) -> bool {
        self.pools.iter().any(|p| p == pool)
    }
}

/// Resolve a watched object into an [`Advertisement`].
///
/// The object's own `kind` wins when present; `watched` covers list items
/// delivered without type metadata. Kinds other than L2Advertisement and
/// BGPAdvertisement are rejected.
pub fn resolve(obj: &DynamicObject, watched: AdvKind) -> Result<Advertisement, ControllerError> {
    let kind = match obj.types.as_ref().map(|types| types.kind.as_str()) {
        Some(kind) if !kind.is_empty() => AdvKind::from_kind(kind)?,
        _ => watched,
    };
    let key = AdvertisementKey::from_dynamic(obj, kind)?;

    let spec: AdvertisementSpec = match obj.data.get("spec") {
        Some(spec) if !spec.is_null() => {
            serde_json::from_value(spec.clone()).map_err(CrdError::from)?
        }
        _ => AdvertisementSpec::default(),
    };

    if spec.selector_count() > 1 {
        debug!(
            "{} has {} nodeSelectors; only the first is used",
            key,
            spec.selector_count()
        );
    }

    Ok(Advertisement {
        key,
        selector: LabelSelector::new(spec.selector_labels()),
        pools: spec.pools().to_vec(),
    })
}

/// Concatenate pool contents in `pool_names` order.
///
/// Unknown pools contribute nothing. Duplicates are kept; set semantics
/// are applied when ports are updated.
pub fn resolve_ips<F>(pool_names: &[String], lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Addresses,
{
    let mut out = Vec::new();
    for name in pool_names {
        out.extend(lookup(name).iter().cloned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool_index::{AddressPool, PoolIndex};
    use crate::test_utils::create_test_advertisement_object;
    use serde_json::json;

    #[test]
    fn test_resolve_l2_and_bgp() {
        let obj = create_test_advertisement_object(
            "L2Advertisement",
            "metallb-system",
            "adv1",
            &["pool-a"],
            &[("role", "worker")],
        );
        let adv = resolve(&obj, AdvKind::L2).unwrap();
        assert_eq!(adv.key.kind, AdvKind::L2);
        assert_eq!(adv.key.namespace, "metallb-system");
        assert_eq!(adv.key.name, "adv1");
        assert_eq!(adv.pools, vec!["pool-a"]);
        assert_eq!(adv.selector.to_query(), "role=worker");

        let obj = create_test_advertisement_object(
            "BGPAdvertisement",
            "metallb-system",
            "adv2",
            &["pool-b", "pool-c"],
            &[],
        );
        let adv = resolve(&obj, AdvKind::Bgp).unwrap();
        assert_eq!(adv.key.kind, AdvKind::Bgp);
        assert_eq!(adv.pools, vec!["pool-b", "pool-c"]);
        assert!(adv.selector.is_empty());
    }

    #[test]
    fn test_resolve_rejects_other_kinds() {
        let obj = create_test_advertisement_object("IPAddressPool", "metallb-system", "x", &[], &[]);
        assert!(matches!(
            resolve(&obj, AdvKind::L2),
            Err(ControllerError::Decode(CrdError::UnsupportedKind(kind))) if kind == "IPAddressPool"
        ));
    }

    #[test]
    fn test_resolve_falls_back_to_watched_kind() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "metadata": {"name": "adv1", "namespace": "metallb-system"},
            "spec": {"ipAddressPools": ["pool-a"]}
        }))
        .unwrap();
        assert_eq!(resolve(&obj, AdvKind::Bgp).unwrap().key.kind, AdvKind::Bgp);
    }

    #[test]
    fn test_resolve_malformed_spec() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "metallb.io/v1beta1",
            "kind": "L2Advertisement",
            "metadata": {"name": "adv1", "namespace": "metallb-system"},
            "spec": {"nodeSelectors": [{"matchLabels": ["role"]}]}
        }))
        .unwrap();
        assert!(matches!(
            resolve(&obj, AdvKind::L2),
            Err(ControllerError::Decode(CrdError::MalformedSpec(_)))
        ));
    }

    #[test]
    fn test_resolve_ips_concatenates_in_order() {
        let index = PoolIndex::new();
        index.apply(AddressPool {
            name: "pool-a".to_string(),
            addresses: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
        });
        index.apply(AddressPool {
            name: "pool-b".to_string(),
            addresses: vec!["10.0.0.2".to_string()],
        });

        let names = vec![
            "pool-b".to_string(),
            "pool-missing".to_string(),
            "pool-a".to_string(),
        ];
        let ips = resolve_ips(&names, |name| index.lookup(name));
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_resolve_ips_dangling_reference_is_empty() {
        let index = PoolIndex::new();
        let ips = resolve_ips(&["pool-missing".to_string()], |name| index.lookup(name));
        assert!(ips.is_empty());
    }
}
