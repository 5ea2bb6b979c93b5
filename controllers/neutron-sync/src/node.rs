//! Node selection and identity.
//!
//! Maps an advertisement's label selector to cluster nodes, and a node to the
//! UUID of the OpenStack instance backing it.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::fmt;

/// Equality-based label selector built from `matchLabels`.
///
/// An empty selector matches no node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every selector label is present with the same value.
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        if self.is_empty() {
            return false;
        }
        let Some(labels) = labels else {
            return false;
        };
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Selector in the `k1=v1,k2=v2` form accepted by the API server.
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// Extract the instance UUID from a providerID such as `openstack:///<uuid>`.
///
/// The UUID is the segment after the last `/`. Strings without `/` and
/// strings ending in `/` are rejected.
pub fn provider_uuid(provider_id: &str) -> Result<&str, ControllerError> {
    match provider_id.rsplit_once('/') {
        Some((_, uuid)) if !uuid.is_empty() => Ok(uuid),
        _ => Err(ControllerError::InvalidProviderId(provider_id.to_string())),
    }
}

/// Instance UUID of a node, from `spec.providerID`.
pub fn node_provider_uuid(node: &Node) -> Result<String, ControllerError> {
    let provider_id = node
        .spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .unwrap_or_default();
    provider_uuid(provider_id).map(str::to_string)
}

/// Lists cluster nodes matching a selector.
#[async_trait::async_trait]
pub trait NodeLister: Send + Sync {
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, ControllerError>;
}

/// `NodeLister` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeNodeLister {
    api: Api<Node>,
}

impl KubeNodeLister {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl NodeLister for KubeNodeLister {
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, ControllerError> {
        // An empty label selector would select every node
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        let params = ListParams::default().labels(&selector.to_query());
        Ok(self.api.list(&params).await?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_node;

    fn selector(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_provider_uuid() {
        let cases = [
            ("openstack:///123e4567-e89b-12d3-a456-426614174000", Some("123e4567-e89b-12d3-a456-426614174000")),
            ("openstack://region-a/uuid-7", Some("uuid-7")),
            ("a/b", Some("b")),
            ("", None),
            ("invalid-id", None),
            ("openstack:///", None),
        ];

        for (input, expected) in cases {
            match (provider_uuid(input), expected) {
                (Ok(uuid), Some(want)) => assert_eq!(uuid, want, "input {:?}", input),
                (Err(ControllerError::InvalidProviderId(id)), None) => assert_eq!(id, input),
                (got, want) => panic!("input {:?}: got {:?}, want {:?}", input, got, want),
            }
        }
    }

    #[test]
    fn test_node_provider_uuid_without_spec() {
        let mut node = create_test_node("n1", "openstack:///uuid-1", &[]);
        assert_eq!(node_provider_uuid(&node).unwrap(), "uuid-1");

        node.spec = None;
        assert!(node_provider_uuid(&node).is_err());
    }

    #[test]
    fn test_selector_matching() {
        let node_labels: BTreeMap<String, String> = [("role", "worker"), ("zone", "a")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        assert!(selector(&[("role", "worker")]).matches(Some(&node_labels)));
        assert!(selector(&[("role", "worker"), ("zone", "a")]).matches(Some(&node_labels)));
        assert!(!selector(&[("role", "edge")]).matches(Some(&node_labels)));
        assert!(!selector(&[("role", "worker"), ("zone", "b")]).matches(Some(&node_labels)));
        assert!(!selector(&[("role", "worker")]).matches(None));
        // Empty selector selects nothing
        assert!(!selector(&[]).matches(Some(&node_labels)));
    }

    #[test]
    fn test_selector_query_is_sorted() {
        let sel = selector(&[("zone", "a"), ("role", "worker")]);
        assert_eq!(sel.to_query(), "role=worker,zone=a");
        assert_eq!(selector(&[]).to_query(), "");
    }
}
