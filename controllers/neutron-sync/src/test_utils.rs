//! Test utilities for unit testing the sync engine
//!
//! This module provides helpers for creating test data and an in-memory
//! engine wired to `MockNeutronClient` and a static node list.

use crate::cache::AdvertisementCache;
use crate::error::ControllerError;
use crate::metrics::EngineMetrics;
use crate::node::{LabelSelector, NodeLister};
use crate::pool_index::PoolIndex;
use crate::reconciler::Reconciler;
use crate::resolver::{Advertisement, AdvertisementKey};
use crds::AdvKind;
use k8s_openapi::api::core::v1::{Node, NodeSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use neutron_client::MockNeutronClient;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Helper to create a test Node with a providerID and labels
pub fn create_test_node(name: &str, provider_id: &str, node_labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(node_labels)),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(provider_id.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a watched IPAddressPool object
pub fn create_test_pool_object(name: &str, addresses: &[&str]) -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "metallb.io/v1beta1",
        "kind": "IPAddressPool",
        "metadata": {"name": name, "namespace": "metallb-system"},
        "spec": {"addresses": addresses}
    }))
    .unwrap()
}

/// Helper to create a watched advertisement object of any kind
pub fn create_test_advertisement_object(
    kind: &str,
    namespace: &str,
    name: &str,
    pools: &[&str],
    selector: &[(&str, &str)],
) -> DynamicObject {
    let mut spec = json!({"ipAddressPools": pools});
    if !selector.is_empty() {
        spec["nodeSelectors"] = json!([{"matchLabels": labels(selector)}]);
    }
    serde_json::from_value(json!({
        "apiVersion": "metallb.io/v1beta1",
        "kind": kind,
        "metadata": {"name": name, "namespace": namespace},
        "spec": spec
    }))
    .unwrap()
}

/// Helper to create a resolved advertisement in `metallb-system`
pub fn advertisement(
    kind: AdvKind,
    name: &str,
    pools: &[&str],
    selector: &[(&str, &str)],
) -> Advertisement {
    Advertisement {
        key: AdvertisementKey {
            kind,
            namespace: "metallb-system".to_string(),
            name: name.to_string(),
        },
        selector: LabelSelector::new(labels(selector)),
        pools: pools.iter().map(|p| p.to_string()).collect(),
    }
}

/// In-memory node list filtered with the engine's own selector matching
#[derive(Debug, Default)]
pub struct StaticNodeLister {
    nodes: Mutex<Vec<Node>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticNodeLister {
    pub fn add(&self, node: Node) {
        self.nodes.lock().unwrap().push(node);
    }

    /// Make every subsequent list call fail
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NodeLister for StaticNodeLister {
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, ControllerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControllerError::Watch("injected node list failure".to_string()));
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|node| selector.matches(node.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }
}

/// Reconciler wired to in-memory collaborators
pub struct TestEngine {
    pub network: MockNeutronClient,
    pub nodes: Arc<StaticNodeLister>,
    pub reconciler: Arc<Reconciler>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_pools(PoolIndex::new())
    }

    pub fn with_pools(pools: PoolIndex) -> Self {
        let network = MockNeutronClient::new("http://test-neutron");
        let nodes = Arc::new(StaticNodeLister::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(network.clone()),
            nodes.clone(),
            Arc::new(pools),
            Arc::new(AdvertisementCache::new()),
            EngineMetrics::new().unwrap(),
        ));
        Self {
            network,
            nodes,
            reconciler,
        }
    }
}
