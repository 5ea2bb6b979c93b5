//! Reconciliation of advertisements onto Neutron ports.
//!
//! Every advertisement event is turned into per-node address deltas:
//! - nodes selected by both the old and the new object get `diff(new, old)`
//! - nodes selected only by the new object get every new address
//! - nodes selected only by the old object lose every old address
//!
//! Each delta is applied to every port of the node's instance as a set
//! operation over the port's current allowed address pairs. An address is
//! never withdrawn from a node that another known advertisement still
//! announces it on. Nothing is retried here; the next event re-drives
//! convergence.

use crate::cache::AdvertisementCache;
use crate::diff::diff_multiset;
use crate::error::ControllerError;
use crate::metrics::{EngineMetrics, PortResult};
use crate::node::{node_provider_uuid, LabelSelector, NodeLister};
use crate::pool_index::{PoolChange, PoolIndex};
use crate::resolver::{resolve_ips, Advertisement, AdvertisementKey};
use k8s_openapi::api::core::v1::Node;
use neutron_client::{AllowedAddressPair, NetworkClientTrait, Port};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Advertisement event with both sides resolved from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertisementEvent {
    Added(Advertisement),
    Updated {
        old: Advertisement,
        new: Advertisement,
    },
    Deleted(Advertisement),
}

impl AdvertisementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AdvertisementEvent::Added(_) => "added",
            AdvertisementEvent::Updated { .. } => "updated",
            AdvertisementEvent::Deleted(_) => "deleted",
        }
    }

    pub fn key(&self) -> &AdvertisementKey {
        match self {
            AdvertisementEvent::Added(adv)
            | AdvertisementEvent::Deleted(adv)
            | AdvertisementEvent::Updated { new: adv, .. } => &adv.key,
        }
    }
}

/// What a single convergence pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeOutcome {
    pub nodes: usize,
    pub skipped_nodes: usize,
    pub ports_updated: usize,
    pub ports_unchanged: usize,
    pub ports_failed: usize,
}

impl ConvergeOutcome {
    fn record(&mut self, result: PortResult) {
        match result {
            PortResult::Updated => self.ports_updated += 1,
            PortResult::Unchanged => self.ports_unchanged += 1,
            PortResult::Failed => self.ports_failed += 1,
        }
    }

    fn merge(&mut self, other: ConvergeOutcome) {
        self.nodes += other.nodes;
        self.skipped_nodes += other.skipped_nodes;
        self.ports_updated += other.ports_updated;
        self.ports_unchanged += other.ports_unchanged;
        self.ports_failed += other.ports_failed;
    }
}

/// One side of an event: the advertisement and the addresses it resolved to.
struct Side<'a> {
    adv: &'a Advertisement,
    addresses: Vec<String>,
}

/// Addresses another advertisement announces, and where.
struct Announcement {
    selector: LabelSelector,
    addresses: HashSet<String>,
}

/// Drives port state from advertisement events and pool changes.
pub struct Reconciler {
    network_client: Arc<dyn NetworkClientTrait>,
    nodes: Arc<dyn NodeLister>,
    pools: Arc<PoolIndex>,
    advertisements: Arc<AdvertisementCache>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("network", &self.network_client.base_url())
            .field("advertisements", &self.advertisements.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        network_client: Arc<dyn NetworkClientTrait>,
        nodes: Arc<dyn NodeLister>,
        pools: Arc<PoolIndex>,
        advertisements: Arc<AdvertisementCache>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            network_client,
            nodes,
            pools,
            advertisements,
            metrics,
        }
    }

    pub fn pools(&self) -> &PoolIndex {
        &self.pools
    }

    pub fn advertisements(&self) -> &AdvertisementCache {
        &self.advertisements
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Record an observed advertisement and converge its ports.
    ///
    /// A first sighting is an add, anything else an update against the
    /// cached object. With `reassert`, an unchanged object is replayed as an
    /// add so that port state lost since the last sighting is restored.
    ///
    /// When the event fails the previous cache entry is put back, so the
    /// next sighting replays the same transition.
    pub async fn observe_advertisement(
        &self,
        adv: Advertisement,
        reassert: bool,
    ) -> Result<ConvergeOutcome, ControllerError> {
        let key = adv.key.clone();
        let previous = self.advertisements.upsert(adv.clone());
        let event = match previous.clone() {
            None => AdvertisementEvent::Added(adv),
            Some(old) if reassert && old == adv => AdvertisementEvent::Added(adv),
            Some(old) => AdvertisementEvent::Updated { old, new: adv },
        };

        let result = self.handle_event(event).await;
        if result.is_err() {
            debug!("Rolling back cached state of {}", key);
            self.advertisements.restore(&key, previous);
        }
        result
    }

    /// Forget an advertisement and withdraw its addresses.
    ///
    /// The cached object is preferred over `last_known`, which may be a
    /// tombstone. Without either there is nothing to withdraw.
    pub async fn forget_advertisement(
        &self,
        key: &AdvertisementKey,
        last_known: Option<Advertisement>,
    ) -> Result<ConvergeOutcome, ControllerError> {
        match self.advertisements.remove(key).or(last_known) {
            Some(old) => self.handle_event(AdvertisementEvent::Deleted(old)).await,
            None => {
                debug!("Delete for unknown {}; nothing to withdraw", key);
                Ok(ConvergeOutcome::default())
            }
        }
    }

    /// Converge ports for one advertisement event.
    pub async fn handle_event(
        &self,
        event: AdvertisementEvent,
    ) -> Result<ConvergeOutcome, ControllerError> {
        self.metrics
            .advertisement_event(&event.key().kind.to_string(), event.name());
        debug!("Handling {} event for {}", event.name(), event.key());

        let lookup = |name: &str| self.pools.lookup(name);
        match &event {
            AdvertisementEvent::Added(new) => {
                let new = Side {
                    adv: new,
                    addresses: resolve_ips(&new.pools, lookup),
                };
                self.converge(Some(new), None, false).await
            }
            AdvertisementEvent::Updated { old, new } => {
                let new = Side {
                    adv: new,
                    addresses: resolve_ips(&new.pools, lookup),
                };
                let old = Side {
                    adv: old,
                    addresses: resolve_ips(&old.pools, lookup),
                };
                self.converge(Some(new), Some(old), false).await
            }
            AdvertisementEvent::Deleted(old) => {
                let old = Side {
                    adv: old,
                    addresses: resolve_ips(&old.pools, lookup),
                };
                self.converge(None, Some(old), false).await
            }
        }
    }

    /// Requeue every known advertisement that references the changed pool.
    ///
    /// Each one is resolved twice: once with the pool's previous contents
    /// and once with the current index. Every current address is asserted
    /// again, which also repairs ports an earlier failed update left behind,
    /// and addresses the pool dropped are withdrawn.
    pub async fn requeue_pool(&self, change: &PoolChange) -> ConvergeOutcome {
        let mut total = ConvergeOutcome::default();
        if change.is_noop() {
            return total;
        }

        let referencing = self.advertisements.referencing(&change.name);
        if referencing.is_empty() {
            debug!("No advertisement references IPAddressPool {}", change.name);
            return total;
        }
        info!(
            "IPAddressPool {} changed, requeueing {} advertisement(s)",
            change.name,
            referencing.len()
        );

        for adv in &referencing {
            let current = resolve_ips(&adv.pools, |name| {
                if name == change.name {
                    change.current.clone()
                } else {
                    self.pools.lookup(name)
                }
            });
            let previous = resolve_ips(&adv.pools, |name| {
                if name == change.name {
                    change.previous.clone()
                } else {
                    self.pools.lookup(name)
                }
            });

            let new = Side {
                adv,
                addresses: current,
            };
            let old = Side {
                adv,
                addresses: previous,
            };
            match self.converge(Some(new), Some(old), true).await {
                Ok(outcome) => total.merge(outcome),
                Err(e) => error!(
                    "Requeue of {} for IPAddressPool {} failed: {}",
                    adv.key, change.name, e
                ),
            }
        }
        total
    }

    /// Consume pool changes until cancelled or the index is dropped.
    pub async fn run_pool_requeue(
        self: Arc<Self>,
        mut changes: UnboundedReceiver<PoolChange>,
        cancel: CancellationToken,
    ) {
        loop {
            let change = tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            self.requeue_pool(&change).await;
        }
        debug!("Pool requeue loop stopped");
    }

    /// With `reassert`, nodes selected on both sides get every new address
    /// rather than only the difference to the old side.
    async fn converge(
        &self,
        new: Option<Side<'_>>,
        old: Option<Side<'_>>,
        reassert: bool,
    ) -> Result<ConvergeOutcome, ControllerError> {
        let new_addresses = new.as_ref().map(|s| s.addresses.as_slice()).unwrap_or_default();
        let old_addresses = old.as_ref().map(|s| s.addresses.as_slice()).unwrap_or_default();
        let same_selector = match (&new, &old) {
            (Some(n), Some(o)) => n.adv.selector == o.adv.selector,
            _ => false,
        };

        // An address that loses one of several references is still advertised
        let (mut shared_add, mut shared_del) = diff_multiset(new_addresses, old_addresses);
        let still_advertised: HashSet<&str> = new_addresses.iter().map(String::as_str).collect();
        shared_del.retain(|ip| !still_advertised.contains(ip.as_str()));
        if reassert {
            shared_add = diff_multiset(new_addresses, &[]).0;
        }
        let shared = (shared_add, shared_del);
        let nothing_to_do = if same_selector {
            shared.0.is_empty() && shared.1.is_empty()
        } else {
            new_addresses.is_empty() && old_addresses.is_empty()
        };
        if nothing_to_do {
            debug!("No address changes to apply");
            return Ok(ConvergeOutcome::default());
        }

        // Node list errors abort the whole event
        let new_nodes = match &new {
            Some(side) => self.list_nodes(side.adv).await?,
            None => BTreeMap::new(),
        };
        let old_nodes = match &old {
            Some(_) if same_selector => new_nodes.clone(),
            Some(side) => self.list_nodes(side.adv).await?,
            None => BTreeMap::new(),
        };

        let added_only = diff_multiset(new_addresses, &[]);
        let removed_only = diff_multiset(&[], old_addresses);

        let announcements = match new.as_ref().or(old.as_ref()) {
            Some(side) if !shared.1.is_empty() || !removed_only.1.is_empty() => {
                self.announcements_besides(&side.adv.key)
            }
            _ => Vec::new(),
        };

        let mut outcome = ConvergeOutcome::default();
        let names: Vec<&String> = {
            let mut names: Vec<&String> = new_nodes.keys().chain(old_nodes.keys()).collect();
            names.sort();
            names.dedup();
            names
        };

        for name in names {
            let (node, (add, del)) = match (new_nodes.get(name), old_nodes.get(name)) {
                (Some(node), Some(_)) => (node, &shared),
                (Some(node), None) => (node, &added_only),
                (None, Some(node)) => (node, &removed_only),
                (None, None) => continue,
            };
            let del = withdrawable(name, node, del, &announcements);
            if add.is_empty() && del.is_empty() {
                continue;
            }

            let uuid = match node_provider_uuid(node) {
                Ok(uuid) => uuid,
                Err(e) => {
                    warn!("Skipping node {}: {}", name, e);
                    outcome.skipped_nodes += 1;
                    continue;
                }
            };

            outcome.nodes += 1;
            self.converge_node(name, &uuid, add, &del, &mut outcome).await;
        }

        info!(
            "Converged {} node(s): {} port(s) updated, {} unchanged, {} failed, {} node(s) skipped",
            outcome.nodes,
            outcome.ports_updated,
            outcome.ports_unchanged,
            outcome.ports_failed,
            outcome.skipped_nodes
        );
        Ok(outcome)
    }

    /// What every other cached advertisement currently announces.
    fn announcements_besides(&self, key: &AdvertisementKey) -> Vec<Announcement> {
        self.advertisements
            .others(key)
            .into_iter()
            .filter(|adv| !adv.selector.is_empty())
            .map(|adv| Announcement {
                addresses: resolve_ips(&adv.pools, |name| self.pools.lookup(name))
                    .into_iter()
                    .collect(),
                selector: adv.selector,
            })
            .filter(|announcement| !announcement.addresses.is_empty())
            .collect()
    }

    async fn list_nodes(&self, adv: &Advertisement) -> Result<BTreeMap<String, Node>, ControllerError> {
        if adv.selector.is_empty() {
            debug!("{} has no node selector; no nodes selected", adv.key);
            return Ok(BTreeMap::new());
        }

        let nodes = self.nodes.list_nodes(&adv.selector).await.map_err(|e| {
            error!("Failed to list nodes for {} ({}): {}", adv.key, adv.selector, e);
            e
        })?;
        Ok(nodes
            .into_iter()
            .filter_map(|node| node.metadata.name.clone().map(|name| (name, node)))
            .collect())
    }

    async fn converge_node(
        &self,
        node: &str,
        uuid: &str,
        add: &[String],
        del: &[String],
        outcome: &mut ConvergeOutcome,
    ) {
        let ports = match self.network_client.list_ports(uuid).await {
            Ok(ports) => ports,
            Err(e) => {
                error!("Failed to list ports of node {} (device {}): {}", node, uuid, e);
                self.metrics.port_update(PortResult::Failed);
                outcome.record(PortResult::Failed);
                return;
            }
        };
        if ports.is_empty() {
            debug!("Node {} (device {}) has no ports", node, uuid);
        }

        for port in ports {
            let result = self.converge_port(&port, add, del).await;
            self.metrics.port_update(result);
            outcome.record(result);
        }
    }

    async fn converge_port(&self, port: &Port, add: &[String], del: &[String]) -> PortResult {
        let pairs = merge_pairs(&port.allowed_address_pairs, add, del);
        if pairs == port.allowed_address_pairs {
            debug!("Port {} already converged", port.id);
            return PortResult::Unchanged;
        }

        debug!(
            "Port {}: +{:?} -{:?} -> {} pair(s)",
            port.id,
            add,
            del,
            pairs.len()
        );
        match self.network_client.update_port(&port.id, pairs).await {
            Ok(_) => PortResult::Updated,
            Err(e) => {
                error!("Failed to update port {}: {}", port.id, e);
                PortResult::Failed
            }
        }
    }
}

/// Drop from `del` every address another advertisement announces on `node`.
fn withdrawable(
    name: &str,
    node: &Node,
    del: &[String],
    announcements: &[Announcement],
) -> Vec<String> {
    let labels = node.metadata.labels.as_ref();
    let covering: Vec<&Announcement> = announcements
        .iter()
        .filter(|announcement| announcement.selector.matches(labels))
        .collect();

    let (kept, withdrawn): (Vec<&String>, Vec<&String>) = del
        .iter()
        .partition(|ip| covering.iter().any(|a| a.addresses.contains(ip.as_str())));
    if !kept.is_empty() {
        debug!("Node {} still announces {:?} elsewhere; keeping them", name, kept);
    }
    withdrawn.into_iter().cloned().collect()
}

/// `(current ∪ add) \ del` over IP addresses.
///
/// Existing entries keep their position and MAC address; added entries are
/// appended with only an IP.
pub fn merge_pairs(
    current: &[AllowedAddressPair],
    add: &[String],
    del: &[String],
) -> Vec<AllowedAddressPair> {
    let del: HashSet<&str> = del.iter().map(String::as_str).collect();

    let mut merged: Vec<AllowedAddressPair> = current
        .iter()
        .filter(|pair| !del.contains(pair.ip_address.as_str()))
        .cloned()
        .collect();
    let mut present: HashSet<String> = merged.iter().map(|pair| pair.ip_address.clone()).collect();

    for ip in add {
        if !del.contains(ip.as_str()) && present.insert(ip.clone()) {
            merged.push(AllowedAddressPair::new(ip.clone()));
        }
    }
    merged
}
