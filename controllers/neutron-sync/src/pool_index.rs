//! In-memory index of IPAddressPool contents.
//!
//! Pool name → last observed `spec.addresses`. Readers never block each
//! other; writers hold the lock only for the map mutation. Every change is
//! published to the reconciler after the lock is released.

use crate::error::ControllerError;
use crds::{CrdError, IPAddressPoolSpec};
use kube::api::DynamicObject;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Immutable address snapshot shared with readers.
pub type Addresses = Arc<Vec<String>>;

/// Decoded IPAddressPool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPool {
    pub name: String,
    pub addresses: Vec<String>,
}

impl AddressPool {
    /// Project a watched IPAddressPool object.
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, ControllerError> {
        let name = obj.metadata.name.clone().ok_or(CrdError::MissingName)?;
        let spec: IPAddressPoolSpec = match obj.data.get("spec") {
            Some(spec) if !spec.is_null() => {
                serde_json::from_value(spec.clone()).map_err(CrdError::from)?
            }
            _ => IPAddressPoolSpec::default(),
        };

        Ok(Self {
            name,
            addresses: spec.addresses().to_vec(),
        })
    }
}

/// Pool contents before and after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolChange {
    pub name: String,
    pub previous: Addresses,
    pub current: Addresses,
}

impl PoolChange {
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }
}

#[derive(Debug, Default)]
pub struct PoolIndex {
    pools: RwLock<HashMap<String, Addresses>>,
    notifier: Option<UnboundedSender<PoolChange>>,
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index that publishes every effective change on `notifier`.
    pub fn with_notifier(notifier: UnboundedSender<PoolChange>) -> Self {
        Self {
            pools: RwLock::default(),
            notifier: Some(notifier),
        }
    }

    /// Store a snapshot of `pool.addresses` under `pool.name`.
    pub fn apply(&self, pool: AddressPool) -> PoolChange {
        let current: Addresses = Arc::new(pool.addresses);
        let previous = {
            let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            pools.insert(pool.name.clone(), current.clone())
        };

        let change = PoolChange {
            name: pool.name,
            previous: previous.unwrap_or_default(),
            current,
        };
        self.notify(&change);
        change
    }

    /// Drop a pool; readers see it as empty from now on.
    pub fn remove(&self, name: &str) -> PoolChange {
        let previous = {
            let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            pools.remove(name)
        };

        let change = PoolChange {
            name: name.to_string(),
            previous: previous.unwrap_or_default(),
            current: Addresses::default(),
        };
        self.notify(&change);
        change
    }

    /// Current snapshot of a pool, empty when unknown.
    pub fn lookup(&self, name: &str) -> Addresses {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn notify(&self, change: &PoolChange) {
        if change.is_noop() {
            debug!("IPAddressPool {} unchanged", change.name);
            return;
        }
        if let Some(notifier) = &self.notifier {
            // Receiver is gone once the engine stops; nothing left to requeue
            if notifier.send(change.clone()).is_err() {
                debug!("Dropping change for IPAddressPool {}: engine stopped", change.name);
            }
        }
    }
}
