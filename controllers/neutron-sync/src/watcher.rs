//! Kubernetes resource watchers.
//!
//! One long-lived watch per MetalLB resource kind, each feeding the
//! reconciler. kube's watcher reports only the current object, so the
//! advertisement side recovers the previous state from the reconciler's
//! cache. After every (re)list, objects that disappeared while the watch was
//! down are withdrawn the same way as a delete.

use crate::error::ControllerError;
use crate::pool_index::AddressPool;
use crate::reconciler::Reconciler;
use crate::resolver::{resolve, AdvertisementKey};
use crds::{AdvKind, IP_ADDRESS_POOL};
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::Api;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Advertisement event handling for one kind, including re-list tracking.
#[derive(Debug)]
pub struct AdvertisementSync {
    kind: AdvKind,
    relisted: Option<HashSet<AdvertisementKey>>,
}

impl AdvertisementSync {
    pub fn new(kind: AdvKind) -> Self {
        Self {
            kind,
            relisted: None,
        }
    }

    pub async fn handle(&mut self, reconciler: &Reconciler, event: watcher::Event<DynamicObject>) {
        match event {
            watcher::Event::Apply(obj) => self.apply(reconciler, &obj, false).await,
            watcher::Event::InitApply(obj) => self.apply(reconciler, &obj, true).await,
            watcher::Event::Delete(obj) => self.delete(reconciler, &obj).await,
            watcher::Event::Init => {
                debug!("{} watcher (re)listing", self.kind);
                self.relisted = Some(HashSet::new());
            }
            watcher::Event::InitDone => self.finish_relist(reconciler).await,
        }
    }

    async fn apply(&mut self, reconciler: &Reconciler, obj: &DynamicObject, initial: bool) {
        if initial {
            if let (Some(seen), Ok(key)) = (
                self.relisted.as_mut(),
                AdvertisementKey::from_dynamic(obj, self.kind),
            ) {
                seen.insert(key);
            }
        }

        let adv = match resolve(obj, self.kind) {
            Ok(adv) => adv,
            Err(e) => {
                info!("Dropping {} event: {}", self.kind, e);
                reconciler
                    .metrics()
                    .advertisement_event(&self.kind.to_string(), "dropped");
                return;
            }
        };

        let key = adv.key.clone();
        if let Err(e) = reconciler.observe_advertisement(adv, initial).await {
            error!("Failed to reconcile {}: {}", key, e);
        }
    }

    async fn delete(&mut self, reconciler: &Reconciler, obj: &DynamicObject) {
        let key = match AdvertisementKey::from_dynamic(obj, self.kind) {
            Ok(key) => key,
            Err(e) => {
                info!("Dropping {} delete: {}", self.kind, e);
                reconciler
                    .metrics()
                    .advertisement_event(&self.kind.to_string(), "dropped");
                return;
            }
        };

        // The final object may be a tombstone; the cache usually knows better
        let last_known = resolve(obj, self.kind).ok();
        if let Err(e) = reconciler.forget_advertisement(&key, last_known).await {
            error!("Failed to withdraw {}: {}", key, e);
        }
    }

    async fn finish_relist(&mut self, reconciler: &Reconciler) {
        let Some(seen) = self.relisted.take() else {
            return;
        };

        let vanished: Vec<AdvertisementKey> = reconciler
            .advertisements()
            .keys_of_kind(self.kind)
            .into_iter()
            .filter(|key| !seen.contains(key))
            .collect();
        debug!(
            "{} list complete: {} object(s), {} vanished",
            self.kind,
            seen.len(),
            vanished.len()
        );

        for key in vanished {
            info!("{} disappeared while unwatched", key);
            if let Err(e) = reconciler.forget_advertisement(&key, None).await {
                error!("Failed to withdraw {}: {}", key, e);
            }
        }
    }
}

/// IPAddressPool event handling, including re-list tracking.
#[derive(Debug, Default)]
pub struct PoolSync {
    relisted: Option<HashSet<String>>,
}

impl PoolSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, reconciler: &Reconciler, event: watcher::Event<DynamicObject>) {
        match event {
            watcher::Event::Apply(obj) => self.apply(reconciler, &obj),
            watcher::Event::InitApply(obj) => {
                if let (Some(seen), Some(name)) = (self.relisted.as_mut(), obj.metadata.name.as_ref())
                {
                    seen.insert(name.clone());
                }
                self.apply(reconciler, &obj);
            }
            watcher::Event::Delete(obj) => match obj.metadata.name.as_deref() {
                Some(name) => {
                    debug!("IPAddressPool deleted: {}", name);
                    reconciler.pools().remove(name);
                    reconciler.metrics().pool_event("removed");
                }
                None => {
                    info!("Dropping IPAddressPool delete without a name");
                    reconciler.metrics().pool_event("dropped");
                }
            },
            watcher::Event::Init => {
                debug!("IPAddressPool watcher (re)listing");
                self.relisted = Some(HashSet::new());
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return;
                };
                for name in reconciler.pools().names() {
                    if !seen.contains(&name) {
                        info!("IPAddressPool {} disappeared while unwatched", name);
                        reconciler.pools().remove(&name);
                        reconciler.metrics().pool_event("removed");
                    }
                }
            }
        }
    }

    fn apply(&mut self, reconciler: &Reconciler, obj: &DynamicObject) {
        match AddressPool::from_dynamic(obj) {
            Ok(pool) => {
                debug!("IPAddressPool applied: {} ({} address(es))", pool.name, pool.addresses.len());
                reconciler.pools().apply(pool);
                reconciler.metrics().pool_event("applied");
            }
            Err(e) => {
                info!("Dropping IPAddressPool event: {}", e);
                reconciler.metrics().pool_event("dropped");
            }
        }
    }
}

/// Watches the MetalLB resources for one running engine.
#[derive(Clone)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: kube::Client,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: kube::Client) -> Self {
        Self { reconciler, client }
    }

    fn dynamic_api(&self, resource: crds::GroupVersionResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &resource.api_resource())
    }

    /// Watch one advertisement kind until `cancel` fires.
    pub async fn watch_advertisements(
        &self,
        kind: AdvKind,
        cancel: CancellationToken,
    ) -> Result<(), ControllerError> {
        let resource = kind.resource();
        info!("Starting {} watcher ({})", kind, resource);

        let mut stream = Box::pin(
            watcher(self.dynamic_api(resource), watcher::Config::default()).default_backoff(),
        );
        let mut sync = AdvertisementSync::new(kind);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => sync.handle(&self.reconciler, event).await,
                Some(Err(e)) => error!("{} watch error (retrying): {}", kind, e),
                None => {
                    return Err(ControllerError::Watch(format!("{} watch stream ended", kind)));
                }
            }
        }

        info!("{} watcher stopped", kind);
        Ok(())
    }

    /// Watch IPAddressPools until `cancel` fires.
    pub async fn watch_pools(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        info!("Starting IPAddressPool watcher ({})", IP_ADDRESS_POOL);

        let mut stream = Box::pin(
            watcher(self.dynamic_api(IP_ADDRESS_POOL), watcher::Config::default())
                .default_backoff(),
        );
        let mut sync = PoolSync::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => sync.handle(&self.reconciler, event),
                Some(Err(e)) => error!("IPAddressPool watch error (retrying): {}", e),
                None => {
                    return Err(ControllerError::Watch(
                        "IPAddressPool watch stream ended".to_string(),
                    ));
                }
            }
        }

        info!("IPAddressPool watcher stopped");
        Ok(())
    }
}
