//! Last observed state of every advertisement.
//!
//! kube's watcher reports the new object only, so the engine remembers what
//! it last saw to recover the old side of updates and deletes. The cache is
//! also the set of "known advertisements" enumerated by pool requeue.

use crate::resolver::{Advertisement, AdvertisementKey};
use crds::AdvKind;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct AdvertisementCache {
    entries: RwLock<HashMap<AdvertisementKey, Advertisement>>,
}

impl AdvertisementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `adv`, returning what was cached under its key before.
    pub fn upsert(&self, adv: Advertisement) -> Option<Advertisement> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(adv.key.clone(), adv)
    }

    pub fn remove(&self, key: &AdvertisementKey) -> Option<Advertisement> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Put back what `upsert` returned for `key`.
    pub fn restore(&self, key: &AdvertisementKey, previous: Option<Advertisement>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match previous {
            Some(adv) => {
                entries.insert(key.clone(), adv);
            }
            None => {
                entries.remove(key);
            }
        }
    }

    pub fn get(&self, key: &AdvertisementKey) -> Option<Advertisement> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Keys cached for one advertisement kind.
    pub fn keys_of_kind(&self, kind: AdvKind) -> Vec<AdvertisementKey> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| key.kind == kind)
            .cloned()
            .collect()
    }

    /// Advertisements of either kind that list `pool`, in key order.
    pub fn referencing(&self, pool: &str) -> Vec<Advertisement> {
        let mut matched: Vec<Advertisement> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|adv| adv.references(pool))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        matched
    }

    /// Every cached advertisement except the one under `key`.
    pub fn others(&self, key: &AdvertisementKey) -> Vec<Advertisement> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|adv| &adv.key != key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LabelSelector;

    fn adv(kind: AdvKind, name: &str, pools: &[&str]) -> Advertisement {
        Advertisement {
            key: AdvertisementKey {
                kind,
                namespace: "metallb-system".to_string(),
                name: name.to_string(),
            },
            selector: LabelSelector::default(),
            pools: pools.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_upsert_returns_previous() {
        let cache = AdvertisementCache::new();
        assert!(cache.upsert(adv(AdvKind::L2, "adv1", &["pool-a"])).is_none());

        let previous = cache.upsert(adv(AdvKind::L2, "adv1", &["pool-b"])).unwrap();
        assert_eq!(previous.pools, vec!["pool-a"]);
        assert_eq!(cache.len(), 1);

        let key = previous.key.clone();
        assert_eq!(cache.get(&key).unwrap().pools, vec!["pool-b"]);
        assert!(cache.remove(&key).is_some());
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_kinds_are_distinct_keys() {
        let cache = AdvertisementCache::new();
        cache.upsert(adv(AdvKind::L2, "adv1", &["pool-a"]));
        cache.upsert(adv(AdvKind::Bgp, "adv1", &["pool-a"]));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys_of_kind(AdvKind::L2).len(), 1);
        assert_eq!(cache.keys_of_kind(AdvKind::Bgp).len(), 1);
    }

    #[test]
    fn test_referencing_spans_kinds() {
        let cache = AdvertisementCache::new();
        cache.upsert(adv(AdvKind::Bgp, "adv2", &["pool-b", "pool-a"]));
        cache.upsert(adv(AdvKind::L2, "adv1", &["pool-a"]));
        cache.upsert(adv(AdvKind::L2, "adv3", &["pool-c"]));

        let names: Vec<_> = cache
            .referencing("pool-a")
            .into_iter()
            .map(|adv| (adv.key.kind, adv.key.name))
            .collect();
        assert_eq!(
            names,
            vec![(AdvKind::L2, "adv1".to_string()), (AdvKind::Bgp, "adv2".to_string())]
        );
        assert!(cache.referencing("pool-missing").is_empty());
    }

    #[test]
    fn test_restore_and_others() {
        let cache = AdvertisementCache::new();
        let original = adv(AdvKind::L2, "adv1", &["pool-a"]);
        let key = original.key.clone();
        cache.upsert(original);
        cache.upsert(adv(AdvKind::Bgp, "adv1", &["pool-a"]));

        let previous = cache.upsert(adv(AdvKind::L2, "adv1", &["pool-b"]));
        cache.restore(&key, previous);
        assert_eq!(cache.get(&key).unwrap().pools, vec!["pool-a"]);

        let others = cache.others(&key);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].key.kind, AdvKind::Bgp);

        cache.restore(&key, None);
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 1);
    }
}
