//! Mirror of the objects this controller owns on the remote side
//!
//! The cache is refreshed by listing every kind and updated after each
//! successful call. A kind whose listing fails keeps its previous entries,
//! and parents keep their previous child keys of that kind, so a failed
//! refresh never reads as "this object has no children".

use crate::client::AviClient;
use crate::error::RestError;
use crate::metrics::Metrics;
use crate::objects;
use lb_core::catalog::{ProfileCatalog, ProfileKind};
use lb_core::ObjectKind;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where an object stands between the graph and the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Absent,
    PendingCreate,
    Present,
    PendingUpdate,
    PendingDelete,
    /// The controller refused the object; waits for a new graph
    Rejected,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub kind: ObjectKind,
    pub name: String,
    pub uuid: String,
    /// None when the object carries no readable checksum
    pub checksum: Option<u64>,
    /// Owned objects this one references, by kind
    pub children: BTreeMap<ObjectKind, BTreeSet<String>>,
    /// Parent VS of a TLS child
    pub parent: Option<String>,
    /// Allocated address of a VS-VIP
    pub vip: Option<String>,
    pub state: SyncState,
}

type Key = (ObjectKind, String);

/// Counts from one refresh
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub objects: usize,
    pub skipped: usize,
    pub failed: Vec<ObjectKind>,
}

pub struct ObjectCache {
    tenant: String,
    created_by: String,
    vrf_name: String,
    entries: RwLock<HashMap<Key, CacheEntry>>,
}

impl ObjectCache {
    pub fn new(tenant: impl Into<String>, created_by: impl Into<String>, vrf_name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            created_by: created_by.into(),
            vrf_name: vrf_name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub async fn get(&self, kind: ObjectKind, name: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(&(kind, name.to_string())).cloned()
    }

    pub async fn upsert(&self, entry: CacheEntry) {
        let key = (entry.kind, entry.name.clone());
        self.entries.write().await.insert(key, entry);
    }

    pub async fn remove(&self, kind: ObjectKind, name: &str) -> Option<CacheEntry> {
        self.entries.write().await.remove(&(kind, name.to_string()))
    }

    pub async fn set_state(&self, kind: ObjectKind, name: &str, state: SyncState) {
        if let Some(entry) = self.entries.write().await.get_mut(&(kind, name.to_string())) {
            entry.state = state;
        }
    }

    /// Sync state of an object; Absent when it is not cached
    pub async fn state(&self, kind: ObjectKind, name: &str) -> SyncState {
        self.get(kind, name).await.map(|e| e.state).unwrap_or(SyncState::Absent)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn vip_of(&self, vsvip: &str) -> Option<String> {
        self.get(ObjectKind::VsVip, vsvip).await.and_then(|e| e.vip)
    }

    /// Names of the cached virtual services that are not TLS children
    pub async fn root_services(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.kind == ObjectKind::VirtualService && e.parent.is_none())
            .map(|e| e.name.clone())
            .collect()
    }

    /// Every cached object owned through `root`: its children, recursively,
    /// and the TLS children pointing back at it. The root comes first.
    pub async fn reachable(&self, kind: ObjectKind, root: &str) -> Vec<CacheEntry> {
        let entries = self.entries.read().await;
        let mut seen: BTreeSet<Key> = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<Key> = VecDeque::from([(kind, root.to_string())]);

        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            let Some(entry) = entries.get(&key) else {
                continue;
            };
            for (child_kind, names) in &entry.children {
                queue.extend(names.iter().map(|n| (*child_kind, n.clone())));
            }
            if entry.kind == ObjectKind::VirtualService {
                queue.extend(
                    entries
                        .values()
                        .filter(|e| e.kind == ObjectKind::VirtualService && e.parent.as_deref() == Some(entry.name.as_str()))
                        .map(|e| (e.kind, e.name.clone())),
                );
            }
            out.push(entry.clone());
        }
        out
    }

    fn owned(&self, kind: ObjectKind, value: &serde_json::Value) -> bool {
        if kind == ObjectKind::VrfContext {
            return value.get("name").and_then(|n| n.as_str()) == Some(self.vrf_name.as_str());
        }
        objects::created_by(value) == Some(self.created_by.as_str())
    }

    /// Replace the mirror with the controller's current state
    pub async fn refresh(&self, client: &dyn AviClient, metrics: &Metrics) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut fresh: HashMap<Key, CacheEntry> = HashMap::new();

        for kind in ObjectKind::ALL {
            let listed = match client.list(kind, &self.tenant).await {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(%kind, error = %e, "Cache refresh failed, keeping previous entries");
                    metrics
                        .cache_refresh_failures_total
                        .with_label_values(&[kind.api_path()])
                        .inc();
                    report.failed.push(kind);
                    continue;
                }
            };
            for value in &listed {
                if !self.owned(kind, value) {
                    report.skipped += 1;
                    continue;
                }
                match objects::parse(kind, value) {
                    Some(entry) => {
                        fresh.insert((kind, entry.name.clone()), entry);
                    }
                    None => warn!(%kind, "Listed object has no name or uuid"),
                }
            }
        }

        let mut entries = self.entries.write().await;
        for (key, entry) in entries.iter() {
            if report.failed.contains(&key.0) {
                fresh.insert(key.clone(), entry.clone());
            }
        }
        // Parents keep what they knew about children of unlistable kinds
        for (key, entry) in fresh.iter_mut() {
            let Some(previous) = entries.get(key) else {
                continue;
            };
            for kind in &report.failed {
                match previous.children.get(kind) {
                    Some(names) => {
                        entry.children.insert(*kind, names.clone());
                    }
                    None => {
                        entry.children.remove(kind);
                    }
                }
            }
        }
        *entries = fresh;

        report.objects = entries.len();
        for kind in ObjectKind::ALL {
            let count = entries.keys().filter(|(k, _)| *k == kind).count();
            metrics
                .cache_objects
                .with_label_values(&[kind.api_path()])
                .set(count as i64);
        }
        info!(
            objects = report.objects,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Refreshed object cache"
        );
        report
    }
}

/// List every profile kind. Fails as a whole so a partial catalog never
/// rejects references that exist.
pub async fn load_catalog(client: &dyn AviClient, tenant: &str) -> Result<ProfileCatalog, RestError> {
    let mut catalog = ProfileCatalog::new();
    for kind in ProfileKind::ALL {
        let entries = client.list_profiles(kind, tenant).await?;
        debug!(%kind, count = entries.len(), "Loaded profiles");
        catalog.set_kind(kind, entries);
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryController;
    use serde_json::json;

    fn owned(name: &str) -> serde_json::Value {
        json!({ "name": name, "tenant_ref": "/api/tenant?name=admin", "created_by": "ako-cluster", "cloud_config_cksum": "42" })
    }

    async fn seeded() -> InMemoryController {
        let ctrl = InMemoryController::new();
        ctrl.insert(ObjectKind::Pool, owned("p1")).await;
        let mut pg = owned("pg1");
        pg["members"] = json!([{ "pool_ref": "/api/pool?name=p1" }]);
        ctrl.insert(ObjectKind::PoolGroup, pg).await;
        let mut foreign = owned("theirs");
        foreign["created_by"] = json!("someone-else");
        ctrl.insert(ObjectKind::Pool, foreign).await;
        ctrl
    }

    #[tokio::test]
    async fn test_refresh_skips_foreign_objects() {
        let ctrl = seeded().await;
        let cache = ObjectCache::new("admin", "ako-cluster", "global");
        let report = cache.refresh(&ctrl, &Metrics::new().unwrap()).await;

        assert!(report.failed.is_empty());
        assert_eq!(report.skipped, 1);
        assert!(cache.get(ObjectKind::Pool, "theirs").await.is_none());
        let pool = cache.get(ObjectKind::Pool, "p1").await.unwrap();
        assert_eq!(pool.checksum, Some(42));
        assert_eq!(pool.state, SyncState::Present);
        // The VRF is matched by name rather than provenance
        assert!(cache.get(ObjectKind::VrfContext, "global").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_kind_keeps_previous_state() {
        let ctrl = seeded().await;
        let cache = ObjectCache::new("admin", "ako-cluster", "global");
        let metrics = Metrics::new().unwrap();
        cache.refresh(&ctrl, &metrics).await;

        ctrl.break_list(ObjectKind::Pool, true).await;
        let mut pg = ctrl.object(ObjectKind::PoolGroup, "pg1").await.unwrap();
        pg["members"] = json!([]);
        ctrl.insert(ObjectKind::PoolGroup, pg).await;

        let report = cache.refresh(&ctrl, &metrics).await;
        assert_eq!(report.failed, vec![ObjectKind::Pool]);
        assert!(cache.get(ObjectKind::Pool, "p1").await.is_some());
        let pg = cache.get(ObjectKind::PoolGroup, "pg1").await.unwrap();
        assert_eq!(pg.children[&ObjectKind::Pool], BTreeSet::from(["p1".to_string()]));
        assert!(metrics.gather().unwrap().contains("cache_refresh_failures_total{kind=\"pool\"} 1"));

        ctrl.break_list(ObjectKind::Pool, false).await;
        cache.refresh(&ctrl, &metrics).await;
        let pg = cache.get(ObjectKind::PoolGroup, "pg1").await.unwrap();
        assert!(!pg.children.contains_key(&ObjectKind::Pool));
    }

    #[tokio::test]
    async fn test_reachable_follows_children_and_tls_children() {
        let ctrl = seeded().await;
        let mut vs = owned("vs1");
        vs["pool_group_ref"] = json!("/api/poolgroup?name=pg1");
        ctrl.insert(ObjectKind::VirtualService, vs).await;
        let mut child = owned("vs1-child");
        child["vh_parent_vs_ref"] = json!("/api/virtualservice?name=vs1");
        ctrl.insert(ObjectKind::VirtualService, child).await;

        let cache = ObjectCache::new("admin", "ako-cluster", "global");
        cache.refresh(&ctrl, &Metrics::new().unwrap()).await;
        let names: BTreeSet<String> = cache
            .reachable(ObjectKind::VirtualService, "vs1")
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(
            names,
            BTreeSet::from(["vs1".to_string(), "vs1-child".to_string(), "pg1".to_string(), "p1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_catalog_lists_every_profile_kind() {
        let ctrl = InMemoryController::new();
        let catalog = load_catalog(&ctrl, "admin").await.unwrap();
        assert!(catalog.is_loaded());
        assert!(catalog.contains(ProfileKind::ApplicationProfile, "System-L4-Application"));
        assert!(!catalog.contains(ProfileKind::WafPolicy, "missing"));
    }
}
