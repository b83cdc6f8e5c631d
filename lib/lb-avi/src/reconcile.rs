//! Converges the controller onto one graph
//!
//! A sync diffs every node of the graph against the cache by checksum,
//! creates or updates what differs in dependency order, then deletes the
//! objects that were owned through the root but are no longer desired,
//! referencing objects first. The cache is updated after every successful
//! call, so an interrupted sync resumes where it stopped. A root is only
//! trusted as in sync once a sync of it ran to the end; the stale objects an
//! interrupted sync did not get to are carried over to the next one, since
//! the updated root no longer reaches them.

use crate::cache::{CacheEntry, ObjectCache, SyncState};
use crate::client::AviClient;
use crate::error::{ErrorClassifier, Method, RestError, RetryClass};
use crate::metrics::Metrics;
use crate::objects::{self, RenderContext};
use crate::retry::RetryTier;
use lb_core::model::{Graph, GraphNode, NodeRef};
use lb_core::{ModelKey, ObjectKind, RuleRef};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The root checksum matched the cache
    Unchanged,
    Synced { ops: usize },
    Deleted { ops: usize },
    Retry(RetryTier),
    /// The controller refused an object; never retried
    Rejected { rules: BTreeSet<RuleRef>, message: String },
}

impl SyncOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Synced { .. } => "synced",
            SyncOutcome::Deleted { .. } => "deleted",
            SyncOutcome::Retry(_) => "retry",
            SyncOutcome::Rejected { .. } => "rejected",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Unchanged | SyncOutcome::Synced { .. } | SyncOutcome::Deleted { .. }
        )
    }
}

/// How a failed step ends the sync
enum Abort {
    Retry(RetryTier),
    Rejected { rules: BTreeSet<RuleRef>, message: String },
}

impl From<Abort> for SyncOutcome {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::Retry(tier) => SyncOutcome::Retry(tier),
            Abort::Rejected { rules, message } => SyncOutcome::Rejected { rules, message },
        }
    }
}

/// Delete order: whatever references others goes first
fn delete_rank(entry: &CacheEntry) -> u8 {
    match entry.kind {
        ObjectKind::VirtualService if entry.parent.is_some() => 0,
        ObjectKind::VirtualService => 1,
        ObjectKind::VsVip => 2,
        ObjectKind::L4PolicySet => 3,
        ObjectKind::HttpPolicySet => 4,
        ObjectKind::PoolGroup => 5,
        ObjectKind::Pool => 6,
        ObjectKind::StringGroup => 7,
        ObjectKind::SslKeyCert => 8,
        ObjectKind::VrfContext => 9,
    }
}

type RootId = (ObjectKind, String);

pub struct Reconciler {
    client: Arc<dyn AviClient>,
    cache: Arc<ObjectCache>,
    classifier: ErrorClassifier,
    ctx: RenderContext,
    metrics: Metrics,
    /// Roots whose last sync stopped early, with the stale objects it had
    /// yet to delete
    unfinished: Mutex<BTreeMap<RootId, Vec<CacheEntry>>>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn AviClient>,
        cache: Arc<ObjectCache>,
        classifier: ErrorClassifier,
        ctx: RenderContext,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            cache,
            classifier,
            ctx,
            metrics,
            unfinished: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<dyn AviClient> {
        &self.client
    }

    /// Bring the controller in line with `graph`; None deletes everything
    /// owned through the key
    pub async fn sync(&self, key: &ModelKey, graph: Option<&Graph>) -> SyncOutcome {
        let outcome = match graph {
            Some(graph) => self.apply(graph).await,
            None => self.remove(key).await,
        };
        self.metrics.record_sync(outcome.label());
        match &outcome {
            SyncOutcome::Unchanged => debug!(key = %key, "Graph already in sync"),
            SyncOutcome::Synced { ops } | SyncOutcome::Deleted { ops } => {
                info!(key = %key, ops, outcome = outcome.label(), "Synced graph")
            }
            SyncOutcome::Retry(tier) => warn!(key = %key, %tier, "Sync interrupted, will retry"),
            SyncOutcome::Rejected { rules, message } => {
                error!(key = %key, rules = rules.len(), message = %message, "Controller rejected graph")
            }
        }
        outcome
    }

    async fn apply(&self, graph: &Graph) -> SyncOutcome {
        let (root_kind, root_name) = match &graph.root {
            GraphNode::VirtualService(vs) => (ObjectKind::VirtualService, vs.name.as_str()),
            GraphNode::Vrf(vrf) => (ObjectKind::VrfContext, vrf.name.as_str()),
        };
        let root_id: RootId = (root_kind, root_name.to_string());
        let leftovers = self.unfinished.lock().await.remove(&root_id);
        if leftovers.is_none() {
            if let Some(root) = self.cache.get(root_kind, root_name).await {
                if root.checksum == Some(graph.checksum()) && root.state == SyncState::Present {
                    return SyncOutcome::Unchanged;
                }
            }
        }

        let desired = graph.flatten();
        let wanted: BTreeSet<(ObjectKind, String)> =
            desired.iter().map(|n| (n.kind(), n.name().to_string())).collect();
        let reachable = if root_kind == ObjectKind::VrfContext {
            Vec::new()
        } else {
            self.cache.reachable(root_kind, root_name).await
        };
        let mut stale = self.with_leftovers(reachable, leftovers.unwrap_or_default()).await;
        stale.retain(|e| !wanted.contains(&(e.kind, e.name.clone())));
        stale.sort_by_key(delete_rank);

        let mut ops = 0;
        for node in desired {
            match self.upsert(node).await {
                Ok(true) => ops += 1,
                Ok(false) => {}
                Err(abort) => {
                    self.unfinished.lock().await.insert(root_id, stale);
                    return abort.into();
                }
            }
        }

        match self.delete_all(&stale).await {
            Ok(deleted) => SyncOutcome::Synced { ops: ops + deleted },
            Err((abort, remaining)) => {
                self.unfinished.lock().await.insert(root_id, remaining);
                abort.into()
            }
        }
    }

    async fn remove(&self, key: &ModelKey) -> SyncOutcome {
        let root_id: RootId = (ObjectKind::VirtualService, key.name.clone());
        let leftovers = self.unfinished.lock().await.remove(&root_id).unwrap_or_default();
        let reachable = self.cache.reachable(ObjectKind::VirtualService, &key.name).await;
        let mut owned = self.with_leftovers(reachable, leftovers).await;
        if owned.is_empty() {
            return SyncOutcome::Unchanged;
        }
        owned.sort_by_key(delete_rank);
        match self.delete_all(&owned).await {
            Ok(ops) => SyncOutcome::Deleted { ops },
            Err((abort, remaining)) => {
                self.unfinished.lock().await.insert(root_id, remaining);
                abort.into()
            }
        }
    }

    /// Add the still-cached leftovers of an interrupted sync to `entries`
    async fn with_leftovers(&self, mut entries: Vec<CacheEntry>, leftovers: Vec<CacheEntry>) -> Vec<CacheEntry> {
        for entry in leftovers {
            if entries.iter().any(|e| e.kind == entry.kind && e.name == entry.name) {
                continue;
            }
            if let Some(current) = self.cache.get(entry.kind, &entry.name).await {
                entries.push(current);
            }
        }
        entries
    }

    /// Delete in order; on failure returns the entries not yet deleted,
    /// the failed one included
    async fn delete_all(&self, entries: &[CacheEntry]) -> Result<usize, (Abort, Vec<CacheEntry>)> {
        let mut ops = 0;
        for (i, entry) in entries.iter().enumerate() {
            match self.delete(entry).await {
                Ok(true) => ops += 1,
                Ok(false) => {}
                Err(abort) => return Err((abort, entries[i..].to_vec())),
            }
        }
        Ok(ops)
    }

    /// Create or update one node; Ok(false) when it was already current
    async fn upsert(&self, node: NodeRef<'_>) -> Result<bool, Abort> {
        let kind = node.kind();
        let name = node.name();
        let checksum = node.checksum();
        let cached = self.cache.get(kind, name).await;

        if let Some(entry) = &cached {
            if entry.checksum == Some(checksum) && !entry.uuid.is_empty() {
                if entry.state != SyncState::Present {
                    self.cache.set_state(kind, name, SyncState::Present).await;
                }
                return Ok(false);
            }
        }

        let body = objects::render(node, &self.ctx);
        let existing_uuid = cached.as_ref().map(|e| e.uuid.clone()).filter(|u| !u.is_empty());
        let result = match (kind, existing_uuid) {
            (_, Some(uuid)) => {
                self.cache.set_state(kind, name, SyncState::PendingUpdate).await;
                match self.call_update(kind, name, &uuid, &body).await {
                    // Removed behind our back
                    Err(err) if err.status == Some(404) && kind != ObjectKind::VrfContext => {
                        info!(%kind, name, "Object vanished, recreating");
                        self.call_create(kind, name, &body).await
                    }
                    other => other,
                }
            }
            (ObjectKind::VrfContext, None) => self.put_vrf(name, &body).await,
            (_, None) => {
                self.cache.upsert(placeholder(kind, name, SyncState::PendingCreate)).await;
                self.call_create(kind, name, &body).await
            }
        };

        match result {
            Ok(stored) => {
                let mut entry_body = body;
                entry_body["uuid"] = stored.get("uuid").cloned().unwrap_or(Value::Null);
                if let Some(vip) = stored.get("vip") {
                    entry_body["vip"] = vip.clone();
                }
                match objects::parse(kind, &entry_body) {
                    Some(entry) => self.cache.upsert(entry).await,
                    None => warn!(%kind, name, "Controller response carried no uuid"),
                }
                Ok(true)
            }
            Err(err) => {
                let class = self.classifier.classify(&err);
                if class == RetryClass::Ignore {
                    debug!(%kind, name, error = %err, "Ignoring controller error");
                    self.restore(kind, name, cached).await;
                    return Ok(false);
                }
                Err(self.fail(node.rules(), kind, name, cached, err, class).await)
            }
        }
    }

    async fn call_create(&self, kind: ObjectKind, name: &str, body: &Value) -> Result<Value, RestError> {
        let created = self.client.create(kind, &self.ctx.tenant, body).await;
        self.record(Method::Post, kind, &created);
        match created {
            // Created by an earlier run whose cache update was lost
            Err(err) if err.status == Some(409) => {
                let existing = self.client.get_by_name(kind, &self.ctx.tenant, name).await?;
                let Some(uuid) = existing.as_ref().and_then(|o| o.get("uuid")).and_then(Value::as_str) else {
                    return Err(err);
                };
                info!(%kind, name, "Adopting existing object");
                self.call_update(kind, name, uuid, body).await
            }
            other => other,
        }
    }

    async fn call_update(&self, kind: ObjectKind, name: &str, uuid: &str, body: &Value) -> Result<Value, RestError> {
        debug!(%kind, name, uuid, "Updating object");
        let updated = self.client.update(kind, &self.ctx.tenant, uuid, body).await;
        self.record(Method::Put, kind, &updated);
        updated
    }

    /// The VRF always exists; it is only ever updated
    async fn put_vrf(&self, name: &str, body: &Value) -> Result<Value, RestError> {
        let existing = self.client.get_by_name(ObjectKind::VrfContext, &self.ctx.tenant, name).await?;
        let Some(uuid) = existing.as_ref().and_then(|o| o.get("uuid")).and_then(Value::as_str) else {
            return Err(RestError::new(
                Method::Put,
                ObjectKind::VrfContext,
                name,
                Some(404),
                format!("VrfContext {name} not found"),
            ));
        };
        self.call_update(ObjectKind::VrfContext, name, uuid, body).await
    }

    /// Delete one cached object; Ok(false) when there was nothing remote
    async fn delete(&self, entry: &CacheEntry) -> Result<bool, Abort> {
        if entry.kind == ObjectKind::VrfContext {
            return Ok(false);
        }
        if entry.uuid.is_empty() {
            self.cache.remove(entry.kind, &entry.name).await;
            return Ok(false);
        }
        self.cache.set_state(entry.kind, &entry.name, SyncState::PendingDelete).await;
        let result = self
            .client
            .delete(entry.kind, &self.ctx.tenant, &entry.uuid, &entry.name)
            .await;
        self.record(Method::Delete, entry.kind, &result);

        match result {
            Ok(()) => {
                info!(kind = %entry.kind, name = %entry.name, "Deleted object");
                self.cache.remove(entry.kind, &entry.name).await;
                Ok(true)
            }
            Err(err) => match self.classifier.classify(&err) {
                RetryClass::Ignore => {
                    debug!(kind = %entry.kind, name = %entry.name, "Object already gone");
                    self.cache.remove(entry.kind, &entry.name).await;
                    Ok(false)
                }
                class => Err(self
                    .fail(BTreeSet::new(), entry.kind, &entry.name, Some(entry.clone()), err, class)
                    .await),
            },
        }
    }

    /// Put a transiently failed object back as it was, or mark a permanent
    /// failure Rejected
    async fn fail(
        &self,
        rules: BTreeSet<RuleRef>,
        kind: ObjectKind,
        name: &str,
        cached: Option<CacheEntry>,
        err: RestError,
        class: RetryClass,
    ) -> Abort {
        match class {
            RetryClass::Fast | RetryClass::Slow => {
                warn!(%kind, name, error = %err, ?class, "Transient controller error");
                self.restore(kind, name, cached).await;
                Abort::Retry(if class == RetryClass::Fast {
                    RetryTier::Fast
                } else {
                    RetryTier::Slow
                })
            }
            RetryClass::Permanent | RetryClass::Ignore => {
                error!(%kind, name, error = %err, "Controller refused object");
                match cached {
                    Some(entry) if !entry.uuid.is_empty() => {
                        self.cache.set_state(kind, name, SyncState::Rejected).await
                    }
                    _ => self.cache.upsert(placeholder(kind, name, SyncState::Rejected)).await,
                }
                Abort::Rejected {
                    rules,
                    message: err.message,
                }
            }
        }
    }

    async fn restore(&self, kind: ObjectKind, name: &str, cached: Option<CacheEntry>) {
        match cached {
            Some(entry) => self.cache.upsert(entry).await,
            None => {
                self.cache.remove(kind, name).await;
            }
        }
    }

    fn record<T>(&self, method: Method, kind: ObjectKind, result: &Result<T, RestError>) {
        let outcome = match result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.status.map(|s| s.to_string()).unwrap_or_else(|| "transport".to_string()),
        };
        self.metrics.record_rest(method.as_str(), kind.api_path(), &outcome);
    }
}

/// Stand-in for an object the controller has not accepted yet
fn placeholder(kind: ObjectKind, name: &str, state: SyncState) -> CacheEntry {
    CacheEntry {
        kind,
        name: name.to_string(),
        uuid: String::new(),
        checksum: None,
        children: Default::default(),
        parent: None,
        vip: None,
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, Fault, InMemoryController};
    use serde_json::json;
    use lb_core::model::{
        PoolGroupMember, PoolGroupNode, PoolNode, PortProtocol, RuleKind, Server, StaticRoute,
        VirtualServiceNode, VrfNode, VsVipNode,
    };

    struct Harness {
        ctrl: Arc<InMemoryController>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let ctrl = Arc::new(InMemoryController::new());
        let ctx = RenderContext {
            tenant: "admin".to_string(),
            cloud: "Default-Cloud".to_string(),
            created_by: "ako-cluster".to_string(),
            vrf: "global".to_string(),
        };
        let cache = Arc::new(ObjectCache::new("admin", "ako-cluster", "global"));
        let reconciler = Reconciler::new(
            ctrl.clone(),
            cache,
            ErrorClassifier::defaults(),
            ctx,
            Metrics::new().unwrap(),
        );
        Harness { ctrl, reconciler }
    }

    fn key() -> ModelKey {
        ModelKey::new("admin", "cluster--red-svc")
    }

    fn l4_graph(pools: &[&str]) -> Graph {
        let mut vs = VirtualServiceNode::new("cluster--red-svc");
        vs.listeners = vec![PortProtocol::tcp(80, false)];
        vs.vsvip = Some(VsVipNode::new("cluster--red-svc"));
        let mut pg = PoolGroupNode::new("cluster--red-svc");
        for name in pools {
            let mut pool = PoolNode::new(*name, 8080);
            pool.servers.push(Server::new("10.0.0.1", None));
            vs.pools.push(pool);
            pg.members.push(PoolGroupMember::new(*name));
        }
        vs.pool_groups.push(pg);
        vs.default_pool_group = Some("cluster--red-svc".to_string());
        Graph::new(key(), GraphNode::VirtualService(Box::new(vs)))
    }

    fn writes(calls: &[Call]) -> Vec<(Method, String, String)> {
        calls
            .iter()
            .filter(|c| c.method != Method::Get)
            .map(|c| (c.method, c.kind.clone(), c.name.clone()))
            .collect()
    }

    fn w(method: Method, kind: &str, name: &str) -> (Method, String, String) {
        (method, kind.to_string(), name.to_string())
    }

    #[tokio::test]
    async fn test_children_created_first_and_second_sync_is_free() {
        let h = harness();
        let graph = l4_graph(&["pool-a"]);
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Synced { ops: 4 });
        assert_eq!(
            writes(&h.ctrl.calls().await),
            vec![
                w(Method::Post, "pool", "pool-a"),
                w(Method::Post, "poolgroup", "cluster--red-svc"),
                w(Method::Post, "vsvip", "cluster--red-svc"),
                w(Method::Post, "virtualservice", "cluster--red-svc"),
            ]
        );
        let cache = h.reconciler.cache();
        assert_eq!(cache.state(ObjectKind::Pool, "pool-a").await, SyncState::Present);
        assert!(cache.vip_of("cluster--red-svc").await.is_some());

        h.ctrl.clear_calls().await;
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Unchanged);
        assert!(h.ctrl.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_objects_deleted_after_parent_update() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a", "pool-b"]))).await;
        h.ctrl.clear_calls().await;

        let outcome = h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        assert_eq!(outcome, SyncOutcome::Synced { ops: 3 });
        assert_eq!(
            writes(&h.ctrl.calls().await),
            vec![
                w(Method::Put, "poolgroup", "cluster--red-svc"),
                w(Method::Put, "virtualservice", "cluster--red-svc"),
                w(Method::Delete, "pool", "pool-b"),
            ]
        );
        assert_eq!(h.ctrl.names(ObjectKind::Pool).await, vec!["pool-a".to_string()]);
    }

    #[tokio::test]
    async fn test_removed_graph_deletes_referrers_first() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        h.ctrl.clear_calls().await;

        assert_eq!(h.reconciler.sync(&key(), None).await, SyncOutcome::Deleted { ops: 4 });
        assert_eq!(
            writes(&h.ctrl.calls().await),
            vec![
                w(Method::Delete, "virtualservice", "cluster--red-svc"),
                w(Method::Delete, "vsvip", "cluster--red-svc"),
                w(Method::Delete, "poolgroup", "cluster--red-svc"),
                w(Method::Delete, "pool", "pool-a"),
            ]
        );
        assert!(h.reconciler.cache().is_empty().await);
        assert_eq!(h.reconciler.sync(&key(), None).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_cache_untouched() {
        let h = harness();
        h.ctrl
            .fail_next(Fault::status(503, "service unavailable").on(Method::Post, ObjectKind::PoolGroup))
            .await;
        let graph = l4_graph(&["pool-a"]);

        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Retry(RetryTier::Fast));
        let cache = h.reconciler.cache();
        assert_eq!(cache.state(ObjectKind::PoolGroup, "cluster--red-svc").await, SyncState::Absent);
        assert_eq!(cache.state(ObjectKind::Pool, "pool-a").await, SyncState::Present);

        h.ctrl.clear_calls().await;
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Synced { ops: 3 });
        // The pool made it the first time and is not sent again
        assert!(!writes(&h.ctrl.calls().await).contains(&w(Method::Post, "pool", "pool-a")));
    }

    fn with_tls_child(mut graph: Graph) -> Graph {
        if let GraphNode::VirtualService(vs) = &mut graph.root {
            let mut child = VirtualServiceNode::new("cluster--foo.com");
            child.parent = Some(vs.name.clone());
            let mut pool = PoolNode::new("pool-c", 8443);
            pool.servers.push(Server::new("10.0.0.2", None));
            child.pools.push(pool);
            child.default_pool = Some("pool-c".to_string());
            vs.children.push(child);
        }
        graph
    }

    #[tokio::test]
    async fn test_child_created_after_failure_past_the_parent() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        h.ctrl
            .fail_next(Fault::status(503, "service unavailable").on(Method::Post, ObjectKind::Pool))
            .await;

        // The parent update lands, the child's pool does not
        let graph = with_tls_child(l4_graph(&["pool-a"]));
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Retry(RetryTier::Fast));
        assert_eq!(
            h.reconciler.cache().state(ObjectKind::VirtualService, "cluster--red-svc").await,
            SyncState::Present
        );

        h.ctrl.clear_calls().await;
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Synced { ops: 2 });
        assert_eq!(
            writes(&h.ctrl.calls().await),
            vec![
                w(Method::Post, "pool", "pool-c"),
                w(Method::Post, "virtualservice", "cluster--foo.com"),
            ]
        );
        assert!(h.ctrl.object(ObjectKind::VirtualService, "cluster--foo.com").await.is_some());
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_failed_stale_delete_is_retried() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a", "pool-b"]))).await;
        h.ctrl
            .fail_next(Fault::status(503, "service unavailable").on(Method::Delete, ObjectKind::Pool))
            .await;

        let graph = l4_graph(&["pool-a"]);
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Retry(RetryTier::Fast));
        assert_eq!(h.ctrl.names(ObjectKind::Pool).await, vec!["pool-a".to_string(), "pool-b".to_string()]);

        h.ctrl.clear_calls().await;
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Synced { ops: 1 });
        assert_eq!(writes(&h.ctrl.calls().await), vec![w(Method::Delete, "pool", "pool-b")]);
        assert_eq!(h.ctrl.names(ObjectKind::Pool).await, vec!["pool-a".to_string()]);
        assert!(h.reconciler.cache().get(ObjectKind::Pool, "pool-b").await.is_none());
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_interrupted_removal_finishes_after_the_root_is_gone() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        h.ctrl
            .fail_next(Fault::status(503, "service unavailable").on(Method::Delete, ObjectKind::PoolGroup))
            .await;

        assert_eq!(h.reconciler.sync(&key(), None).await, SyncOutcome::Retry(RetryTier::Fast));
        assert!(h.ctrl.names(ObjectKind::VirtualService).await.is_empty());

        assert_eq!(h.reconciler.sync(&key(), None).await, SyncOutcome::Deleted { ops: 2 });
        assert!(h.ctrl.names(ObjectKind::PoolGroup).await.is_empty());
        assert!(h.ctrl.names(ObjectKind::Pool).await.is_empty());
        assert!(h.reconciler.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_permanent_failure_rejects_rules_on_the_node() {
        let h = harness();
        let mut graph = l4_graph(&["pool-a"]);
        let rule = RuleRef::new(RuleKind::L4Rule, "red", "my-rule");
        if let GraphNode::VirtualService(vs) = &mut graph.root {
            vs.application_profile = Some("Missing-Profile".to_string());
            vs.rules.insert(rule.clone());
        }

        match h.reconciler.sync(&key(), Some(&graph)).await {
            SyncOutcome::Rejected { rules, message } => {
                assert_eq!(rules, BTreeSet::from([rule]));
                assert_eq!(message, "Cannot find object applicationprofile Missing-Profile");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            h.reconciler.cache().state(ObjectKind::VirtualService, "cluster--red-svc").await,
            SyncState::Rejected
        );

        // The reverted graph goes through
        let reverted = l4_graph(&["pool-a"]);
        assert_eq!(h.reconciler.sync(&key(), Some(&reverted)).await, SyncOutcome::Synced { ops: 1 });
        assert_eq!(
            h.reconciler.cache().state(ObjectKind::VirtualService, "cluster--red-svc").await,
            SyncState::Present
        );
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_is_success() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a", "pool-b"]))).await;
        h.ctrl
            .fail_next(Fault::status(404, "not found").on(Method::Delete, ObjectKind::Pool))
            .await;

        let outcome = h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        assert!(outcome.is_success());
        assert!(h.reconciler.cache().get(ObjectKind::Pool, "pool-b").await.is_none());
    }

    #[tokio::test]
    async fn test_create_adopts_an_existing_object() {
        let h = harness();
        h.ctrl
            .insert(ObjectKind::Pool, json!({ "name": "pool-a", "tenant_ref": "/api/tenant?name=admin" }))
            .await;

        let outcome = h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        assert_eq!(outcome, SyncOutcome::Synced { ops: 4 });
        let pool = h.ctrl.object(ObjectKind::Pool, "pool-a").await.unwrap();
        assert_eq!(pool["created_by"], json!("ako-cluster"));
    }

    #[tokio::test]
    async fn test_vanished_object_is_recreated() {
        let h = harness();
        h.reconciler.sync(&key(), Some(&l4_graph(&["pool-a"]))).await;
        let vs = h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.unwrap();
        let uuid = vs["uuid"].as_str().unwrap().to_string();
        h.ctrl
            .delete(ObjectKind::VirtualService, "admin", &uuid, "cluster--red-svc")
            .await
            .unwrap();

        let mut graph = l4_graph(&["pool-a"]);
        if let GraphNode::VirtualService(vs) = &mut graph.root {
            vs.listeners.push(PortProtocol::tcp(443, false));
        }
        assert_eq!(h.reconciler.sync(&key(), Some(&graph)).await, SyncOutcome::Synced { ops: 1 });
        let recreated = h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.unwrap();
        assert_ne!(recreated["uuid"].as_str(), Some(uuid.as_str()));
    }

    #[tokio::test]
    async fn test_vrf_is_only_updated() {
        let h = harness();
        let mut vrf = VrfNode::new("global");
        vrf.static_routes.push(StaticRoute {
            route_id: "node-a-0".to_string(),
            prefix: "10.244.0.0".to_string(),
            mask: 24,
            next_hop: "192.168.1.1".to_string(),
        });
        let graph = Graph::new(ModelKey::new("admin", "global"), GraphNode::Vrf(vrf));

        let outcome = h.reconciler.sync(&graph.key.clone(), Some(&graph)).await;
        assert_eq!(outcome, SyncOutcome::Synced { ops: 1 });
        assert_eq!(writes(&h.ctrl.calls().await), vec![w(Method::Put, "vrfcontext", "global")]);
        let stored = h.ctrl.object(ObjectKind::VrfContext, "global").await.unwrap();
        assert_eq!(stored["static_routes"][0]["route_id"], json!("node-a-0"));

        let mut missing = graph.clone();
        if let GraphNode::Vrf(v) = &mut missing.root {
            v.name = "other".to_string();
        }
        assert_eq!(
            h.reconciler.sync(&missing.key.clone(), Some(&missing)).await,
            SyncOutcome::Retry(RetryTier::Fast)
        );
    }
}
