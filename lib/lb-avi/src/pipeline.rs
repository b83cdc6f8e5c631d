//! Drives changes from the input store through the builder to the controller
//!
//! Every target is processed under its graph key's lock: build, store the
//! graph, sync it, then settle the outcome (retry, status). A permanent
//! controller refusal marks the offending rules Rejected and rebuilds the
//! key once without them.

use crate::cache::{load_catalog, ObjectCache, RefreshReport};
use crate::client::AviClient;
use crate::error::{ErrorClassifier, Result};
use crate::metrics::Metrics;
use crate::objects::RenderContext;
use crate::reconcile::{Reconciler, SyncOutcome};
use crate::retry::{RetryHandler, RetryPolicy, RetryQueues, RetryReceivers};
use async_trait::async_trait;
use lb_core::model::VirtualServiceNode;
use lb_core::objects::Change;
use lb_core::store::KeyGuard;
use lb_core::{
    BuildTarget, Graph, GraphBuilder, GraphNode, GraphStore, InputKind, LoadBalancerEntry, ModelKey,
    NamespacedName, ObjectRef, ObjectStore, RuleKind, RuleRef, Settings, StatusSink,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

type LoadBalancerBook = BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>;

/// Input object carrying a rule's definition
pub fn rule_object(rule: &RuleRef) -> ObjectRef {
    let kind = match rule.kind {
        RuleKind::HostRule => InputKind::HostRule,
        RuleKind::HttpRule => InputKind::HttpRule,
        RuleKind::L4Rule => InputKind::L4Rule,
        RuleKind::InfraSetting => InputKind::InfraSetting,
    };
    ObjectRef::new(kind, &rule.namespace, &rule.name)
}

/// Counts from one full sync
#[derive(Clone, Debug, Default)]
pub struct FullSyncReport {
    pub catalog_loaded: bool,
    pub refresh: RefreshReport,
    pub targets: usize,
    pub removed: usize,
    pub failed: usize,
}

pub struct Pipeline {
    settings: Arc<Settings>,
    builder: GraphBuilder,
    objects: ObjectStore,
    graphs: Arc<GraphStore>,
    reconciler: Reconciler,
    retries: Arc<RetryQueues>,
    sink: Arc<dyn StatusSink>,
    metrics: Metrics,
}

impl Pipeline {
    pub fn new(
        settings: Arc<Settings>,
        objects: ObjectStore,
        client: Arc<dyn AviClient>,
        sink: Arc<dyn StatusSink>,
        metrics: Metrics,
        policy: RetryPolicy,
    ) -> Result<(Arc<Self>, RetryReceivers)> {
        let classifier = ErrorClassifier::with_overrides(&settings.error_classification)?;
        let cache = Arc::new(ObjectCache::new(
            settings.tenant.clone(),
            settings.created_by(),
            settings.vrf_name.clone(),
        ));
        let reconciler = Reconciler::new(
            client,
            cache,
            classifier,
            RenderContext::from_settings(&settings),
            metrics.clone(),
        );
        let (retries, receivers) = RetryQueues::new(policy, metrics.clone());
        let pipeline = Arc::new(Self {
            builder: GraphBuilder::new(settings.clone()),
            settings,
            objects,
            graphs: Arc::new(GraphStore::new()),
            reconciler,
            retries,
            sink,
            metrics,
        });
        Ok((pipeline, receivers))
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn graphs(&self) -> &Arc<GraphStore> {
        &self.graphs
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        self.reconciler.cache()
    }

    pub fn retries(&self) -> &Arc<RetryQueues> {
        &self.retries
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn model_key(&self, target: &BuildTarget) -> ModelKey {
        target.model_key(&self.settings)
    }

    /// Start the retry consumers, each tier running up to `concurrency` keys
    pub fn start_retries(self: &Arc<Self>, receivers: RetryReceivers, concurrency: usize) -> Vec<JoinHandle<()>> {
        let handler: Arc<dyn RetryHandler> = self.clone();
        self.retries.spawn_consumers(receivers, handler, concurrency)
    }

    /// Every target a change touches, including those of rules whose
    /// usability flipped with it
    pub async fn targets_for(&self, change: &Change) -> BTreeSet<BuildTarget> {
        let inputs = self.objects.read().await;
        let mut targets = self.builder.affected_targets(&inputs, &change.object);
        for rule in &change.revalidated {
            targets.extend(self.builder.affected_targets(&inputs, &rule_object(rule)));
        }
        targets
    }

    /// Process a change inline, one target after another
    pub async fn handle_change(&self, change: Change) -> Vec<(ModelKey, SyncOutcome)> {
        let targets = self.targets_for(&change).await;
        debug!(object = %change.object, targets = targets.len(), "Handling change");
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = self.process_target(&target).await;
            outcomes.push((self.model_key(&target), outcome));
        }
        self.publish_status().await;
        outcomes
    }

    /// Build, store and sync one target
    #[instrument(skip(self), fields(target = %target))]
    pub async fn process_target(&self, target: &BuildTarget) -> SyncOutcome {
        let key = self.model_key(target);
        let mut guard = self.graphs.lock(&key).await;
        let mut outcome = self.build_and_sync(&mut guard, target).await;

        if let SyncOutcome::Rejected { rules, message } = &outcome {
            if !rules.is_empty() {
                self.objects.record_remote_rejection(rules, message).await;
                info!(key = %key, rules = rules.len(), "Rebuilding without rejected rules");
                outcome = self.build_and_sync(&mut guard, target).await;
            }
        }

        let graph = guard.graph();
        self.settle(&key, graph.as_deref(), &outcome).await;
        drop(guard);
        self.publish_status().await;
        outcome
    }

    /// Sync a key whose graph is gone, unless something rebuilt it meanwhile
    #[instrument(skip(self), fields(key = %key))]
    pub async fn process_removed(&self, key: &ModelKey) -> SyncOutcome {
        let guard = self.graphs.lock(key).await;
        if let Some(target) = guard.target().cloned() {
            drop(guard);
            return self.process_target(&target).await;
        }
        let outcome = self.reconciler.sync(key, None).await;
        self.settle(key, None, &outcome).await;
        drop(guard);
        self.publish_status().await;
        outcome
    }

    async fn build_and_sync(&self, guard: &mut KeyGuard, target: &BuildTarget) -> SyncOutcome {
        let key = guard.key().clone();
        let output = {
            let inputs = self.objects.read().await;
            self.builder.build(&inputs, target)
        };
        self.objects
            .record_build(&key, target, output.contributors, &output.rejections)
            .await;
        match output.graph {
            Some(graph) => {
                if !guard.replace(graph, target.clone()) {
                    debug!(key = %key, "Graph checksum unchanged");
                }
            }
            None => {
                if guard.remove().is_some() {
                    info!(key = %key, "Graph removed");
                }
            }
        }
        let graph = guard.graph();
        self.reconciler.sync(&key, graph.as_deref()).await
    }

    async fn settle(&self, key: &ModelKey, graph: Option<&Graph>, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Retry(tier) => {
                self.retries.enqueue(key, *tier).await;
            }
            SyncOutcome::Rejected { .. } => {}
            SyncOutcome::Unchanged | SyncOutcome::Synced { .. } | SyncOutcome::Deleted { .. } => {
                self.retries.reset(key).await;
                let (ingresses, services) = match graph {
                    Some(graph) => match self.load_balancer_status(graph).await {
                        Some(book) => book,
                        None => return,
                    },
                    None => (BTreeMap::new(), BTreeMap::new()),
                };
                let updates = self
                    .objects
                    .record_load_balancer_status(key, ingresses, services)
                    .await;
                for update in updates {
                    self.sink.publish(update);
                }
            }
        }
    }

    /// Entries for the ingresses and services served by a VS graph; None for
    /// graphs that carry no load-balancer status
    async fn load_balancer_status(&self, graph: &Graph) -> Option<(LoadBalancerBook, LoadBalancerBook)> {
        let GraphNode::VirtualService(vs) = &graph.root else {
            return None;
        };
        let mut ingresses = LoadBalancerBook::new();
        let mut services = LoadBalancerBook::new();
        let vip = match &vs.vsvip {
            Some(vsvip) => self.cache().vip_of(&vsvip.name).await,
            None => None,
        };
        let Some(ip) = vip else {
            warn!(key = %graph.key, "No VIP allocated yet");
            return Some((ingresses, services));
        };

        let served: Vec<&VirtualServiceNode> = std::iter::once(vs.as_ref()).chain(vs.children.iter()).collect();
        for node in served {
            for (ingress, hosts) in &node.metadata.ingress_hosts {
                let entries = ingresses.entry(ingress.clone()).or_default();
                entries.extend(hosts.iter().map(|host| LoadBalancerEntry {
                    ip: ip.clone(),
                    hostname: Some(host.clone()),
                }));
            }
            for service in &node.metadata.services {
                services.entry(service.clone()).or_default().push(LoadBalancerEntry {
                    ip: ip.clone(),
                    hostname: None,
                });
            }
        }
        Some((ingresses, services))
    }

    /// Send CRD status changes to the sink
    pub async fn publish_status(&self) {
        for update in self.objects.status_changes().await {
            self.sink.publish(update);
        }
    }

    /// Reload the profile catalog and the cache, then converge every target
    /// and remove the virtual services nothing maps to any more
    pub async fn full_sync(&self) -> FullSyncReport {
        let mut report = FullSyncReport::default();
        let client = self.reconciler.client().clone();

        match load_catalog(client.as_ref(), &self.settings.tenant).await {
            Ok(catalog) => {
                let revalidated = self.objects.set_catalog(catalog).await;
                debug!(revalidated = revalidated.len(), "Loaded profile catalog");
                report.catalog_loaded = true;
            }
            Err(e) => warn!(error = %e, "Profile catalog load failed, keeping the previous catalog"),
        }
        report.refresh = self.cache().refresh(client.as_ref(), &self.metrics).await;

        let targets = {
            let inputs = self.objects.read().await;
            self.builder.all_targets(&inputs)
        };
        let live: HashSet<ModelKey> = targets.iter().map(|t| self.model_key(t)).collect();
        report.targets = targets.len();
        for target in &targets {
            if !self.process_target(target).await.is_success() {
                report.failed += 1;
            }
        }

        for name in self.cache().root_services().await {
            let key = ModelKey::new(self.settings.tenant.clone(), name);
            if live.contains(&key) {
                continue;
            }
            info!(key = %key, "Removing virtual service with no remaining inputs");
            report.removed += 1;
            if !self.process_removed(&key).await.is_success() {
                report.failed += 1;
            }
        }

        self.retries.tracker().cleanup(&live).await;
        self.graphs.prune().await;
        self.publish_status().await;
        info!(
            targets = report.targets,
            removed = report.removed,
            failed = report.failed,
            "Full sync complete"
        );
        report
    }
}

#[async_trait]
impl RetryHandler for Pipeline {
    async fn retry(&self, key: ModelKey) {
        let target = self.graphs.lock(&key).await.target().cloned();
        match target {
            Some(target) => {
                self.process_target(&target).await;
            }
            None => {
                self.process_removed(&key).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Method;
    use crate::memory::{Fault, InMemoryController};
    use crate::retry::RetryTier;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use lb_api::v1alpha2::l4_rule::L4RuleSpec;
    use lb_api::{annotations, L4Rule};
    use lb_core::{Input, MemorySink, ObjectKind, StatusUpdate};
    use std::time::Duration;

    struct Harness {
        ctrl: Arc<InMemoryController>,
        sink: Arc<MemorySink>,
        pipeline: Arc<Pipeline>,
        receivers: Option<RetryReceivers>,
    }

    fn meta(ns: &str, name: &str, version: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            resource_version: Some(version.to_string()),
            ..Default::default()
        }
    }

    fn harness() -> Harness {
        let settings = Arc::new(Settings {
            cluster_name: "cluster".to_string(),
            dry_run: true,
            ..Default::default()
        });
        let ctrl = Arc::new(InMemoryController::new());
        let sink = Arc::new(MemorySink::new());
        let policy = RetryPolicy {
            fast_base: Duration::from_millis(10),
            fast_max_delay: Duration::from_millis(50),
            fast_max_attempts: 3,
            slow_interval: Duration::from_millis(50),
            slow_max_attempts: 2,
        };
        let (pipeline, receivers) = Pipeline::new(
            settings.clone(),
            ObjectStore::new(settings),
            ctrl.clone(),
            sink.clone(),
            Metrics::new().unwrap(),
            policy,
        )
        .unwrap();
        Harness {
            ctrl,
            sink,
            pipeline,
            receivers: Some(receivers),
        }
    }

    fn service(rule: Option<&str>) -> Service {
        let mut metadata = meta("red", "svc", "1");
        if let Some(rule) = rule {
            metadata.annotations = Some([(annotations::L4_RULE.to_string(), rule.to_string())].into_iter().collect());
        }
        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn endpoints() -> Endpoints {
        Endpoints {
            metadata: meta("red", "svc", "1"),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.5".to_string(),
                    ..Default::default()
                }]),
                not_ready_addresses: None,
                ports: Some(vec![EndpointPort {
                    port: 8080,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
            }]),
        }
    }

    fn l4_rule(version: &str) -> L4Rule {
        let mut rule = L4Rule::new(
            "rule",
            L4RuleSpec {
                application_profile: Some("System-L4-Application".to_string()),
                enabled: Some(false),
                ..Default::default()
            },
        );
        rule.metadata = meta("red", "rule", version);
        rule
    }

    async fn apply(h: &Harness, input: Input) -> Vec<(ModelKey, SyncOutcome)> {
        let change = h.pipeline.objects().apply(input).await;
        h.pipeline.handle_change(change).await
    }

    fn svc_key() -> ModelKey {
        ModelKey::new("admin", "cluster--red-svc")
    }

    fn rule_ref() -> RuleRef {
        RuleRef::new(RuleKind::L4Rule, "red", "rule")
    }

    #[tokio::test]
    async fn test_service_gets_vip_and_repeat_events_are_free() {
        let h = harness();
        h.pipeline.full_sync().await;
        apply(&h, Input::Endpoints(endpoints())).await;
        let outcomes = apply(&h, Input::Service(service(None))).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, SyncOutcome::Synced { .. }));

        let vs = h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.unwrap();
        assert_eq!(vs["created_by"], serde_json::json!("ako-cluster"));
        let status = h.sink.updates().into_iter().find_map(|u| match u {
            StatusUpdate::Service { service, entries } if service == NamespacedName::new("red", "svc") => Some(entries),
            _ => None,
        });
        let entries = status.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ip.starts_with("10.250."));
        assert_eq!(entries[0].hostname, None);

        h.ctrl.clear_calls().await;
        let outcomes = apply(&h, Input::Service(service(None))).await;
        assert_eq!(outcomes[0].1, SyncOutcome::Unchanged);
        assert_eq!(h.ctrl.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut h = harness();
        let receivers = h.receivers.take().unwrap();
        let _consumers = h.pipeline.start_retries(receivers, 2);
        h.ctrl
            .fail_next(Fault::status(503, "service unavailable").on(Method::Post, ObjectKind::VirtualService))
            .await;

        apply(&h, Input::Endpoints(endpoints())).await;
        let outcomes = apply(&h, Input::Service(service(None))).await;
        assert_eq!(outcomes[0].1, SyncOutcome::Retry(RetryTier::Fast));
        assert!(h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.is_none());

        let mut converged = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.is_some() {
                converged = true;
                break;
            }
        }
        assert!(converged);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.pipeline.retries().tracker().get(&svc_key()).await, None);
    }

    #[tokio::test]
    async fn test_remote_rejection_reverts_rule_fields() {
        let h = harness();
        h.pipeline.full_sync().await;
        apply(&h, Input::Endpoints(endpoints())).await;
        apply(&h, Input::L4Rule(l4_rule("1"))).await;
        h.ctrl
            .fail_next(Fault::status(400, "Invalid field enabled").on(Method::Post, ObjectKind::VirtualService))
            .await;

        let outcomes = apply(&h, Input::Service(service(Some("rule")))).await;
        assert!(matches!(outcomes[0].1, SyncOutcome::Synced { .. }));
        let vs = h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.unwrap();
        assert!(vs.get("enabled").is_none());
        let status = h.sink.rule_status(&rule_ref()).unwrap();
        assert!(!status.is_accepted());
        assert_eq!(status.error, "remote error: Invalid field enabled");

        // A new version of the rule is tried again
        apply(&h, Input::L4Rule(l4_rule("2"))).await;
        let vs = h.ctrl.object(ObjectKind::VirtualService, "cluster--red-svc").await.unwrap();
        assert_eq!(vs["enabled"], serde_json::json!(false));
        assert!(h.sink.rule_status(&rule_ref()).unwrap().is_accepted());
    }

    #[tokio::test]
    async fn test_deleted_service_cleans_up() {
        let h = harness();
        apply(&h, Input::Endpoints(endpoints())).await;
        apply(&h, Input::Service(service(None))).await;
        assert!(!h.ctrl.names(ObjectKind::Pool).await.is_empty());

        let change = h.pipeline.objects().delete(Input::Service(service(None))).await;
        let outcomes = h.pipeline.handle_change(change).await;
        assert!(matches!(outcomes[0].1, SyncOutcome::Deleted { .. }));
        assert!(h.ctrl.names(ObjectKind::VirtualService).await.is_empty());
        assert!(h.ctrl.names(ObjectKind::Pool).await.is_empty());
        assert!(h.ctrl.names(ObjectKind::VsVip).await.is_empty());
        assert!(h.pipeline.graphs().get(&svc_key()).await.is_none());
    }

    #[tokio::test]
    async fn test_full_sync_removes_orphaned_services() {
        let h = harness();
        apply(&h, Input::Endpoints(endpoints())).await;
        apply(&h, Input::Service(service(None))).await;

        // A fresh process with no inputs sees the leftovers
        let settings = Arc::new(Settings {
            cluster_name: "cluster".to_string(),
            dry_run: true,
            ..Default::default()
        });
        let (fresh, _receivers) = Pipeline::new(
            settings.clone(),
            ObjectStore::new(settings),
            h.ctrl.clone(),
            Arc::new(MemorySink::new()),
            Metrics::new().unwrap(),
            RetryPolicy::default(),
        )
        .unwrap();
        let report = fresh.full_sync().await;
        assert!(report.catalog_loaded);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(h.ctrl.names(ObjectKind::VirtualService).await.is_empty());
        assert!(h.ctrl.names(ObjectKind::Pool).await.is_empty());
    }

    #[test]
    fn test_rule_objects() {
        assert_eq!(
            rule_object(&RuleRef::new(RuleKind::InfraSetting, "", "infra")),
            ObjectRef::new(InputKind::InfraSetting, "", "infra")
        );
        assert_eq!(rule_object(&rule_ref()), ObjectRef::new(InputKind::L4Rule, "red", "rule"));
    }
}
