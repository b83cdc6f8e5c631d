//! Snapshot of watched inputs plus the bookkeeping derived from them
//!
//! Besides the objects themselves the store keeps, per rule CRD, the result of
//! validation, build-time and remote rejections and the last published
//! status. It also indexes which build targets every object contributed to,
//! so a change can be fanned out to exactly the graphs it affects.

use crate::builder::{validate, BuildTarget};
use crate::catalog::ProfileCatalog;
use crate::config::Settings;
use crate::event::{Input, InputKind, NamespacedName, ObjectRef};
use crate::model::{ModelKey, RuleKind, RuleRef};
use crate::status::{LoadBalancerEntry, StatusUpdate};
use k8s_openapi::api::core::v1::{Endpoints, Node, Secret};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use lb_api::{annotations, AviInfraSetting, CrdStatus, HTTPRule, HealthMonitor, HostRule, L4Rule};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddress {
    pub ip: String,
    pub node_name: Option<String>,
    pub ready: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointPort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: String,
}

/// Addresses sharing one port list (an Endpoints subset or an EndpointSlice)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointGroup {
    pub addresses: Vec<EndpointAddress>,
    pub ports: Vec<EndpointPort>,
}

/// Backends of one Service, independent of Endpoints vs EndpointSlice mode
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub groups: Vec<EndpointGroup>,
}

impl ServiceEndpoints {
    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        let groups = endpoints
            .subsets
            .iter()
            .flatten()
            .map(|subset| {
                let ready = subset.addresses.iter().flatten().map(|a| EndpointAddress {
                    ip: a.ip.clone(),
                    node_name: a.node_name.clone(),
                    ready: true,
                });
                let not_ready = subset
                    .not_ready_addresses
                    .iter()
                    .flatten()
                    .map(|a| EndpointAddress {
                        ip: a.ip.clone(),
                        node_name: a.node_name.clone(),
                        ready: false,
                    });
                EndpointGroup {
                    addresses: ready.chain(not_ready).collect(),
                    ports: subset
                        .ports
                        .iter()
                        .flatten()
                        .filter_map(|p| {
                            Some(EndpointPort {
                                name: p.name.clone(),
                                port: u16::try_from(p.port).ok()?,
                                protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                            })
                        })
                        .collect(),
                }
            })
            .collect();
        Self { groups }
    }

    pub fn from_slice(slice: &EndpointSlice) -> Self {
        let addresses = slice
            .endpoints
            .iter()
            .flat_map(|ep| {
                let ready = ep
                    .conditions
                    .as_ref()
                    .and_then(|c| c.ready)
                    .unwrap_or(true);
                let node = ep.node_name.clone();
                ep.addresses.iter().map(move |ip| EndpointAddress {
                    ip: ip.clone(),
                    node_name: node.clone(),
                    ready,
                })
            })
            .collect();
        let ports = slice
            .ports
            .iter()
            .flatten()
            .filter_map(|p| {
                Some(EndpointPort {
                    name: p.name.clone(),
                    port: u16::try_from(p.port?).ok()?,
                    protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                })
            })
            .collect();
        Self {
            groups: vec![EndpointGroup { addresses, ports }],
        }
    }

    fn merge(&mut self, other: &ServiceEndpoints) {
        self.groups.extend(other.groups.iter().cloned());
    }

    /// Ready (ip, port, node) triples for a service port. Endpoint ports carry
    /// the service port's name (an unnamed port matches an unnamed one); a
    /// group without a name match falls back to the target port, then to its
    /// only port.
    pub fn ready_backends(&self, port_name: Option<&str>, target_port: Option<u16>) -> Vec<(String, u16, Option<String>)> {
        let wanted = port_name.unwrap_or_default();
        let mut out = Vec::new();
        for group in &self.groups {
            let port = group
                .ports
                .iter()
                .find(|p| p.name.as_deref().unwrap_or_default() == wanted)
                .or_else(|| target_port.and_then(|t| group.ports.iter().find(|p| p.port == t)))
                .or_else(|| (group.ports.len() == 1).then(|| &group.ports[0]));
            let Some(port) = port else { continue };
            for address in group.addresses.iter().filter(|a| a.ready) {
                out.push((address.ip.clone(), port.port, address.node_name.clone()));
            }
        }
        out.sort();
        out.dedup();
        out
    }

    pub fn ready_nodes(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .filter(|a| a.ready)
            .filter_map(|a| a.node_name.clone())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsSecret {
    pub certificate: String,
    pub key: String,
    pub ca_certificate: Option<String>,
}

impl TlsSecret {
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let data = secret.data.as_ref()?;
        let text = |k: &str| {
            data.get(k)
                .map(|v| String::from_utf8_lossy(&v.0).into_owned())
                .filter(|s| !s.is_empty())
        };
        Some(Self {
            certificate: text("tls.crt")?,
            key: text("tls.key")?,
            ca_certificate: text("ca.crt"),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub internal_ip: Option<String>,
    pub pod_cidrs: Vec<String>,
}

impl NodeInfo {
    /// Pod CIDRs come from the override annotation when present, else from the spec
    pub fn from_node(node: &Node) -> Self {
        let internal_ip = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
            .map(|a| a.address.clone());

        let pod_cidrs = match node.annotations().get(annotations::POD_CIDRS) {
            Some(value) => annotations::split_list(value),
            None => {
                let spec = node.spec.as_ref();
                let cidrs = spec.and_then(|s| s.pod_cidrs.clone()).unwrap_or_default();
                if cidrs.is_empty() {
                    spec.and_then(|s| s.pod_cidr.clone()).into_iter().collect()
                } else {
                    cidrs
                }
            }
        };

        Self {
            name: node.name_any(),
            internal_ip,
            pod_cidrs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RemoteRejection {
    resource_version: Option<String>,
    message: String,
}

#[derive(Clone, Debug, Default)]
struct RuleState {
    validation_error: Option<String>,
    build_rejections: BTreeMap<ModelKey, String>,
    remote_rejection: Option<RemoteRejection>,
    published: Option<CrdStatus>,
}

/// Result of applying one input
#[derive(Clone, Debug)]
pub struct Change {
    pub object: ObjectRef,
    /// Rules whose usability flipped during revalidation
    pub revalidated: Vec<RuleRef>,
}

/// The watched objects. Read access is shared with the builder.
#[derive(Debug, Default)]
pub struct Inputs {
    pub settings: Arc<Settings>,
    pub ingresses: BTreeMap<NamespacedName, Ingress>,
    pub ingress_classes: BTreeMap<String, IngressClass>,
    pub services: BTreeMap<NamespacedName, Service>,
    endpoints: BTreeMap<NamespacedName, ServiceEndpoints>,
    endpoint_slices: BTreeMap<NamespacedName, (NamespacedName, ServiceEndpoints)>,
    pub secrets: BTreeMap<NamespacedName, TlsSecret>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub host_rules: BTreeMap<NamespacedName, HostRule>,
    pub http_rules: BTreeMap<NamespacedName, HTTPRule>,
    pub l4_rules: BTreeMap<NamespacedName, L4Rule>,
    pub infra_settings: BTreeMap<String, AviInfraSetting>,
    pub health_monitors: BTreeMap<NamespacedName, HealthMonitor>,
    pub catalog: ProfileCatalog,
    rule_states: BTreeMap<RuleRef, RuleState>,
    contributions: BTreeMap<BuildTarget, BTreeSet<ObjectRef>>,
    contributors: BTreeMap<ObjectRef, BTreeSet<BuildTarget>>,
    ingress_lb: BTreeMap<NamespacedName, BTreeMap<ModelKey, Vec<LoadBalancerEntry>>>,
    service_lb: BTreeMap<NamespacedName, BTreeMap<ModelKey, Vec<LoadBalancerEntry>>>,
    published_ingress_lb: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
    published_service_lb: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
}

impl Inputs {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub(crate) fn upsert(&mut self, input: Input) -> ObjectRef {
        let object = input.object_ref();
        let key = object.key.clone();
        match input {
            Input::Ingress(o) => {
                self.ingresses.insert(key, o);
            }
            Input::IngressClass(o) => {
                self.ingress_classes.insert(key.name, o);
            }
            Input::Service(o) => {
                self.services.insert(key, o);
            }
            Input::Endpoints(o) => {
                self.endpoints.insert(key, ServiceEndpoints::from_endpoints(&o));
            }
            Input::EndpointSlice(o) => {
                let slice = NamespacedName::of(&o);
                self.endpoint_slices
                    .insert(slice, (key, ServiceEndpoints::from_slice(&o)));
            }
            Input::Secret(o) => match TlsSecret::from_secret(&o) {
                Some(tls) => {
                    self.secrets.insert(key, tls);
                }
                None => {
                    self.secrets.remove(&key);
                }
            },
            Input::Node(o) => {
                self.nodes.insert(key.name, NodeInfo::from_node(&o));
            }
            Input::HostRule(o) => {
                self.host_rules.insert(key, o);
            }
            Input::HttpRule(o) => {
                self.http_rules.insert(key, o);
            }
            Input::L4Rule(o) => {
                self.l4_rules.insert(key, o);
            }
            Input::InfraSetting(o) => {
                self.infra_settings.insert(key.name, o);
            }
            Input::HealthMonitor(o) => {
                self.health_monitors.insert(key, o);
            }
        }
        object
    }

    pub(crate) fn remove(&mut self, input: &Input) -> ObjectRef {
        let object = input.object_ref();
        let key = &object.key;
        match input {
            Input::Ingress(_) => {
                self.ingresses.remove(key);
                self.ingress_lb.remove(key);
                self.published_ingress_lb.remove(key);
            }
            Input::IngressClass(_) => {
                self.ingress_classes.remove(&key.name);
            }
            Input::Service(_) => {
                self.services.remove(key);
                self.service_lb.remove(key);
                self.published_service_lb.remove(key);
            }
            Input::Endpoints(_) => {
                self.endpoints.remove(key);
            }
            Input::EndpointSlice(o) => {
                self.endpoint_slices.remove(&NamespacedName::of(o));
            }
            Input::Secret(_) => {
                self.secrets.remove(key);
            }
            Input::Node(_) => {
                self.nodes.remove(&key.name);
            }
            Input::HostRule(_) => {
                self.host_rules.remove(key);
            }
            Input::HttpRule(_) => {
                self.http_rules.remove(key);
            }
            Input::L4Rule(_) => {
                self.l4_rules.remove(key);
            }
            Input::InfraSetting(_) => {
                self.infra_settings.remove(&key.name);
            }
            Input::HealthMonitor(_) => {
                self.health_monitors.remove(key);
            }
        }
        if let Some(rule) = rule_ref_of(&object) {
            self.rule_states.remove(&rule);
        }
        object
    }

    /// Endpoints of a service from whichever source is populated
    pub fn endpoints_for(&self, service: &NamespacedName) -> Option<ServiceEndpoints> {
        let mut merged: Option<ServiceEndpoints> = self.endpoints.get(service).cloned();
        for (svc, eps) in self.endpoint_slices.values() {
            if svc == service {
                merged.get_or_insert_with(ServiceEndpoints::default).merge(eps);
            }
        }
        merged
    }

    /// The AviInfraSetting bound to an ingress through its IngressClass
    pub fn ingress_infra_setting(&self, ingress: &Ingress) -> Option<&AviInfraSetting> {
        let class = ingress.spec.as_ref()?.ingress_class_name.as_ref()?;
        let params = self.ingress_classes.get(class)?.spec.as_ref()?.parameters.as_ref()?;
        if params.kind != annotations::INFRA_SETTING_KIND
            || params.api_group.as_deref() != Some(lb_api::API_GROUP)
        {
            return None;
        }
        self.infra_settings.get(&params.name)
    }

    /// Ingresses without a class, or whose class names this controller
    pub fn is_handled_ingress(&self, ingress: &Ingress) -> bool {
        match ingress.spec.as_ref().and_then(|s| s.ingress_class_name.as_ref()) {
            None => true,
            Some(class) => self
                .ingress_classes
                .get(class)
                .and_then(|c| c.spec.as_ref())
                .map(|s| s.controller.as_deref() == Some(self.settings.ingress_controller_name.as_str()))
                .unwrap_or(false),
        }
    }

    /// Validation passed and no remote rejection applies to the current version
    pub fn rule_usable(&self, rule: &RuleRef) -> bool {
        let Some(state) = self.rule_states.get(rule) else {
            return self.rule_exists(rule);
        };
        if state.validation_error.is_some() {
            return false;
        }
        !self.remote_rejection_current(rule, state)
    }

    fn remote_rejection_current(&self, rule: &RuleRef, state: &RuleState) -> bool {
        match &state.remote_rejection {
            Some(r) => r.resource_version == self.rule_resource_version(rule),
            None => false,
        }
    }

    pub fn rule_exists(&self, rule: &RuleRef) -> bool {
        self.rule_resource_version_opt(rule).is_some()
    }

    fn rule_resource_version(&self, rule: &RuleRef) -> Option<String> {
        self.rule_resource_version_opt(rule).flatten()
    }

    fn rule_resource_version_opt(&self, rule: &RuleRef) -> Option<Option<String>> {
        let key = NamespacedName::new(rule.namespace.clone(), rule.name.clone());
        match rule.kind {
            RuleKind::HostRule => self.host_rules.get(&key).map(|o| o.resource_version()),
            RuleKind::HttpRule => self.http_rules.get(&key).map(|o| o.resource_version()),
            RuleKind::L4Rule => self.l4_rules.get(&key).map(|o| o.resource_version()),
            RuleKind::InfraSetting => self.infra_settings.get(&rule.name).map(|o| o.resource_version()),
        }
    }

    fn all_rules(&self) -> Vec<RuleRef> {
        let mut rules = Vec::new();
        rules.extend(self.host_rules.keys().map(|k| RuleRef::new(RuleKind::HostRule, &k.namespace, &k.name)));
        rules.extend(self.http_rules.keys().map(|k| RuleRef::new(RuleKind::HttpRule, &k.namespace, &k.name)));
        rules.extend(self.l4_rules.keys().map(|k| RuleRef::new(RuleKind::L4Rule, &k.namespace, &k.name)));
        rules.extend(self.infra_settings.keys().map(|k| RuleRef::new(RuleKind::InfraSetting, "", k)));
        rules
    }

    /// Run validation for every rule; returns rules whose usability changed
    pub fn revalidate(&mut self) -> Vec<RuleRef> {
        let mut changed = Vec::new();
        for rule in self.all_rules() {
            let result = validate::validate_rule(self, &rule).err();
            let was_usable = self.rule_usable(&rule);
            let state = self.rule_states.entry(rule.clone()).or_default();
            let is_new = state.published.is_none() && state.validation_error.is_none();
            state.validation_error = result;
            let usable = self.rule_usable(&rule);
            if usable != was_usable || is_new {
                changed.push(rule);
            }
        }
        changed
    }

    /// Replace the build-time rejections owned by a key
    pub fn record_build_rejections(&mut self, key: &ModelKey, rejections: &[(RuleRef, String)]) {
        for state in self.rule_states.values_mut() {
            state.build_rejections.remove(key);
        }
        for (rule, message) in rejections {
            if self.rule_exists(rule) {
                self.rule_states
                    .entry(rule.clone())
                    .or_default()
                    .build_rejections
                    .insert(key.clone(), message.clone());
            }
        }
    }

    /// Remember that the controller refused a rule's current version
    pub fn record_remote_rejection(&mut self, rules: &BTreeSet<RuleRef>, message: &str) {
        for rule in rules {
            if !self.rule_exists(rule) {
                continue;
            }
            let resource_version = self.rule_resource_version(rule);
            info!("Rejecting {} after controller error: {}", rule, message);
            self.rule_states.entry(rule.clone()).or_default().remote_rejection = Some(RemoteRejection {
                resource_version,
                message: format!("remote error: {message}"),
            });
        }
    }

    pub fn effective_status(&self, rule: &RuleRef) -> Option<CrdStatus> {
        if !self.rule_exists(rule) {
            return None;
        }
        let Some(state) = self.rule_states.get(rule) else {
            return Some(CrdStatus::accepted());
        };
        if let Some(err) = &state.validation_error {
            return Some(CrdStatus::rejected(err.clone()));
        }
        if let Some(msg) = state.build_rejections.values().next() {
            return Some(CrdStatus::rejected(msg.clone()));
        }
        if self.remote_rejection_current(rule, state) {
            if let Some(r) = &state.remote_rejection {
                return Some(CrdStatus::rejected(r.message.clone()));
            }
        }
        Some(CrdStatus::accepted())
    }

    /// Rule statuses that differ from what was last published
    pub fn status_changes(&mut self) -> Vec<StatusUpdate> {
        let mut updates = Vec::new();
        for rule in self.all_rules() {
            let Some(status) = self.effective_status(&rule) else { continue };
            let state = self.rule_states.entry(rule.clone()).or_default();
            if state.published.as_ref() != Some(&status) {
                state.published = Some(status.clone());
                updates.push(StatusUpdate::Rule { rule, status });
            }
        }
        updates
    }

    /// Replace the objects a target was built from
    pub fn record_contributions(&mut self, target: &BuildTarget, objects: BTreeSet<ObjectRef>) {
        if let Some(previous) = self.contributions.remove(target) {
            for object in previous {
                if let Some(targets) = self.contributors.get_mut(&object) {
                    targets.remove(target);
                    if targets.is_empty() {
                        self.contributors.remove(&object);
                    }
                }
            }
        }
        if objects.is_empty() {
            return;
        }
        for object in &objects {
            self.contributors
                .entry(object.clone())
                .or_default()
                .insert(target.clone());
        }
        self.contributions.insert(target.clone(), objects);
    }

    /// Targets an object contributed to on their last build
    pub fn targets_of(&self, object: &ObjectRef) -> BTreeSet<BuildTarget> {
        self.contributors.get(object).cloned().unwrap_or_default()
    }

    pub fn known_targets(&self) -> BTreeSet<BuildTarget> {
        self.contributions.keys().cloned().collect()
    }

    /// Merge a key's load-balancer entries and return the changed statuses
    pub fn record_load_balancer_status(
        &mut self,
        key: &ModelKey,
        ingresses: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
        services: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
    ) -> Vec<StatusUpdate> {
        let mut updates = Vec::new();
        for (name, entries) in merge_book(&mut self.ingress_lb, &mut self.published_ingress_lb, key, ingresses, &self.ingresses) {
            updates.push(StatusUpdate::Ingress { ingress: name, entries });
        }
        for (name, entries) in merge_book(&mut self.service_lb, &mut self.published_service_lb, key, services, &self.services) {
            updates.push(StatusUpdate::Service { service: name, entries });
        }
        updates
    }
}

fn merge_book<T>(
    book: &mut BTreeMap<NamespacedName, BTreeMap<ModelKey, Vec<LoadBalancerEntry>>>,
    published: &mut BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
    key: &ModelKey,
    fresh: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
    live: &BTreeMap<NamespacedName, T>,
) -> Vec<(NamespacedName, Vec<LoadBalancerEntry>)> {
    let mut touched: BTreeSet<NamespacedName> = book
        .iter()
        .filter(|(_, per_key)| per_key.contains_key(key))
        .map(|(name, _)| name.clone())
        .collect();
    for per_key in book.values_mut() {
        per_key.remove(key);
    }
    for (name, entries) in fresh {
        touched.insert(name.clone());
        if !entries.is_empty() {
            book.entry(name).or_default().insert(key.clone(), entries);
        }
    }
    book.retain(|_, per_key| !per_key.is_empty());

    let mut out = Vec::new();
    for name in touched {
        if !live.contains_key(&name) {
            continue;
        }
        let mut merged: Vec<LoadBalancerEntry> = book
            .get(&name)
            .map(|per_key| per_key.values().flatten().cloned().collect())
            .unwrap_or_default();
        merged.sort();
        merged.dedup();
        if published.get(&name) != Some(&merged) {
            published.insert(name.clone(), merged.clone());
            out.push((name, merged));
        }
    }
    out
}

pub(crate) fn rule_ref_of(object: &ObjectRef) -> Option<RuleRef> {
    let kind = match object.kind {
        InputKind::HostRule => RuleKind::HostRule,
        InputKind::HttpRule => RuleKind::HttpRule,
        InputKind::L4Rule => RuleKind::L4Rule,
        InputKind::InfraSetting => RuleKind::InfraSetting,
        _ => return None,
    };
    Some(RuleRef::new(kind, &object.key.namespace, &object.key.name))
}

/// Shared handle over the inputs
#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<RwLock<Inputs>>,
}

impl ObjectStore {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inputs::new(settings))),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Inputs> {
        self.inner.read().await
    }

    /// Insert or replace an object
    pub async fn apply(&self, input: Input) -> Change {
        let revalidates = triggers_revalidation(&input);
        let mut inputs = self.inner.write().await;
        let object = inputs.upsert(input);
        let revalidated = if revalidates { inputs.revalidate() } else { Vec::new() };
        debug!("Applied {} ({} rules revalidated)", object, revalidated.len());
        Change { object, revalidated }
    }

    /// Remove an object
    pub async fn delete(&self, input: Input) -> Change {
        let revalidates = triggers_revalidation(&input);
        let mut inputs = self.inner.write().await;
        let object = inputs.remove(&input);
        let revalidated = if revalidates { inputs.revalidate() } else { Vec::new() };
        debug!("Deleted {} ({} rules revalidated)", object, revalidated.len());
        Change { object, revalidated }
    }

    /// Replace the profile catalog and revalidate every rule
    pub async fn set_catalog(&self, catalog: ProfileCatalog) -> Vec<RuleRef> {
        let mut inputs = self.inner.write().await;
        inputs.catalog = catalog;
        inputs.revalidate()
    }

    pub async fn record_build(&self, key: &ModelKey, target: &BuildTarget, contributors: BTreeSet<ObjectRef>, rejections: &[(RuleRef, String)]) {
        let mut inputs = self.inner.write().await;
        inputs.record_contributions(target, contributors);
        inputs.record_build_rejections(key, rejections);
    }

    pub async fn record_remote_rejection(&self, rules: &BTreeSet<RuleRef>, message: &str) {
        self.inner.write().await.record_remote_rejection(rules, message);
    }

    pub async fn status_changes(&self) -> Vec<StatusUpdate> {
        self.inner.write().await.status_changes()
    }

    pub async fn record_load_balancer_status(
        &self,
        key: &ModelKey,
        ingresses: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
        services: BTreeMap<NamespacedName, Vec<LoadBalancerEntry>>,
    ) -> Vec<StatusUpdate> {
        self.inner
            .write()
            .await
            .record_load_balancer_status(key, ingresses, services)
    }
}

fn triggers_revalidation(input: &Input) -> bool {
    matches!(
        input,
        Input::HostRule(_)
            | Input::HttpRule(_)
            | Input::L4Rule(_)
            | Input::InfraSetting(_)
            | Input::HealthMonitor(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress as K8sAddress, EndpointPort as K8sPort, EndpointSubset, NodeAddress, NodeSpec, NodeStatus};
    use kube::api::ObjectMeta;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            cluster_name: "cluster".to_string(),
            dry_run: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_node_pod_cidr_override_annotation() {
        let mut node = Node {
            metadata: ObjectMeta {
                name: Some("node-1".to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                pod_cidr: Some("10.244.0.0/24".to_string()),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: "192.168.1.10".to_string(),
                }]),
                ..Default::default()
            }),
        };
        let info = NodeInfo::from_node(&node);
        assert_eq!(info.internal_ip.as_deref(), Some("192.168.1.10"));
        assert_eq!(info.pod_cidrs, vec!["10.244.0.0/24".to_string()]);

        node.metadata.annotations = Some(
            [(annotations::POD_CIDRS.to_string(), " 10.1.0.0/24 , 10.2.0.0/24".to_string())]
                .into_iter()
                .collect(),
        );
        let info = NodeInfo::from_node(&node);
        assert_eq!(info.pod_cidrs, vec!["10.1.0.0/24".to_string(), "10.2.0.0/24".to_string()]);
    }

    #[test]
    fn test_ready_backends_by_port_name() {
        let endpoints = Endpoints {
            metadata: ObjectMeta::default(),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![K8sAddress {
                    ip: "10.244.0.5".to_string(),
                    node_name: Some("node-1".to_string()),
                    ..Default::default()
                }]),
                not_ready_addresses: Some(vec![K8sAddress {
                    ip: "10.244.0.6".to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![
                    K8sPort {
                        name: Some("http".to_string()),
                        port: 8080,
                        ..Default::default()
                    },
                    K8sPort {
                        name: Some("metrics".to_string()),
                        port: 9090,
                        ..Default::default()
                    },
                ]),
            }]),
        };
        let eps = ServiceEndpoints::from_endpoints(&endpoints);
        assert_eq!(
            eps.ready_backends(Some("http"), None),
            vec![("10.244.0.5".to_string(), 8080, Some("node-1".to_string()))]
        );
        assert_eq!(eps.ready_nodes(), ["node-1".to_string()].into_iter().collect());
    }

    #[test]
    fn test_unnamed_port_pairs_with_unnamed_endpoint_port() {
        let endpoints = Endpoints {
            metadata: ObjectMeta::default(),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![K8sAddress {
                    ip: "10.244.0.7".to_string(),
                    ..Default::default()
                }]),
                not_ready_addresses: None,
                ports: Some(vec![K8sPort {
                    port: 8080,
                    ..Default::default()
                }]),
            }]),
        };
        let eps = ServiceEndpoints::from_endpoints(&endpoints);
        // Service port 80 with no targetPort still lands on the endpoint's 8080
        assert_eq!(eps.ready_backends(None, Some(80)), vec![("10.244.0.7".to_string(), 8080, None)]);
        assert_eq!(eps.ready_backends(Some(""), None), vec![("10.244.0.7".to_string(), 8080, None)]);
    }

    #[test]
    fn test_load_balancer_status_merges_keys() {
        let mut inputs = Inputs::new(settings());
        let ing = NamespacedName::new("default", "ing");
        inputs.ingresses.insert(ing.clone(), Ingress::default());

        let key_a = ModelKey::new("admin", "vs-a");
        let key_b = ModelKey::new("admin", "vs-b");
        let entry = |ip: &str, host: &str| LoadBalancerEntry {
            ip: ip.to_string(),
            hostname: Some(host.to_string()),
        };

        let updates = inputs.record_load_balancer_status(
            &key_a,
            [(ing.clone(), vec![entry("10.0.0.1", "a.com")])].into_iter().collect(),
            BTreeMap::new(),
        );
        assert_eq!(updates.len(), 1);

        let updates = inputs.record_load_balancer_status(
            &key_b,
            [(ing.clone(), vec![entry("10.0.0.2", "b.com")])].into_iter().collect(),
            BTreeMap::new(),
        );
        match &updates[0] {
            StatusUpdate::Ingress { entries, .. } => assert_eq!(entries.len(), 2),
            other => panic!("unexpected update {:?}", other),
        }

        // unchanged input publishes nothing
        let updates = inputs.record_load_balancer_status(
            &key_b,
            [(ing.clone(), vec![entry("10.0.0.2", "b.com")])].into_iter().collect(),
            BTreeMap::new(),
        );
        assert!(updates.is_empty());

        // key a no longer serves the ingress
        let updates = inputs.record_load_balancer_status(&key_a, BTreeMap::new(), BTreeMap::new());
        match &updates[0] {
            StatusUpdate::Ingress { entries, .. } => assert_eq!(entries, &vec![entry("10.0.0.2", "b.com")]),
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[test]
    fn test_contribution_index() {
        let mut inputs = Inputs::new(settings());
        let target = BuildTarget::SharedL7 { infra: None, shard: 1 };
        let ing = ObjectRef::new(InputKind::Ingress, "default", "ing");
        let svc = ObjectRef::new(InputKind::Service, "default", "svc");

        inputs.record_contributions(&target, [ing.clone(), svc.clone()].into_iter().collect());
        assert!(inputs.targets_of(&svc).contains(&target));

        inputs.record_contributions(&target, [ing.clone()].into_iter().collect());
        assert!(inputs.targets_of(&svc).is_empty());
        assert!(inputs.targets_of(&ing).contains(&target));

        inputs.record_contributions(&target, BTreeSet::new());
        assert!(inputs.known_targets().is_empty());
    }
}
