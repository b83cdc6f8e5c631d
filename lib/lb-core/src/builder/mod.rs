//! Compiles the watched inputs into virtual-service graphs
//!
//! A build is a pure function of the input snapshot and a [`BuildTarget`].
//! Every target owns exactly one graph key, so the builder never has to merge
//! partial results: it recomputes the whole graph for the target and lets the
//! checksum decide whether anything changed.

mod host_rule;
mod http_rule;
mod infra;
mod ingress;
mod l4;
mod l7;
mod servers;
pub mod validate;
mod vrf;

use crate::config::Settings;
use crate::event::{InputKind, NamespacedName, ObjectRef};
use crate::model::{Graph, ModelKey, RuleRef};
use crate::naming::Namer;
use crate::objects::Inputs;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The unit a build produces: one graph key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildTarget {
    SharedL7 { infra: Option<String>, shard: u32 },
    DedicatedL7 { infra: Option<String>, host: String },
    L4 { infra: Option<String>, namespace: String, name: String },
    SharedVip { infra: Option<String>, namespace: String, key: String },
    Vrf { name: String },
}

impl BuildTarget {
    pub fn model_key(&self, settings: &Settings) -> ModelKey {
        let namer = |infra: &Option<String>| Namer::new(&settings.cluster_name, infra.as_deref());
        let name = match self {
            BuildTarget::SharedL7 { infra, shard } => namer(infra).with_evh(settings.enable_evh).shared_vs(*shard),
            BuildTarget::DedicatedL7 { infra, host } => namer(infra).dedicated_vs(host),
            BuildTarget::L4 { infra, namespace, name } => namer(infra).l4_vs(namespace, name),
            BuildTarget::SharedVip { infra, namespace, key } => namer(infra).shared_vip_vs(namespace, key),
            BuildTarget::Vrf { name } => name.clone(),
        };
        ModelKey::new(settings.tenant.clone(), name)
    }

    pub fn is_l7(&self) -> bool {
        matches!(self, BuildTarget::SharedL7 { .. } | BuildTarget::DedicatedL7 { .. })
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTarget::SharedL7 { infra, shard } => write!(f, "shared-l7[{}]/{}", infra.as_deref().unwrap_or("-"), shard),
            BuildTarget::DedicatedL7 { infra, host } => write!(f, "dedicated-l7[{}]/{}", infra.as_deref().unwrap_or("-"), host),
            BuildTarget::L4 { infra, namespace, name } => write!(f, "l4[{}]/{}/{}", infra.as_deref().unwrap_or("-"), namespace, name),
            BuildTarget::SharedVip { infra, namespace, key } => write!(f, "shared-vip[{}]/{}/{}", infra.as_deref().unwrap_or("-"), namespace, key),
            BuildTarget::Vrf { name } => write!(f, "vrf/{}", name),
        }
    }
}

/// Result of building one target
#[derive(Clone, Debug, Default)]
pub struct BuildOutput {
    /// None when nothing maps to the target any more
    pub graph: Option<Graph>,
    /// Inputs read while building, used to route later changes back here
    pub contributors: BTreeSet<ObjectRef>,
    /// Rules refused while building this target
    pub rejections: Vec<(RuleRef, String)>,
}

impl BuildOutput {
    pub(crate) fn contribute(&mut self, kind: InputKind, key: &NamespacedName) {
        self.contributors.insert(ObjectRef {
            kind,
            key: key.clone(),
        });
    }

    pub(crate) fn reject(&mut self, rule: RuleRef, message: impl Into<String>) {
        self.rejections.push((rule, message.into()));
    }
}

#[derive(Clone)]
pub struct GraphBuilder {
    settings: Arc<Settings>,
}

impl GraphBuilder {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn build(&self, inputs: &Inputs, target: &BuildTarget) -> BuildOutput {
        let key = target.model_key(&self.settings);
        let output = match target {
            BuildTarget::SharedL7 { .. } | BuildTarget::DedicatedL7 { .. } => {
                l7::build(&self.settings, inputs, target, key.clone())
            }
            BuildTarget::L4 { .. } | BuildTarget::SharedVip { .. } => {
                l4::build(&self.settings, inputs, target, key.clone())
            }
            BuildTarget::Vrf { .. } => vrf::build(&self.settings, inputs, key.clone()),
        };
        debug!(
            key = %key,
            target = %target,
            present = output.graph.is_some(),
            contributors = output.contributors.len(),
            rejections = output.rejections.len(),
            "Built graph"
        );
        output
    }

    /// Every target a change to `object` may affect: where it contributed on
    /// the previous builds, plus where its current state maps
    pub fn affected_targets(&self, inputs: &Inputs, object: &ObjectRef) -> BTreeSet<BuildTarget> {
        let mut targets = inputs.targets_of(object);
        let key = &object.key;
        match object.kind {
            InputKind::Ingress => {
                if let Some(ingress) = inputs.ingresses.get(key) {
                    targets.extend(l7::ingress_targets(&self.settings, inputs, ingress));
                }
            }
            InputKind::IngressClass => {
                for ingress in inputs.ingresses.values() {
                    let class = ingress.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref());
                    if class == Some(key.name.as_str()) {
                        targets.extend(l7::ingress_targets(&self.settings, inputs, ingress));
                    }
                }
            }
            InputKind::Service | InputKind::Endpoints => {
                targets.extend(l4::service_target(inputs, key));
                for ingress in inputs.ingresses.values() {
                    if ingress::references_service(ingress, key) {
                        targets.extend(l7::ingress_targets(&self.settings, inputs, ingress));
                    }
                }
            }
            InputKind::Secret => {
                for ingress in inputs.ingresses.values() {
                    if ingress::references_secret(ingress, key) {
                        targets.extend(l7::ingress_targets(&self.settings, inputs, ingress));
                    }
                }
            }
            InputKind::Node => {
                targets.extend(vrf::target(&self.settings));
                if self.settings.service_type == crate::config::ServiceType::NodePort {
                    targets.extend(inputs.known_targets().into_iter().filter(|t| !matches!(t, BuildTarget::Vrf { .. })));
                }
            }
            InputKind::HostRule => {
                if let Some(rule) = inputs.host_rules.get(key) {
                    targets.extend(l7::host_rule_targets(&self.settings, inputs, rule));
                }
            }
            InputKind::HttpRule => {
                if let Some(rule) = inputs.http_rules.get(key) {
                    targets.extend(l7::host_targets(&self.settings, inputs, &rule.spec.fqdn));
                }
            }
            InputKind::L4Rule => {
                targets.extend(l4::l4_rule_targets(inputs, key));
            }
            InputKind::InfraSetting => {
                for ingress in inputs.ingresses.values() {
                    if infra::ingress_infra_name(inputs, ingress).as_deref() == Some(key.name.as_str()) {
                        targets.extend(l7::ingress_targets(&self.settings, inputs, ingress));
                    }
                }
                targets.extend(l4::infra_targets(inputs, &key.name));
            }
            InputKind::HealthMonitor => {
                for (name, rule) in &inputs.http_rules {
                    if name.namespace != key.namespace {
                        continue;
                    }
                    let uses = rule
                        .spec
                        .paths
                        .iter()
                        .any(|p| p.health_monitor_crd_refs.iter().any(|r| r == &key.name));
                    if uses {
                        targets.extend(l7::host_targets(&self.settings, inputs, &rule.spec.fqdn));
                    }
                }
            }
        }
        targets
    }

    /// Targets of everything currently in the store, for full syncs
    pub fn all_targets(&self, inputs: &Inputs) -> BTreeSet<BuildTarget> {
        let mut targets = inputs.known_targets();
        for ingress in inputs.ingresses.values() {
            targets.extend(l7::ingress_targets(&self.settings, inputs, ingress));
        }
        for key in inputs.services.keys() {
            targets.extend(l4::service_target(inputs, key));
        }
        targets.extend(vrf::target(&self.settings));
        targets
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
