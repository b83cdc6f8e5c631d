//! Watched inputs and the references used to index them

use k8s_openapi::api::core::v1::{Endpoints, Node, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::ResourceExt;
use lb_api::{AviInfraSetting, HTTPRule, HealthMonitor, HostRule, L4Rule};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputKind {
    Ingress,
    IngressClass,
    Service,
    Endpoints,
    Secret,
    Node,
    HostRule,
    HttpRule,
    L4Rule,
    InfraSetting,
    HealthMonitor,
}

/// Identity of a watched object; endpoints are keyed by their Service
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: InputKind,
    pub key: NamespacedName,
}

impl ObjectRef {
    pub fn new(kind: InputKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            key: NamespacedName::new(namespace, name),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.key)
    }
}

/// A watched object as delivered by the informers
#[derive(Clone, Debug)]
pub enum Input {
    Ingress(Ingress),
    IngressClass(IngressClass),
    Service(Service),
    Endpoints(Endpoints),
    EndpointSlice(EndpointSlice),
    Secret(Secret),
    Node(Node),
    HostRule(HostRule),
    HttpRule(HTTPRule),
    L4Rule(L4Rule),
    InfraSetting(AviInfraSetting),
    HealthMonitor(HealthMonitor),
}

/// Label linking an EndpointSlice to its Service
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

impl Input {
    pub fn object_ref(&self) -> ObjectRef {
        match self {
            Input::Ingress(o) => ObjectRef { kind: InputKind::Ingress, key: NamespacedName::of(o) },
            Input::IngressClass(o) => ObjectRef { kind: InputKind::IngressClass, key: NamespacedName::of(o) },
            Input::Service(o) => ObjectRef { kind: InputKind::Service, key: NamespacedName::of(o) },
            Input::Endpoints(o) => ObjectRef { kind: InputKind::Endpoints, key: NamespacedName::of(o) },
            Input::EndpointSlice(o) => {
                let service = o
                    .labels()
                    .get(SERVICE_NAME_LABEL)
                    .cloned()
                    .unwrap_or_else(|| o.name_any());
                ObjectRef::new(InputKind::Endpoints, o.namespace().unwrap_or_default(), service)
            }
            Input::Secret(o) => ObjectRef { kind: InputKind::Secret, key: NamespacedName::of(o) },
            Input::Node(o) => ObjectRef { kind: InputKind::Node, key: NamespacedName::of(o) },
            Input::HostRule(o) => ObjectRef { kind: InputKind::HostRule, key: NamespacedName::of(o) },
            Input::HttpRule(o) => ObjectRef { kind: InputKind::HttpRule, key: NamespacedName::of(o) },
            Input::L4Rule(o) => ObjectRef { kind: InputKind::L4Rule, key: NamespacedName::of(o) },
            Input::InfraSetting(o) => ObjectRef { kind: InputKind::InfraSetting, key: NamespacedName::of(o) },
            Input::HealthMonitor(o) => ObjectRef { kind: InputKind::HealthMonitor, key: NamespacedName::of(o) },
        }
    }
}
