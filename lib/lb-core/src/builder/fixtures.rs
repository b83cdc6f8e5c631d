//! Object constructors shared by the builder tests

use super::GraphBuilder;
use crate::catalog::{ProfileCatalog, ProfileKind, APP_PROFILE_L4_SSL, NETWORK_PROFILE_TCP_PROXY};
use crate::config::{Settings, ShardSize};
use crate::event::{Input, NamespacedName};
use crate::objects::Inputs;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node, NodeAddress, NodeSpec, NodeStatus, Secret,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressClass, IngressClassParametersReference,
    IngressClassSpec, IngressRule, IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use lb_api::v1alpha1::health_monitor::{HealthMonitorSpec, HealthMonitorStatus};
use lb_api::v1alpha2::l4_rule::L4RuleSpec;
use lb_api::v1beta1::host_rule::{HostRuleSpec, VirtualHost};
use lb_api::v1beta1::http_rule::{HTTPRulePath, HTTPRuleSpec};
use lb_api::v1beta1::infra_setting::{AviInfraSettingSpec, InfraNetwork, L7Settings, VipNetwork};
use lb_api::{AviInfraSetting, HTTPRule, HealthMonitor, HostRule, L4Rule, ACCEPTED};
use std::collections::BTreeMap;
use std::sync::Arc;

fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: (!ns.is_empty()).then(|| ns.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

pub(crate) fn settings() -> Settings {
    Settings {
        cluster_name: "cluster".to_string(),
        dry_run: true,
        ..Default::default()
    }
}

pub(crate) fn harness(shard_size: ShardSize) -> (GraphBuilder, Inputs) {
    let mut settings = settings();
    settings.shard_size = shard_size;
    let settings = Arc::new(settings);
    (GraphBuilder::new(settings.clone()), Inputs::new(settings))
}

/// Ingress with one rule; each path is (path, service, port)
pub(crate) fn ingress(ns: &str, name: &str, host: &str, paths: &[(&str, &str, i32)], tls: Option<&str>) -> Ingress {
    let paths = paths
        .iter()
        .map(|(path, service, port)| HTTPIngressPath {
            path: (!path.is_empty()).then(|| path.to_string()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: service.to_string(),
                    port: Some(ServiceBackendPort {
                        number: Some(*port),
                        name: None,
                    }),
                }),
                resource: None,
            },
        })
        .collect();
    Ingress {
        metadata: meta(ns, name),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue { paths }),
            }]),
            tls: tls.map(|secret| {
                vec![IngressTLS {
                    hosts: Some(vec![host.to_string()]),
                    secret_name: Some(secret.to_string()),
                }]
            }),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn add_ingress(
    inputs: &mut Inputs,
    ns: &str,
    name: &str,
    host: &str,
    paths: &[(&str, &str, i32)],
    class: Option<&str>,
) -> Ingress {
    let mut ing = ingress(ns, name, host, paths, None);
    if let Some(spec) = ing.spec.as_mut() {
        spec.ingress_class_name = class.map(str::to_string);
    }
    inputs.upsert(Input::Ingress(ing.clone()));
    ing
}

pub(crate) fn add_tls_ingress(
    inputs: &mut Inputs,
    ns: &str,
    name: &str,
    host: &str,
    paths: &[(&str, &str, i32)],
    secret: &str,
) -> Ingress {
    let ing = ingress(ns, name, host, paths, Some(secret));
    inputs.upsert(Input::Ingress(ing.clone()));
    ing
}

pub(crate) fn add_ingress_class(inputs: &mut Inputs, name: &str, infra: Option<&str>) {
    let class = IngressClass {
        metadata: meta("", name),
        spec: Some(IngressClassSpec {
            controller: Some(inputs.settings.ingress_controller_name.clone()),
            parameters: infra.map(|infra| IngressClassParametersReference {
                api_group: Some(lb_api::API_GROUP.to_string()),
                kind: lb_api::annotations::INFRA_SETTING_KIND.to_string(),
                name: infra.to_string(),
                namespace: None,
                scope: None,
            }),
        }),
    };
    inputs.upsert(Input::IngressClass(class));
}

/// LoadBalancer Service; each port is (port, protocol)
pub(crate) fn lb_service(ns: &str, name: &str, ports: &[(i32, &str)]) -> Service {
    Service {
        metadata: meta(ns, name),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(port, protocol)| ServicePort {
                        port: *port,
                        protocol: Some(protocol.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// ClusterIP Service with a single unnamed port
pub(crate) fn add_service(inputs: &mut Inputs, ns: &str, name: &str, port: i32) {
    let service = Service {
        metadata: meta(ns, name),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    inputs.upsert(Input::Service(service));
}

fn endpoints(ns: &str, name: &str, addresses: Vec<EndpointAddress>, port: i32) -> Endpoints {
    Endpoints {
        metadata: meta(ns, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(addresses),
            not_ready_addresses: None,
            ports: Some(vec![EndpointPort {
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
        }]),
    }
}

pub(crate) fn add_endpoints(inputs: &mut Inputs, ns: &str, name: &str, ips: &[&str], port: i32) {
    let addresses = ips
        .iter()
        .map(|ip| EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        })
        .collect();
    inputs.upsert(Input::Endpoints(endpoints(ns, name, addresses, port)));
}

pub(crate) fn add_endpoints_on_node(inputs: &mut Inputs, ns: &str, name: &str, ip: &str, port: i32, node: &str) {
    let address = EndpointAddress {
        ip: ip.to_string(),
        node_name: Some(node.to_string()),
        ..Default::default()
    };
    inputs.upsert(Input::Endpoints(endpoints(ns, name, vec![address], port)));
}

pub(crate) fn add_node(inputs: &mut Inputs, name: &str, ip: &str, pod_cidrs: &[&str]) {
    let node = Node {
        metadata: meta("", name),
        spec: Some(NodeSpec {
            pod_cidrs: Some(pod_cidrs.iter().map(|c| c.to_string()).collect()),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress {
                address: ip.to_string(),
                type_: "InternalIP".to_string(),
            }]),
            ..Default::default()
        }),
    };
    inputs.upsert(Input::Node(node));
}

pub(crate) fn add_secret(inputs: &mut Inputs, ns: &str, name: &str) {
    let mut data = BTreeMap::new();
    data.insert("tls.crt".to_string(), ByteString(format!("cert-{name}").into_bytes()));
    data.insert("tls.key".to_string(), ByteString(format!("key-{name}").into_bytes()));
    let secret = Secret {
        metadata: meta(ns, name),
        data: Some(data),
        type_: Some("kubernetes.io/tls".to_string()),
        ..Default::default()
    };
    inputs.upsert(Input::Secret(secret));
}

/// Exact virtual host with nothing overridden
pub(crate) fn virtual_host(fqdn: &str) -> VirtualHost {
    VirtualHost {
        fqdn: fqdn.to_string(),
        ..Default::default()
    }
}

pub(crate) fn add_host_rule(inputs: &mut Inputs, ns: &str, name: &str, virtual_host: VirtualHost) -> NamespacedName {
    let mut rule = HostRule::new(name, HostRuleSpec { virtual_host });
    rule.metadata = meta(ns, name);
    inputs.upsert(Input::HostRule(rule));
    NamespacedName::new(ns, name)
}

pub(crate) fn set_created(inputs: &mut Inputs, key: &NamespacedName, created: Time) {
    if let Some(rule) = inputs.host_rules.get_mut(key) {
        rule.metadata.creation_timestamp = Some(created);
    }
}

pub(crate) fn add_http_rule(inputs: &mut Inputs, ns: &str, name: &str, fqdn: &str, paths: Vec<HTTPRulePath>) {
    let mut rule = HTTPRule::new(
        name,
        HTTPRuleSpec {
            fqdn: fqdn.to_string(),
            paths,
        },
    );
    rule.metadata = meta(ns, name);
    inputs.upsert(Input::HttpRule(rule));
}

pub(crate) fn add_l4_rule(inputs: &mut Inputs, ns: &str, name: &str, spec: L4RuleSpec) {
    let mut rule = L4Rule::new(name, spec);
    rule.metadata = meta(ns, name);
    inputs.upsert(Input::L4Rule(rule));
}

/// HealthMonitor, ready when a UUID is given
pub(crate) fn add_health_monitor(inputs: &mut Inputs, ns: &str, name: &str, uuid: Option<&str>) {
    let mut hm = HealthMonitor::new(name, HealthMonitorSpec::default());
    hm.metadata = meta(ns, name);
    hm.status = Some(HealthMonitorStatus {
        status: ACCEPTED.to_string(),
        error: String::new(),
        uuid: uuid.map(str::to_string),
    });
    inputs.upsert(Input::HealthMonitor(hm));
}

pub(crate) fn add_infra_setting(inputs: &mut Inputs, name: &str, shard_size: Option<&str>, vip_networks: &[&str]) {
    let spec = AviInfraSettingSpec {
        se_group: None,
        network: (!vip_networks.is_empty()).then(|| InfraNetwork {
            vip_networks: vip_networks
                .iter()
                .map(|n| VipNetwork {
                    network_name: n.to_string(),
                    cidr: None,
                })
                .collect(),
            enable_rhi: None,
        }),
        l7_settings: shard_size.map(|s| L7Settings {
            shard_size: s.to_string(),
        }),
    };
    let mut setting = AviInfraSetting::new(name, spec);
    setting.metadata = meta("", name);
    inputs.upsert(Input::InfraSetting(setting));
}

/// A loaded catalog with the stock L4 profiles
pub(crate) fn l4_catalog() -> ProfileCatalog {
    let mut catalog = ProfileCatalog::new();
    catalog.insert(ProfileKind::ApplicationProfile, "System-L4-Application", Some("APPLICATION_PROFILE_TYPE_L4"));
    catalog.insert(ProfileKind::ApplicationProfile, "System-SSL-Application", Some(APP_PROFILE_L4_SSL));
    catalog.insert(ProfileKind::NetworkProfile, "System-TCP-Proxy", Some(NETWORK_PROFILE_TCP_PROXY));
    catalog.insert(ProfileKind::NetworkProfile, "System-UDP-Fast-Path", Some("PROTOCOL_TYPE_UDP_FAST_PATH"));
    catalog
}
