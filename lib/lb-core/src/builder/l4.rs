//! LoadBalancer Service translation, with optional L4Rule overrides

use super::http_rule::monitor_by_name;
use super::{infra, servers, BuildOutput, BuildTarget};
use crate::config::Settings;
use crate::event::{InputKind, NamespacedName};
use crate::model::{
    Graph, GraphNode, L4PolicyRule, L4PolicySetNode, ModelKey, PoolNode, PortProtocol, RuleKind, RuleRef,
    VirtualServiceNode, VsVipNode,
};
use crate::naming::{l4_policy_name, Namer};
use crate::objects::Inputs;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use lb_api::annotations;
use lb_api::L4Rule;
use std::collections::BTreeSet;

fn is_load_balancer(service: &Service) -> bool {
    service.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer")
}

fn shared_vip_key(service: &Service) -> Option<&str> {
    service
        .annotations()
        .get(annotations::SHARED_VIP)
        .map(String::as_str)
        .filter(|k| !k.is_empty())
}

/// Target a LoadBalancer Service maps to
pub(crate) fn target_of(inputs: &Inputs, service: &Service) -> Option<BuildTarget> {
    if !is_load_balancer(service) {
        return None;
    }
    let infra = infra::service_infra_name(inputs, service);
    let namespace = service.namespace().unwrap_or_default();
    Some(match shared_vip_key(service) {
        Some(key) => BuildTarget::SharedVip {
            infra,
            namespace,
            key: key.to_string(),
        },
        None => BuildTarget::L4 {
            infra,
            namespace,
            name: service.name_any(),
        },
    })
}

pub(crate) fn service_target(inputs: &Inputs, key: &NamespacedName) -> Option<BuildTarget> {
    inputs.services.get(key).and_then(|s| target_of(inputs, s))
}

/// Services annotated with an L4Rule
pub(crate) fn l4_rule_targets(inputs: &Inputs, rule: &NamespacedName) -> BTreeSet<BuildTarget> {
    inputs
        .services
        .iter()
        .filter(|(key, svc)| {
            key.namespace == rule.namespace
                && svc.annotations().get(annotations::L4_RULE).map(String::as_str) == Some(rule.name.as_str())
        })
        .filter_map(|(_, svc)| target_of(inputs, svc))
        .collect()
}

/// Services annotated with an AviInfraSetting
pub(crate) fn infra_targets(inputs: &Inputs, infra_name: &str) -> BTreeSet<BuildTarget> {
    inputs
        .services
        .values()
        .filter(|svc| svc.annotations().get(annotations::INFRA_SETTING).map(String::as_str) == Some(infra_name))
        .filter_map(|svc| target_of(inputs, svc))
        .collect()
}

/// Services making up a target, in name order
fn members<'a>(inputs: &'a Inputs, target: &BuildTarget) -> Vec<(&'a NamespacedName, &'a Service)> {
    inputs
        .services
        .iter()
        .filter(|(_, svc)| target_of(inputs, svc).as_ref() == Some(target))
        .collect()
}

fn ports(service: &Service) -> Vec<(u16, String)> {
    service
        .spec
        .iter()
        .flat_map(|s| s.ports.iter().flatten())
        .filter_map(|p| {
            let port = u16::try_from(p.port).ok()?;
            Some((port, p.protocol.clone().unwrap_or_else(|| "TCP".to_string())))
        })
        .collect()
}

pub(crate) fn build(settings: &Settings, inputs: &Inputs, target: &BuildTarget, key: ModelKey) -> BuildOutput {
    let mut out = BuildOutput::default();
    let infra_name = match target {
        BuildTarget::L4 { infra, namespace, name } => {
            out.contribute(InputKind::Service, &NamespacedName::new(namespace.clone(), name.clone()));
            infra.clone()
        }
        BuildTarget::SharedVip { infra, .. } => infra.clone(),
        _ => return out,
    };
    if let Some(name) = &infra_name {
        out.contribute(InputKind::InfraSetting, &NamespacedName::new("", name.clone()));
    }

    let services = members(inputs, target);
    if services.is_empty() {
        return out;
    }

    let namer = Namer::new(&settings.cluster_name, infra_name.as_deref());
    let placement = infra::placement(settings, inputs, infra_name.as_deref());
    let mut vs = VirtualServiceNode::new(key.name.clone());
    vs.se_group = placement.se_group.clone();
    let mut vsvip = VsVipNode::new(key.name.clone());
    vsvip.vip_networks = placement.vip_networks.clone();
    vsvip.enable_rhi = placement.enable_rhi;

    let mut policy = L4PolicySetNode {
        name: l4_policy_name(&key.name),
        rules: Vec::new(),
    };

    for (svc_key, service) in &services {
        out.contribute(InputKind::Service, svc_key);
        out.contribute(InputKind::Endpoints, svc_key);
        vs.metadata.services.insert((*svc_key).clone());

        if let Some(ip) = service
            .spec
            .as_ref()
            .and_then(|s| s.load_balancer_ip.as_ref())
            .filter(|ip| !ip.is_empty())
        {
            vsvip.static_ip = Some(ip.clone());
        }

        let mut service_pools: Vec<(usize, u16, String)> = Vec::new();
        for port in service.spec.iter().flat_map(|s| s.ports.iter().flatten()) {
            let Ok(number) = u16::try_from(port.port) else { continue };
            let protocol = port.protocol.clone().unwrap_or_else(|| "TCP".to_string());
            let listener = PortProtocol {
                port: number,
                protocol: protocol.clone(),
                enable_ssl: false,
                enable_http2: false,
            };
            if !vs.listeners.contains(&listener) {
                vs.listeners.push(listener);
            }

            let backend = servers::resolve_port(settings, inputs, svc_key, service, port);
            let mut pool = PoolNode::new(namer.l4_pool(&svc_key.namespace, &svc_key.name, &protocol, number), backend.port);
            pool.protocol = protocol.clone();
            pool.placement_networks = servers::placement(settings, &backend.servers);
            pool.servers = backend.servers;
            policy.rules.push(L4PolicyRule {
                port: number,
                protocol: protocol.clone(),
                pool: pool.name.clone(),
            });
            service_pools.push((vs.pools.len(), number, protocol));
            vs.pools.push(pool);
        }

        if let Some(rule_name) = service.annotations().get(annotations::L4_RULE) {
            let rule_key = NamespacedName::new(svc_key.namespace.clone(), rule_name.clone());
            out.contribute(InputKind::L4Rule, &rule_key);
            let rule_ref = RuleRef::new(RuleKind::L4Rule, &rule_key.namespace, &rule_key.name);
            if let Some(rule) = inputs.l4_rules.get(&rule_key) {
                if inputs.rule_usable(&rule_ref) {
                    match check_listeners(rule, svc_key, service) {
                        Ok(()) => apply(&mut vs, &mut vsvip, &service_pools, rule, &rule_ref),
                        Err(message) => out.reject(rule_ref, message),
                    }
                }
            }
        }
    }

    if policy.rules.len() > 1 {
        vs.l4_policies.push(policy);
    } else if let Some(pool) = vs.pools.first() {
        vs.default_pool = Some(pool.name.clone());
    }
    vs.vsvip = Some(vsvip);
    out.graph = Some(Graph::new(key, GraphNode::VirtualService(Box::new(vs))));
    out
}

/// Every listener of the rule must be a port of the service
fn check_listeners(rule: &L4Rule, key: &NamespacedName, service: &Service) -> Result<(), String> {
    let declared = ports(service);
    for listener in &rule.spec.listener_properties {
        let known = declared
            .iter()
            .any(|(port, proto)| *port == listener.port && proto.eq_ignore_ascii_case(&listener.protocol));
        if !known {
            return Err(format!(
                "listener port {}/{} is not a port of service {}",
                listener.port, listener.protocol, key
            ));
        }
    }
    Ok(())
}

/// `pools` holds (pool index, service port, protocol) for this service's pools
fn apply(
    vs: &mut VirtualServiceNode,
    vsvip: &mut VsVipNode,
    pools: &[(usize, u16, String)],
    rule: &L4Rule,
    rule_ref: &RuleRef,
) {
    let spec = &rule.spec;
    if spec.application_profile.is_some() {
        vs.application_profile = spec.application_profile.clone();
    }
    if spec.network_profile.is_some() {
        vs.network_profile = spec.network_profile.clone();
    }
    if spec.analytics_profile.is_some() {
        vs.analytics_profile = spec.analytics_profile.clone();
    }
    if spec.enabled.is_some() {
        vs.enabled = spec.enabled;
    }
    vs.datascripts.extend(spec.vs_datascript_refs.iter().cloned());
    if let Some(ip) = spec.load_balancer_ip.as_ref().filter(|ip| !ip.is_empty()) {
        vsvip.static_ip = Some(ip.clone());
    }
    for listener in &spec.listener_properties {
        for l in vs.listeners.iter_mut() {
            if l.port == listener.port && l.protocol.eq_ignore_ascii_case(&listener.protocol) {
                l.enable_ssl = listener.enable_ssl;
            }
        }
    }
    vs.ssl_key_cert_refs.extend(spec.ssl_key_certificate_refs.iter().cloned());
    if spec.ssl_profile_ref.is_some() {
        vs.ssl_profile = spec.ssl_profile_ref.clone();
    }

    for (index, port, protocol) in pools {
        let backend = spec
            .backend_properties
            .iter()
            .find(|b| b.port == *port && b.protocol.eq_ignore_ascii_case(protocol));
        let (Some(backend), Some(pool)) = (backend, vs.pools.get_mut(*index)) else {
            continue;
        };
        pool.enabled = backend.enabled;
        pool.lb_algorithm = backend.lb_algorithm.clone();
        pool.lb_algorithm_hash = backend.lb_algorithm_hash.clone();
        pool.lb_consistent_hash_header = backend.lb_algorithm_consistent_hash_hdr.clone();
        pool.health_monitors = backend.health_monitor_refs.iter().map(|m| monitor_by_name(m)).collect();
        pool.persistence_profile = backend.application_persistence_profile_ref.clone();
        pool.rules.insert(rule_ref.clone());
    }
    vs.rules.insert(rule_ref.clone());
}
