//! Pool server derivation from endpoints or node ports

use super::ingress::PortSelector;
use super::BuildOutput;
use crate::config::{ServiceType, Settings};
use crate::event::{InputKind, NamespacedName};
use crate::model::Server;
use crate::objects::Inputs;
use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use lb_api::annotations;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Addressing {
    /// Pod IPs and target ports
    Endpoints,
    /// Node IPs and the node port
    NodePort { local_only: bool },
}

pub(crate) fn addressing(settings: &Settings, service: &Service) -> Addressing {
    if annotations::is_enabled(Some(service.annotations()), annotations::SKIP_NODE_PORT) {
        return Addressing::Endpoints;
    }
    match settings.service_type {
        ServiceType::ClusterIP => Addressing::Endpoints,
        ServiceType::NodePort => Addressing::NodePort {
            local_only: service
                .spec
                .as_ref()
                .and_then(|s| s.external_traffic_policy.as_deref())
                == Some("Local"),
        },
    }
}

/// Servers and pool port for one service port
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Backend {
    pub port: u16,
    pub servers: Vec<Server>,
}

pub(crate) fn service_port<'a>(service: &'a Service, selector: &PortSelector) -> Option<&'a ServicePort> {
    service
        .spec
        .as_ref()?
        .ports
        .iter()
        .flatten()
        .find(|p| match selector {
            PortSelector::Number(n) => p.port == i32::from(*n),
            PortSelector::Name(name) => p.name.as_deref() == Some(name.as_str()),
        })
}

/// Resolve the servers behind a service port; a missing service yields an
/// empty pool rather than no pool
pub(crate) fn resolve(
    settings: &Settings,
    inputs: &Inputs,
    out: &mut BuildOutput,
    key: &NamespacedName,
    selector: &PortSelector,
) -> Backend {
    out.contribute(InputKind::Service, key);
    out.contribute(InputKind::Endpoints, key);

    let fallback_port = match selector {
        PortSelector::Number(n) => *n,
        PortSelector::Name(_) => 0,
    };
    let Some(service) = inputs.services.get(key) else {
        return Backend {
            port: fallback_port,
            servers: Vec::new(),
        };
    };
    let Some(port) = service_port(service, selector) else {
        return Backend {
            port: fallback_port,
            servers: Vec::new(),
        };
    };
    resolve_port(settings, inputs, key, service, port)
}

pub(crate) fn resolve_port(
    settings: &Settings,
    inputs: &Inputs,
    key: &NamespacedName,
    service: &Service,
    port: &ServicePort,
) -> Backend {
    let endpoints = inputs.endpoints_for(key).unwrap_or_default();
    let service_port = u16::try_from(port.port).unwrap_or_default();

    match addressing(settings, service) {
        Addressing::Endpoints => {
            let target = match &port.target_port {
                Some(IntOrString::Int(p)) => u16::try_from(*p).ok(),
                Some(IntOrString::String(_)) => None,
                None => Some(service_port),
            };
            let backends = endpoints.ready_backends(port.name.as_deref(), target);
            let pool_port = backends
                .first()
                .map(|(_, p, _)| *p)
                .or(target)
                .unwrap_or(service_port);
            let servers = backends
                .into_iter()
                .map(|(ip, p, node)| Server {
                    ip,
                    port: Some(p),
                    node,
                })
                .collect();
            Backend {
                port: pool_port,
                servers,
            }
        }
        Addressing::NodePort { local_only } => {
            let Some(node_port) = port.node_port.and_then(|p| u16::try_from(p).ok()) else {
                return Backend {
                    port: service_port,
                    servers: Vec::new(),
                };
            };
            let ready_nodes = endpoints.ready_nodes();
            let servers = inputs
                .nodes
                .values()
                .filter(|node| !local_only || ready_nodes.contains(&node.name))
                .filter_map(|node| {
                    node.internal_ip.as_ref().map(|ip| Server {
                        ip: ip.clone(),
                        port: None,
                        node: Some(node.name.clone()),
                    })
                })
                .collect();
            Backend {
                port: node_port,
                servers,
            }
        }
    }
}

/// Node networks whose CIDRs contain at least one server
pub(crate) fn placement(settings: &Settings, servers: &[Server]) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let ips: Vec<IpAddr> = servers.iter().filter_map(|s| s.ip.parse().ok()).collect();
    for network in &settings.node_network_list {
        for cidr in &network.cidrs {
            let parsed: IpNetwork = match cidr.parse() {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping node network {} cidr {}: {}", network.network_name, cidr, e);
                    continue;
                }
            };
            if ips.iter().any(|ip| parsed.contains(*ip)) {
                out.entry(network.network_name.clone())
                    .or_default()
                    .insert(cidr.clone());
            }
        }
    }
    out
}
