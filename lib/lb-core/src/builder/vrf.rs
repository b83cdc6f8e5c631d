//! Static routes to pod CIDRs through each node

use super::{BuildOutput, BuildTarget};
use crate::config::{ServiceType, Settings};
use crate::event::{InputKind, NamespacedName};
use crate::model::{Graph, GraphNode, ModelKey, StaticRoute, VrfNode};
use crate::objects::Inputs;
use ipnetwork::IpNetwork;
use tracing::warn;

/// Pods are only routed to directly in ClusterIP mode
pub(crate) fn target(settings: &Settings) -> Option<BuildTarget> {
    (settings.service_type == ServiceType::ClusterIP).then(|| BuildTarget::Vrf {
        name: settings.vrf_name.clone(),
    })
}

pub(crate) fn build(settings: &Settings, inputs: &Inputs, key: ModelKey) -> BuildOutput {
    let mut out = BuildOutput::default();
    if target(settings).is_none() {
        return out;
    }

    let mut vrf = VrfNode::new(key.name.clone());
    for node in inputs.nodes.values() {
        out.contribute(InputKind::Node, &NamespacedName::new("", node.name.clone()));
        let Some(next_hop) = node.internal_ip.as_ref() else {
            warn!("Node {} has no InternalIP, skipping its routes", node.name);
            continue;
        };

        let mut cidrs: Vec<IpNetwork> = node
            .pod_cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNetwork>() {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!("Node {} has invalid pod CIDR {}: {}", node.name, cidr, e);
                    None
                }
            })
            .collect();
        cidrs.sort();
        cidrs.dedup();

        for (i, cidr) in cidrs.iter().enumerate() {
            vrf.static_routes.push(StaticRoute {
                route_id: format!("{}-{}", node.name, i),
                prefix: cidr.network().to_string(),
                mask: cidr.prefix(),
                next_hop: next_hop.clone(),
            });
        }
    }

    out.graph = Some(Graph::new(key, GraphNode::Vrf(vrf)));
    out
}
