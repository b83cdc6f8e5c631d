//! AviInfraSetting resolution: shard scheme, VIP networks and SE group

use super::BuildTarget;
use crate::config::{Settings, ShardSize};
use crate::model::{RuleKind, RuleRef};
use crate::naming::shard_index;
use crate::objects::Inputs;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use lb_api::annotations;
use lb_api::AviInfraSetting;

/// How hosts of one ingress map onto virtual services
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Scheme {
    pub infra: Option<String>,
    pub shard_size: ShardSize,
}

impl Scheme {
    pub fn target_for(&self, host: &str) -> BuildTarget {
        if self.shard_size.is_dedicated() {
            BuildTarget::DedicatedL7 {
                infra: self.infra.clone(),
                host: host.to_string(),
            }
        } else {
            BuildTarget::SharedL7 {
                infra: self.infra.clone(),
                shard: shard_index(host, self.shard_size.vs_count()),
            }
        }
    }
}

fn usable<'a>(inputs: &'a Inputs, name: &str) -> Option<&'a AviInfraSetting> {
    let setting = inputs.infra_settings.get(name)?;
    inputs
        .rule_usable(&RuleRef::new(RuleKind::InfraSetting, "", name))
        .then_some(setting)
}

/// Name of the accepted AviInfraSetting bound to an ingress, if any
pub(crate) fn ingress_infra_name(inputs: &Inputs, ingress: &Ingress) -> Option<String> {
    let setting = inputs.ingress_infra_setting(ingress)?;
    let name = setting.name_any();
    usable(inputs, &name).map(|_| name)
}

pub(crate) fn ingress_scheme(settings: &Settings, inputs: &Inputs, ingress: &Ingress) -> Scheme {
    let infra = ingress_infra_name(inputs, ingress);
    let shard_size = infra
        .as_deref()
        .and_then(|name| inputs.infra_settings.get(name))
        .and_then(|s| s.spec.l7_settings.as_ref())
        .and_then(|l7| l7.shard_size.parse().ok())
        .unwrap_or(settings.shard_size);
    Scheme { infra, shard_size }
}

/// AviInfraSetting named by a Service annotation, if accepted
pub(crate) fn service_infra_name(inputs: &Inputs, service: &k8s_openapi::api::core::v1::Service) -> Option<String> {
    let name = service.annotations().get(annotations::INFRA_SETTING)?;
    usable(inputs, name).map(|_| name.clone())
}

/// Placement of a virtual service's VIP and SE group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Placement {
    pub vip_networks: Vec<String>,
    pub enable_rhi: Option<bool>,
    pub se_group: Option<String>,
}

pub(crate) fn placement(settings: &Settings, inputs: &Inputs, infra: Option<&str>) -> Placement {
    let mut placement = Placement {
        vip_networks: settings.vip_network_list.clone(),
        enable_rhi: None,
        se_group: settings.se_group.clone(),
    };
    let Some(setting) = infra.and_then(|name| usable(inputs, name)) else {
        return placement;
    };
    if let Some(network) = &setting.spec.network {
        if !network.vip_networks.is_empty() {
            placement.vip_networks = network
                .vip_networks
                .iter()
                .map(|n| n.network_name.clone())
                .collect();
        }
        placement.enable_rhi = network.enable_rhi;
    }
    if let Some(se_group) = &setting.spec.se_group {
        placement.se_group = Some(se_group.name.clone());
    }
    placement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::fixtures::*;
    use std::sync::Arc;

    #[test]
    fn test_infra_setting_selects_dedicated_scheme() {
        let settings = Arc::new(settings());
        let mut inputs = Inputs::new(settings.clone());
        add_infra_setting(&mut inputs, "infra1", Some("DEDICATED"), &["vip-net"]);
        add_ingress_class(&mut inputs, "dedicated-class", Some("infra1"));
        let ingress = add_ingress(&mut inputs, "default", "ing", "foo.com", &[("/", "svc", 80)], Some("dedicated-class"));
        inputs.revalidate();

        let scheme = ingress_scheme(&settings, &inputs, &ingress);
        assert_eq!(scheme.infra.as_deref(), Some("infra1"));
        assert_eq!(
            scheme.target_for("foo.com"),
            BuildTarget::DedicatedL7 { infra: Some("infra1".to_string()), host: "foo.com".to_string() }
        );

        let placement = placement(&settings, &inputs, Some("infra1"));
        assert_eq!(placement.vip_networks, vec!["vip-net".to_string()]);
    }

    #[test]
    fn test_rejected_infra_setting_falls_back_to_global() {
        let settings = Arc::new(settings());
        let mut inputs = Inputs::new(settings.clone());
        add_infra_setting(&mut inputs, "infra1", Some("HUGE"), &[]);
        add_ingress_class(&mut inputs, "cls", Some("infra1"));
        let ingress = add_ingress(&mut inputs, "default", "ing", "foo.com", &[("/", "svc", 80)], Some("cls"));
        inputs.revalidate();

        let scheme = ingress_scheme(&settings, &inputs, &ingress);
        assert_eq!(scheme.infra, None);
        assert_eq!(scheme.shard_size, ShardSize::Medium);
    }
}
