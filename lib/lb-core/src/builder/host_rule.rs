//! HostRule lookup and the VS-level overrides it carries

use crate::event::NamespacedName;
use crate::model::{AnalyticsSettings, PortProtocol, RuleKind, RuleRef, VirtualServiceNode};
use crate::objects::Inputs;
use lb_api::v1beta1::host_rule::{FqdnType, VirtualHost};

/// An accepted HostRule selected for a host
#[derive(Clone, Debug)]
pub(crate) struct Selected<'a> {
    pub rule: RuleRef,
    pub spec: &'a VirtualHost,
}

impl Selected<'_> {
    pub fn aliases(&self) -> &[String] {
        if self.spec.fqdn_type == FqdnType::Exact {
            &self.spec.aliases
        } else {
            &[]
        }
    }

    pub fn app_root(&self) -> Option<&str> {
        self.spec
            .application_root_path
            .as_deref()
            .filter(|p| !p.is_empty() && *p != "/")
    }

    /// Certificate named by the rule, replacing the ingress secret
    pub fn certificate_ref(&self) -> Option<&str> {
        self.spec
            .tls
            .as_ref()
            .map(|tls| tls.ssl_key_certificate.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

fn wildcard_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => host.len() > suffix.len() && host.ends_with(suffix),
        None => false,
    }
}

fn usable<'a>(inputs: &'a Inputs) -> impl Iterator<Item = Selected<'a>> + 'a {
    inputs.host_rules.iter().filter_map(move |(key, rule)| {
        let rule_ref = RuleRef::new(RuleKind::HostRule, &key.namespace, &key.name);
        inputs.rule_usable(&rule_ref).then_some(Selected {
            rule: rule_ref,
            spec: &rule.spec.virtual_host,
        })
    })
}

/// Exact match first, then the first wildcard in name order
pub(crate) fn for_host<'a>(inputs: &'a Inputs, host: &str) -> Option<Selected<'a>> {
    let mut wildcard = None;
    for selected in usable(inputs) {
        match selected.spec.fqdn_type {
            FqdnType::Exact if selected.spec.fqdn.eq_ignore_ascii_case(host) => return Some(selected),
            FqdnType::Wildcard if wildcard.is_none() && wildcard_matches(&selected.spec.fqdn, host) => {
                wildcard = Some(selected)
            }
            _ => {}
        }
    }
    wildcard
}

/// Contains rules whose FQDN appears in a shared VS name
pub(crate) fn for_shared_vs<'a>(inputs: &'a Inputs, vs_name: &str) -> Vec<Selected<'a>> {
    usable(inputs)
        .filter(|s| s.spec.fqdn_type == FqdnType::Contains && !s.spec.fqdn.is_empty() && vs_name.contains(&s.spec.fqdn))
        .collect()
}

/// Keys of every HostRule that could govern a host, accepted or not
pub(crate) fn candidates(inputs: &Inputs, host: &str) -> Vec<NamespacedName> {
    inputs
        .host_rules
        .iter()
        .filter(|(_, rule)| {
            let vh = &rule.spec.virtual_host;
            vh.fqdn.eq_ignore_ascii_case(host) || wildcard_matches(&vh.fqdn, host)
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Profile, policy and certificate overrides of the VS owning the FQDN.
/// Listener and VIP overrides are only honoured where `owns_vip` is set.
pub(crate) fn apply(vs: &mut VirtualServiceNode, selected: &Selected<'_>, owns_vip: bool) {
    let spec = selected.spec;
    vs.enabled = spec.enable_virtual_host;
    vs.application_profile = spec.application_profile.clone();
    vs.network_profile = spec.network_profile.clone();
    vs.analytics_profile = spec.analytics_profile.clone();
    vs.waf_policy = spec.waf_policy.clone();
    vs.error_page_profile = spec.error_page_profile.clone();
    vs.datascripts = spec.datascripts.clone();

    if let Some(policy) = &spec.http_policy {
        if policy.overwrite {
            vs.http_policies.clear();
        }
        vs.http_policy_refs = policy.policy_sets.clone();
    }

    if let Some(tls) = &spec.tls {
        vs.ssl_profile = tls.ssl_profile.clone();
        if let Some(name) = selected.certificate_ref() {
            vs.ssl_key_certs.clear();
            vs.ssl_key_cert_refs = vec![name.to_string()];
        }
    }

    if let Some(analytics) = &spec.analytics_policy {
        let logs = analytics.full_client_logs.as_ref();
        vs.analytics_policy = Some(AnalyticsSettings {
            full_client_logs: logs.map(|l| l.enabled).unwrap_or(false),
            throttle: logs.filter(|l| l.enabled).map(|l| l.throttle.clone()),
            log_all_headers: analytics.log_all_headers,
        });
    }

    if owns_vip {
        if let Some(tcp) = &spec.tcp_settings {
            if !tcp.listeners.is_empty() {
                vs.listeners = tcp
                    .listeners
                    .iter()
                    .map(|l| PortProtocol::tcp(l.port, l.enable_ssl))
                    .collect();
            }
            if let (Some(ip), Some(vip)) = (tcp.load_balancer_ip.as_ref(), vs.vsvip.as_mut()) {
                vip.static_ip = Some(ip.clone());
            }
        }
    }

    vs.rules.insert(selected.rule.clone());
}
