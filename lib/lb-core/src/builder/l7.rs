//! Ingress translation into shared or dedicated L7 virtual services

use super::host_rule::{self, Selected};
use super::infra::{self, Placement};
use super::ingress::{self, Route};
use super::{http_rule, servers, BuildOutput, BuildTarget};
use crate::config::{Settings, SniNaming};
use crate::event::{InputKind, NamespacedName};
use crate::model::{
    Graph, GraphNode, HppMap, HttpPolicySetNode, MatchCase, MatchCriteria, ModelKey, PoolGroupMember,
    PoolGroupNode, PoolNode, PortProtocol, RedirectRule, ServiceMetadata, SslKeyCertNode, StringGroupNode,
    VirtualServiceNode, VsVipNode,
};
use crate::naming::{http_policy_name, redirect_policy_name, rule_name, NameOrder, Namer};
use crate::objects::Inputs;
use k8s_openapi::api::networking::v1::Ingress;
use lb_api::v1beta1::host_rule::FqdnType;
use lb_api::HostRule;
use std::collections::{BTreeMap, BTreeSet};

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;
const REDIRECT_STATUS: u16 = 302;

/// Targets the hosts of one ingress map to
pub(crate) fn ingress_targets(settings: &Settings, inputs: &Inputs, ingress: &Ingress) -> BTreeSet<BuildTarget> {
    if !inputs.is_handled_ingress(ingress) {
        return BTreeSet::new();
    }
    let scheme = infra::ingress_scheme(settings, inputs, ingress);
    ingress::hosts(settings, ingress)
        .iter()
        .map(|host| scheme.target_for(host))
        .collect()
}

/// Targets currently serving a host
pub(crate) fn host_targets(settings: &Settings, inputs: &Inputs, host: &str) -> BTreeSet<BuildTarget> {
    let host = host.to_ascii_lowercase();
    inputs
        .ingresses
        .values()
        .filter(|ing| inputs.is_handled_ingress(ing))
        .filter(|ing| ingress::hosts(settings, ing).contains(&host))
        .map(|ing| infra::ingress_scheme(settings, inputs, ing).target_for(&host))
        .collect()
}

/// Targets a HostRule may govern given its FQDN type
pub(crate) fn host_rule_targets(settings: &Settings, inputs: &Inputs, rule: &HostRule) -> BTreeSet<BuildTarget> {
    let vh = &rule.spec.virtual_host;
    match vh.fqdn_type {
        FqdnType::Exact => host_targets(settings, inputs, &vh.fqdn),
        FqdnType::Wildcard => {
            let suffix = vh.fqdn.trim_start_matches('*').to_ascii_lowercase();
            let mut targets = BTreeSet::new();
            for ing in inputs.ingresses.values().filter(|i| inputs.is_handled_ingress(i)) {
                let scheme = infra::ingress_scheme(settings, inputs, ing);
                for host in ingress::hosts(settings, ing) {
                    if host.ends_with(&suffix) {
                        targets.insert(scheme.target_for(&host));
                    }
                }
            }
            targets
        }
        FqdnType::Contains => inputs
            .ingresses
            .values()
            .flat_map(|ing| ingress_targets(settings, inputs, ing))
            .filter(|t| matches!(t, BuildTarget::SharedL7 { .. }))
            .filter(|t| t.model_key(settings).name.contains(&vh.fqdn))
            .collect(),
    }
}

/// Everything routed to one host on this target
struct HostPlan<'a> {
    host: String,
    routes: Vec<Route>,
    /// (ingress, secret) from the first ingress declaring TLS for the host
    tls: Option<(NamespacedName, String)>,
    rule: Option<Selected<'a>>,
}

impl HostPlan<'_> {
    /// The host followed by its aliases
    fn hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.host.clone()];
        if let Some(rule) = &self.rule {
            for alias in rule.aliases() {
                if !hosts.contains(alias) {
                    hosts.push(alias.clone());
                }
            }
        }
        hosts
    }

    fn use_regex(&self) -> bool {
        self.rule.as_ref().map(|r| r.spec.use_regex).unwrap_or(false)
    }

    fn app_root(&self) -> Option<&str> {
        self.rule.as_ref().and_then(|r| r.app_root())
    }
}

struct L7Context<'a> {
    settings: &'a Settings,
    inputs: &'a Inputs,
    namer: Namer,
    placement: Placement,
    out: BuildOutput,
    metadata: ServiceMetadata,
}

pub(crate) fn build(settings: &Settings, inputs: &Inputs, target: &BuildTarget, key: ModelKey) -> BuildOutput {
    let infra_name = match target {
        BuildTarget::SharedL7 { infra, .. } | BuildTarget::DedicatedL7 { infra, .. } => infra.clone(),
        _ => return BuildOutput::default(),
    };
    let mut ctx = L7Context {
        settings,
        inputs,
        namer: Namer::new(&settings.cluster_name, infra_name.as_deref())
            .with_evh(settings.enable_evh && matches!(target, BuildTarget::SharedL7 { .. })),
        placement: infra::placement(settings, inputs, infra_name.as_deref()),
        out: BuildOutput::default(),
        metadata: ServiceMetadata::default(),
    };
    if let Some(name) = &infra_name {
        ctx.out.contribute(InputKind::InfraSetting, &NamespacedName::new("", name.clone()));
    }

    let plans = ctx.collect(target);
    if plans.is_empty() {
        return ctx.out;
    }

    let mut vs = match target {
        BuildTarget::DedicatedL7 { .. } => ctx.dedicated(&key.name, &plans),
        _ if settings.enable_evh => ctx.enhanced(&key.name, &plans),
        _ => ctx.shared(&key.name, &plans),
    };
    vs.metadata = std::mem::take(&mut ctx.metadata);

    let mut out = ctx.out;
    out.graph = Some(Graph::new(key, GraphNode::VirtualService(Box::new(vs))));
    out
}

impl<'a> L7Context<'a> {
    /// Group the routes mapping to `target` by host
    fn collect(&mut self, target: &BuildTarget) -> Vec<HostPlan<'a>> {
        let inputs = self.inputs;
        let mut plans: BTreeMap<String, HostPlan<'a>> = BTreeMap::new();
        for (key, ing) in &inputs.ingresses {
            if !inputs.is_handled_ingress(ing) {
                continue;
            }
            let scheme = infra::ingress_scheme(self.settings, inputs, ing);
            let routes: Vec<Route> = ingress::routes(self.settings, ing)
                .into_iter()
                .filter(|r| scheme.target_for(&r.host) == *target)
                .collect();
            if routes.is_empty() {
                continue;
            }
            self.out.contribute(InputKind::Ingress, key);
            if let Some(class) = ing.spec.as_ref().and_then(|s| s.ingress_class_name.as_ref()) {
                self.out.contribute(InputKind::IngressClass, &NamespacedName::new("", class.clone()));
            }
            for route in routes {
                let plan = plans.entry(route.host.clone()).or_insert_with(|| HostPlan {
                    host: route.host.clone(),
                    routes: Vec::new(),
                    tls: None,
                    rule: None,
                });
                if plan.tls.is_none() {
                    if let Some(secret) = ingress::tls_secret(ing, &route.host) {
                        self.out
                            .contribute(InputKind::Secret, &NamespacedName::new(key.namespace.clone(), secret.clone()));
                        plan.tls = Some((key.clone(), secret));
                    }
                }
                plan.routes.push(route);
            }
        }

        for plan in plans.values_mut() {
            for candidate in host_rule::candidates(inputs, &plan.host) {
                self.out.contribute(InputKind::HostRule, &candidate);
            }
            plan.rule = host_rule::for_host(inputs, &plan.host);
        }
        plans.into_values().collect()
    }

    /// Certificate for a TLS host, or None when the host has to stay insecure
    fn certificate(&self, plan: &HostPlan<'_>) -> Option<Certificate> {
        if let Some(name) = plan.rule.as_ref().and_then(|r| r.certificate_ref()) {
            return Some(Certificate::Reference(name.to_string()));
        }
        let (ingress, secret) = plan.tls.as_ref()?;
        let key = NamespacedName::new(ingress.namespace.clone(), secret.clone());
        let tls = self.inputs.secrets.get(&key)?;
        Some(Certificate::Secret(SslKeyCertNode {
            name: self.namer.ssl_key_cert(&ingress.namespace, secret),
            certificate: tls.certificate.clone(),
            key: tls.key.clone(),
            ca_certificate: tls.ca_certificate.clone(),
        }))
    }

    fn vsvip(&self, name: &str, fqdns: Vec<String>) -> VsVipNode {
        VsVipNode {
            name: name.to_string(),
            fqdns,
            static_ip: None,
            vip_networks: self.placement.vip_networks.clone(),
            enable_rhi: self.placement.enable_rhi,
            vrf: None,
        }
    }

    /// Pools, pool groups and match rules for one host
    fn add_routes(
        &mut self,
        vs: &mut VirtualServiceNode,
        policy: &mut HttpPolicySetNode,
        redirects: &mut HttpPolicySetNode,
        plan: &HostPlan<'_>,
    ) {
        let hosts = plan.hosts();
        let regex = plan.use_regex();
        let app_root = plan.app_root();
        let first_pool = vs.pools.len();

        for route in &plan.routes {
            let ns = route.ingress.namespace.as_str();
            let ing = route.ingress.name.as_str();
            let (pg_name, pool_name) = if regex {
                (
                    self.namer.regex_pool_group(ns, &plan.host, &route.path, ing),
                    self.namer.regex_pool(ns, &plan.host, &route.path, ing, &route.service),
                )
            } else {
                (
                    self.namer.pool_group(ns, &plan.host, &route.path, ing),
                    self.namer.pool(ns, &plan.host, &route.path, ing, &route.service),
                )
            };

            if vs.pool(&pool_name).is_none() {
                let backend = servers::resolve(self.settings, self.inputs, &mut self.out, &route.service_key(), &route.port);
                let mut pool = PoolNode::new(pool_name.clone(), backend.port);
                pool.placement_networks = servers::placement(self.settings, &backend.servers);
                pool.servers = backend.servers;
                pool.host = Some(plan.host.clone());
                pool.path = Some(route.path.clone());
                vs.pools.push(pool);
            }
            if !vs.pool_groups.iter().any(|pg| pg.name == pg_name) {
                let mut pg = PoolGroupNode::new(pg_name.clone());
                pg.members.push(PoolGroupMember::new(pool_name));
                vs.pool_groups.push(pg);
            }

            let effective = match app_root {
                Some(root) if route.path == "/" => root.to_string(),
                _ => route.path.clone(),
            };
            let name = rule_name(&hosts, &format!("{}-{}-{}", route.path, ns, ing), NameOrder::Canonical);
            if policy.hpp_map.iter().any(|m| m.name == name) {
                continue;
            }
            let mut rule = HppMap {
                name,
                hosts: hosts.clone(),
                pool_group: pg_name,
                ingress_path: route.path.clone(),
                ..Default::default()
            };
            if regex {
                let group = StringGroupNode {
                    name: self.namer.string_group(&hosts, &effective),
                    entries: vec![effective],
                    longest_match: true,
                };
                rule.match_criteria = MatchCriteria::RegexMatch;
                rule.match_case = MatchCase::Insensitive;
                rule.string_group_refs = vec![group.name.clone()];
                if !vs.string_groups.iter().any(|g| g.name == group.name) {
                    vs.string_groups.push(group);
                }
            } else {
                rule.match_criteria = if route.exact {
                    MatchCriteria::Equals
                } else {
                    MatchCriteria::BeginsWith
                };
                rule.paths = vec![effective];
            }
            policy.hpp_map.push(rule);

            self.metadata
                .ingress_hosts
                .entry(route.ingress.clone())
                .or_default()
                .insert(plan.host.clone());
        }

        if let Some(root) = app_root {
            redirects.redirect_ports.extend(app_root_redirects(&hosts, root));
        }

        http_rule::apply(self.inputs, &mut self.out, &plan.host, &mut vs.pools[first_pool..]);
    }

    fn dedicated(&mut self, name: &str, plans: &[HostPlan<'a>]) -> VirtualServiceNode {
        let mut vs = VirtualServiceNode::new(name);
        vs.se_group = self.placement.se_group.clone();
        let mut policy = HttpPolicySetNode::new(http_policy_name(name));
        let mut redirects = HttpPolicySetNode::new(redirect_policy_name(name));

        let mut fqdns = Vec::new();
        let mut secure_hosts = Vec::new();
        for plan in plans {
            let hosts = plan.hosts();
            fqdns.extend(hosts.iter().cloned());
            vs.vh_domain_names.extend(hosts.iter().cloned());
            self.add_routes(&mut vs, &mut policy, &mut redirects, plan);
            if let Some(cert) = self.certificate(plan) {
                cert.attach(&mut vs);
                secure_hosts.extend(hosts);
            }
        }

        vs.vsvip = Some(self.vsvip(name, fqdns));
        vs.listeners = vec![PortProtocol::tcp(HTTP_PORT, false)];
        if !secure_hosts.is_empty() {
            vs.listeners.push(PortProtocol::tcp(HTTPS_PORT, true));
            redirects.redirect_ports.push(https_redirect(secure_hosts));
        }
        finish_policies(&mut vs, policy, redirects);

        for plan in plans {
            if let Some(rule) = &plan.rule {
                host_rule::apply(&mut vs, rule, true);
            }
        }
        vs
    }

    fn shared(&mut self, name: &str, plans: &[HostPlan<'a>]) -> VirtualServiceNode {
        let mut parent = VirtualServiceNode::new(name);
        parent.se_group = self.placement.se_group.clone();
        let mut policy = HttpPolicySetNode::new(http_policy_name(name));
        let mut redirects = HttpPolicySetNode::new(redirect_policy_name(name));

        struct Child {
            vs: VirtualServiceNode,
            policy: HttpPolicySetNode,
            redirects: HttpPolicySetNode,
        }
        let mut children: BTreeMap<String, Child> = BTreeMap::new();
        let mut child_rules: Vec<(String, &Selected<'_>)> = Vec::new();
        let mut fqdns = Vec::new();
        let mut secure_hosts = Vec::new();

        for plan in plans {
            let hosts = plan.hosts();
            fqdns.extend(hosts.iter().cloned());
            let Some(cert) = self.certificate(plan) else {
                self.add_routes(&mut parent, &mut policy, &mut redirects, plan);
                if let Some(rule) = &plan.rule {
                    parent.rules.insert(rule.rule.clone());
                }
                continue;
            };

            let child_name = match (self.settings.sni_naming, &plan.tls) {
                (SniNaming::Secret, Some((ingress, secret))) => {
                    self.namer.sni_child_for_secret(&ingress.namespace, &ingress.name, secret)
                }
                _ => self.namer.sni_child_for_host(&plan.host),
            };
            let child = children.entry(child_name.clone()).or_insert_with(|| {
                let mut vs = VirtualServiceNode::new(child_name.clone());
                vs.parent = Some(name.to_string());
                vs.se_group = parent.se_group.clone();
                Child {
                    vs,
                    policy: HttpPolicySetNode::new(http_policy_name(&child_name)),
                    redirects: HttpPolicySetNode::new(redirect_policy_name(&child_name)),
                }
            });
            child.vs.vh_domain_names.extend(hosts.iter().cloned());
            self.add_routes(&mut child.vs, &mut child.policy, &mut child.redirects, plan);
            cert.attach(&mut child.vs);
            if let Some(rule) = &plan.rule {
                child_rules.push((child_name, rule));
            }
            secure_hosts.extend(hosts);
        }

        parent.vsvip = Some(self.vsvip(name, fqdns));
        parent.listeners = vec![PortProtocol::tcp(HTTP_PORT, false)];
        if !children.is_empty() {
            parent.listeners.push(PortProtocol::tcp(HTTPS_PORT, true));
        }
        if !secure_hosts.is_empty() {
            redirects.redirect_ports.push(https_redirect(secure_hosts));
        }
        finish_policies(&mut parent, policy, redirects);

        for (_, mut child) in children {
            finish_policies(&mut child.vs, child.policy, child.redirects);
            for (name, rule) in &child_rules {
                if *name == child.vs.name {
                    host_rule::apply(&mut child.vs, rule, false);
                }
            }
            parent.children.push(child.vs);
        }

        self.apply_shared_rules(&mut parent);
        parent
    }

    /// Enhanced shard: the parent holds the listeners and the VIP, every host
    /// is a child carrying its own routes, certificate and redirects
    fn enhanced(&mut self, name: &str, plans: &[HostPlan<'a>]) -> VirtualServiceNode {
        let mut parent = VirtualServiceNode::new(name);
        parent.se_group = self.placement.se_group.clone();
        parent.enhanced_vh = true;
        let mut fqdns = Vec::new();

        for plan in plans {
            let hosts = plan.hosts();
            fqdns.extend(hosts.iter().cloned());
            let child_name = self.namer.evh_child(&plan.host);
            let mut child = VirtualServiceNode::new(child_name.clone());
            child.parent = Some(name.to_string());
            child.se_group = parent.se_group.clone();
            child.enhanced_vh = true;
            child.vh_domain_names = hosts.clone();

            let mut policy = HttpPolicySetNode::new(http_policy_name(&child_name));
            let mut redirects = HttpPolicySetNode::new(redirect_policy_name(&child_name));
            self.add_routes(&mut child, &mut policy, &mut redirects, plan);
            if let Some(cert) = self.certificate(plan) {
                cert.attach(&mut child);
                redirects.redirect_ports.push(https_redirect(hosts));
            }
            finish_policies(&mut child, policy, redirects);
            if let Some(rule) = &plan.rule {
                host_rule::apply(&mut child, rule, false);
            }
            parent.children.push(child);
        }

        parent.vsvip = Some(self.vsvip(name, fqdns));
        parent.listeners = vec![PortProtocol::tcp(HTTP_PORT, false), PortProtocol::tcp(HTTPS_PORT, true)];
        self.apply_shared_rules(&mut parent);
        parent
    }

    /// HostRules selecting a shard parent by name
    fn apply_shared_rules(&mut self, parent: &mut VirtualServiceNode) {
        for rule in host_rule::for_shared_vs(self.inputs, &parent.name) {
            self.out.contribute(
                InputKind::HostRule,
                &NamespacedName::new(rule.rule.namespace.clone(), rule.rule.name.clone()),
            );
            host_rule::apply(parent, &rule, true);
        }
    }
}

enum Certificate {
    /// Created from a Kubernetes secret
    Secret(SslKeyCertNode),
    /// Pre-existing on the controller
    Reference(String),
}

impl Certificate {
    fn attach(self, vs: &mut VirtualServiceNode) {
        match self {
            Certificate::Secret(cert) => {
                if !vs.ssl_key_certs.iter().any(|c| c.name == cert.name) {
                    vs.ssl_key_certs.push(cert);
                }
            }
            Certificate::Reference(name) => {
                if !vs.ssl_key_cert_refs.contains(&name) {
                    vs.ssl_key_cert_refs.push(name);
                }
            }
        }
    }
}

fn finish_policies(vs: &mut VirtualServiceNode, policy: HttpPolicySetNode, redirects: HttpPolicySetNode) {
    if !redirects.is_empty() {
        vs.http_policies.push(redirects);
    }
    if !policy.is_empty() {
        vs.http_policies.push(policy);
    }
}

/// HTTP to HTTPS redirect for the TLS hosts of a virtual service
fn https_redirect(hosts: Vec<String>) -> RedirectRule {
    RedirectRule {
        name: rule_name(&hosts, "-https", NameOrder::Canonical),
        hosts,
        path: None,
        match_criteria_path: None,
        ports: vec![HTTP_PORT],
        match_criteria_port: "IS_IN".to_string(),
        protocol: "HTTPS".to_string(),
        redirect_port: HTTPS_PORT,
        redirect_path: None,
        status_code: REDIRECT_STATUS,
    }
}

/// Requests for exactly "/" go to the application root on either protocol
fn app_root_redirects(hosts: &[String], root: &str) -> [RedirectRule; 2] {
    let rule = |protocol: &str, port: u16| RedirectRule {
        name: rule_name(hosts, &format!("/-approot-{}", protocol.to_ascii_lowercase()), NameOrder::Canonical),
        hosts: hosts.to_vec(),
        path: Some("/".to_string()),
        match_criteria_path: Some(MatchCriteria::Equals),
        ports: vec![port],
        match_criteria_port: "IS_IN".to_string(),
        protocol: protocol.to_string(),
        redirect_port: port,
        redirect_path: Some(root.trim_start_matches('/').to_string()),
        status_code: REDIRECT_STATUS,
    };
    [rule("HTTP", HTTP_PORT), rule("HTTPS", HTTPS_PORT)]
}
