use super::{HttpPolicySetNode, Node, ObjectKind, PoolGroupNode, PoolNode, RuleRef};
use crate::checksum::ChecksumBuilder;
use crate::event::NamespacedName;
use std::collections::{BTreeMap, BTreeSet};

/// A listener port
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortProtocol {
    pub port: u16,
    /// TCP or UDP
    pub protocol: String,
    pub enable_ssl: bool,
    pub enable_http2: bool,
}

impl PortProtocol {
    pub fn tcp(port: u16, enable_ssl: bool) -> Self {
        Self {
            port,
            protocol: "TCP".to_string(),
            enable_ssl,
            enable_http2: false,
        }
    }

    fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.port, self.protocol, self.enable_ssl, self.enable_http2
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalyticsSettings {
    pub full_client_logs: bool,
    pub throttle: Option<String>,
    pub log_all_headers: Option<bool>,
}

/// Which inputs produced a virtual service; used for status, not synced
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceMetadata {
    /// Ingress to the hosts it contributed
    pub ingress_hosts: BTreeMap<NamespacedName, BTreeSet<String>>,
    /// LoadBalancer Services served by the VS
    pub services: BTreeSet<NamespacedName>,
}

/// Virtual service: a shared shard, a dedicated host, an L4 service or a TLS child
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualServiceNode {
    pub name: String,
    /// None means the controller default (enabled)
    pub enabled: Option<bool>,
    pub application_profile: Option<String>,
    pub network_profile: Option<String>,
    pub analytics_profile: Option<String>,
    pub waf_policy: Option<String>,
    pub error_page_profile: Option<String>,
    pub ssl_profile: Option<String>,
    pub analytics_policy: Option<AnalyticsSettings>,
    pub se_group: Option<String>,
    pub listeners: Vec<PortProtocol>,
    pub vsvip: Option<VsVipNode>,
    pub pools: Vec<PoolNode>,
    pub pool_groups: Vec<PoolGroupNode>,
    pub http_policies: Vec<HttpPolicySetNode>,
    /// Pre-existing policy sets attached by name
    pub http_policy_refs: Vec<String>,
    pub datascripts: Vec<String>,
    pub ssl_key_certs: Vec<SslKeyCertNode>,
    /// Pre-existing certificates attached by name
    pub ssl_key_cert_refs: Vec<String>,
    pub string_groups: Vec<StringGroupNode>,
    pub l4_policies: Vec<L4PolicySetNode>,
    pub children: Vec<VirtualServiceNode>,
    /// Set on TLS children, and on every child of an enhanced parent
    pub parent: Option<String>,
    pub vh_domain_names: Vec<String>,
    /// Enhanced virtual hosting; children are matched by host on any listener
    pub enhanced_vh: bool,
    pub default_pool: Option<String>,
    pub default_pool_group: Option<String>,
    pub rules: BTreeSet<RuleRef>,
    pub metadata: ServiceMetadata,
}

impl VirtualServiceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&VirtualServiceNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn pool(&self, name: &str) -> Option<&PoolNode> {
        self.pools.iter().find(|p| p.name == name)
    }

    pub fn listener_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.iter().map(|l| l.port).collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

impl Node for VirtualServiceNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::VirtualService
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        let analytics = self.analytics_policy.as_ref();
        ChecksumBuilder::new("virtualservice")
            .str("name", &self.name)
            .flag("enabled", self.enabled)
            .opt("application_profile", self.application_profile.as_deref())
            .opt("network_profile", self.network_profile.as_deref())
            .opt("analytics_profile", self.analytics_profile.as_deref())
            .opt("waf_policy", self.waf_policy.as_deref())
            .opt("error_page_profile", self.error_page_profile.as_deref())
            .opt("ssl_profile", self.ssl_profile.as_deref())
            .flag("full_client_logs", analytics.map(|a| a.full_client_logs))
            .opt("throttle", analytics.and_then(|a| a.throttle.as_deref()))
            .flag("log_all_headers", analytics.and_then(|a| a.log_all_headers))
            .opt("se_group", self.se_group.as_deref())
            .set("listeners", self.listeners.iter().map(PortProtocol::key))
            .list("http_policy_refs", &self.http_policy_refs)
            .list("datascripts", &self.datascripts)
            .set("ssl_key_cert_refs", &self.ssl_key_cert_refs)
            .opt("parent", self.parent.as_deref())
            .set("vh_domain_names", &self.vh_domain_names)
            .flag("enhanced_vh", self.enhanced_vh.then_some(true))
            .opt("default_pool", self.default_pool.as_deref())
            .opt("default_pool_group", self.default_pool_group.as_deref())
            .children("vsvip", self.vsvip.iter().map(Node::checksum))
            .children("pools", self.pools.iter().map(Node::checksum))
            .children("pool_groups", self.pool_groups.iter().map(Node::checksum))
            .children("http_policies", self.http_policies.iter().map(Node::checksum))
            .children("ssl_key_certs", self.ssl_key_certs.iter().map(Node::checksum))
            .children("string_groups", self.string_groups.iter().map(Node::checksum))
            .children("l4_policies", self.l4_policies.iter().map(Node::checksum))
            .children("children", self.children.iter().map(Node::checksum))
            .finish()
    }

    fn child_refs(&self) -> Vec<(ObjectKind, String)> {
        let mut refs = Vec::new();
        if let Some(vip) = &self.vsvip {
            refs.push((ObjectKind::VsVip, vip.name.clone()));
        }
        refs.extend(self.pools.iter().map(|p| (ObjectKind::Pool, p.name.clone())));
        refs.extend(self.pool_groups.iter().map(|p| (ObjectKind::PoolGroup, p.name.clone())));
        refs.extend(self.http_policies.iter().map(|p| (ObjectKind::HttpPolicySet, p.name.clone())));
        refs.extend(self.ssl_key_certs.iter().map(|c| (ObjectKind::SslKeyCert, c.name.clone())));
        refs.extend(self.string_groups.iter().map(|s| (ObjectKind::StringGroup, s.name.clone())));
        refs.extend(self.l4_policies.iter().map(|l| (ObjectKind::L4PolicySet, l.name.clone())));
        refs.extend(self.children.iter().map(|c| (ObjectKind::VirtualService, c.name.clone())));
        refs
    }
}

/// VIP allocation with the FQDNs published for it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VsVipNode {
    pub name: String,
    pub fqdns: Vec<String>,
    pub static_ip: Option<String>,
    pub vip_networks: Vec<String>,
    pub enable_rhi: Option<bool>,
    pub vrf: Option<String>,
}

impl VsVipNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Node for VsVipNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::VsVip
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("vsvip")
            .str("name", &self.name)
            .set("fqdns", &self.fqdns)
            .opt("static_ip", self.static_ip.as_deref())
            .set("vip_networks", &self.vip_networks)
            .flag("enable_rhi", self.enable_rhi)
            .opt("vrf", self.vrf.as_deref())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SslKeyCertNode {
    pub name: String,
    pub certificate: String,
    pub key: String,
    pub ca_certificate: Option<String>,
}

impl Node for SslKeyCertNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::SslKeyCert
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("sslkeyandcertificate")
            .str("name", &self.name)
            .str("certificate", &self.certificate)
            .str("key", &self.key)
            .opt("ca_certificate", self.ca_certificate.as_deref())
            .finish()
    }
}

/// Regex strings referenced by REGEX_MATCH rules
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringGroupNode {
    pub name: String,
    pub entries: Vec<String>,
    pub longest_match: bool,
}

impl Node for StringGroupNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::StringGroup
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("stringgroup")
            .str("name", &self.name)
            .set("entries", &self.entries)
            .flag("longest_match", Some(self.longest_match))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct L4PolicyRule {
    pub port: u16,
    pub protocol: String,
    pub pool: String,
}

/// Port to pool dispatch for multi-port L4 services
#[derive(Clone, Debug, Default, PartialEq)]
pub struct L4PolicySetNode {
    pub name: String,
    pub rules: Vec<L4PolicyRule>,
}

impl Node for L4PolicySetNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::L4PolicySet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("l4policyset")
            .str("name", &self.name)
            .set(
                "rules",
                self.rules
                    .iter()
                    .map(|r| format!("{}/{}/{}", r.port, r.protocol, r.pool)),
            )
            .finish()
    }

    fn child_refs(&self) -> Vec<(ObjectKind, String)> {
        self.rules
            .iter()
            .map(|r| (ObjectKind::Pool, r.pool.clone()))
            .collect()
    }
}
