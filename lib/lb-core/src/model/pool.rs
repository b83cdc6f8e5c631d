use super::{Node, ObjectKind, RuleRef};
use crate::checksum::ChecksumBuilder;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Server {
    pub ip: String,
    /// Overrides the pool port when set
    pub port: Option<u16>,
    /// Node hosting the endpoint, when known
    pub node: Option<String>,
}

impl Server {
    pub fn new(ip: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            ip: ip.into(),
            port,
            node: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolNode {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub servers: Vec<Server>,
    pub enabled: Option<bool>,
    /// `/api/healthmonitor?name=` or `/api/healthmonitor/<uuid>` references
    pub health_monitors: Vec<String>,
    pub persistence_profile: Option<String>,
    pub lb_algorithm: Option<String>,
    pub lb_algorithm_hash: Option<String>,
    pub lb_consistent_hash_header: Option<String>,
    pub ssl_enabled: bool,
    pub ssl_profile: Option<String>,
    pub pki_profile: Option<String>,
    pub destination_ca: Option<String>,
    pub enable_http2: Option<bool>,
    /// Network name to the subnets servers were placed in
    pub placement_networks: BTreeMap<String, BTreeSet<String>>,
    pub rules: BTreeSet<RuleRef>,
    /// Host and path served, for HTTPRule matching
    pub host: Option<String>,
    pub path: Option<String>,
}

impl PoolNode {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: "TCP".to_string(),
            ..Default::default()
        }
    }
}

impl Node for PoolNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Pool
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        let placement = self
            .placement_networks
            .iter()
            .flat_map(|(net, subnets)| subnets.iter().map(move |s| format!("{net}={s}")));
        let port = u64::from(self.port);
        ChecksumBuilder::new("pool")
            .str("name", &self.name)
            .num("port", port)
            .str("protocol", &self.protocol)
            .set(
                "servers",
                self.servers
                    .iter()
                    .map(|s| format!("{}:{}", s.ip, s.port.unwrap_or(self.port))),
            )
            .flag("enabled", self.enabled)
            .set("health_monitors", &self.health_monitors)
            .opt("persistence_profile", self.persistence_profile.as_deref())
            .opt("lb_algorithm", self.lb_algorithm.as_deref())
            .opt("lb_algorithm_hash", self.lb_algorithm_hash.as_deref())
            .opt("lb_consistent_hash_header", self.lb_consistent_hash_header.as_deref())
            .flag("ssl_enabled", Some(self.ssl_enabled))
            .opt("ssl_profile", self.ssl_profile.as_deref())
            .opt("pki_profile", self.pki_profile.as_deref())
            .opt("destination_ca", self.destination_ca.as_deref())
            .flag("enable_http2", self.enable_http2)
            .set("placement_networks", placement)
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolGroupMember {
    pub pool: String,
    pub priority: Option<String>,
    pub ratio: Option<u32>,
}

impl PoolGroupMember {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            priority: None,
            ratio: None,
        }
    }
}

/// Ordered pool references with priority labels
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolGroupNode {
    pub name: String,
    pub members: Vec<PoolGroupMember>,
}

impl PoolGroupNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }
}

impl Node for PoolGroupNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::PoolGroup
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("poolgroup")
            .str("name", &self.name)
            .list(
                "members",
                self.members.iter().map(|m| {
                    format!(
                        "{}|{}|{}",
                        m.pool,
                        m.priority.as_deref().unwrap_or(""),
                        m.ratio.map(|r| r.to_string()).unwrap_or_default()
                    )
                }),
            )
            .finish()
    }

    fn child_refs(&self) -> Vec<(ObjectKind, String)> {
        self.members
            .iter()
            .map(|m| (ObjectKind::Pool, m.pool.clone()))
            .collect()
    }
}
