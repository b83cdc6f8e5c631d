//! Typed graph describing the desired configuration of one virtual service
//!
//! A graph is rooted either at a virtual service (which owns its pools, pool
//! groups, policies, VIP, certificates and TLS children) or at a VRF holding
//! static routes. Reads go through accessors that check the root kind, so a
//! mismatched lookup is an error for that one event rather than a panic.

mod policy;
mod pool;
mod vrf;
mod vs;

pub use policy::{HppMap, HttpPolicySetNode, MatchCase, MatchCriteria, RedirectRule};
pub use pool::{PoolGroupMember, PoolGroupNode, PoolNode, Server};
pub use vrf::{StaticRoute, VrfNode};
pub use vs::{
    AnalyticsSettings, L4PolicyRule, L4PolicySetNode, PortProtocol, ServiceMetadata,
    SslKeyCertNode, StringGroupNode, VirtualServiceNode, VsVipNode,
};

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Remote object types produced from a graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    SslKeyCert,
    StringGroup,
    Pool,
    PoolGroup,
    HttpPolicySet,
    L4PolicySet,
    VsVip,
    VirtualService,
    VrfContext,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 9] = [
        ObjectKind::SslKeyCert,
        ObjectKind::StringGroup,
        ObjectKind::Pool,
        ObjectKind::PoolGroup,
        ObjectKind::HttpPolicySet,
        ObjectKind::L4PolicySet,
        ObjectKind::VsVip,
        ObjectKind::VirtualService,
        ObjectKind::VrfContext,
    ];

    /// REST collection name on the controller
    pub fn api_path(&self) -> &'static str {
        match self {
            ObjectKind::SslKeyCert => "sslkeyandcertificate",
            ObjectKind::StringGroup => "stringgroup",
            ObjectKind::Pool => "pool",
            ObjectKind::PoolGroup => "poolgroup",
            ObjectKind::HttpPolicySet => "httppolicyset",
            ObjectKind::L4PolicySet => "l4policyset",
            ObjectKind::VsVip => "vsvip",
            ObjectKind::VirtualService => "virtualservice",
            ObjectKind::VrfContext => "vrfcontext",
        }
    }

    pub fn from_api_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.api_path() == path)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_path())
    }
}

/// Graph store key: one live graph per (tenant, VS name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub tenant: String,
    pub name: String,
}

impl ModelKey {
    pub fn new(tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleKind {
    HostRule,
    HttpRule,
    L4Rule,
    InfraSetting,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleKind::HostRule => "HostRule",
            RuleKind::HttpRule => "HTTPRule",
            RuleKind::L4Rule => "L4Rule",
            RuleKind::InfraSetting => "AviInfraSetting",
        })
    }
}

/// A CRD whose settings were applied to a node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRef {
    pub kind: RuleKind,
    /// Empty for cluster-scoped resources
    pub namespace: String,
    pub name: String,
}

impl RuleRef {
    pub fn new(kind: RuleKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Common surface of every node type
pub trait Node {
    fn kind(&self) -> ObjectKind;
    fn name(&self) -> &str;
    /// Pure function of the node's fields and its children's checksums
    fn checksum(&self) -> u64;
    /// Objects this node references by name
    fn child_refs(&self) -> Vec<(ObjectKind, String)> {
        Vec::new()
    }
}

/// Borrowed view over any node, in the order it must be synced
#[derive(Clone, Copy, Debug)]
pub enum NodeRef<'a> {
    SslKeyCert(&'a SslKeyCertNode),
    StringGroup(&'a StringGroupNode),
    Pool(&'a PoolNode),
    PoolGroup(&'a PoolGroupNode),
    HttpPolicySet(&'a HttpPolicySetNode),
    L4PolicySet(&'a L4PolicySetNode),
    VsVip(&'a VsVipNode),
    VirtualService(&'a VirtualServiceNode),
    Vrf(&'a VrfNode),
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a dyn Node {
        match *self {
            NodeRef::SslKeyCert(n) => n,
            NodeRef::StringGroup(n) => n,
            NodeRef::Pool(n) => n,
            NodeRef::PoolGroup(n) => n,
            NodeRef::HttpPolicySet(n) => n,
            NodeRef::L4PolicySet(n) => n,
            NodeRef::VsVip(n) => n,
            NodeRef::VirtualService(n) => n,
            NodeRef::Vrf(n) => n,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.node().kind()
    }

    pub fn name(&self) -> &'a str {
        self.node().name()
    }

    pub fn checksum(&self) -> u64 {
        self.node().checksum()
    }

    pub fn child_refs(&self) -> Vec<(ObjectKind, String)> {
        self.node().child_refs()
    }

    /// CRDs whose settings shaped this node
    pub fn rules(&self) -> BTreeSet<RuleRef> {
        match *self {
            NodeRef::VirtualService(vs) => vs.rules.clone(),
            NodeRef::Pool(pool) => pool.rules.clone(),
            _ => BTreeSet::new(),
        }
    }
}

/// Root of a graph
#[derive(Clone, Debug, PartialEq)]
pub enum GraphNode {
    VirtualService(Box<VirtualServiceNode>),
    Vrf(VrfNode),
}

impl GraphNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            GraphNode::VirtualService(_) => "VirtualService",
            GraphNode::Vrf(_) => "Vrf",
        }
    }

    pub fn checksum(&self) -> u64 {
        match self {
            GraphNode::VirtualService(vs) => vs.checksum(),
            GraphNode::Vrf(vrf) => vrf.checksum(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    pub key: ModelKey,
    pub root: GraphNode,
}

impl Graph {
    pub fn new(key: ModelKey, root: GraphNode) -> Self {
        Self { key, root }
    }

    pub fn checksum(&self) -> u64 {
        self.root.checksum()
    }

    pub fn virtual_service(&self) -> Result<&VirtualServiceNode> {
        match &self.root {
            GraphNode::VirtualService(vs) => Ok(vs),
            other => Err(CoreError::UnexpectedNodeKind {
                key: self.key.to_string(),
                expected: "VirtualService",
                found: other.kind_name(),
            }),
        }
    }

    pub fn vrf(&self) -> Result<&VrfNode> {
        match &self.root {
            GraphNode::Vrf(vrf) => Ok(vrf),
            other => Err(CoreError::UnexpectedNodeKind {
                key: self.key.to_string(),
                expected: "Vrf",
                found: other.kind_name(),
            }),
        }
    }

    /// Every node of the graph, children before the parents referencing them
    pub fn flatten(&self) -> Vec<NodeRef<'_>> {
        let mut out = Vec::new();
        match &self.root {
            GraphNode::Vrf(vrf) => out.push(NodeRef::Vrf(vrf)),
            GraphNode::VirtualService(vs) => {
                push_vs_dependencies(vs, &mut out);
                if let Some(vip) = &vs.vsvip {
                    out.push(NodeRef::VsVip(vip));
                }
                out.push(NodeRef::VirtualService(vs));
                for child in &vs.children {
                    push_vs_dependencies(child, &mut out);
                    out.push(NodeRef::VirtualService(child));
                }
            }
        }
        out
    }
}

fn push_vs_dependencies<'a>(vs: &'a VirtualServiceNode, out: &mut Vec<NodeRef<'a>>) {
    out.extend(vs.ssl_key_certs.iter().map(NodeRef::SslKeyCert));
    out.extend(vs.string_groups.iter().map(NodeRef::StringGroup));
    out.extend(vs.pools.iter().map(NodeRef::Pool));
    out.extend(vs.pool_groups.iter().map(NodeRef::PoolGroup));
    out.extend(vs.http_policies.iter().map(NodeRef::HttpPolicySet));
    out.extend(vs.l4_policies.iter().map(NodeRef::L4PolicySet));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vs() -> VirtualServiceNode {
        let mut vs = VirtualServiceNode::new("cluster--Shared-L7-0");
        vs.vsvip = Some(VsVipNode::new("cluster--Shared-L7-0"));
        vs.pools.push(PoolNode::new("pool-a", 8080));
        let mut pg = PoolGroupNode::new("pg-a");
        pg.members.push(PoolGroupMember::new("pool-a"));
        vs.pool_groups.push(pg);

        let mut child = VirtualServiceNode::new("cluster--foo.com");
        child.pools.push(PoolNode::new("pool-b", 8443));
        vs.children.push(child);
        vs
    }

    #[test]
    fn test_flatten_orders_children_first() {
        let graph = Graph::new(
            ModelKey::new("admin", "cluster--Shared-L7-0"),
            GraphNode::VirtualService(Box::new(sample_vs())),
        );
        let kinds: Vec<(ObjectKind, &str)> = graph
            .flatten()
            .iter()
            .map(|n| (n.kind(), n.name()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ObjectKind::Pool, "pool-a"),
                (ObjectKind::PoolGroup, "pg-a"),
                (ObjectKind::VsVip, "cluster--Shared-L7-0"),
                (ObjectKind::VirtualService, "cluster--Shared-L7-0"),
                (ObjectKind::Pool, "pool-b"),
                (ObjectKind::VirtualService, "cluster--foo.com"),
            ]
        );
    }

    #[test]
    fn test_child_mutation_propagates_to_root_checksum() {
        let vs = sample_vs();
        let before = vs.checksum();

        let mut changed = vs.clone();
        changed.children[0].pools[0].servers.push(Server::new("10.0.0.1", Some(8443)));
        assert_ne!(before, changed.checksum());

        let mut reordered = vs.clone();
        reordered.pools.push(PoolNode::new("pool-c", 80));
        let mut reordered_other = vs;
        reordered_other.pools.insert(0, PoolNode::new("pool-c", 80));
        assert_eq!(reordered.checksum(), reordered_other.checksum());
    }

    #[test]
    fn test_root_kind_is_checked() {
        let graph = Graph::new(
            ModelKey::new("admin", "global"),
            GraphNode::Vrf(VrfNode::new("global")),
        );
        assert!(graph.vrf().is_ok());
        match graph.virtual_service() {
            Err(CoreError::UnexpectedNodeKind { expected, found, .. }) => {
                assert_eq!(expected, "VirtualService");
                assert_eq!(found, "Vrf");
            }
            other => panic!("unexpected result: {:?}", other.map(|v| v.name.clone())),
        }
    }

    #[test]
    fn test_object_kind_paths_round_trip() {
        for kind in ObjectKind::ALL {
            assert_eq!(ObjectKind::from_api_path(kind.api_path()), Some(kind));
        }
    }
}
