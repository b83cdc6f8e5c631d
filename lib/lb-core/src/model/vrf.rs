use super::{Node, ObjectKind};
use crate::checksum::ChecksumBuilder;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaticRoute {
    /// `<node>-<index>` where index counts only that node's own CIDRs
    pub route_id: String,
    pub prefix: String,
    pub mask: u8,
    pub next_hop: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VrfNode {
    pub name: String,
    pub static_routes: Vec<StaticRoute>,
}

impl VrfNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            static_routes: Vec::new(),
        }
    }

    pub fn route(&self, route_id: &str) -> Option<&StaticRoute> {
        self.static_routes.iter().find(|r| r.route_id == route_id)
    }
}

impl Node for VrfNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::VrfContext
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("vrfcontext")
            .str("name", &self.name)
            .set(
                "static_routes",
                self.static_routes.iter().map(|r| {
                    format!("{}|{}/{}|{}", r.route_id, r.prefix, r.mask, r.next_hop)
                }),
            )
            .finish()
    }
}
