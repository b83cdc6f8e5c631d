use super::{Node, ObjectKind};
use crate::checksum::ChecksumBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCriteria {
    #[default]
    BeginsWith,
    RegexMatch,
    Equals,
    Contains,
    EndsWith,
}

impl MatchCriteria {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCriteria::BeginsWith => "BEGINS_WITH",
            MatchCriteria::RegexMatch => "REGEX_MATCH",
            MatchCriteria::Equals => "EQUALS",
            MatchCriteria::Contains => "CONTAINS",
            MatchCriteria::EndsWith => "ENDS_WITH",
        }
    }
}

impl fmt::Display for MatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCase {
    #[default]
    Sensitive,
    Insensitive,
}

impl MatchCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCase::Sensitive => "SENSITIVE",
            MatchCase::Insensitive => "INSENSITIVE",
        }
    }
}

/// One host/path match switching to a pool group
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HppMap {
    pub name: String,
    pub hosts: Vec<String>,
    pub match_criteria: MatchCriteria,
    pub match_case: MatchCase,
    pub paths: Vec<String>,
    pub string_group_refs: Vec<String>,
    pub pool_group: String,
    /// Ingress path before any app-root rewrite
    pub ingress_path: String,
}

impl HppMap {
    fn checksum_key(&self) -> String {
        let mut hosts = self.hosts.clone();
        hosts.sort_unstable();
        hosts.dedup();
        let mut groups = self.string_group_refs.clone();
        groups.sort_unstable();
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.name,
            hosts.join(","),
            self.match_criteria,
            self.match_case.as_str(),
            self.paths.join(","),
            groups.join(","),
            self.pool_group
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RedirectRule {
    pub name: String,
    pub hosts: Vec<String>,
    /// Request path matched; None matches every path
    pub path: Option<String>,
    pub match_criteria_path: Option<MatchCriteria>,
    /// Ports the rule listens on, matched with IS_IN
    pub ports: Vec<u16>,
    pub match_criteria_port: String,
    /// Target protocol, HTTP or HTTPS
    pub protocol: String,
    pub redirect_port: u16,
    /// Target path without its leading '/'
    pub redirect_path: Option<String>,
    pub status_code: u16,
}

impl RedirectRule {
    fn checksum_key(&self) -> String {
        let mut hosts = self.hosts.clone();
        hosts.sort_unstable();
        hosts.dedup();
        let mut ports = self.ports.clone();
        ports.sort_unstable();
        format!(
            "{}|{}|{}|{}|{:?}|{}|{}|{}|{}|{}",
            self.name,
            hosts.join(","),
            self.path.as_deref().unwrap_or(""),
            self.match_criteria_path.map(|m| m.as_str()).unwrap_or(""),
            ports,
            self.match_criteria_port,
            self.protocol,
            self.redirect_port,
            self.redirect_path.as_deref().unwrap_or(""),
            self.status_code
        )
    }
}

/// Ordered match/switch rules plus independent redirect rules
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpPolicySetNode {
    pub name: String,
    pub hpp_map: Vec<HppMap>,
    pub redirect_ports: Vec<RedirectRule>,
}

impl HttpPolicySetNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hpp_map.is_empty() && self.redirect_ports.is_empty()
    }
}

impl Node for HttpPolicySetNode {
    fn kind(&self) -> ObjectKind {
        ObjectKind::HttpPolicySet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u64 {
        ChecksumBuilder::new("httppolicyset")
            .str("name", &self.name)
            .list("hpp_map", self.hpp_map.iter().map(HppMap::checksum_key))
            .set("redirects", self.redirect_ports.iter().map(RedirectRule::checksum_key))
            .finish()
    }

    fn child_refs(&self) -> Vec<(ObjectKind, String)> {
        let mut refs: Vec<(ObjectKind, String)> = self
            .hpp_map
            .iter()
            .map(|m| (ObjectKind::PoolGroup, m.pool_group.clone()))
            .collect();
        refs.extend(
            self.hpp_map
                .iter()
                .flat_map(|m| m.string_group_refs.iter())
                .map(|s| (ObjectKind::StringGroup, s.clone())),
        );
        refs
    }
}
