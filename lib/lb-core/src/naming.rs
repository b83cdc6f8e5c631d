//! Deterministic names for generated objects
//!
//! Every name carries the cluster prefix so objects owned by different
//! clusters never collide within a tenant. Names that would exceed the
//! controller's limit are replaced by a digest, and regex-bearing names always
//! go through a separate digest so they cannot collide with literal names.
//! Under enhanced virtual hosting every generated name below the shard parent
//! is a digest.

use sha2::{Digest, Sha256};

/// Longest object name accepted by the controller
pub const MAX_NAME_LEN: usize = 255;

const ENCODED_HASH_LEN: usize = 40;

/// Whether a list of hosts contributes to a name in its given order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameOrder {
    /// Sort and deduplicate before use
    Canonical,
    /// Keep the caller's order
    Preserve,
}

/// Builds names for one cluster, optionally scoped by an AviInfraSetting
#[derive(Clone, Debug)]
pub struct Namer {
    cluster: String,
    infra: Option<String>,
    evh: bool,
}

impl Namer {
    pub fn new(cluster: impl Into<String>, infra: Option<&str>) -> Self {
        Self {
            cluster: cluster.into(),
            infra: infra.map(str::to_string),
            evh: false,
        }
    }

    /// Names for shared virtual services under enhanced virtual hosting
    pub fn with_evh(mut self, evh: bool) -> Self {
        self.evh = evh;
        self
    }

    /// `<cluster>--` or `<cluster>--<infra>-`
    pub fn prefix(&self) -> String {
        match &self.infra {
            Some(infra) => format!("{}--{}-", self.cluster, infra),
            None => format!("{}--", self.cluster),
        }
    }

    pub fn shared_vs(&self, shard: u32) -> String {
        if self.evh {
            return format!("{}Shared-L7-EVH-{}", self.prefix(), shard);
        }
        self.encode(&format!("{}Shared-L7-{}", self.prefix(), shard))
    }

    pub fn dedicated_vs(&self, host: &str) -> String {
        self.encode(&format!("{}{}-L7-dedicated", self.prefix(), host))
    }

    pub fn sni_child_for_host(&self, host: &str) -> String {
        self.encode(&format!("{}{}", self.prefix(), host))
    }

    /// Child of an enhanced shard parent serving one host
    pub fn evh_child(&self, host: &str) -> String {
        format!("{}--{}", self.cluster, digest(&format!("{}{}", self.prefix(), host)))
    }

    pub fn sni_child_for_secret(&self, namespace: &str, ingress: &str, secret: &str) -> String {
        self.encode(&format!("{}{}-{}-{}", self.prefix(), namespace, ingress, secret))
    }

    /// Unencoded pool-group name; callers pick literal or regex encoding
    pub fn raw_pool_group(&self, namespace: &str, host: &str, path: &str, ingress: &str) -> String {
        format!(
            "{}{}-{}{}-{}",
            self.prefix(),
            namespace,
            host,
            path_segment(path),
            ingress
        )
    }

    pub fn pool_group(&self, namespace: &str, host: &str, path: &str, ingress: &str) -> String {
        self.encode(&self.raw_pool_group(namespace, host, path, ingress))
    }

    pub fn regex_pool_group(&self, namespace: &str, host: &str, path: &str, ingress: &str) -> String {
        self.encode_regex(&self.raw_pool_group(namespace, host, path, ingress))
    }

    pub fn pool(&self, namespace: &str, host: &str, path: &str, ingress: &str, service: &str) -> String {
        self.encode(&format!(
            "{}-{}",
            self.raw_pool_group(namespace, host, path, ingress),
            service
        ))
    }

    pub fn regex_pool(&self, namespace: &str, host: &str, path: &str, ingress: &str, service: &str) -> String {
        self.encode_regex(&format!(
            "{}-{}",
            self.raw_pool_group(namespace, host, path, ingress),
            service
        ))
    }

    pub fn l4_vs(&self, namespace: &str, service: &str) -> String {
        self.encode(&format!("{}{}-{}", self.prefix(), namespace, service))
    }

    pub fn shared_vip_vs(&self, namespace: &str, vip_key: &str) -> String {
        self.encode(&format!("{}{}-{}", self.prefix(), namespace, vip_key))
    }

    pub fn l4_pool(&self, namespace: &str, service: &str, protocol: &str, port: u16) -> String {
        self.encode(&format!(
            "{}{}-{}-{}-{}",
            self.prefix(),
            namespace,
            service,
            protocol.to_ascii_lowercase(),
            port
        ))
    }

    pub fn ssl_key_cert(&self, namespace: &str, secret: &str) -> String {
        self.encode(&format!("{}{}-{}", self.prefix(), namespace, secret))
    }

    /// Name of the string group holding regex paths for a host set
    pub fn string_group(&self, hosts: &[String], path: &str) -> String {
        self.encode_regex(&format!("{}{}", host_set(hosts, NameOrder::Canonical), path))
    }

    /// Replace an over-long name, or any name under enhanced virtual hosting,
    /// with a digest of it
    pub fn encode(&self, name: &str) -> String {
        if !self.evh && name.len() <= MAX_NAME_LEN {
            return name.to_string();
        }
        format!("{}--{}", self.cluster, digest(name))
    }

    /// Digest-based name for regex-bearing inputs
    pub fn encode_regex(&self, name: &str) -> String {
        format!("{}--rgx-{}", self.cluster, digest(&format!("regex:{name}")))
    }
}

/// Policy set carrying host/path rules of a virtual service
pub fn http_policy_name(vs: &str) -> String {
    format!("{vs}-policy")
}

/// Policy set carrying HTTP to HTTPS redirects of a virtual service
pub fn redirect_policy_name(vs: &str) -> String {
    format!("{vs}-redirect")
}

pub fn l4_policy_name(vs: &str) -> String {
    format!("{vs}-l4policy")
}

/// Ingress paths become part of names with '/' replaced
pub fn path_segment(path: &str) -> String {
    path.replace('/', "_")
}

/// Shard index of a host within a pool of `size` shared virtual services
pub fn shard_index(host: &str, size: u32) -> u32 {
    if size <= 1 {
        return 0;
    }
    let hash = Sha256::digest(host.as_bytes());
    let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
    value % size
}

/// Joins a host list for naming; canonical order makes alias order irrelevant
pub fn host_set(hosts: &[String], order: NameOrder) -> String {
    match order {
        NameOrder::Preserve => hosts.join(","),
        NameOrder::Canonical => {
            let mut sorted: Vec<&str> = hosts.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            sorted.dedup();
            sorted.join(",")
        }
    }
}

/// Name of a rule matching a host set and path within a policy set
pub fn rule_name(hosts: &[String], path: &str, order: NameOrder) -> String {
    let base = format!("{}{}", host_set(hosts, order), path);
    if base.len() <= MAX_NAME_LEN {
        base
    } else {
        digest(&base)
    }
}

fn digest(input: &str) -> String {
    let hash = hex::encode(Sha256::digest(input.as_bytes()));
    hash[..ENCODED_HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_and_dedicated_names() {
        let namer = Namer::new("cluster", None);
        assert_eq!(namer.shared_vs(0), "cluster--Shared-L7-0");
        assert_eq!(namer.dedicated_vs("foo.com"), "cluster--foo.com-L7-dedicated");
        assert_eq!(namer.sni_child_for_host("foo.com"), "cluster--foo.com");

        let infra = Namer::new("cluster", Some("infra1"));
        assert_eq!(infra.shared_vs(2), "cluster--infra1-Shared-L7-2");
    }

    #[test]
    fn test_evh_names_are_digests_below_the_parent() {
        let namer = Namer::new("cluster", None).with_evh(true);
        assert_eq!(namer.shared_vs(1), "cluster--Shared-L7-EVH-1");

        let child = namer.evh_child("foo.com");
        assert!(child.starts_with("cluster--"));
        assert_eq!(child.len(), "cluster--".len() + ENCODED_HASH_LEN);
        assert_ne!(child, namer.evh_child("bar.com"));
        assert_ne!(child, Namer::new("cluster", Some("infra1")).with_evh(true).evh_child("foo.com"));

        let pool = namer.pool("default", "foo.com", "/foo", "ing", "svc");
        assert_eq!(pool, format!("cluster--{}", digest("cluster--default-foo.com_foo-ing-svc")));
        assert_ne!(pool, namer.pool_group("default", "foo.com", "/foo", "ing"));
    }

    #[test]
    fn test_pool_group_and_pool_names() {
        let namer = Namer::new("cluster", None);
        assert_eq!(
            namer.pool_group("default", "foo.com", "/foo", "ing"),
            "cluster--default-foo.com_foo-ing"
        );
        assert_eq!(
            namer.pool("default", "foo.com", "/foo", "ing", "svc"),
            "cluster--default-foo.com_foo-ing-svc"
        );
        assert_eq!(namer.l4_pool("red", "svc", "TCP", 80), "cluster--red-svc-tcp-80");
    }

    #[test]
    fn test_regex_names_do_not_collide_with_literal_names() {
        let namer = Namer::new("cluster", None);
        let literal = namer.pool_group("default", "foo.com", "/foo", "ing");
        let regex = namer.regex_pool_group("default", "foo.com", "/foo", "ing");
        assert_ne!(literal, regex);
        assert!(regex.starts_with("cluster--rgx-"));
        // stable across calls
        assert_eq!(regex, namer.regex_pool_group("default", "foo.com", "/foo", "ing"));
    }

    #[test]
    fn test_long_names_are_bounded() {
        let namer = Namer::new("cluster", None);
        let host = format!("{}.example.com", "a".repeat(300));
        let name = namer.dedicated_vs(&host);
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.starts_with("cluster--"));
        assert_ne!(name, namer.dedicated_vs(&format!("b{host}")));
    }

    #[test]
    fn test_alias_order_independence() {
        let a = vec!["foo.com".to_string(), "b.com".to_string(), "a.com".to_string()];
        let b = vec!["foo.com".to_string(), "a.com".to_string(), "b.com".to_string()];
        assert_eq!(
            rule_name(&a, "/", NameOrder::Canonical),
            rule_name(&b, "/", NameOrder::Canonical)
        );
        assert_ne!(
            rule_name(&a, "/", NameOrder::Preserve),
            rule_name(&b, "/", NameOrder::Preserve)
        );

        let namer = Namer::new("cluster", None);
        assert_eq!(namer.string_group(&a, "/x"), namer.string_group(&b, "/x"));
    }

    #[test]
    fn test_shard_index_is_stable_and_bounded() {
        for host in ["foo.com", "bar.com", "baz.org"] {
            let shard = shard_index(host, 8);
            assert!(shard < 8);
            assert_eq!(shard, shard_index(host, 8));
        }
        assert_eq!(shard_index("foo.com", 1), 0);
        assert_eq!(shard_index("foo.com", 0), 0);
    }
}
