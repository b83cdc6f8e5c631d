//! HTTPRule pool overrides

use super::BuildOutput;
use crate::event::{InputKind, NamespacedName};
use crate::model::{PoolNode, RuleKind, RuleRef};
use crate::objects::Inputs;
use lb_api::v1beta1::http_rule::HTTPRulePath;

/// Reference to a health monitor that already exists on the controller
pub(crate) fn monitor_by_name(name: &str) -> String {
    format!("/api/healthmonitor?name={name}")
}

/// Reference to a health monitor created from a HealthMonitor CRD
pub(crate) fn monitor_by_uuid(uuid: &str) -> String {
    format!("/api/healthmonitor/{uuid}")
}

/// Rule path with the longest target that prefixes the pool's path
fn matching_path<'a>(paths: &'a [HTTPRulePath], pool_path: &str) -> Option<&'a HTTPRulePath> {
    paths
        .iter()
        .filter(|p| pool_path.starts_with(p.target.as_str()))
        .max_by_key(|p| p.target.len())
}

/// Apply every accepted HTTPRule for `host` to the pools serving it
pub(crate) fn apply(inputs: &Inputs, out: &mut BuildOutput, host: &str, pools: &mut [PoolNode]) {
    for (key, rule) in &inputs.http_rules {
        if !rule.spec.fqdn.eq_ignore_ascii_case(host) {
            continue;
        }
        out.contribute(InputKind::HttpRule, key);
        let rule_ref = RuleRef::new(RuleKind::HttpRule, &key.namespace, &key.name);
        for path in &rule.spec.paths {
            for monitor in &path.health_monitor_crd_refs {
                out.contribute(InputKind::HealthMonitor, &NamespacedName::new(key.namespace.clone(), monitor.clone()));
            }
        }
        if !inputs.rule_usable(&rule_ref) {
            continue;
        }

        for pool in pools.iter_mut() {
            let Some(pool_path) = pool.path.as_deref() else { continue };
            if pool.host.as_deref() != Some(host) {
                continue;
            }
            let Some(path) = matching_path(&rule.spec.paths, pool_path) else {
                continue;
            };
            apply_path(inputs, &key.namespace, path, pool);
            pool.rules.insert(rule_ref.clone());
        }
    }
}

fn apply_path(inputs: &Inputs, namespace: &str, path: &HTTPRulePath, pool: &mut PoolNode) {
    if let Some(lb) = &path.load_balancer_policy {
        pool.lb_algorithm = lb.algorithm.clone();
        pool.lb_algorithm_hash = lb.hash.clone();
        pool.lb_consistent_hash_header = lb.host_header.clone();
    }
    if let Some(tls) = &path.tls {
        pool.ssl_enabled = tls.tls_type.eq_ignore_ascii_case("reencrypt");
        pool.ssl_profile = tls.ssl_profile.clone();
        pool.pki_profile = tls.pki_profile.clone();
        pool.destination_ca = tls.destination_ca.clone();
    }
    pool.persistence_profile = path.application_persistence.clone();
    pool.enable_http2 = path.enable_http2;

    let mut monitors: Vec<String> = path.health_monitors.iter().map(|m| monitor_by_name(m)).collect();
    for name in &path.health_monitor_crd_refs {
        let key = NamespacedName::new(namespace, name.clone());
        if let Some(uuid) = inputs.health_monitors.get(&key).and_then(|hm| hm.ready_uuid()) {
            monitors.push(monitor_by_uuid(uuid));
        }
    }
    pool.health_monitors = monitors;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(target: &str) -> HTTPRulePath {
        HTTPRulePath {
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_longest_target_wins() {
        let paths = vec![path("/"), path("/api"), path("/api/v2")];
        assert_eq!(matching_path(&paths, "/api/v2/users").unwrap().target, "/api/v2");
        assert_eq!(matching_path(&paths, "/apix").unwrap().target, "/api");
        assert_eq!(matching_path(&paths, "/static").unwrap().target, "/");
        assert!(matching_path(&[path("/api")], "/other").is_none());
    }

    #[test]
    fn test_monitor_refs() {
        assert_eq!(monitor_by_name("System-HTTP"), "/api/healthmonitor?name=System-HTTP");
        assert_eq!(monitor_by_uuid("healthmonitor-1"), "/api/healthmonitor/healthmonitor-1");
    }
}
