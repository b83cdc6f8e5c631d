//! Wire representation of graph nodes
//!
//! Rendering is a pure function of one node: references to other objects are
//! always by name (`/api/<kind>?name=<name>`), so a parent can be rendered
//! before its children have UUIDs. The node checksum travels in
//! `cloud_config_cksum` and is read back by the cache on refresh.

use crate::cache::{CacheEntry, SyncState};
use lb_core::catalog::ProfileKind;
use lb_core::model::{
    HppMap, HttpPolicySetNode, L4PolicySetNode, NodeRef, PoolGroupNode, PoolNode, RedirectRule,
    SslKeyCertNode, StringGroupNode, VirtualServiceNode, VrfNode, VsVipNode,
};
use lb_core::{ObjectKind, Settings};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const CHECKSUM_FIELD: &str = "cloud_config_cksum";
const UDP_NETWORK_PROFILE: &str = "System-UDP-Fast-Path";
const DEFAULT_POOL_SSL_PROFILE: &str = "System-Standard";

/// Fields stamped on every object this controller owns
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderContext {
    pub tenant: String,
    pub cloud: String,
    pub created_by: String,
    pub vrf: String,
}

impl RenderContext {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tenant: settings.tenant.clone(),
            cloud: settings.cloud_name.clone(),
            created_by: settings.created_by(),
            vrf: settings.vrf_name.clone(),
        }
    }
}

/// Reference to a named object of any collection
pub fn name_ref(collection: &str, name: &str) -> String {
    format!("/api/{collection}?name={name}")
}

fn kind_ref(kind: ObjectKind, name: &str) -> String {
    name_ref(kind.api_path(), name)
}

fn profile_ref(kind: ProfileKind, name: &str) -> String {
    name_ref(kind.api_path(), name)
}

/// Collection and name of a reference. Handles `?name=` references and the
/// `<url>/api/<kind>/<uuid>#<name>` form returned with `include_name`.
pub fn parse_ref(reference: &str) -> Option<(String, String)> {
    let rest = &reference[reference.find("/api/")? + "/api/".len()..];
    let end = rest.find(['?', '/', '#']).unwrap_or(rest.len());
    let collection = rest[..end].to_string();

    let name = if let Some(idx) = rest.find('#') {
        rest[idx + 1..].to_string()
    } else if let Some(idx) = rest.find("name=") {
        let name = &rest[idx + "name=".len()..];
        name.split('&').next().unwrap_or_default().to_string()
    } else {
        return None;
    };
    (!name.is_empty()).then_some((collection, name))
}

fn ip_addr(addr: &str) -> Value {
    let family = if addr.contains(':') { "V6" } else { "V4" };
    json!({ "addr": addr, "type": family })
}

fn insert_opt(body: &mut Map<String, Value>, field: &str, value: Option<String>) {
    if let Some(value) = value {
        body.insert(field.to_string(), Value::String(value));
    }
}

/// Log throttle level to the controller's per-second limit
fn throttle_value(throttle: &str) -> Option<u32> {
    match throttle.to_ascii_uppercase().as_str() {
        "LOW" => Some(50),
        "MEDIUM" => Some(30),
        "HIGH" => Some(10),
        "DISABLED" => Some(0),
        other => other.parse().ok(),
    }
}

/// Body for a create or update of one node
pub fn render(node: NodeRef<'_>, ctx: &RenderContext) -> Value {
    let mut body = match node {
        NodeRef::SslKeyCert(n) => ssl_key_cert(n),
        NodeRef::StringGroup(n) => string_group(n),
        NodeRef::Pool(n) => pool(n, ctx),
        NodeRef::PoolGroup(n) => pool_group(n),
        NodeRef::HttpPolicySet(n) => http_policy_set(n),
        NodeRef::L4PolicySet(n) => l4_policy_set(n),
        NodeRef::VsVip(n) => vsvip(n, ctx),
        NodeRef::VirtualService(n) => virtual_service(n, ctx),
        NodeRef::Vrf(n) => vrf(n),
    };
    body.insert("name".to_string(), json!(node.name()));
    body.insert("tenant_ref".to_string(), json!(name_ref("tenant", &ctx.tenant)));
    body.insert("cloud_ref".to_string(), json!(name_ref("cloud", &ctx.cloud)));
    body.insert(CHECKSUM_FIELD.to_string(), json!(node.checksum().to_string()));
    // The VRF is shared with whoever else routes through it
    if node.kind() != ObjectKind::VrfContext {
        body.insert("created_by".to_string(), json!(ctx.created_by));
    }
    Value::Object(body)
}

fn ssl_key_cert(n: &SslKeyCertNode) -> Map<String, Value> {
    let mut certificate = n.certificate.clone();
    if let Some(ca) = &n.ca_certificate {
        certificate = format!("{}\n{}", certificate.trim_end(), ca);
    }
    let mut body = Map::new();
    body.insert("type".to_string(), json!("SSL_CERTIFICATE_TYPE_VIRTUALSERVICE"));
    body.insert("certificate".to_string(), json!({ "certificate": certificate }));
    body.insert("key".to_string(), json!(n.key));
    body
}

fn string_group(n: &StringGroupNode) -> Map<String, Value> {
    let kv: Vec<Value> = n.entries.iter().map(|e| json!({ "key": e })).collect();
    let mut body = Map::new();
    body.insert("type".to_string(), json!("SG_TYPE_STRING"));
    body.insert("kv".to_string(), json!(kv));
    body.insert("longest_match".to_string(), json!(n.longest_match));
    body
}

fn pool(n: &PoolNode, ctx: &RenderContext) -> Map<String, Value> {
    let servers: Vec<Value> = n
        .servers
        .iter()
        .map(|s| {
            let mut server = json!({ "ip": ip_addr(&s.ip), "port": s.port.unwrap_or(n.port) });
            if let Some(node) = &s.node {
                server["hostname"] = json!(node);
            }
            server
        })
        .collect();

    let mut body = Map::new();
    body.insert("default_server_port".to_string(), json!(n.port));
    body.insert("servers".to_string(), json!(servers));
    body.insert("vrf_ref".to_string(), json!(kind_ref(ObjectKind::VrfContext, &ctx.vrf)));
    if let Some(enabled) = n.enabled {
        body.insert("enabled".to_string(), json!(enabled));
    }
    if !n.health_monitors.is_empty() {
        body.insert("health_monitor_refs".to_string(), json!(n.health_monitors));
    }
    insert_opt(
        &mut body,
        "application_persistence_profile_ref",
        n.persistence_profile.as_deref().map(|p| profile_ref(ProfileKind::PersistenceProfile, p)),
    );
    insert_opt(&mut body, "lb_algorithm", n.lb_algorithm.clone());
    insert_opt(&mut body, "lb_algorithm_hash", n.lb_algorithm_hash.clone());
    insert_opt(&mut body, "lb_algorithm_consistent_hash_hdr", n.lb_consistent_hash_header.clone());
    if n.ssl_enabled {
        let profile = n.ssl_profile.as_deref().unwrap_or(DEFAULT_POOL_SSL_PROFILE);
        body.insert("ssl_profile_ref".to_string(), json!(profile_ref(ProfileKind::SslProfile, profile)));
        insert_opt(
            &mut body,
            "pki_profile_ref",
            n.pki_profile.as_deref().map(|p| profile_ref(ProfileKind::PkiProfile, p)),
        );
        if let Some(ca) = &n.destination_ca {
            body.insert(
                "pki_profile".to_string(),
                json!({ "name": format!("{}-pki", n.name), "ca_certs": [{ "certificate": ca }] }),
            );
        }
    }
    if let Some(http2) = n.enable_http2 {
        body.insert("enable_http2".to_string(), json!(http2));
    }
    if !n.placement_networks.is_empty() {
        let placements: Vec<Value> = n
            .placement_networks
            .iter()
            .flat_map(|(network, subnets)| {
                subnets.iter().filter_map(move |subnet| {
                    let (addr, mask) = subnet.split_once('/')?;
                    let mask: u8 = mask.parse().ok()?;
                    Some(json!({
                        "network_ref": name_ref("network", network),
                        "subnet": { "ip_addr": ip_addr(addr), "mask": mask },
                    }))
                })
            })
            .collect();
        body.insert("placement_networks".to_string(), json!(placements));
    }
    body
}

fn pool_group(n: &PoolGroupNode) -> Map<String, Value> {
    let members: Vec<Value> = n
        .members
        .iter()
        .map(|m| {
            let mut member = json!({ "pool_ref": kind_ref(ObjectKind::Pool, &m.pool) });
            if let Some(priority) = &m.priority {
                member["priority_label"] = json!(priority);
            }
            if let Some(ratio) = m.ratio {
                member["ratio"] = json!(ratio);
            }
            member
        })
        .collect();
    let mut body = Map::new();
    body.insert("members".to_string(), json!(members));
    body
}

fn host_match(hosts: &[String]) -> Value {
    json!({ "match_criteria": "HDR_EQUALS", "match_case": "INSENSITIVE", "value": hosts })
}

fn switching_rule(index: usize, rule: &HppMap) -> Value {
    let path = if rule.string_group_refs.is_empty() {
        json!({
            "match_criteria": rule.match_criteria.as_str(),
            "match_case": rule.match_case.as_str(),
            "match_str": rule.paths,
        })
    } else {
        let groups: Vec<String> = rule
            .string_group_refs
            .iter()
            .map(|g| kind_ref(ObjectKind::StringGroup, g))
            .collect();
        json!({
            "match_criteria": rule.match_criteria.as_str(),
            "match_case": rule.match_case.as_str(),
            "string_group_refs": groups,
        })
    };
    json!({
        "name": rule.name,
        "index": index,
        "enable": true,
        "match": { "host_hdr": host_match(&rule.hosts), "path": path },
        "switching_action": {
            "action": "HTTP_SWITCHING_SELECT_POOLGROUP",
            "pool_group_ref": kind_ref(ObjectKind::PoolGroup, &rule.pool_group),
        },
    })
}

fn redirect_rule(index: usize, rule: &RedirectRule) -> Value {
    let mut matches = json!({
        "host_hdr": host_match(&rule.hosts),
        "vs_port": { "match_criteria": rule.match_criteria_port, "ports": rule.ports },
    });
    if let Some(path) = &rule.path {
        let criteria = rule.match_criteria_path.unwrap_or_default();
        matches["path"] = json!({ "match_criteria": criteria.as_str(), "match_str": [path] });
    }
    let mut action = json!({
        "protocol": rule.protocol,
        "port": rule.redirect_port,
        "status_code": format!("HTTP_REDIRECT_STATUS_CODE_{}", rule.status_code),
    });
    if let Some(path) = &rule.redirect_path {
        action["path"] = json!({
            "type": "URI_PARAM_TYPE_TOKENIZED",
            "tokens": [{ "type": "URI_TOKEN_TYPE_STRING", "str_value": path }],
        });
    }
    json!({
        "name": rule.name,
        "index": index,
        "enable": true,
        "match": matches,
        "redirect_action": action,
    })
}

fn http_policy_set(n: &HttpPolicySetNode) -> Map<String, Value> {
    let mut rules: Vec<Value> = Vec::new();
    for rule in &n.redirect_ports {
        rules.push(redirect_rule(rules.len(), rule));
    }
    for rule in &n.hpp_map {
        rules.push(switching_rule(rules.len(), rule));
    }
    let mut body = Map::new();
    body.insert("http_request_policy".to_string(), json!({ "rules": rules }));
    body
}

fn l4_policy_set(n: &L4PolicySetNode) -> Map<String, Value> {
    let rules: Vec<Value> = n
        .rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            json!({
                "name": format!("{}-{}-{}", n.name, rule.protocol.to_ascii_lowercase(), rule.port),
                "index": index,
                "enable": true,
                "match": {
                    "port": { "match_criteria": "IS_IN", "ports": [rule.port] },
                    "protocol": {
                        "match_criteria": "IS_IN",
                        "protocol": format!("PROTOCOL_{}", rule.protocol.to_ascii_uppercase()),
                    },
                },
                "action": {
                    "select_pool": {
                        "action_type": "L4_RULE_ACTION_SELECT_POOL",
                        "pool_ref": kind_ref(ObjectKind::Pool, &rule.pool),
                    },
                },
            })
        })
        .collect();
    let mut body = Map::new();
    body.insert("l4_connection_policy".to_string(), json!({ "rules": rules }));
    body
}

fn vsvip(n: &VsVipNode, ctx: &RenderContext) -> Map<String, Value> {
    let base = |vip_id: usize| {
        let mut vip = json!({ "vip_id": vip_id.to_string(), "auto_allocate_ip": n.static_ip.is_none() });
        if let Some(ip) = &n.static_ip {
            vip["ip_address"] = ip_addr(ip);
        }
        vip
    };
    let vips: Vec<Value> = if n.vip_networks.is_empty() {
        vec![base(0)]
    } else {
        n.vip_networks
            .iter()
            .enumerate()
            .map(|(i, network)| {
                let mut vip = base(i);
                vip["ipam_network_subnet"] = json!({ "network_ref": name_ref("network", network) });
                vip
            })
            .collect()
    };
    let dns: Vec<Value> = n.fqdns.iter().map(|f| json!({ "fqdn": f })).collect();

    let vrf = n.vrf.as_deref().unwrap_or(&ctx.vrf);
    let mut body = Map::new();
    body.insert("vip".to_string(), json!(vips));
    body.insert("dns_info".to_string(), json!(dns));
    body.insert("vrf_context_ref".to_string(), json!(kind_ref(ObjectKind::VrfContext, vrf)));
    if let Some(rhi) = n.enable_rhi {
        body.insert("enable_rhi".to_string(), json!(rhi));
    }
    body
}

fn virtual_service(n: &VirtualServiceNode, ctx: &RenderContext) -> Map<String, Value> {
    let mut body = Map::new();
    let vs_type = if n.parent.is_some() {
        "VS_TYPE_VH_CHILD"
    } else if n.enhanced_vh || !n.children.is_empty() {
        "VS_TYPE_VH_PARENT"
    } else {
        "VS_TYPE_NORMAL"
    };
    body.insert("type".to_string(), json!(vs_type));
    if n.enhanced_vh {
        body.insert("vh_type".to_string(), json!("VS_TYPE_VH_ENHANCED"));
    }
    if let Some(enabled) = n.enabled {
        body.insert("enabled".to_string(), json!(enabled));
    }

    let profiles = [
        ("application_profile_ref", ProfileKind::ApplicationProfile, &n.application_profile),
        ("network_profile_ref", ProfileKind::NetworkProfile, &n.network_profile),
        ("analytics_profile_ref", ProfileKind::AnalyticsProfile, &n.analytics_profile),
        ("waf_policy_ref", ProfileKind::WafPolicy, &n.waf_policy),
        ("error_page_profile_ref", ProfileKind::ErrorPageProfile, &n.error_page_profile),
        ("ssl_profile_ref", ProfileKind::SslProfile, &n.ssl_profile),
    ];
    for (field, kind, value) in profiles {
        insert_opt(&mut body, field, value.as_deref().map(|p| profile_ref(kind, p)));
    }
    insert_opt(
        &mut body,
        "se_group_ref",
        n.se_group.as_deref().map(|g| name_ref("serviceenginegroup", g)),
    );

    if let Some(analytics) = &n.analytics_policy {
        let mut logs = json!({ "enabled": analytics.full_client_logs });
        if let Some(throttle) = analytics.throttle.as_deref().and_then(throttle_value) {
            logs["throttle"] = json!(throttle);
        }
        let mut policy = json!({ "full_client_logs": logs });
        if let Some(all_headers) = analytics.log_all_headers {
            policy["all_headers"] = json!(all_headers);
        }
        body.insert("analytics_policy".to_string(), policy);
    }

    if !n.listeners.is_empty() {
        let services: Vec<Value> = n
            .listeners
            .iter()
            .map(|l| {
                let mut service = json!({ "port": l.port, "enable_ssl": l.enable_ssl });
                if l.enable_http2 {
                    service["enable_http2"] = json!(true);
                }
                if l.protocol.eq_ignore_ascii_case("UDP") && n.network_profile.is_none() {
                    service["override_network_profile_ref"] =
                        json!(profile_ref(ProfileKind::NetworkProfile, UDP_NETWORK_PROFILE));
                }
                service
            })
            .collect();
        body.insert("services".to_string(), json!(services));
    }

    if let Some(vip) = &n.vsvip {
        body.insert("vsvip_ref".to_string(), json!(kind_ref(ObjectKind::VsVip, &vip.name)));
    }
    body.insert("vrf_context_ref".to_string(), json!(kind_ref(ObjectKind::VrfContext, &ctx.vrf)));
    insert_opt(&mut body, "pool_ref", n.default_pool.as_deref().map(|p| kind_ref(ObjectKind::Pool, p)));
    insert_opt(
        &mut body,
        "pool_group_ref",
        n.default_pool_group.as_deref().map(|p| kind_ref(ObjectKind::PoolGroup, p)),
    );

    let mut policies: Vec<String> = n.http_policies.iter().map(|p| p.name.clone()).collect();
    policies.extend(n.http_policy_refs.iter().cloned());
    if !policies.is_empty() {
        let refs: Vec<Value> = policies
            .iter()
            .enumerate()
            .map(|(index, p)| json!({ "index": index, "http_policy_set_ref": kind_ref(ObjectKind::HttpPolicySet, p) }))
            .collect();
        body.insert("http_policies".to_string(), json!(refs));
    }
    if !n.l4_policies.is_empty() {
        let refs: Vec<Value> = n
            .l4_policies
            .iter()
            .enumerate()
            .map(|(index, p)| json!({ "index": index, "l4_policy_set_ref": kind_ref(ObjectKind::L4PolicySet, &p.name) }))
            .collect();
        body.insert("l4_policies".to_string(), json!(refs));
    }
    if !n.datascripts.is_empty() {
        let refs: Vec<Value> = n
            .datascripts
            .iter()
            .enumerate()
            .map(|(index, d)| json!({ "index": index, "vs_datascript_set_ref": profile_ref(ProfileKind::DataScript, d) }))
            .collect();
        body.insert("vs_datascripts".to_string(), json!(refs));
    }

    let mut certs: Vec<String> = n
        .ssl_key_certs
        .iter()
        .map(|c| kind_ref(ObjectKind::SslKeyCert, &c.name))
        .collect();
    certs.extend(n.ssl_key_cert_refs.iter().map(|c| kind_ref(ObjectKind::SslKeyCert, c)));
    if !certs.is_empty() {
        body.insert("ssl_key_and_certificate_refs".to_string(), json!(certs));
    }

    if let Some(parent) = &n.parent {
        body.insert("vh_parent_vs_ref".to_string(), json!(kind_ref(ObjectKind::VirtualService, parent)));
        if n.enhanced_vh {
            let matches: Vec<Value> = n
                .vh_domain_names
                .iter()
                .map(|host| json!({ "host": host, "path": [{ "match_criteria": "BEGINS_WITH", "match_str": ["/"] }] }))
                .collect();
            body.insert("vh_matches".to_string(), json!(matches));
        } else {
            body.insert("vh_domain_name".to_string(), json!(n.vh_domain_names));
        }
    }
    body
}

fn vrf(n: &VrfNode) -> Map<String, Value> {
    let routes: Vec<Value> = n
        .static_routes
        .iter()
        .map(|r| {
            json!({
                "route_id": r.route_id,
                "prefix": { "ip_addr": ip_addr(&r.prefix), "mask": r.mask },
                "next_hop": ip_addr(&r.next_hop),
            })
        })
        .collect();
    let mut body = Map::new();
    body.insert("static_routes".to_string(), json!(routes));
    body
}

/// Reference fields that point at something other than an owned child
const NON_CHILD_REFS: [&str; 4] = ["tenant_ref", "cloud_ref", "vh_parent_vs_ref", "vrf_context_ref"];

fn collect_children(value: &Value, children: &mut BTreeMap<ObjectKind, BTreeSet<String>>) {
    match value {
        Value::Object(map) => {
            for (field, v) in map {
                if NON_CHILD_REFS.contains(&field.as_str()) {
                    continue;
                }
                if field.ends_with("_ref") {
                    if let Some(r) = v.as_str() {
                        add_child(r, children);
                    }
                } else if field.ends_with("_refs") {
                    for r in v.as_array().into_iter().flatten().filter_map(Value::as_str) {
                        add_child(r, children);
                    }
                } else {
                    collect_children(v, children);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_children(item, children)),
        _ => {}
    }
}

fn add_child(reference: &str, children: &mut BTreeMap<ObjectKind, BTreeSet<String>>) {
    let Some((collection, name)) = parse_ref(reference) else {
        return;
    };
    match ObjectKind::from_api_path(&collection) {
        Some(ObjectKind::VrfContext) | None => {}
        Some(kind) => {
            children.entry(kind).or_default().insert(name);
        }
    }
}

/// Uuid, checksum and child keys of a listed object. None when the object
/// has no name or uuid.
pub fn parse(kind: ObjectKind, value: &Value) -> Option<CacheEntry> {
    let name = value.get("name")?.as_str()?.to_string();
    let uuid = value.get("uuid")?.as_str()?.to_string();
    let checksum = value.get(CHECKSUM_FIELD).and_then(|c| match c {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    });

    let mut children = BTreeMap::new();
    collect_children(value, &mut children);
    let parent = value
        .get("vh_parent_vs_ref")
        .and_then(Value::as_str)
        .and_then(parse_ref)
        .map(|(_, name)| name);
    let vip = (kind == ObjectKind::VsVip)
        .then(|| value.pointer("/vip/0/ip_address/addr").and_then(Value::as_str))
        .flatten()
        .map(str::to_string);

    Some(CacheEntry {
        kind,
        name,
        uuid,
        checksum,
        children,
        parent,
        vip,
        state: SyncState::Present,
    })
}

/// Provenance marker of a listed object
pub fn created_by(value: &Value) -> Option<&str> {
    value.get("created_by").and_then(Value::as_str)
}
