//! Static validation of the rule CRDs
//!
//! Each check returns the message published in the rule's `status.error`.
//! Validation depends on the other inputs (conflicting HostRules, HealthMonitor
//! readiness, the profile catalog), so every rule is revalidated whenever any
//! of those change. Conflicts are settled by age: the rule created first
//! keeps its claim.

use crate::catalog::{ProfileCatalog, ProfileKind, APP_PROFILE_L4_SSL, NETWORK_PROFILE_TCP_PROXY};
use crate::config::LicenseTier;
use crate::event::NamespacedName;
use crate::model::{RuleKind, RuleRef};
use crate::objects::Inputs;
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use lb_api::v1beta1::host_rule::FqdnType;
use lb_api::{AviInfraSetting, HTTPRule, HostRule, L4Rule};
use std::collections::BTreeSet;

const CONSISTENT_HASH: &str = "LB_ALGORITHM_CONSISTENT_HASH";
const CUSTOM_HEADER_HASH: &str = "LB_ALGORITHM_CONSISTENT_HASH_CUSTOM_HEADER";

pub fn validate_rule(inputs: &Inputs, rule: &RuleRef) -> Result<(), String> {
    let key = NamespacedName::new(rule.namespace.clone(), rule.name.clone());
    match rule.kind {
        RuleKind::HostRule => match inputs.host_rules.get(&key) {
            Some(hr) => host_rule(inputs, &key, hr),
            None => Ok(()),
        },
        RuleKind::HttpRule => match inputs.http_rules.get(&key) {
            Some(hr) => http_rule(inputs, &key, hr),
            None => Ok(()),
        },
        RuleKind::L4Rule => match inputs.l4_rules.get(&key) {
            Some(l4) => l4_rule(inputs, l4),
            None => Ok(()),
        },
        RuleKind::InfraSetting => match inputs.infra_settings.get(&rule.name) {
            Some(setting) => infra_setting(setting),
            None => Ok(()),
        },
    }
}

/// Creation order, ties broken by namespace and name
fn age_key(rule: &HostRule, key: &NamespacedName) -> (Option<i64>, String, String) {
    let created = rule.creation_timestamp().map(|t| t.0.timestamp());
    (created, key.namespace.clone(), key.name.clone())
}

fn host_rule(inputs: &Inputs, key: &NamespacedName, rule: &HostRule) -> Result<(), String> {
    let vh = &rule.spec.virtual_host;

    if !vh.aliases.is_empty() {
        if vh.fqdn_type != FqdnType::Exact {
            return Err("Aliases is supported only when FQDN type is set as Exact".to_string());
        }
        if vh.aliases.iter().any(|a| a.eq_ignore_ascii_case(&vh.fqdn)) {
            return Err("Duplicate entry found. Aliases field has same entry as the FQDN field".to_string());
        }
        let unique: BTreeSet<String> = vh.aliases.iter().map(|a| a.to_ascii_lowercase()).collect();
        if unique.len() != vh.aliases.len() {
            return Err("Aliases must be unique".to_string());
        }
    }

    let mine = age_key(rule, key);
    for (other_key, other) in &inputs.host_rules {
        if other_key == key || age_key(other, other_key) > mine {
            continue;
        }
        let other_vh = &other.spec.virtual_host;
        if other_vh.fqdn.eq_ignore_ascii_case(&vh.fqdn) && other_vh.fqdn_type == vh.fqdn_type {
            return Err(format!("duplicate fqdn {} found in {}", vh.fqdn, other_key));
        }
        let claimed = other.claimed_hosts();
        if let Some(alias) = vh
            .aliases
            .iter()
            .find(|a| claimed.iter().any(|c| c.eq_ignore_ascii_case(a)))
        {
            return Err(format!("{} is already in use by hostrule {}", alias, other_key));
        }
    }

    let catalog = &inputs.catalog;
    let refs = [
        (ProfileKind::WafPolicy, vh.waf_policy.as_deref()),
        (ProfileKind::ApplicationProfile, vh.application_profile.as_deref()),
        (ProfileKind::NetworkProfile, vh.network_profile.as_deref()),
        (ProfileKind::AnalyticsProfile, vh.analytics_profile.as_deref()),
        (ProfileKind::ErrorPageProfile, vh.error_page_profile.as_deref()),
    ];
    for (kind, name) in refs {
        if let Some(name) = name {
            catalog.require(kind, name)?;
        }
    }
    for ds in &vh.datascripts {
        catalog.require(ProfileKind::DataScript, ds)?;
    }
    if let Some(policy) = &vh.http_policy {
        for set in &policy.policy_sets {
            catalog.require(ProfileKind::HttpPolicySet, set)?;
        }
    }
    if let Some(tls) = &vh.tls {
        if let Some(profile) = &tls.ssl_profile {
            catalog.require(ProfileKind::SslProfile, profile)?;
        }
        let cert = &tls.ssl_key_certificate;
        if cert.cert_type.eq_ignore_ascii_case("ref") && !cert.name.is_empty() {
            catalog.require(ProfileKind::SslKeyCert, &cert.name)?;
        }
    }
    Ok(())
}

fn check_hash(algorithm: Option<&str>, hash: Option<&str>, header: Option<&str>) -> Result<(), String> {
    let present = |v: Option<&str>| v.map(|s| !s.is_empty()).unwrap_or(false);
    if algorithm == Some(CONSISTENT_HASH) && !present(hash) {
        return Err(format!("lbAlgorithmHash is required for {CONSISTENT_HASH}"));
    }
    if hash == Some(CUSTOM_HEADER_HASH) && !present(header) {
        return Err(format!("hostHeader is required for {CUSTOM_HEADER_HASH}"));
    }
    Ok(())
}

fn http_rule(inputs: &Inputs, key: &NamespacedName, rule: &HTTPRule) -> Result<(), String> {
    let catalog = &inputs.catalog;
    for path in &rule.spec.paths {
        for name in &path.health_monitor_crd_refs {
            let hm_key = NamespacedName::new(key.namespace.clone(), name.clone());
            let Some(hm) = inputs.health_monitors.get(&hm_key) else {
                return Err(format!("HealthMonitor {hm_key} not found"));
            };
            if hm.ready_uuid().is_none() {
                return Err(format!("HealthMonitor {hm_key} is not in ready state"));
            }
        }
        if let Some(lb) = &path.load_balancer_policy {
            check_hash(lb.algorithm.as_deref(), lb.hash.as_deref(), lb.host_header.as_deref())?;
        }
        for monitor in &path.health_monitors {
            catalog.require(ProfileKind::HealthMonitor, monitor)?;
        }
        if let Some(persistence) = &path.application_persistence {
            catalog.require(ProfileKind::PersistenceProfile, persistence)?;
        }
        if let Some(tls) = &path.tls {
            if let Some(profile) = &tls.ssl_profile {
                catalog.require(ProfileKind::SslProfile, profile)?;
            }
            if let Some(pki) = &tls.pki_profile {
                catalog.require(ProfileKind::PkiProfile, pki)?;
            }
        }
    }
    Ok(())
}

fn l4_rule(inputs: &Inputs, rule: &L4Rule) -> Result<(), String> {
    let spec = &rule.spec;
    let catalog = &inputs.catalog;

    for backend in &spec.backend_properties {
        check_hash(
            backend.lb_algorithm.as_deref(),
            backend.lb_algorithm_hash.as_deref(),
            backend.lb_algorithm_consistent_hash_hdr.as_deref(),
        )?;
        for monitor in &backend.health_monitor_refs {
            catalog.require(ProfileKind::HealthMonitor, monitor)?;
        }
        if let Some(persistence) = &backend.application_persistence_profile_ref {
            catalog.require(ProfileKind::PersistenceProfile, persistence)?;
        }
    }

    if let Some(profile) = &spec.application_profile {
        catalog.require(ProfileKind::ApplicationProfile, profile)?;
    }
    if let Some(profile) = &spec.network_profile {
        catalog.require(ProfileKind::NetworkProfile, profile)?;
    }
    if let Some(profile) = &spec.analytics_profile {
        catalog.require(ProfileKind::AnalyticsProfile, profile)?;
    }
    for ds in &spec.vs_datascript_refs {
        catalog.require(ProfileKind::DataScript, ds)?;
    }
    if let Some(profile) = &spec.ssl_profile_ref {
        catalog.require(ProfileKind::SslProfile, profile)?;
    }
    for cert in &spec.ssl_key_certificate_refs {
        catalog.require(ProfileKind::SslKeyCert, cert)?;
    }

    if spec.listener_properties.iter().any(|l| l.enable_ssl) {
        check_l4_ssl(inputs.settings.license_tier, catalog, rule)?;
    }
    Ok(())
}

fn check_l4_ssl(license: LicenseTier, catalog: &ProfileCatalog, rule: &L4Rule) -> Result<(), String> {
    if license != LicenseTier::Enterprise {
        return Err("SSL is supported only with the ENTERPRISE license".to_string());
    }
    let spec = &rule.spec;
    if let Some(profile) = &spec.application_profile {
        match catalog.profile_type(ProfileKind::ApplicationProfile, profile) {
            Some(t) if t != APP_PROFILE_L4_SSL => {
                return Err(format!("applicationProfile {profile} is not SSL capable"));
            }
            _ => {}
        }
    }
    if let Some(profile) = &spec.network_profile {
        match catalog.profile_type(ProfileKind::NetworkProfile, profile) {
            Some(t) if t != NETWORK_PROFILE_TCP_PROXY => {
                return Err(format!("networkProfile {profile} is not TCP proxy"));
            }
            _ => {}
        }
    }
    Ok(())
}

fn infra_setting(setting: &AviInfraSetting) -> Result<(), String> {
    let spec = &setting.spec;
    if let Some(l7) = &spec.l7_settings {
        if l7.shard_size.parse::<crate::config::ShardSize>().is_err() {
            return Err(format!("invalid shardSize {}", l7.shard_size));
        }
    }
    if let Some(network) = &spec.network {
        for vip in &network.vip_networks {
            if vip.network_name.is_empty() {
                return Err("vipNetworks entry has no networkName".to_string());
            }
            if let Some(cidr) = vip.cidr.as_ref().filter(|c| !c.is_empty()) {
                if cidr.parse::<IpNetwork>().is_err() {
                    return Err(format!("invalid cidr {} for network {}", cidr, vip.network_name));
                }
            }
        }
    }
    if let Some(group) = &spec.se_group {
        if group.name.is_empty() {
            return Err("seGroup name must not be empty".to_string());
        }
    }
    Ok(())
}
