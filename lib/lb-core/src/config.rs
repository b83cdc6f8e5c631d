//! Controller settings loaded from an optional YAML file and the environment

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

/// Environment variable naming the optional YAML settings file
pub const CONFIG_PATH_ENV: &str = "LB_CONTROLLER_CONFIG";

/// Number of shared L7 virtual services, or one per host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShardSize {
    Large,
    #[default]
    Medium,
    Small,
    Dedicated,
}

impl ShardSize {
    /// Number of shared virtual services; zero means dedicated
    pub fn vs_count(&self) -> u32 {
        match self {
            ShardSize::Large => 8,
            ShardSize::Medium => 4,
            ShardSize::Small => 1,
            ShardSize::Dedicated => 0,
        }
    }

    pub fn is_dedicated(&self) -> bool {
        matches!(self, ShardSize::Dedicated)
    }
}

impl FromStr for ShardSize {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LARGE" => Ok(ShardSize::Large),
            "MEDIUM" => Ok(ShardSize::Medium),
            "SMALL" => Ok(ShardSize::Small),
            "DEDICATED" => Ok(ShardSize::Dedicated),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown shard size {other}"
            ))),
        }
    }
}

/// How pool servers are addressed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    /// Pod IPs from endpoints; requires static routes to pod CIDRs
    #[default]
    ClusterIP,
    /// Node IPs with the service node port
    NodePort,
}

impl FromStr for ServiceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ClusterIP" => Ok(ServiceType::ClusterIP),
            "NodePort" => Ok(ServiceType::NodePort),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown service type {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LicenseTier {
    #[default]
    Enterprise,
    Essentials,
    Basic,
}

impl FromStr for LicenseTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENTERPRISE" => Ok(LicenseTier::Enterprise),
            "ESSENTIALS" => Ok(LicenseTier::Essentials),
            "BASIC" => Ok(LicenseTier::Basic),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown license tier {other}"
            ))),
        }
    }
}

/// Keying of TLS child virtual services
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SniNaming {
    /// One child per TLS host
    #[default]
    Host,
    /// One child per (namespace, ingress, secret)
    Secret,
}

impl FromStr for SniNaming {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(SniNaming::Host),
            "secret" => Ok(SniNaming::Secret),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown SNI naming {other}"
            ))),
        }
    }
}

/// Network used for pool server placement
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetwork {
    pub network_name: String,
    #[serde(default)]
    pub cidrs: Vec<String>,
}

/// Extra REST error classification rule, evaluated before the built-in table
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRuleConfig {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub message_contains: Option<String>,
    /// fast, slow, permanent or ignore
    pub class: String,
}

/// Remote controller connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_controller_version")]
    pub version: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Accept the controller's self-signed certificate
    #[serde(default)]
    pub insecure: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            version: default_controller_version(),
            request_timeout_secs: default_request_timeout(),
            insecure: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub cluster_name: String,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default = "default_cloud")]
    pub cloud_name: String,

    #[serde(default)]
    pub shard_size: ShardSize,

    #[serde(default)]
    pub service_type: ServiceType,

    #[serde(default)]
    pub endpoint_slices_enabled: bool,

    /// Suffix for synthetic hosts of host-less ingress rules
    #[serde(default)]
    pub domain_suffix: Option<String>,

    #[serde(default = "default_vrf")]
    pub vrf_name: String,

    #[serde(default)]
    pub license_tier: LicenseTier,

    #[serde(default)]
    pub sni_naming: SniNaming,

    /// Shared virtual services use enhanced virtual hosting: every host gets
    /// a child, secure or not, matched by host on the parent's listeners
    #[serde(default)]
    pub enable_evh: bool,

    #[serde(default)]
    pub se_group: Option<String>,

    #[serde(default)]
    pub vip_network_list: Vec<String>,

    #[serde(default)]
    pub node_network_list: Vec<NodeNetwork>,

    /// Controller name on IngressClasses handled by this process
    #[serde(default = "default_ingress_controller")]
    pub ingress_controller_name: String,

    #[serde(default)]
    pub error_classification: Vec<ErrorRuleConfig>,

    #[serde(default)]
    pub controller: ControllerSettings,

    /// Use the in-memory controller instead of REST calls
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_full_sync_interval")]
    pub full_sync_interval_secs: u64,

    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            tenant: default_tenant(),
            cloud_name: default_cloud(),
            shard_size: ShardSize::default(),
            service_type: ServiceType::default(),
            endpoint_slices_enabled: false,
            domain_suffix: None,
            vrf_name: default_vrf(),
            license_tier: LicenseTier::default(),
            sni_naming: SniNaming::default(),
            enable_evh: false,
            se_group: None,
            vip_network_list: Vec::new(),
            node_network_list: Vec::new(),
            ingress_controller_name: default_ingress_controller(),
            error_classification: Vec::new(),
            controller: ControllerSettings::default(),
            dry_run: false,
            worker_count: default_worker_count(),
            full_sync_interval_secs: default_full_sync_interval(),
            admin_port: default_admin_port(),
        }
    }
}

impl Settings {
    /// Load from the file named by `LB_CONTROLLER_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                info!("Loading settings from {}", path);
                Self::from_yaml(&std::fs::read_to_string(&path)?)?
            }
            Err(_) => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Override fields from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CLUSTER_NAME") {
            self.cluster_name = v;
        }
        if let Some(v) = get("TENANT_NAME") {
            self.tenant = v;
        }
        if let Some(v) = get("CLOUD_NAME") {
            self.cloud_name = v;
        }
        if let Some(v) = get("SHARD_VS_SIZE") {
            self.shard_size = v.parse()?;
        }
        if let Some(v) = get("L7_SHARD_SCHEME") {
            if !v.trim().eq_ignore_ascii_case("hostname") {
                return Err(CoreError::InvalidConfiguration(format!(
                    "L7_SHARD_SCHEME {v} is not supported, only hostname sharding is"
                )));
            }
        }
        if let Some(v) = get("SERVICE_TYPE") {
            self.service_type = v.parse()?;
        }
        if let Some(v) = get("ENDPOINTSLICES_ENABLED") {
            self.endpoint_slices_enabled = parse_bool(&v);
        }
        if let Some(v) = get("DOMAIN_SUFFIX") {
            self.domain_suffix = Some(v);
        }
        if let Some(v) = get("VRF_NAME") {
            self.vrf_name = v;
        }
        if let Some(v) = get("LICENSE_TIER") {
            self.license_tier = v.parse()?;
        }
        if let Some(v) = get("SNI_NAMING") {
            self.sni_naming = v.parse()?;
        }
        if let Some(v) = get("ENABLE_EVH") {
            self.enable_evh = parse_bool(&v);
        }
        if let Some(v) = get("SEG_NAME") {
            self.se_group = Some(v);
        }
        if let Some(v) = get("CTRL_IPADDRESS") {
            self.controller.host = v;
        }
        if let Some(v) = get("CTRL_USERNAME") {
            self.controller.username = v;
        }
        if let Some(v) = get("CTRL_PASSWORD") {
            self.controller.password = v;
        }
        if let Some(v) = get("CTRL_VERSION") {
            self.controller.version = v;
        }
        if let Some(v) = get("DRY_RUN") {
            self.dry_run = parse_bool(&v);
        }
        if let Some(v) = get("WORKER_COUNT") {
            self.worker_count = parse_number(&v, "WORKER_COUNT")?;
        }
        if let Some(v) = get("FULL_SYNC_INTERVAL_SECS") {
            self.full_sync_interval_secs = parse_number(&v, "FULL_SYNC_INTERVAL_SECS")?;
        }
        if let Some(v) = get("ADMIN_PORT") {
            self.admin_port = parse_number(&v, "ADMIN_PORT")?;
        }

        debug!(
            cluster = %self.cluster_name,
            tenant = %self.tenant,
            shard_size = ?self.shard_size,
            service_type = ?self.service_type,
            "Applied environment overrides"
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "clusterName must be set".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(CoreError::InvalidConfiguration(
                "workerCount must be greater than zero".to_string(),
            ));
        }
        if !self.dry_run
            && (self.controller.host.is_empty() || self.controller.username.is_empty())
        {
            return Err(CoreError::InvalidConfiguration(
                "controller host and username are required unless dryRun is set".to_string(),
            ));
        }
        for network in &self.node_network_list {
            for cidr in &network.cidrs {
                cidr.parse::<ipnetwork::IpNetwork>().map_err(|e| {
                    CoreError::InvalidConfiguration(format!(
                        "node network {} has invalid cidr {}: {}",
                        network.network_name, cidr, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Value of `created_by` stamped on every remote object
    pub fn created_by(&self) -> String {
        format!("ako-{}", self.cluster_name)
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_number<T: FromStr>(v: &str, key: &str) -> Result<T> {
    v.trim()
        .parse()
        .map_err(|_| CoreError::InvalidConfiguration(format!("{key} must be a number, got {v}")))
}

fn default_tenant() -> String {
    "admin".to_string()
}

fn default_cloud() -> String {
    "Default-Cloud".to_string()
}

fn default_vrf() -> String {
    "global".to_string()
}

fn default_ingress_controller() -> String {
    "ako.vmware.com/avi-lb".to_string()
}

fn default_controller_version() -> String {
    "22.1.3".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_worker_count() -> usize {
    8
}

fn default_full_sync_interval() -> u64 {
    300
}

fn default_admin_port() -> u16 {
    9090
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_yaml_defaults() {
        let settings = Settings::from_yaml("clusterName: demo\ndryRun: true\n").unwrap();
        assert_eq!(settings.cluster_name, "demo");
        assert_eq!(settings.tenant, "admin");
        assert_eq!(settings.shard_size, ShardSize::Medium);
        assert_eq!(settings.service_type, ServiceType::ClusterIP);
        assert!(!settings.enable_evh);
        assert_eq!(settings.created_by(), "ako-demo");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CLUSTER_NAME", "c1"),
            ("SHARD_VS_SIZE", "large"),
            ("SERVICE_TYPE", "NodePort"),
            ("ENDPOINTSLICES_ENABLED", "true"),
            ("ENABLE_EVH", "true"),
            ("WORKER_COUNT", "3"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.cluster_name, "c1");
        assert_eq!(settings.shard_size, ShardSize::Large);
        assert_eq!(settings.shard_size.vs_count(), 8);
        assert_eq!(settings.service_type, ServiceType::NodePort);
        assert!(settings.endpoint_slices_enabled);
        assert!(settings.enable_evh);
        assert_eq!(settings.worker_count, 3);
    }

    #[test]
    fn test_invalid_shard_size_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(|k| (k == "SHARD_VS_SIZE").then(|| "HUGE".to_string()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_only_hostname_sharding() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_env(|k| (k == "L7_SHARD_SCHEME").then(|| "hostname".to_string()))
            .is_ok());
        assert!(settings
            .apply_env(|k| (k == "L7_SHARD_SCHEME").then(|| "namespace".to_string()))
            .is_err());
    }

    #[test]
    fn test_validate_requires_controller_unless_dry_run() {
        let mut settings = Settings {
            cluster_name: "c1".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.dry_run = true;
        assert!(settings.validate().is_ok());

        settings.node_network_list.push(NodeNetwork {
            network_name: "net".to_string(),
            cidrs: vec!["not-a-cidr".to_string()],
        });
        assert!(settings.validate().is_err());
    }
}
