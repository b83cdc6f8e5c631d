use crate::status::CrdStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HostRule overrides virtual service properties for an FQDN
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ako.vmware.com",
    version = "v1beta1",
    kind = "HostRule",
    plural = "hostrules",
    namespaced,
    derive = "Default",
    status = "CrdStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.virtualhost.fqdn"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
)]
pub struct HostRuleSpec {
    /// Virtual host settings
    #[serde(rename = "virtualhost")]
    pub virtual_host: VirtualHost,
}

/// How the `fqdn` field is matched against programmed hosts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FqdnType {
    #[default]
    Exact,
    Wildcard,
    Contains,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    /// Host the rule applies to
    pub fqdn: String,

    #[serde(default)]
    pub fqdn_type: FqdnType,

    /// Enable or disable the virtual service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_virtual_host: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<HostRuleTls>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_policy: Option<HostRuleHttpPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub waf_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_page_profile: Option<String>,

    /// Datascript set names attached in order
    #[serde(default)]
    pub datascripts: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_policy: Option<AnalyticsPolicy>,

    /// Listener overrides; explicit ports replace the defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpSettings>,

    /// Additional FQDNs served by the same virtual host
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Treat ingress paths as regular expressions
    #[serde(default)]
    pub use_regex: bool,

    /// Redirect requests for "/" to this path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_root_path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleTls {
    pub ssl_key_certificate: SslKeyCertificate,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,

    /// Only "edge" is supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SslKeyCertificate {
    pub name: String,

    /// "ref" for a controller object, "secret" for a Kubernetes Secret
    #[serde(rename = "type", default = "default_cert_type")]
    pub cert_type: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleHttpPolicy {
    #[serde(default)]
    pub policy_sets: Vec<String>,

    /// Replace generated policies instead of appending to them
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_client_logs: Option<FullClientLogs>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_all_headers: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FullClientLogs {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_throttle")]
    pub throttle: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpSettings {
    #[serde(default)]
    pub listeners: Vec<TcpListener>,

    #[serde(rename = "loadBalancerIP", skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpListener {
    pub port: u16,

    #[serde(rename = "enableSSL", default)]
    pub enable_ssl: bool,
}

impl HostRule {
    /// All hosts this rule claims: the FQDN followed by its aliases
    pub fn claimed_hosts(&self) -> Vec<&str> {
        let vh = &self.spec.virtual_host;
        std::iter::once(vh.fqdn.as_str())
            .chain(vh.aliases.iter().map(String::as_str))
            .collect()
    }
}

fn default_cert_type() -> String {
    "ref".to_string()
}

fn default_throttle() -> String {
    "HIGH".to_string()
}
