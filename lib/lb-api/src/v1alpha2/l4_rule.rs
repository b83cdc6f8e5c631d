use crate::status::CrdStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// L4Rule overrides the virtual service and pools generated for a LoadBalancer Service
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ako.vmware.com",
    version = "v1alpha2",
    kind = "L4Rule",
    plural = "l4rules",
    namespaced,
    derive = "Default",
    status = "CrdStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct L4RuleSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_profile: Option<String>,

    #[serde(default)]
    pub vs_datascript_refs: Vec<String>,

    #[serde(rename = "loadBalancerIP", skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Listener ports; must be a subset of the Service's ports
    #[serde(default)]
    pub listener_properties: Vec<ListenerProperties>,

    #[serde(default)]
    pub ssl_key_certificate_refs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile_ref: Option<String>,

    #[serde(default)]
    pub backend_properties: Vec<BackendProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListenerProperties {
    pub port: u16,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub enable_ssl: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendProperties {
    pub port: u16,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm_consistent_hash_hdr: Option<String>,

    #[serde(default)]
    pub health_monitor_refs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_persistence_profile_ref: Option<String>,
}

fn default_protocol() -> String {
    "TCP".to_string()
}
