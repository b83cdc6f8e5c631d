use crate::status::CrdStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HTTPRule overrides pool properties for paths under an FQDN
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ako.vmware.com",
    version = "v1beta1",
    kind = "HTTPRule",
    plural = "httprules",
    namespaced,
    derive = "Default",
    status = "CrdStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.fqdn"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
)]
pub struct HTTPRuleSpec {
    /// Host the rule applies to
    pub fqdn: String,

    /// Per-path pool settings
    #[serde(default)]
    pub paths: Vec<HTTPRulePath>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRulePath {
    /// Path prefix matched against ingress paths
    pub target: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_policy: Option<LoadBalancerPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<HTTPRuleTls>,

    /// Health monitors already present on the controller, by name
    #[serde(default)]
    pub health_monitors: Vec<String>,

    /// HealthMonitor resources in the rule's namespace
    #[serde(default)]
    pub health_monitor_crd_refs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_persistence: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_http2: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Header name used with LB_ALGORITHM_CONSISTENT_HASH_CUSTOM_HEADER
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRuleTls {
    /// Only "reencrypt" is supported
    #[serde(rename = "type")]
    pub tls_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,

    #[serde(rename = "destinationCA", skip_serializing_if = "Option::is_none")]
    pub destination_ca: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pki_profile: Option<String>,
}
