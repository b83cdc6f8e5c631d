use crate::status::CrdStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// AviInfraSetting selects placement and sharding for the objects bound to it
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ako.vmware.com",
    version = "v1beta1",
    kind = "AviInfraSetting",
    plural = "aviinfrasettings",
    derive = "Default",
    status = "CrdStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct AviInfraSettingSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub se_group: Option<SeGroup>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<InfraNetwork>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub l7_settings: Option<L7Settings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SeGroup {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraNetwork {
    #[serde(default)]
    pub vip_networks: Vec<VipNetwork>,

    /// Advertise VIPs through route health injection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_rhi: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VipNetwork {
    pub network_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct L7Settings {
    /// LARGE, MEDIUM, SMALL or DEDICATED
    pub shard_size: String,
}
