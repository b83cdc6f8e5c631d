use crate::status::ACCEPTED;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HealthMonitor is created on the remote controller by its own operator;
/// this controller only reads its status to resolve references.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ako.vmware.com",
    version = "v1alpha1",
    kind = "HealthMonitor",
    plural = "healthmonitors",
    namespaced,
    derive = "Default",
    status = "HealthMonitorStatus",
)]
pub struct HealthMonitorSpec {
    /// HEALTH_MONITOR_TCP, HEALTH_MONITOR_HTTP, ...
    #[serde(rename = "type", default)]
    pub monitor_type: String,

    #[serde(default = "default_send_interval")]
    pub send_interval: i32,

    #[serde(default = "default_receive_timeout")]
    pub receive_timeout: i32,

    #[serde(default = "default_checks")]
    pub successful_checks: i32,

    #[serde(default = "default_checks")]
    pub failed_checks: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_port: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HealthMonitorStatus {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub error: String,

    /// UUID of the monitor on the controller once created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl HealthMonitor {
    /// Remote UUID when the monitor is accepted and programmed
    pub fn ready_uuid(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        if status.status != ACCEPTED {
            return None;
        }
        status.uuid.as_deref().filter(|u| !u.is_empty())
    }
}

fn default_send_interval() -> i32 {
    10
}

fn default_receive_timeout() -> i32 {
    4
}

fn default_checks() -> i32 {
    2
}
