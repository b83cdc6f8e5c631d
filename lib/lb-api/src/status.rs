//! Status block shared by the rule CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const ACCEPTED: &str = "Accepted";
pub const REJECTED: &str = "Rejected";

/// Controller-written status of HostRule, HTTPRule, L4Rule and AviInfraSetting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CrdStatus {
    /// Accepted or Rejected
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    /// Reason for rejection, empty when accepted
    #[serde(default)]
    pub error: String,
}

impl CrdStatus {
    pub fn accepted() -> Self {
        Self {
            status: ACCEPTED.to_string(),
            error: String::new(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            status: REJECTED.to_string(),
            error: error.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ACCEPTED
    }
}
