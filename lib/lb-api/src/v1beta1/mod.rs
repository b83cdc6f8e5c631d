/// API version v1beta1 for HostRule, HTTPRule and AviInfraSetting

pub mod host_rule;
pub mod http_rule;
pub mod infra_setting;

pub use host_rule::HostRule;
pub use http_rule::HTTPRule;
pub use infra_setting::AviInfraSetting;

pub const API_VERSION: &str = "v1beta1";
