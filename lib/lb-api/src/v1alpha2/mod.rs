/// API version v1alpha2 for L4Rule

pub mod l4_rule;

pub use l4_rule::L4Rule;

pub const API_VERSION: &str = "v1alpha2";
