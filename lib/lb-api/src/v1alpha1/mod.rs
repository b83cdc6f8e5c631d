/// API version v1alpha1 for HealthMonitor

pub mod health_monitor;

pub use health_monitor::HealthMonitor;

pub const API_VERSION: &str = "v1alpha1";
