//! Custom resources and annotation keys consumed by the load-balancer controller
//!
//! This library defines the ako.vmware.com resources that tune how Kubernetes
//! networking objects are translated into virtual services:
//! - HostRule: virtual-service level overrides for an FQDN
//! - HTTPRule: pool level overrides for FQDN/path pairs
//! - L4Rule: overrides for LoadBalancer Services
//! - AviInfraSetting: SE group, VIP network and shard scheme selection
//! - HealthMonitor: health monitors created on the remote controller

pub mod annotations;
pub mod status;
pub mod v1alpha1;
pub mod v1alpha2;
pub mod v1beta1;

pub use status::{CrdStatus, ACCEPTED, REJECTED};
pub use v1alpha1::HealthMonitor;
pub use v1alpha2::L4Rule;
pub use v1beta1::{AviInfraSetting, HTTPRule, HostRule};

/// API group shared by every resource in this crate
pub const API_GROUP: &str = "ako.vmware.com";
