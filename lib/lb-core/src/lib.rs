//! Translation of Kubernetes networking intent into virtual-service graphs
//!
//! This library provides:
//! - Deterministic object naming and checksums
//! - The typed graph model describing one virtual service and its children
//! - An input store holding the watched Kubernetes objects and rule status
//! - The graph builder compiling inputs into graphs
//! - A keyed graph store with per-key serialization

pub mod builder;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod naming;
pub mod objects;
pub mod status;
pub mod store;

pub use builder::{BuildOutput, BuildTarget, GraphBuilder};
pub use catalog::{ProfileCatalog, ProfileKind};
pub use config::Settings;
pub use error::{CoreError, Result};
pub use event::{Input, InputKind, NamespacedName, ObjectRef};
pub use model::{Graph, GraphNode, ModelKey, ObjectKind, RuleKind, RuleRef};
pub use objects::{Inputs, ObjectStore};
pub use status::{LoadBalancerEntry, MemorySink, StatusSink, StatusUpdate};
pub use store::GraphStore;
