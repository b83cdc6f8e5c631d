//! Synchronization of virtual-service graphs with the load-balancer controller
//!
//! This library provides:
//! - The controller REST client and an in-memory controller for tests
//! - Error classification into retry tiers
//! - The local mirror of controller-owned objects
//! - The reconciler applying one graph at a time
//! - Fast and slow retry queues
//! - The pipeline tying inputs, builds, syncs and status together

pub mod cache;
pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod objects;
pub mod pipeline;
pub mod reconcile;
pub mod retry;

pub use cache::{CacheEntry, ObjectCache, SyncState};
pub use client::{AviClient, RestClient};
pub use error::{AviError, ErrorClassifier, RestError, Result, RetryClass};
pub use memory::InMemoryController;
pub use metrics::Metrics;
pub use pipeline::{FullSyncReport, Pipeline};
pub use reconcile::{Reconciler, SyncOutcome};
pub use retry::{RetryPolicy, RetryQueues, RetryTier};
