//! User-visible status produced by translation and sync

use crate::event::NamespacedName;
use crate::model::RuleRef;
use lb_api::CrdStatus;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// One `status.loadBalancer.ingress[]` entry
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadBalancerEntry {
    pub ip: String,
    pub hostname: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusUpdate {
    Rule { rule: RuleRef, status: CrdStatus },
    Ingress { ingress: NamespacedName, entries: Vec<LoadBalancerEntry> },
    Service { service: NamespacedName, entries: Vec<LoadBalancerEntry> },
}

/// Receives status changes; implementations must not block
pub trait StatusSink: Send + Sync {
    fn publish(&self, update: StatusUpdate);
}

impl StatusSink for UnboundedSender<StatusUpdate> {
    fn publish(&self, update: StatusUpdate) {
        if let Err(e) = self.send(update) {
            warn!("Status writer is gone, dropping update: {:?}", e.0);
        }
    }
}

/// Records updates in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Latest status published for a rule
    pub fn rule_status(&self, rule: &RuleRef) -> Option<CrdStatus> {
        self.updates().into_iter().rev().find_map(|u| match u {
            StatusUpdate::Rule { rule: r, status } if &r == rule => Some(status),
            _ => None,
        })
    }

    /// Latest load-balancer entries published for an ingress
    pub fn ingress_status(&self, ingress: &NamespacedName) -> Option<Vec<LoadBalancerEntry>> {
        self.updates().into_iter().rev().find_map(|u| match u {
            StatusUpdate::Ingress { ingress: i, entries } if &i == ingress => Some(entries),
            _ => None,
        })
    }

    pub fn clear(&self) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.clear();
        }
    }
}

impl StatusSink for MemorySink {
    fn publish(&self, update: StatusUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}
