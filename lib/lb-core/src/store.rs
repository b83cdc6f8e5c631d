//! Keyed registry of the current graphs

use crate::builder::BuildTarget;
use crate::model::{Graph, ModelKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
pub struct Slot {
    graph: Option<Arc<Graph>>,
    target: Option<BuildTarget>,
}

/// GraphStore holds one live graph per (tenant, VS name). Every mutation
/// happens under that key's lock, so events touching the same virtual
/// service are serialized while other keys proceed in parallel.
pub struct GraphStore {
    slots: RwLock<HashMap<ModelKey, Arc<Mutex<Slot>>>>,
}

/// Exclusive access to one key
pub struct KeyGuard {
    key: ModelKey,
    slot: OwnedMutexGuard<Slot>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a key, creating its slot on first use
    pub async fn lock(&self, key: &ModelKey) -> KeyGuard {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(key).cloned()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write().await;
                slots.entry(key.clone()).or_default().clone()
            }
        };
        KeyGuard {
            key: key.clone(),
            slot: slot.lock_owned().await,
        }
    }

    /// Snapshot of a graph
    pub async fn get(&self, key: &ModelKey) -> Option<Arc<Graph>> {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(key).cloned()?
        };
        let guard = slot.lock().await;
        guard.graph.clone()
    }

    /// Keys with a live graph, and the targets that built them
    pub async fn targets(&self) -> Vec<(ModelKey, BuildTarget)> {
        let slots: Vec<(ModelKey, Arc<Mutex<Slot>>)> = {
            let slots = self.slots.read().await;
            slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut out = Vec::new();
        for (key, slot) in slots {
            let guard = slot.lock().await;
            if let (Some(_), Some(target)) = (&guard.graph, &guard.target) {
                out.push((key, target.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub async fn len(&self) -> usize {
        self.targets().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop slots that hold no graph and are not locked or awaited by anyone
    pub async fn prune(&self) {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.graph.is_some(),
                Err(_) => true,
            }
        });
        if slots.len() != before {
            debug!("Pruned {} empty graph slots", before - slots.len());
        }
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGuard {
    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn graph(&self) -> Option<Arc<Graph>> {
        self.slot.graph.clone()
    }

    pub fn target(&self) -> Option<&BuildTarget> {
        self.slot.target.as_ref()
    }

    /// Store a new graph; returns false when its checksum is unchanged
    pub fn replace(&mut self, graph: Graph, target: BuildTarget) -> bool {
        let changed = self
            .slot
            .graph
            .as_ref()
            .map(|g| g.checksum() != graph.checksum())
            .unwrap_or(true);
        self.slot.graph = Some(Arc::new(graph));
        self.slot.target = Some(target);
        changed
    }

    /// Remove the graph; readers see either the old graph or nothing
    pub fn remove(&mut self) -> Option<Arc<Graph>> {
        self.slot.target = None;
        self.slot.graph.take()
    }
}
