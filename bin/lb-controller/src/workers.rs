//! Key-sharded worker pool
//!
//! A target always lands on the worker its graph key hashes to, so changes
//! to one virtual service are processed in order while other keys proceed
//! in parallel. A target already waiting in a queue is not queued twice.

use lb_avi::Pipeline;
use lb_core::{BuildTarget, ModelKey};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

const QUEUE_DEPTH: usize = 4096;

pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    senders: Vec<mpsc::Sender<BuildTarget>>,
    pending: Arc<Mutex<HashSet<BuildTarget>>>,
}

impl WorkerPool {
    pub fn spawn(pipeline: Arc<Pipeline>, count: usize) -> (Self, Vec<JoinHandle<()>>) {
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let mut senders = Vec::with_capacity(count.max(1));
        let mut handles = Vec::with_capacity(count.max(1));
        for id in 0..count.max(1) {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(id, pipeline.clone(), rx, pending.clone())));
        }
        (
            Self {
                pipeline,
                senders,
                pending,
            },
            handles,
        )
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    fn shard(&self, key: &ModelKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue a target on its key's worker
    pub async fn submit(&self, target: BuildTarget) {
        if !self.pending.lock().await.insert(target.clone()) {
            debug!(%target, "Target already queued");
            return;
        }
        let key = self.pipeline.model_key(&target);
        let shard = self.shard(&key);
        if let Err(e) = self.senders[shard].send(target).await {
            warn!(key = %key, shard, "Worker is gone, dropping target");
            self.pending.lock().await.remove(&e.0);
        }
    }
}

#[instrument(skip(pipeline, rx, pending))]
async fn run_worker(
    id: usize,
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<BuildTarget>,
    pending: Arc<Mutex<HashSet<BuildTarget>>>,
) {
    while let Some(target) = rx.recv().await {
        pending.lock().await.remove(&target);
        pipeline.process_target(&target).await;
    }
    debug!("Worker queue closed");
}
