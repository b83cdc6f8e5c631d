//! Fast and slow retry queues for transient controller failures
//!
//! Failed keys are handed to a tier-specific bounded queue. A consumer per
//! tier spawns one task per item: the task sleeps that item's own backoff,
//! then takes a permit from the tier's semaphore and re-runs the key. A key
//! is pending at most once per tier.

use crate::metrics::Metrics;
use async_trait::async_trait;
use lb_core::ModelKey;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryTier {
    Fast,
    Slow,
}

impl RetryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryTier::Fast => "fast",
            RetryTier::Slow => "slow",
        }
    }
}

impl fmt::Display for RetryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub fast_base: Duration,
    pub fast_max_delay: Duration,
    pub fast_max_attempts: u32,
    pub slow_interval: Duration,
    pub slow_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            fast_base: Duration::from_secs(1),
            fast_max_delay: Duration::from_secs(30),
            fast_max_attempts: 10,
            slow_interval: Duration::from_secs(90),
            slow_max_attempts: 20,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based) of a tier
    pub fn backoff(&self, tier: RetryTier, attempt: u32) -> Duration {
        match tier {
            RetryTier::Fast => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.fast_base.saturating_mul(factor).min(self.fast_max_delay)
            }
            RetryTier::Slow => self.slow_interval,
        }
    }

    fn max_attempts(&self, tier: RetryTier) -> u32 {
        match tier {
            RetryTier::Fast => self.fast_max_attempts,
            RetryTier::Slow => self.slow_max_attempts,
        }
    }
}

/// Tracks the current tier and attempt count per key
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<ModelKey, (RetryTier, u32)>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more attempt. A key never drops back from slow to fast until
    /// it is reset; moving up a tier restarts the count.
    pub async fn increment(&self, key: &ModelKey, tier: RetryTier) -> (RetryTier, u32) {
        let mut attempts = self.attempts.lock().await;
        let entry = attempts.entry(key.clone()).or_insert((tier, 0));
        if tier > entry.0 {
            *entry = (tier, 0);
        }
        entry.1 += 1;
        *entry
    }

    /// Reset on a successful sync
    pub async fn reset(&self, key: &ModelKey) {
        self.attempts.lock().await.remove(key);
    }

    pub async fn get(&self, key: &ModelKey) -> Option<(RetryTier, u32)> {
        self.attempts.lock().await.get(key).copied()
    }

    /// Forget keys that no longer exist
    pub async fn cleanup(&self, active: &HashSet<ModelKey>) {
        self.attempts.lock().await.retain(|key, _| active.contains(key));
    }
}

/// A key waiting for its next attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryItem {
    pub key: ModelKey,
    pub tier: RetryTier,
    pub attempt: u32,
    pub delay: Duration,
}

/// Re-runs a key taken off a retry queue
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn retry(&self, key: ModelKey);
}

/// Receiving halves, handed to [`RetryQueues::spawn_consumers`]
pub struct RetryReceivers {
    fast: mpsc::Receiver<RetryItem>,
    slow: mpsc::Receiver<RetryItem>,
}

pub struct RetryQueues {
    policy: RetryPolicy,
    tracker: RetryTracker,
    fast: mpsc::Sender<RetryItem>,
    slow: mpsc::Sender<RetryItem>,
    pending: Mutex<HashSet<(RetryTier, ModelKey)>>,
    metrics: Metrics,
}

impl RetryQueues {
    pub fn new(policy: RetryPolicy, metrics: Metrics) -> (Arc<Self>, RetryReceivers) {
        let (fast_tx, fast_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (slow_tx, slow_rx) = mpsc::channel(QUEUE_CAPACITY);
        let queues = Arc::new(Self {
            policy,
            tracker: RetryTracker::new(),
            fast: fast_tx,
            slow: slow_tx,
            pending: Mutex::new(HashSet::new()),
            metrics,
        });
        (
            queues,
            RetryReceivers {
                fast: fast_rx,
                slow: slow_rx,
            },
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &RetryTracker {
        &self.tracker
    }

    /// Schedule a failed key. Returns the scheduled item, or None when the
    /// key is already pending, has exhausted its attempts, or the queue is
    /// full.
    pub async fn enqueue(&self, key: &ModelKey, tier: RetryTier) -> Option<RetryItem> {
        {
            let pending = self.pending.lock().await;
            if pending.iter().any(|(_, k)| k == key) {
                debug!(key = %key, "Retry already pending");
                return None;
            }
        }

        let (mut tier, mut attempt) = self.tracker.increment(key, tier).await;
        if tier == RetryTier::Fast && attempt > self.policy.max_attempts(RetryTier::Fast) {
            self.metrics
                .retry_exhausted_total
                .with_label_values(&[RetryTier::Fast.as_str()])
                .inc();
            warn!(key = %key, attempts = attempt - 1, "Fast retries exhausted, escalating to slow retry");
            (tier, attempt) = self.tracker.increment(key, RetryTier::Slow).await;
        }
        if tier == RetryTier::Slow && attempt > self.policy.max_attempts(RetryTier::Slow) {
            self.metrics
                .retry_exhausted_total
                .with_label_values(&[RetryTier::Slow.as_str()])
                .inc();
            warn!(key = %key, attempts = attempt - 1, "Slow retries exhausted, waiting for the next change");
            self.tracker.reset(key).await;
            return None;
        }

        let item = RetryItem {
            key: key.clone(),
            tier,
            attempt,
            delay: self.policy.backoff(tier, attempt),
        };
        self.pending.lock().await.insert((tier, key.clone()));
        let sender = match tier {
            RetryTier::Fast => &self.fast,
            RetryTier::Slow => &self.slow,
        };
        match sender.try_send(item.clone()) {
            Ok(()) => {
                self.metrics.retry_enqueued_total.with_label_values(&[tier.as_str()]).inc();
                self.metrics.retry_queue_depth.with_label_values(&[tier.as_str()]).inc();
                debug!(key = %key, %tier, attempt, delay_ms = item.delay.as_millis() as u64, "Scheduled retry");
                Some(item)
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                warn!(key = %key, %tier, "Retry queue unavailable, dropping key until its next change");
                self.pending.lock().await.remove(&(tier, key.clone()));
                None
            }
        }
    }

    /// Clear a key's attempt count after a successful sync
    pub async fn reset(&self, key: &ModelKey) {
        self.tracker.reset(key).await;
    }

    async fn take(&self, item: &RetryItem) {
        if self.pending.lock().await.remove(&(item.tier, item.key.clone())) {
            self.metrics
                .retry_queue_depth
                .with_label_values(&[item.tier.as_str()])
                .dec();
        }
    }

    /// Start one consumer per tier, each running at most `concurrency` keys
    /// at a time
    pub fn spawn_consumers(
        self: &Arc<Self>,
        receivers: RetryReceivers,
        handler: Arc<dyn RetryHandler>,
        concurrency: usize,
    ) -> Vec<JoinHandle<()>> {
        let concurrency = concurrency.max(1);
        vec![
            tokio::spawn(consume(self.clone(), receivers.fast, handler.clone(), concurrency)),
            tokio::spawn(consume(self.clone(), receivers.slow, handler, concurrency)),
        ]
    }
}

async fn consume(
    queues: Arc<RetryQueues>,
    mut rx: mpsc::Receiver<RetryItem>,
    handler: Arc<dyn RetryHandler>,
    concurrency: usize,
) {
    let permits = Arc::new(Semaphore::new(concurrency));
    while let Some(item) = rx.recv().await {
        let queues = queues.clone();
        let handler = handler.clone();
        let permits = permits.clone();
        tokio::spawn(async move {
            tokio::time::sleep(item.delay).await;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            queues.take(&item).await;
            debug!(key = %item.key, tier = %item.tier, attempt = item.attempt, "Retrying key");
            handler.retry(item.key).await;
        });
    }
    debug!("Retry queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedSender;

    fn key(name: &str) -> ModelKey {
        ModelKey::new("admin", name)
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            fast_base: Duration::from_millis(1),
            fast_max_delay: Duration::from_millis(4),
            fast_max_attempts: 2,
            slow_interval: Duration::from_millis(5),
            slow_max_attempts: 1,
        }
    }

    struct Recorder(UnboundedSender<ModelKey>);

    #[async_trait]
    impl RetryHandler for Recorder {
        async fn retry(&self, key: ModelKey) {
            let _ = self.0.send(key);
        }
    }

    #[test]
    fn test_default_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(RetryTier::Fast, 1), Duration::from_secs(1));
        assert_eq!(policy.backoff(RetryTier::Fast, 2), Duration::from_secs(2));
        assert_eq!(policy.backoff(RetryTier::Fast, 5), Duration::from_secs(16));
        assert_eq!(policy.backoff(RetryTier::Fast, 6), Duration::from_secs(30));
        assert_eq!(policy.backoff(RetryTier::Fast, 40), Duration::from_secs(30));
        assert_eq!(policy.backoff(RetryTier::Slow, 7), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_tracker_never_drops_a_tier() {
        let tracker = RetryTracker::new();
        let k = key("vs");
        assert_eq!(tracker.increment(&k, RetryTier::Fast).await, (RetryTier::Fast, 1));
        assert_eq!(tracker.increment(&k, RetryTier::Slow).await, (RetryTier::Slow, 1));
        assert_eq!(tracker.increment(&k, RetryTier::Fast).await, (RetryTier::Slow, 2));
        tracker.reset(&k).await;
        assert_eq!(tracker.get(&k).await, None);
    }

    #[tokio::test]
    async fn test_escalation_then_exhaustion() {
        let (queues, _rx) = RetryQueues::new(quick_policy(), Metrics::new().unwrap());
        let k = key("vs");

        for expected in [1, 2] {
            let item = queues.enqueue(&k, RetryTier::Fast).await.unwrap();
            assert_eq!((item.tier, item.attempt), (RetryTier::Fast, expected));
            queues.take(&item).await;
        }
        let item = queues.enqueue(&k, RetryTier::Fast).await.unwrap();
        assert_eq!((item.tier, item.attempt), (RetryTier::Slow, 1));
        queues.take(&item).await;

        assert!(queues.enqueue(&k, RetryTier::Fast).await.is_none());
        assert_eq!(queues.tracker().get(&k).await, None);
        assert!(queues.metrics.gather().unwrap().contains("retry_exhausted_total{tier=\"slow\"} 1"));
    }

    #[tokio::test]
    async fn test_pending_keys_are_deduplicated() {
        let (queues, _rx) = RetryQueues::new(quick_policy(), Metrics::new().unwrap());
        let k = key("vs");
        assert!(queues.enqueue(&k, RetryTier::Fast).await.is_some());
        assert!(queues.enqueue(&k, RetryTier::Fast).await.is_none());
        assert!(queues.enqueue(&k, RetryTier::Slow).await.is_none());
        assert_eq!(queues.tracker().get(&k).await, Some((RetryTier::Fast, 1)));
    }

    #[tokio::test]
    async fn test_consumers_rerun_keys() {
        let (queues, receivers) = RetryQueues::new(quick_policy(), Metrics::new().unwrap());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        queues.spawn_consumers(receivers, Arc::new(Recorder(tx)), 2);

        queues.enqueue(&key("a"), RetryTier::Fast).await.unwrap();
        queues.enqueue(&key("b"), RetryTier::Slow).await.unwrap();

        let mut seen = vec![rx.recv().await.unwrap().name, rx.recv().await.unwrap().name];
        seen.sort();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
        // Taken off the queue, so the key can be scheduled again
        assert!(queues.enqueue(&key("a"), RetryTier::Fast).await.is_some());
    }
}
