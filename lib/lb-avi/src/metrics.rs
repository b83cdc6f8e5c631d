//! Prometheus metrics for the sync engine

use crate::error::Result;
use prometheus::{CounterVec, Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics shared by the reconciler, the cache and the retry queues
#[derive(Clone)]
pub struct Metrics {
    /// REST calls by method, object kind and result
    pub rest_operations_total: CounterVec,
    /// Keys handed to a retry tier
    pub retry_enqueued_total: CounterVec,
    /// Keys that used up a tier's attempts
    pub retry_exhausted_total: CounterVec,
    /// Keys waiting in a retry tier
    pub retry_queue_depth: IntGaugeVec,
    /// Cached remote objects by kind
    pub cache_objects: IntGaugeVec,
    /// Failed listings during a cache refresh
    pub cache_refresh_failures_total: CounterVec,
    /// Graph syncs by outcome
    pub graph_syncs_total: CounterVec,
    pub registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let rest_operations_total = CounterVec::new(
            Opts::new("rest_operations_total", "REST calls made to the controller"),
            &["method", "kind", "result"],
        )?;
        let retry_enqueued_total = CounterVec::new(
            Opts::new("retry_enqueued_total", "Keys enqueued for retry"),
            &["tier"],
        )?;
        let retry_exhausted_total = CounterVec::new(
            Opts::new("retry_exhausted_total", "Keys that exhausted their retry attempts"),
            &["tier"],
        )?;
        let retry_queue_depth = IntGaugeVec::new(
            Opts::new("retry_queue_depth", "Keys pending in a retry queue"),
            &["tier"],
        )?;
        let cache_objects = IntGaugeVec::new(
            Opts::new("cache_objects", "Remote objects held in the local cache"),
            &["kind"],
        )?;
        let cache_refresh_failures_total = CounterVec::new(
            Opts::new("cache_refresh_failures_total", "Failed listings during cache refresh"),
            &["kind"],
        )?;
        let graph_syncs_total = CounterVec::new(
            Opts::new("graph_syncs_total", "Graph sync attempts by result"),
            &["result"],
        )?;

        registry.register(Box::new(rest_operations_total.clone()))?;
        registry.register(Box::new(retry_enqueued_total.clone()))?;
        registry.register(Box::new(retry_exhausted_total.clone()))?;
        registry.register(Box::new(retry_queue_depth.clone()))?;
        registry.register(Box::new(cache_objects.clone()))?;
        registry.register(Box::new(cache_refresh_failures_total.clone()))?;
        registry.register(Box::new(graph_syncs_total.clone()))?;

        Ok(Self {
            rest_operations_total,
            retry_enqueued_total,
            retry_exhausted_total,
            retry_queue_depth,
            cache_objects,
            cache_refresh_failures_total,
            graph_syncs_total,
            registry,
        })
    }

    pub fn record_rest(&self, method: &str, kind: &str, result: &str) {
        self.rest_operations_total
            .with_label_values(&[method, kind, result])
            .inc();
    }

    pub fn record_sync(&self, result: &str) {
        self.graph_syncs_total.with_label_values(&[result]).inc();
    }

    /// Render every metric in the Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_labels() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rest("POST", "pool", "ok");
        metrics.record_rest("POST", "pool", "ok");
        metrics.retry_queue_depth.with_label_values(&["fast"]).set(3);

        let text = metrics.gather().unwrap();
        assert!(text.contains("rest_operations_total{kind=\"pool\",method=\"POST\",result=\"ok\"} 2"));
        assert!(text.contains("retry_queue_depth{tier=\"fast\"} 3"));
    }

    #[test]
    fn test_clones_share_the_registry() {
        let metrics = Metrics::new().unwrap();
        let clone = metrics.clone();
        clone.record_sync("synced");
        assert!(metrics.gather().unwrap().contains("graph_syncs_total{result=\"synced\"} 1"));
    }
}
