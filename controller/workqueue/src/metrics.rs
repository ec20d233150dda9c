use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct QueueMetrics {
    adds: Counter,
    retries: Counter,
    depth: Gauge,
    processed: Family<ResultLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: &'static str,
}

// === impl QueueMetrics ===

impl QueueMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "adds",
            "Count of keys added to the queue",
            metrics.adds.clone(),
        );
        reg.register(
            "retries",
            "Count of keys scheduled for a rate-limited retry",
            metrics.retries.clone(),
        );
        reg.register(
            "depth",
            "The number of keys waiting in the queue",
            metrics.depth.clone(),
        );
        reg.register(
            "processed",
            "Count of keys processed by workers",
            metrics.processed.clone(),
        );
        metrics
    }

    pub(crate) fn add(&self) {
        self.adds.inc();
    }

    pub(crate) fn retry(&self) {
        self.retries.inc();
    }

    pub(crate) fn set_depth(&self, depth: usize) {
        self.depth.set(depth as i64);
    }

    pub(crate) fn processed(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.processed.get_or_create(&ResultLabels { result }).inc();
    }
}
