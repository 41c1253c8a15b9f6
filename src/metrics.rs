//! Controller metrics

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    /// Reconcile passes by resource kind and result (ok, error, dropped)
    pub static ref RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "reitti_reconciliations_total",
            "Total number of reconcile passes",
        );
        let counter = IntCounterVec::new(opts, &["kind", "result"])
            .expect("Failed to create counter");
        METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Reconcile pass duration by resource kind
    pub static ref RECONCILE_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "reitti_reconcile_duration_seconds",
            "Reconcile pass duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["kind"])
            .expect("Failed to create histogram");
        METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };
}

/// Render the registry in Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer) {
        tracing::warn!(%error, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_counter_shows_up_in_exposition() {
        RECONCILIATIONS_TOTAL
            .with_label_values(&["endpoints", "ok"])
            .inc();
        let text = gather();
        assert!(text.contains("reitti_reconciliations_total"));
    }
}
