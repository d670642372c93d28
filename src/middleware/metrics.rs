//! Prometheus metrics for the broker.
//!
//! Each [`Metrics`] owns its own registry so several brokers (or tests) can
//! live in one process. `/metrics` serves [`Metrics::encode`].

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    refresh_total: IntCounterVec,
    refresh_coalesced_total: IntCounterVec,
    upstream_requests_total: IntCounterVec,
    upstream_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let refresh_total = IntCounterVec::new(
            opts!("broker_token_refresh_total", "Refresh grants attempted, by outcome"),
            &["provider", "outcome"],
        )?;
        let refresh_coalesced_total = IntCounterVec::new(
            opts!(
                "broker_token_refresh_coalesced_total",
                "Callers that waited on an in-flight refresh instead of starting one"
            ),
            &["provider"],
        )?;
        let upstream_requests_total = IntCounterVec::new(
            opts!("broker_upstream_requests_total", "Resource calls by operation and status"),
            &["operation", "status"],
        )?;
        let upstream_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "broker_upstream_duration_seconds",
                "Resource call latency in seconds",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["operation"],
        )?;

        registry.register(Box::new(refresh_total.clone()))?;
        registry.register(Box::new(refresh_coalesced_total.clone()))?;
        registry.register(Box::new(upstream_requests_total.clone()))?;
        registry.register(Box::new(upstream_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            refresh_total,
            refresh_coalesced_total,
            upstream_requests_total,
            upstream_duration_seconds,
        })
    }

    /// `outcome` is `success` or `failure`.
    pub fn record_refresh(&self, provider: &str, outcome: &str) {
        self.refresh_total.with_label_values(&[provider, outcome]).inc();
    }

    pub fn record_coalesced(&self, provider: &str) {
        self.refresh_coalesced_total.with_label_values(&[provider]).inc();
    }

    /// `status` is the HTTP status, or 0 when the call never got a response.
    pub fn record_upstream(&self, operation: &str, status: u16, elapsed_secs: f64) {
        let status = status.to_string();
        self.upstream_requests_total
            .with_label_values(&[operation, &status])
            .inc();
        self.upstream_duration_seconds
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn refresh_count(&self, provider: &str, outcome: &str) -> u64 {
        self.refresh_total.with_label_values(&[provider, outcome]).get()
    }

    pub fn coalesced_count(&self, provider: &str) -> u64 {
        self.refresh_coalesced_total.with_label_values(&[provider]).get()
    }

    /// Prometheus text exposition of everything in this registry.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
