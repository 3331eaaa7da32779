use anyhow::Result;
use core_types::config::MetricsSection;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder, opts,
};

/// Request kinds served by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Distincts,
    Reorder,
}

impl RequestKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Distincts => "distincts",
            Self::Reorder => "reorder",
        }
    }
}

/// Counters and latency histograms for the in-memory data source.
pub struct SourceMetrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_latency: HistogramVec,
    pub rows_served: IntCounter,
}

impl SourceMetrics {
    pub fn new(cfg: &MetricsSection) -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            opts!("source_requests_total", "Requests served by kind"),
            &["kind"],
        )?;
        let mut hist_opts =
            HistogramOpts::new("source_request_latency_seconds", "Request latency in seconds");
        if !cfg.request_latency_buckets.is_empty() {
            hist_opts = hist_opts.buckets(cfg.request_latency_buckets.clone());
        }
        let request_latency = HistogramVec::new(hist_opts, &["kind"])?;
        let rows_served =
            IntCounter::with_opts(opts!("source_rows_served_total", "Rows returned in pages"))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(rows_served.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_latency,
            rows_served,
        })
    }

    pub fn record(&self, kind: RequestKind, latency_secs: f64) {
        self.requests_total.with_label_values(&[kind.as_str()]).inc();
        self.request_latency
            .with_label_values(&[kind.as_str()])
            .observe(latency_secs);
    }

    pub fn record_rows(&self, rows: usize) {
        self.rows_served.inc_by(rows as u64);
    }

    pub fn requests(&self, kind: RequestKind) -> u64 {
        self.requests_total.with_label_values(&[kind.as_str()]).get()
    }

    /// Encode all metrics in Prometheus text format.
    pub fn scrape(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
