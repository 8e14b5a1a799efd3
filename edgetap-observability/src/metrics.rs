use crate::prometheus_exporter::render_metrics;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

/// Outcome label for an ingest batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Acked,
    Retried,
}

impl BatchOutcome {
    fn as_label(self) -> &'static str {
        match self {
            BatchOutcome::Acked => "acked",
            BatchOutcome::Retried => "retried",
        }
    }
}

/// Outcome label for a query request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Ok,
    BadRequest,
    StoreError,
}

impl QueryOutcome {
    fn as_label(self) -> &'static str {
        match self {
            QueryOutcome::Ok => "ok",
            QueryOutcome::BadRequest => "bad_request",
            QueryOutcome::StoreError => "store_error",
        }
    }
}

/// Metrics collector. Every counter is gated behind `enabled`.
///
/// When `enabled = false` no registry is created and every `record_*` call
/// returns immediately, so the proxy hot path pays nothing.
pub struct MetricsCollector {
    enabled: bool,
    registry: Option<Registry>,
    pub events_captured: Option<IntCounter>,
    pub events_dropped: Option<IntCounter>,
    pub proxy_requests_total: Option<IntCounterVec>,
    pub proxy_latency: Option<Histogram>,
    pub ingest_batches_total: Option<IntCounterVec>,
    pub ingest_rows_total: Option<IntCounter>,
    pub dead_lettered_total: Option<IntCounter>,
    pub query_requests_total: Option<IntCounterVec>,
}

impl MetricsCollector {
    /// Create a new collector. When `enabled = false`, everything is None.
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new();

        let events_captured = IntCounter::with_opts(
            Opts::new("events_captured_total", "Telemetry events accepted by the channel")
                .namespace("edgetap"),
        )?;
        let events_dropped = IntCounter::with_opts(
            Opts::new("events_dropped_total", "Telemetry events dropped after retries")
                .namespace("edgetap"),
        )?;
        let proxy_requests_total = IntCounterVec::new(
            Opts::new("proxy_requests_total", "Proxied requests").namespace("edgetap"),
            &["method", "status"],
        )?;
        let proxy_latency = Histogram::with_opts(
            HistogramOpts::new("proxy_latency_seconds", "Origin round-trip latency")
                .namespace("edgetap")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
        )?;
        let ingest_batches_total = IntCounterVec::new(
            Opts::new("ingest_batches_total", "Batches processed by the ingest worker")
                .namespace("edgetap"),
            &["outcome"],
        )?;
        let ingest_rows_total = IntCounter::with_opts(
            Opts::new("ingest_rows_total", "Rows written to the store").namespace("edgetap"),
        )?;
        let dead_lettered_total = IntCounter::with_opts(
            Opts::new("dead_lettered_total", "Messages diverted after max deliveries")
                .namespace("edgetap"),
        )?;
        let query_requests_total = IntCounterVec::new(
            Opts::new("query_requests_total", "Log queries served").namespace("edgetap"),
            &["outcome"],
        )?;

        registry.register(Box::new(events_captured.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(proxy_requests_total.clone()))?;
        registry.register(Box::new(proxy_latency.clone()))?;
        registry.register(Box::new(ingest_batches_total.clone()))?;
        registry.register(Box::new(ingest_rows_total.clone()))?;
        registry.register(Box::new(dead_lettered_total.clone()))?;
        registry.register(Box::new(query_requests_total.clone()))?;

        Ok(Self {
            enabled: true,
            registry: Some(registry),
            events_captured: Some(events_captured),
            events_dropped: Some(events_dropped),
            proxy_requests_total: Some(proxy_requests_total),
            proxy_latency: Some(proxy_latency),
            ingest_batches_total: Some(ingest_batches_total),
            ingest_rows_total: Some(ingest_rows_total),
            dead_lettered_total: Some(dead_lettered_total),
            query_requests_total: Some(query_requests_total),
        })
    }

    /// No-op collector.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            registry: None,
            events_captured: None,
            events_dropped: None,
            proxy_requests_total: None,
            proxy_latency: None,
            ingest_batches_total: None,
            ingest_rows_total: None,
            dead_lettered_total: None,
            query_requests_total: None,
        }
    }

    /// Record a proxied request (no-op when disabled).
    #[inline]
    pub fn record_proxy(&self, method: &str, status: u16, duration_secs: f64) {
        if !self.enabled {
            return;
        }
        if let Some(ref counter) = self.proxy_requests_total {
            let mut buf = itoa::Buffer::new();
            let status_str = buf.format(status);
            counter.with_label_values(&[method, status_str]).inc();
        }
        if let Some(ref hist) = self.proxy_latency {
            hist.observe(duration_secs);
        }
    }

    #[inline]
    pub fn record_captured(&self) {
        if let Some(ref c) = self.events_captured {
            c.inc();
        }
    }

    #[inline]
    pub fn record_dropped(&self) {
        if let Some(ref c) = self.events_dropped {
            c.inc();
        }
    }

    pub fn record_batch(&self, outcome: BatchOutcome, rows: usize) {
        if let Some(ref c) = self.ingest_batches_total {
            c.with_label_values(&[outcome.as_label()]).inc();
        }
        if outcome == BatchOutcome::Acked
            && let Some(ref c) = self.ingest_rows_total
        {
            c.inc_by(rows as u64);
        }
    }

    pub fn record_dead_letters(&self, count: usize) {
        if let Some(ref c) = self.dead_lettered_total {
            c.inc_by(count as u64);
        }
    }

    pub fn record_query(&self, outcome: QueryOutcome) {
        if let Some(ref c) = self.query_requests_total {
            c.with_label_values(&[outcome.as_label()]).inc();
        }
    }

    /// Render prometheus text exposition format.
    pub fn render(&self) -> String {
        match self.registry {
            Some(ref registry) => render_metrics(registry),
            None => String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
