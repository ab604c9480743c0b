//! Prometheus metric surfaces fed with per-span values.
//!
//! The instrumentation wrapper supplies one observation per finished span;
//! aggregation across spans is prometheus's job, not ours.

use std::time::Duration;

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// GenAI metric family registered on a prometheus [`Registry`].
#[derive(Debug, Clone)]
pub struct TelemetryMetrics {
    requests_total: IntCounterVec,
    tokens_total: IntCounterVec,
    cost_usd_total: CounterVec,
    request_duration: HistogramVec,
    retrieval_hit_at_k: Gauge,
}

impl TelemetryMetrics {
    /// Create and register the GenAI metric family.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("gen_ai_requests_total", "Total instrumented operations"),
            &["operation", "status"],
        )?;
        let tokens_total = IntCounterVec::new(
            Opts::new("gen_ai_tokens_total", "Total tokens consumed and produced"),
            &["operation", "direction"],
        )?;
        let cost_usd_total = CounterVec::new(
            Opts::new("gen_ai_cost_usd_total", "Total estimated spend in USD"),
            &["provider", "model"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gen_ai_request_duration_seconds",
                "Wall-clock duration of instrumented operations",
            ),
            &["operation"],
        )?;
        let retrieval_hit_at_k = Gauge::new(
            "gen_ai_retrieval_hit_at_k",
            "Whether the most recent retrieval returned any results (proxy metric)",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(cost_usd_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(retrieval_hit_at_k.clone()))?;

        Ok(Self {
            requests_total,
            tokens_total,
            cost_usd_total,
            request_duration,
            retrieval_hit_at_k,
        })
    }

    /// Record one finished operation.
    pub fn record_request(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "ok" } else { "error" };
        self.requests_total
            .with_label_values(&[operation, status])
            .inc();
        self.request_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record token usage for one operation.
    pub fn record_tokens(&self, operation: &str, input_tokens: u64, output_tokens: u64) {
        if input_tokens > 0 {
            self.tokens_total
                .with_label_values(&[operation, "input"])
                .inc_by(input_tokens);
        }
        if output_tokens > 0 {
            self.tokens_total
                .with_label_values(&[operation, "output"])
                .inc_by(output_tokens);
        }
    }

    /// Record estimated spend for one operation.
    pub fn record_cost(&self, provider: &str, model: &str, cost_usd: f64) {
        if cost_usd > 0.0 {
            self.cost_usd_total
                .with_label_values(&[provider, model])
                .inc_by(cost_usd);
        }
    }

    /// Record the hit@k proxy for one retrieval.
    pub fn record_hit_at_k(&self, hit: bool) {
        self.retrieval_hit_at_k.set(if hit { 1.0 } else { 0.0 });
    }
}
