//! Prometheus metrics definitions for the signal/review/position pipeline.
//!
//! All metrics use the `perpcore_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for the signal/review/position pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Number of open positions under C7 supervision.
    pub positions_count: GenericGauge<AtomicF64>,
    /// Unrealized PnL fraction per symbol (positive favourable).
    pub position_pnl_fraction: GenericGaugeVec<AtomicF64>,
    /// C2 candidates emitted, by detector and kind.
    pub candidates_emitted_total: CounterVec,
    /// C4 hard-rule rejections, by rule name.
    pub hard_rule_rejections_total: CounterVec,
    /// C4 AI review outcomes (approved / rejected / unavailable).
    pub ai_review_outcomes_total: CounterVec,
    /// Rows currently in the C5 observation pool.
    pub watch_pool_size: GenericGauge<AtomicF64>,
    /// Rows currently in the C6 high-volatility pool.
    pub high_vol_pool_size: GenericGauge<AtomicF64>,
    /// C7/C8 exits, by reason.
    pub position_exits_total: CounterVec,
    /// Uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// Venue/LLM HTTP latency in seconds.
    pub call_latency_seconds: HistogramVec,
    /// Cycle duration in seconds.
    pub cycle_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let positions_count = Gauge::with_opts(Opts::new(
            "perpcore_positions_count",
            "Number of open positions under supervision",
        ))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_pnl_fraction = GaugeVec::new(
            Opts::new(
                "perpcore_position_pnl_fraction",
                "Unrealized PnL fraction per symbol",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(position_pnl_fraction.clone()))?;

        let candidates_emitted_total = CounterVec::new(
            Opts::new(
                "perpcore_candidates_emitted_total",
                "Candidates emitted by a detector, by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(candidates_emitted_total.clone()))?;

        let hard_rule_rejections_total = CounterVec::new(
            Opts::new(
                "perpcore_hard_rule_rejections_total",
                "Candidates rejected by the hard-rule gate, by rule",
            ),
            &["rule"],
        )?;
        registry.register(Box::new(hard_rule_rejections_total.clone()))?;

        let ai_review_outcomes_total = CounterVec::new(
            Opts::new(
                "perpcore_ai_review_outcomes_total",
                "AI review outcomes, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(ai_review_outcomes_total.clone()))?;

        let watch_pool_size = Gauge::with_opts(Opts::new(
            "perpcore_watch_pool_size",
            "Rows currently in the observation pool",
        ))?;
        registry.register(Box::new(watch_pool_size.clone()))?;

        let high_vol_pool_size = Gauge::with_opts(Opts::new(
            "perpcore_high_vol_pool_size",
            "Rows currently in the high-volatility pool",
        ))?;
        registry.register(Box::new(high_vol_pool_size.clone()))?;

        let position_exits_total = CounterVec::new(
            Opts::new("perpcore_position_exits_total", "Position exits, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(position_exits_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "perpcore_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let call_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "perpcore_call_latency_seconds",
                "Outbound call latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["target", "endpoint"],
        )?;
        registry.register(Box::new(call_latency_seconds.clone()))?;

        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "perpcore_cycle_duration_seconds",
                "Coordinator cycle duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["phase"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            positions_count,
            position_pnl_fraction,
            candidates_emitted_total,
            hard_rule_rejections_total,
            ai_review_outcomes_total,
            watch_pool_size,
            high_vol_pool_size,
            position_exits_total,
            uptime_seconds,
            call_latency_seconds,
            cycle_duration_seconds,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_position_pnl(&self, symbol: &str, pnl_fraction: f64) {
        self.position_pnl_fraction.with_label_values(&[symbol]).set(pnl_fraction);
    }

    pub fn inc_candidate_emitted(&self, kind: &str) {
        self.candidates_emitted_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_hard_rule_rejection(&self, rule: &str) {
        self.hard_rule_rejections_total.with_label_values(&[rule]).inc();
    }

    pub fn inc_ai_review_outcome(&self, outcome: &str) {
        self.ai_review_outcomes_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_position_exit(&self, reason: &str) {
        self.position_exits_total.with_label_values(&[reason]).inc();
    }

    pub fn observe_call_latency(&self, target: &str, endpoint: &str, latency: f64) {
        self.call_latency_seconds.with_label_values(&[target, endpoint]).observe(latency);
    }

    pub fn observe_cycle_duration(&self, phase: &str, seconds: f64) {
        self.cycle_duration_seconds.with_label_values(&[phase]).observe(seconds);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_renders_namespaced_output() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("perpcore_"));
    }

    #[test]
    fn position_pnl_per_symbol_renders() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.set_position_pnl("BTC/USDT:USDT", 0.03);
        metrics.set_position_pnl("ETH/USDT:USDT", -0.01);
        let output = metrics.render();
        assert!(output.contains("perpcore_position_pnl_fraction"));
        assert!(output.contains("BTC/USDT:USDT"));
    }

    #[test]
    fn hard_rule_rejection_counter_increments() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.inc_hard_rule_rejection("max_leverage");
        metrics.inc_hard_rule_rejection("max_leverage");
        let output = metrics.render();
        assert!(output.contains("perpcore_hard_rule_rejections_total"));
    }
}
