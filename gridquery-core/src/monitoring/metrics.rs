//! Query engine metrics
//!
//! Counters and histograms are registered in a private prometheus registry so
//! several engines can live in one process; `gather()` renders them in the
//! prometheus text format for whatever endpoint the host exposes.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, HistogramOpts, HistogramVec, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Prometheus metrics for planning and execution
#[derive(Clone)]
pub struct QueryMetrics {
    registry: Registry,
    plans_built: IntCounterVec,
    plan_executions: IntCounterVec,
    execution_latency: HistogramVec,
    execution_errors: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_evictions: IntCounter,
}

impl QueryMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let plans_built = register_int_counter_vec_with_registry!(
            Opts::new("gridquery_plans_built_total", "Query plans built, by plan kind"),
            &["plan"],
            registry
        )?;

        let plan_executions = register_int_counter_vec_with_registry!(
            Opts::new("gridquery_plan_executions_total", "Plan materializations, by plan kind"),
            &["plan"],
            registry
        )?;

        let execution_latency = register_histogram_vec_with_registry!(
            HistogramOpts::new("gridquery_execution_latency_seconds", "Plan materialization latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["plan"],
            registry
        )?;

        let execution_errors = register_int_counter_with_registry!(
            Opts::new("gridquery_execution_errors_total", "Failed plan materializations"),
            registry
        )?;

        let cache_hits = register_int_counter_with_registry!(
            Opts::new("gridquery_cache_hits_total", "Compiled query cache hits"),
            registry
        )?;

        let cache_misses = register_int_counter_with_registry!(
            Opts::new("gridquery_cache_misses_total", "Compiled query cache misses"),
            registry
        )?;

        let cache_evictions = register_int_counter_with_registry!(
            Opts::new("gridquery_cache_evictions_total", "Compiled query cache evictions"),
            registry
        )?;

        Ok(Self {
            registry,
            plans_built,
            plan_executions,
            execution_latency,
            execution_errors,
            cache_hits,
            cache_misses,
            cache_evictions,
        })
    }

    /// Record a plan built by the planner
    pub fn record_plan(&self, plan: &str) {
        self.plans_built.with_label_values(&[plan]).inc();
    }

    /// Record one materialization
    pub fn record_execution(&self, plan: &str, latency: Duration) {
        self.plan_executions.with_label_values(&[plan]).inc();
        self.execution_latency
            .with_label_values(&[plan])
            .observe(latency.as_secs_f64());
    }

    /// Record a failed materialization
    pub fn record_error(&self) {
        self.execution_errors.inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn record_cache_eviction(&self) {
        self.cache_evictions.inc();
    }

    /// Plans of a kind built so far
    pub fn plans_built(&self, plan: &str) -> u64 {
        self.plans_built.with_label_values(&[plan]).get()
    }

    /// Materializations of a plan kind so far
    pub fn executions(&self, plan: &str) -> u64 {
        self.plan_executions.with_label_values(&[plan]).get()
    }

    /// Cache hits and misses so far
    pub fn cache_counts(&self) -> (u64, u64) {
        (self.cache_hits.get(), self.cache_misses.get())
    }

    /// Render every metric in the prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for QueryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hits, misses) = self.cache_counts();
        f.debug_struct("QueryMetrics")
            .field("cache_hits", &hits)
            .field("cache_misses", &misses)
            .field("execution_errors", &self.execution_errors.get())
            .finish()
    }
}
