//! Observability for the query engine
//!
//! - Structured logging with tracing and slow query tracking
//! - Prometheus metrics for plans, executions and the compiled-query cache

pub mod logging;
pub mod metrics;

pub use logging::*;
pub use metrics::*;
