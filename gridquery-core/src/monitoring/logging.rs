//! Structured logging with tracing
//!
//! Installs a compact or JSON subscriber and tracks slow plan materializations

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use parking_lot::RwLock;

use chrono::{DateTime, Utc};
use anyhow::{Context, Result};

const MAX_SLOW_QUERIES: usize = 1000;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub level: String,

    /// Enable JSON format output
    pub json_format: bool,

    /// Enable slow query logging
    pub slow_query_logging: bool,

    /// Slow query threshold in milliseconds
    pub slow_query_threshold_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json_format: false,
            slow_query_logging: true,
            slow_query_threshold_ms: 100,
        }
    }
}

impl LoggingConfig {
    /// Parse log level from string
    pub fn parse_level(&self) -> Level {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "INFO" => Level::INFO,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        }
    }

    /// Slow query logger matching this configuration
    pub fn slow_query_logger(&self) -> SlowQueryLogger {
        SlowQueryLogger::new(
            Duration::from_millis(self.slow_query_threshold_ms),
            self.slow_query_logging,
        )
    }
}

/// Install the global subscriber and build the slow query logger.
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<SlowQueryLogger> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.parse_level().as_str()));

    let subscriber = Registry::default().with(env_filter);

    if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);

        subscriber
            .with(json_layer)
            .try_init()
            .context("Failed to install JSON log subscriber")?;
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .compact();

        subscriber
            .with(fmt_layer)
            .try_init()
            .context("Failed to install log subscriber")?;
    }

    tracing::info!(
        "Logging initialized: level={}, json={}, slow_queries={}",
        config.level,
        config.json_format,
        config.slow_query_logging
    );

    Ok(config.slow_query_logger())
}

/// Records plan materializations that exceed a latency threshold
#[derive(Debug)]
pub struct SlowQueryLogger {
    threshold: Duration,
    enabled: bool,
    queries: RwLock<Vec<SlowQuery>>,
}

/// Slow query record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub query: String,
    pub entity: String,
    /// Kind of the plan that was materialized
    pub plan: String,
}

/// In-flight materialization
#[derive(Debug)]
pub struct QueryTracker {
    start_time: Instant,
    query: String,
    entity: String,
    plan: String,
}

impl QueryTracker {
    /// Time since the tracker was started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl SlowQueryLogger {
    /// Create a new slow query logger
    pub fn new(threshold: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            queries: RwLock::new(Vec::new()),
        }
    }

    /// Logger that never records anything
    pub fn disabled() -> Self {
        Self::new(Duration::MAX, false)
    }

    /// Start tracking a materialization
    pub fn start_query(
        &self,
        query: impl Into<String>,
        entity: impl Into<String>,
        plan: impl Into<String>,
    ) -> QueryTracker {
        QueryTracker {
            start_time: Instant::now(),
            query: query.into(),
            entity: entity.into(),
            plan: plan.into(),
        }
    }

    /// Finish tracking and record the query if it was slow.
    ///
    /// Returns the elapsed time.
    pub fn finish_query(&self, tracker: QueryTracker) -> Duration {
        let duration = tracker.start_time.elapsed();
        if !self.enabled || duration < self.threshold {
            return duration;
        }

        let slow_query = SlowQuery {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            query: tracker.query,
            entity: tracker.entity,
            plan: tracker.plan,
        };

        tracing::warn!(
            target: "slow_query",
            duration_ms = slow_query.duration_ms,
            query = %slow_query.query,
            entity = %slow_query.entity,
            plan = %slow_query.plan,
            "Slow query detected"
        );

        let mut queries = self.queries.write();
        queries.push(slow_query);
        if queries.len() > MAX_SLOW_QUERIES {
            let len = queries.len();
            queries.drain(0..len - MAX_SLOW_QUERIES);
        }

        duration
    }

    /// Most recent slow queries, newest first
    pub fn get_slow_queries(&self, limit: usize) -> Vec<SlowQuery> {
        let queries = self.queries.read();
        queries.iter().rev().take(limit).cloned().collect()
    }

    /// Get slow query statistics
    pub fn get_stats(&self) -> SlowQueryStats {
        let queries = self.queries.read();
        let threshold_ms = self.threshold.as_millis().min(u64::MAX as u128) as u64;

        if queries.is_empty() {
            return SlowQueryStats {
                threshold_ms,
                ..SlowQueryStats::default()
            };
        }

        let total_count = queries.len();
        let total_duration: u64 = queries.iter().map(|q| q.duration_ms).sum();

        SlowQueryStats {
            total_count,
            avg_duration_ms: total_duration / total_count as u64,
            max_duration_ms: queries.iter().map(|q| q.duration_ms).max().unwrap_or(0),
            threshold_ms,
        }
    }
}

impl Default for SlowQueryLogger {
    fn default() -> Self {
        LoggingConfig::default().slow_query_logger()
    }
}

/// Slow query statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlowQueryStats {
    pub total_count: usize,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub threshold_ms: u64,
}
