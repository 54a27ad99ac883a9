//! Persistence Metrics
//!
//! Prometheus counters for transaction outcomes, loaded rows and number pool
//! allocations. Each controller owns one [`DbMetrics`]; the binary registers
//! it in the registry served on the metrics endpoint.

use crate::error::{Error, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Counters of one controller instance
#[derive(Debug, Clone)]
pub struct DbMetrics {
    pub transactions_committed: IntCounter,
    pub transactions_rolled_back: IntCounter,
    pub rows_loaded: IntCounterVec,
    pub pool_allocations: IntCounterVec,
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to create metric: {}", e))
}

impl DbMetrics {
    /// Create the counters and register them
    pub fn new(registry: &Registry) -> Result<Self> {
        let metrics = Self::unregistered()?;
        registry
            .register(Box::new(metrics.transactions_committed.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.transactions_rolled_back.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.rows_loaded.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.pool_allocations.clone()))
            .map_err(metric_error)?;
        Ok(metrics)
    }

    /// Counters that are never exposed, for tests and embedded use
    pub fn unregistered() -> Result<Self> {
        Ok(Self {
            transactions_committed: IntCounter::new(
                "db_transactions_committed_total",
                "Transactions committed to the database",
            )
            .map_err(metric_error)?,
            transactions_rolled_back: IntCounter::new(
                "db_transactions_rolled_back_total",
                "Transactions rolled back",
            )
            .map_err(metric_error)?,
            rows_loaded: IntCounterVec::new(
                Opts::new("db_rows_loaded_total", "Rows read by full load passes"),
                &["table"],
            )
            .map_err(metric_error)?,
            pool_allocations: IntCounterVec::new(
                Opts::new("db_pool_allocations_total", "Values handed out by number pools"),
                &["pool"],
            )
            .map_err(metric_error)?,
        })
    }

    pub fn record_rows(&self, table: &str, rows: usize) {
        self.rows_loaded.with_label_values(&[table]).inc_by(rows as u64);
    }

    pub fn record_allocation(&self, pool: &str) {
        self.pool_allocations.with_label_values(&[pool]).inc();
    }
}
