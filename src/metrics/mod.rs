/*
 * Prometheus counters for quotes, transactions and pool discovery
 */

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;
use crate::models::{AqyntError, Result};

pub struct Metrics {
    registry: Registry,
    quotes: IntCounterVec,
    transactions: IntCounterVec,
    dropped_pools: IntCounter,
}

fn metric_error(e: prometheus::Error) -> AqyntError {
    AqyntError::ConfigError(format!("Failed to set up metrics: {e}"))
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("aqyntswap".to_string()), None).map_err(metric_error)?;

        let quotes = IntCounterVec::new(
            Opts::new("quote_requests_total", "Quote lookups by result"),
            &["result"],
        )
        .map_err(metric_error)?;
        let transactions = IntCounterVec::new(
            Opts::new("transactions_total", "Transactions by intent and final phase"),
            &["intent", "outcome"],
        )
        .map_err(metric_error)?;
        let dropped_pools = IntCounter::new(
            "pool_entries_dropped_total",
            "Pools skipped because their batched read failed",
        )
        .map_err(metric_error)?;

        registry.register(Box::new(quotes.clone())).map_err(metric_error)?;
        registry.register(Box::new(transactions.clone())).map_err(metric_error)?;
        registry.register(Box::new(dropped_pools.clone())).map_err(metric_error)?;

        Ok(Self {
            registry,
            quotes,
            transactions,
            dropped_pools,
        })
    }

    pub fn record_quote(&self, result: &str) {
        self.quotes.with_label_values(&[result]).inc();
    }

    pub fn record_transaction(&self, intent: &str, outcome: &str) {
        self.transactions.with_label_values(&[intent, outcome]).inc();
    }

    pub fn record_dropped_pools(&self, count: usize) {
        self.dropped_pools.inc_by(count as u64);
    }

    #[must_use]
    pub fn quote_count(&self, result: &str) -> u64 {
        self.quotes.with_label_values(&[result]).get()
    }

    #[must_use]
    pub fn transaction_count(&self, intent: &str, outcome: &str) -> u64 {
        self.transactions.with_label_values(&[intent, outcome]).get()
    }

    #[must_use]
    pub fn dropped_pools(&self) -> u64 {
        self.dropped_pools.get()
    }

    /// Text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_with_namespace() {
        let metrics = Metrics::new().unwrap();
        metrics.record_quote("fetched");
        metrics.record_transaction("swap", "confirmed");
        metrics.record_dropped_pools(2);

        assert_eq!(metrics.quote_count("fetched"), 1);
        assert_eq!(metrics.transaction_count("swap", "confirmed"), 1);
        assert_eq!(metrics.dropped_pools(), 2);

        let text = metrics.render();
        assert!(text.contains("aqyntswap_quote_requests_total"));
        assert!(text.contains("aqyntswap_pool_entries_dropped_total 2"));
    }
}
