//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_records_opened_total` - Records created on first write
//! - `ledger_entries_recorded_total` - Entries stored
//! - `ledger_entries_deduplicated_total` - Entries dropped as already present
//! - `ledger_writes_ignored_total` - Writes that hit a posted record
//! - `ledger_records_posted_total` - Records closed
//! - `ledger_imbalanced_total` - Closes where debits and credits differed

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Records opened
    pub records_opened: IntCounter,

    /// Entries stored
    pub entries_recorded: IntCounter,

    /// Entries dropped by key
    pub entries_deduplicated: IntCounter,

    /// Writes ignored on posted records
    pub writes_ignored: IntCounter,

    /// Records posted
    pub records_posted: IntCounter,

    /// Imbalanced closes observed
    pub imbalanced: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let records_opened = IntCounter::new(
            "ledger_records_opened_total",
            "Records created on first write",
        )?;
        registry.register(Box::new(records_opened.clone()))?;

        let entries_recorded =
            IntCounter::new("ledger_entries_recorded_total", "Entries stored")?;
        registry.register(Box::new(entries_recorded.clone()))?;

        let entries_deduplicated = IntCounter::new(
            "ledger_entries_deduplicated_total",
            "Entries dropped as already present",
        )?;
        registry.register(Box::new(entries_deduplicated.clone()))?;

        let writes_ignored = IntCounter::new(
            "ledger_writes_ignored_total",
            "Writes that hit a posted record",
        )?;
        registry.register(Box::new(writes_ignored.clone()))?;

        let records_posted = IntCounter::new("ledger_records_posted_total", "Records closed")?;
        registry.register(Box::new(records_posted.clone()))?;

        let imbalanced = IntCounter::new(
            "ledger_imbalanced_total",
            "Closes where debits and credits differed",
        )?;
        registry.register(Box::new(imbalanced.clone()))?;

        Ok(Self {
            records_opened,
            entries_recorded,
            entries_deduplicated,
            writes_ignored,
            records_posted,
            imbalanced,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.records_opened.get(), 0);
        assert_eq!(metrics.records_posted.get(), 0);
    }

    #[test]
    fn test_instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.entries_recorded.inc();
        assert_eq!(a.entries_recorded.get(), 1);
        assert_eq!(b.entries_recorded.get(), 0);
        assert_eq!(a.registry().gather().len(), 6);
    }
}
