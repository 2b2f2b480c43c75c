//! Settlement metrics

use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

lazy_static::lazy_static! {
    /// Webhooks handled, by kind and outcome
    pub static ref WEBHOOKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_webhooks_total",
        "Inbound webhooks by kind and outcome",
        &["kind", "outcome"]
    )
    .expect("settlement_webhooks_total registers once");

    /// Outbox task runs, by kind and outcome
    pub static ref OUTBOX_TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_outbox_tasks_total",
        "Outbox task executions by kind and outcome",
        &["kind", "outcome"]
    )
    .expect("settlement_outbox_tasks_total registers once");

    /// State machine transitions that were applied
    pub static ref TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_transitions_total",
        "Applied state transitions by machine and target status",
        &["machine", "status"]
    )
    .expect("settlement_transitions_total registers once");

    /// Money movements the books could not match
    pub static ref CONSISTENCY_ALERTS_TOTAL: IntCounter = register_int_counter!(
        "settlement_consistency_alerts_total",
        "Ledger writes that failed after funds moved, and deposits that matched nothing"
    )
    .expect("settlement_consistency_alerts_total registers once");
}

/// Count a webhook outcome
pub fn webhook(kind: &str, outcome: &str) {
    WEBHOOKS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Count an outbox task outcome
pub fn outbox(kind: &str, outcome: &str) {
    OUTBOX_TASKS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Count an applied transition
pub fn transition(machine: &str, status: impl std::fmt::Display) {
    TRANSITIONS_TOTAL
        .with_label_values(&[machine, &status.to_string()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let before = WEBHOOKS_TOTAL.with_label_values(&["test", "ignored"]).get();
        webhook("test", "ignored");
        assert_eq!(
            WEBHOOKS_TOTAL.with_label_values(&["test", "ignored"]).get(),
            before + 1
        );

        transition("test", "COMPLETED");
        assert!(TRANSITIONS_TOTAL.with_label_values(&["test", "COMPLETED"]).get() >= 1);
    }
}
