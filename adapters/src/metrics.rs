//! Provider call metrics

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};
use std::future::Future;
use std::time::Instant;

lazy_static::lazy_static! {
    /// Provider calls by provider, operation and outcome
    pub static ref PROVIDER_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "provider_requests_total",
        "Total external provider calls",
        &["provider", "operation", "status"]
    )
    .expect("provider_requests_total registers once");

    /// Provider call latency in seconds
    pub static ref PROVIDER_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "provider_request_duration_seconds",
        "External provider call duration",
        &["provider", "operation"]
    )
    .expect("provider_request_duration_seconds registers once");
}

/// Run a provider call and record its duration and outcome
pub async fn timed<T, F>(provider: &str, operation: &str, call: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    let start = Instant::now();
    let result = call.await;

    PROVIDER_REQUEST_DURATION
        .with_label_values(&[provider, operation])
        .observe(start.elapsed().as_secs_f64());

    let status = if result.is_ok() { "success" } else { "failure" };
    PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[provider, operation, status])
        .inc();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_counts_outcomes() {
        let before = PROVIDER_REQUESTS_TOTAL
            .with_label_values(&["metrics-test", "quote", "failure"])
            .get();

        let result: crate::Result<()> = timed("metrics-test", "quote", async {
            Err(crate::Error::provider("metrics-test", "down"))
        })
        .await;
        assert!(result.is_err());

        let after = PROVIDER_REQUESTS_TOTAL
            .with_label_values(&["metrics-test", "quote", "failure"])
            .get();
        assert_eq!(after, before + 1.0);
    }
}
