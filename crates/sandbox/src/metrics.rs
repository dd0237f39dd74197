//! Execution metrics.
//!
//! Thin helpers over the `metrics` facade. Nothing is exported unless the
//! host process installs a recorder.

/// Count one finished execution and record how long it took.
pub fn track_execution(language: &str, outcome: &str, elapsed_sec: f64) {
    metrics::counter!(
        "code_runner_executions_total",
        "language" => language.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "code_runner_execution_duration_seconds",
        "language" => language.to_string()
    )
    .record(elapsed_sec);
}

/// Track sandboxes currently alive (created and not yet removed).
pub fn sandbox_created(language: &str) {
    metrics::gauge!("code_runner_live_sandboxes", "language" => language.to_string()).increment(1.0);
}

pub fn sandbox_removed(language: &str) {
    metrics::gauge!("code_runner_live_sandboxes", "language" => language.to_string()).decrement(1.0);
}

pub fn track_cleanup_failure(language: &str) {
    metrics::counter!("code_runner_cleanup_failures_total", "language" => language.to_string())
        .increment(1);
}

pub fn track_truncation(language: &str) {
    metrics::counter!("code_runner_truncated_outputs_total", "language" => language.to_string())
        .increment(1);
}

/// Time a request spent waiting for a concurrency slot.
pub fn track_queue_wait(wait_sec: f64) {
    metrics::histogram!("code_runner_queue_wait_seconds").record(wait_sec);
}
