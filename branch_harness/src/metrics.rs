//! Metrics for branch lifecycle observability.
//!
//! Emitted through the `metrics` facade; whatever recorder the embedding
//! process installs receives them.

use metrics::{counter, gauge, histogram};

/// Record a branch created for a test run.
pub fn branch_created(test_type: &str) {
    counter!("neon_test_branches_created_total", "test_type" => test_type.to_string()).increment(1);
}

/// Record a branch deletion attempt by outcome (`deleted`, `already_gone`, `failed`).
pub fn branch_deleted(outcome: &str) {
    counter!("neon_test_branches_deleted_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a retried Neon API call.
pub fn api_retry(method: &str) {
    counter!("neon_api_retries_total", "method" => method.to_string()).increment(1);
}

/// Record how long a branch took to become ready.
pub fn branch_ready_wait(duration_ms: u64) {
    histogram!("neon_branch_ready_wait_ms").record(duration_ms as f64);
}

/// Record a failed safety check.
pub fn safety_violation(check: &str) {
    counter!("neon_test_safety_violations_total", "check" => check.to_string()).increment(1);
}

/// Set the number of test branches left after a sweep.
pub fn branches_kept(count: usize) {
    gauge!("neon_test_branches_kept").set(count as f64);
}
