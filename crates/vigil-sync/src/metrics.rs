//! Sync engine metrics.
//!
//! Counters and histograms for reconciliation runs, complementing the
//! structured logging on the orchestration path.

use metrics::{counter, describe_counter, describe_histogram, histogram};

use vigil_core::sync::{ManifestSyncSummary, SyncStatus, TriggerType};

/// Completed run counter, labeled by status and trigger.
pub const SYNC_RUNS: &str = "vigil_sync_runs_total";

/// Run duration histogram, fetch start to history write.
pub const SYNC_RUN_DURATION: &str = "vigil_sync_run_duration_seconds";

/// Drift flags raised or refreshed by sync runs.
pub const SYNC_DRIFT_FLAGS: &str = "vigil_sync_drift_flags_total";

/// Per-item apply errors within runs.
pub const SYNC_APPLY_ERRORS: &str = "vigil_sync_apply_errors_total";

/// Sync requests rejected because a run was already in flight.
pub const SYNC_REJECTED: &str = "vigil_sync_rejected_total";

/// Registers all sync metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(SYNC_RUNS, "Total completed sync runs");
    describe_histogram!(SYNC_RUN_DURATION, "Duration of sync runs in seconds");
    describe_counter!(SYNC_DRIFT_FLAGS, "Total drift flags raised or refreshed");
    describe_counter!(SYNC_APPLY_ERRORS, "Total per-item apply errors");
    describe_counter!(
        SYNC_REJECTED,
        "Total sync requests rejected by the single-flight guard"
    );
}

/// Records the outcome of one completed run.
pub fn record_run(
    status: SyncStatus,
    trigger: TriggerType,
    summary: &ManifestSyncSummary,
    error_count: usize,
    duration_secs: f64,
) {
    let labels = [
        ("status", status.to_string()),
        ("trigger", trigger.to_string()),
    ];
    counter!(SYNC_RUNS, &labels).increment(1);
    histogram!(SYNC_RUN_DURATION, &labels).record(duration_secs);
    counter!(SYNC_DRIFT_FLAGS).increment(u64::from(summary.drift_flags_raised));
    counter!(SYNC_APPLY_ERRORS).increment(u64::try_from(error_count).unwrap_or(u64::MAX));
}

/// Records a rejected concurrent sync request.
pub fn record_rejected() {
    counter!(SYNC_REJECTED).increment(1);
}
