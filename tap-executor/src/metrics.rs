use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const TAP_RECORDS_DELIVERED_TOTAL: &str = "tap_records_delivered_total";
pub const TAP_RECORDS_SKIPPED_TOTAL: &str = "tap_records_skipped_total";
pub const TAP_DECODE_ERRORS_TOTAL: &str = "tap_decode_errors_total";
pub const TAP_BOOKMARK_COMMITS_TOTAL: &str = "tap_bookmark_commits_total";
pub const TAP_BATCH_SIZE: &str = "tap_batch_size";
pub const TAP_BATCH_SEND_DURATION_SECONDS: &str = "tap_batch_send_duration_seconds";
pub const TAP_RUNS_FINISHED_TOTAL: &str = "tap_runs_finished_total";
pub const TAP_ID: &str = "tap_id";
pub const STREAM: &str = "stream";
pub const STATUS: &str = "status";
pub const FAILURE_KIND: &str = "failure_kind";

/// Registers the metrics emitted by runs. Safe to call many times, registration happens once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            TAP_RECORDS_DELIVERED_TOTAL,
            Unit::Count,
            "Total number of records delivered to the sink"
        );

        describe_counter!(
            TAP_RECORDS_SKIPPED_TOTAL,
            Unit::Count,
            "Total number of records dropped because they violated their schema"
        );

        describe_counter!(
            TAP_DECODE_ERRORS_TOTAL,
            Unit::Count,
            "Total number of tap output lines that could not be decoded"
        );

        describe_counter!(
            TAP_BOOKMARK_COMMITS_TOTAL,
            Unit::Count,
            "Total number of bookmarks committed to the state store"
        );

        describe_gauge!(
            TAP_BATCH_SIZE,
            Unit::Count,
            "Number of records in the last batch sent to the sink"
        );

        describe_histogram!(
            TAP_BATCH_SEND_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to deliver a batch to the sink, retries included"
        );

        describe_counter!(
            TAP_RUNS_FINISHED_TOTAL,
            Unit::Count,
            "Total number of runs that reached a terminal status"
        );
    });
}
