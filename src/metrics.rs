use tracing::trace;

// Trace-based counters; the Prometheus endpoint renders whatever recorder is installed.

pub fn inc_requests(route: &'static str) {
    trace!(target = "listing.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(operation: &'static str, elapsed_ms: u128) {
    trace!(
        target = "listing.metrics",
        operation = operation,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn pipeline_outcome(operation: &'static str, source: &'static str) {
    trace!(
        target = "listing.metrics",
        operation = operation,
        source = source,
        "pipeline_outcome"
    );
}
