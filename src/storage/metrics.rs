//! Statement metrics shared by all SQL clients.

use std::time::Instant;

/// Records operation metrics for one statement.
///
/// This function records two metrics for each statement:
/// 1. `storage_operations_total` - Counter for operation count by status
/// 2. `storage_operation_duration_ms` - Histogram for operation latency
///
/// # Arguments
///
/// * `backend` - Backend name (e.g., "sqlite", "postgresql")
/// * `operation` - Operation name ("query", "execute", "connect", "close")
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status ("success" or "error")
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Records metrics for a finished call and passes its result through.
pub fn observe<T, E>(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    result: Result<T, E>,
) -> Result<T, E> {
    let status = if result.is_ok() { "success" } else { "error" };
    record_operation_metrics(backend, operation, start, status);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operation_metrics() {
        // No recorder is installed; recording must still be a no-op, not a panic.
        let start = Instant::now();
        record_operation_metrics("sqlite", "query", start, "success");
        record_operation_metrics("sqlite", "query", start, "error");
    }

    #[test]
    fn test_observe_passes_result_through() {
        let ok: Result<u8, &str> = observe("sqlite", "execute", Instant::now(), Ok(3));
        assert_eq!(ok, Ok(3));
        let err: Result<u8, &str> = observe("sqlite", "execute", Instant::now(), Err("boom"));
        assert_eq!(err, Err("boom"));
    }
}
