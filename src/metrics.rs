// src/metrics.rs
//
// Observability is optional: with the `observability` feature the
// helpers below emit through the `metrics` facade, without it they
// compile to no-ops so call sites never need cfg guards.

use std::time::Duration;

/// Initializes the descriptions for all the metrics in the pipeline.
/// Call once at startup.
pub fn describe_metrics() {
    #[cfg(feature = "observability")]
    {
        use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

        describe_histogram!(
            "oddsflow_poll_duration_ms",
            Unit::Milliseconds,
            "Per-tick processing time, exclusive of the vendor round-trip."
        );
        describe_counter!(
            "oddsflow_quotes_seen_total",
            "Quotes inspected by the delta engine."
        );
        describe_counter!(
            "oddsflow_changes_detected_total",
            "Quotes whose classification was not None."
        );
        describe_counter!("oddsflow_cache_hits_total", "Cache entries decoded.");
        describe_counter!(
            "oddsflow_cache_misses_total",
            "Cache lookups that were absent or unparseable."
        );
        describe_counter!(
            "oddsflow_archive_rows_written_total",
            "Quote rows inserted with is_latest = true."
        );
        describe_histogram!(
            "oddsflow_write_duration_ms",
            Unit::Milliseconds,
            "Transactional write duration."
        );
        describe_counter!(
            "oddsflow_publish_failures_total",
            "Stream publishes that failed after commit."
        );
        describe_counter!(
            "oddsflow_page_notifications_total",
            "Page-manager warm/close attempts."
        );
        describe_gauge!(
            "oddsflow_vendor_requests_remaining",
            "Vendor API request budget reported by response headers."
        );
    }
}

pub fn record_vendor_quota(remaining: f64) {
    #[cfg(feature = "observability")]
    metrics::gauge!("oddsflow_vendor_requests_remaining", remaining);
    #[cfg(not(feature = "observability"))]
    let _ = remaining;
}

pub fn record_poll_duration(sport: &str, duration: Duration) {
    #[cfg(feature = "observability")]
    metrics::histogram!(
        "oddsflow_poll_duration_ms",
        duration.as_secs_f64() * 1000.0,
        "sport" => sport.to_string()
    );
    #[cfg(not(feature = "observability"))]
    let _ = (sport, duration);
}

pub fn record_delta_batch(seen: usize, changed: usize) {
    #[cfg(feature = "observability")]
    {
        metrics::counter!("oddsflow_quotes_seen_total", seen as u64);
        metrics::counter!("oddsflow_changes_detected_total", changed as u64);
    }
    #[cfg(not(feature = "observability"))]
    let _ = (seen, changed);
}

pub fn increment_cache_hit() {
    #[cfg(feature = "observability")]
    metrics::increment_counter!("oddsflow_cache_hits_total");
}

pub fn increment_cache_miss() {
    #[cfg(feature = "observability")]
    metrics::increment_counter!("oddsflow_cache_misses_total");
}

pub fn record_write_batch(rows: usize, duration: Duration) {
    #[cfg(feature = "observability")]
    {
        metrics::counter!("oddsflow_archive_rows_written_total", rows as u64);
        metrics::histogram!(
            "oddsflow_write_duration_ms",
            duration.as_secs_f64() * 1000.0
        );
    }
    #[cfg(not(feature = "observability"))]
    let _ = (rows, duration);
}

pub fn increment_publish_failure() {
    #[cfg(feature = "observability")]
    metrics::increment_counter!("oddsflow_publish_failures_total");
}

pub fn increment_page_notification(endpoint: &str, ok: bool) {
    #[cfg(feature = "observability")]
    metrics::counter!(
        "oddsflow_page_notifications_total",
        1,
        "endpoint" => endpoint.to_string(),
        "ok" => ok.to_string()
    );
    #[cfg(not(feature = "observability"))]
    let _ = (endpoint, ok);
}
