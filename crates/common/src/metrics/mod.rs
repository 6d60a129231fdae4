//! Metrics for the harvest pipeline
//!
//! Counters and histograms follow the `paperharvest_*` naming convention.
//! Nothing is exported unless the host process installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all PaperHarvest metrics
pub const METRICS_PREFIX: &str = "paperharvest";

/// Outcome of one eprint save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EprintOutcome {
    Saved,
    Duplicate,
    Failed,
}

impl EprintOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EprintOutcome::Saved => "saved",
            EprintOutcome::Duplicate => "duplicate",
            EprintOutcome::Failed => "failed",
        }
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_pages_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Feed pages fetched, labelled by category and emptiness"
    );

    describe_counter!(
        format!("{}_entries_parsed_total", METRICS_PREFIX),
        Unit::Count,
        "Feed entries parsed"
    );

    describe_counter!(
        format!("{}_eprints_total", METRICS_PREFIX),
        Unit::Count,
        "Eprints processed, labelled by outcome"
    );

    describe_histogram!(
        format!("{}_eprint_save_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Composite eprint save latency in seconds"
    );

    describe_counter!(
        format!("{}_fetch_requests_total", METRICS_PREFIX),
        Unit::Count,
        "HTTP fetches, labelled by status"
    );

    describe_histogram!(
        format!("{}_fetch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP fetch latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Record one fetched feed page
pub fn record_page(category: &str, entries: usize, empty: bool) {
    counter!(
        format!("{}_pages_fetched_total", METRICS_PREFIX),
        "category" => category.to_string(),
        "empty" => empty.to_string()
    )
    .increment(1);

    counter!(
        format!("{}_entries_parsed_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(entries as u64);
}

/// Record one eprint save
pub fn record_eprint(category: &str, outcome: EprintOutcome, duration_secs: f64) {
    counter!(
        format!("{}_eprints_total", METRICS_PREFIX),
        "category" => category.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        format!("{}_eprint_save_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.as_str()
    )
    .record(duration_secs);
}

/// Record one HTTP fetch
pub fn record_fetch(status: &str, duration_secs: f64) {
    counter!(
        format!("{}_fetch_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(format!("{}_fetch_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        register_metrics();
        record_page("cs.AI", 10, false);
        record_eprint("cs.AI", EprintOutcome::Duplicate, 0.01);
        record_fetch("200", 0.5);
        // Just verify it runs without panic
    }
}
