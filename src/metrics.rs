// src/metrics.rs
//! Run counters. Without a recorder the `metrics` macros are no-ops; with
//! `WAITLY_METRICS_PATH` set, a Prometheus recorder is installed and its
//! text exposition is written there at the end of the run (for a
//! node_exporter textfile collector).

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

pub const QUEUES_EXTRACTED: &str = "waitly_queues_extracted";
pub const HISTORY_POINTS_APPENDED: &str = "waitly_history_points_appended_total";
pub const EXTRACTION_FALLBACKS: &str = "waitly_extraction_fallbacks_total";
pub const SITEMAP_NEW_URLS: &str = "waitly_sitemap_new_urls_total";
pub const OPENINGS_DETECTED: &str = "waitly_openings_detected_total";
pub const WATCH_FETCH_ERRORS: &str = "waitly_watch_fetch_errors_total";
pub const STAGE_FAILURES: &str = "waitly_stage_failures_total";
pub const LAST_RUN_TS: &str = "waitly_last_run_ts";

/// One-time registration so series carry descriptions.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!(QUEUES_EXTRACTED, "Queue records extracted in the last run.");
        describe_counter!(HISTORY_POINTS_APPENDED, "Points appended to history.json.");
        describe_counter!(
            EXTRACTION_FALLBACKS,
            "Runs where the subscriptions payload was missing and the scanner was used."
        );
        describe_counter!(SITEMAP_NEW_URLS, "New in-scope sitemap URLs reported.");
        describe_counter!(OPENINGS_DETECTED, "Watched pages seen going closed -> open.");
        describe_counter!(WATCH_FETCH_ERRORS, "Sitemap/opening fetches that failed.");
        describe_counter!(STAGE_FAILURES, "Run stages that ended in an error.");
        describe_gauge!(LAST_RUN_TS, "Unix ts when the run finished.");
    });
}

pub struct RunMetrics {
    handle: Option<PrometheusHandle>,
    path: Option<PathBuf>,
}

impl RunMetrics {
    /// Best effort: a failing recorder install only disables the export.
    pub fn init(path: Option<&Path>) -> Self {
        let handle = path.and_then(|_| match PrometheusBuilder::new().install_recorder() {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(target: "metrics", error = %e, "prometheus recorder not installed");
                None
            }
        });
        ensure_metrics_described();
        Self {
            handle,
            path: path.map(Path::to_path_buf),
        }
    }

    pub fn flush(&self) {
        let (Some(handle), Some(path)) = (&self.handle, &self.path) else {
            return;
        };
        if let Err(e) = std::fs::write(path, handle.render()) {
            tracing::warn!(target: "metrics", path = %path.display(), error = %e, "metrics export failed");
        }
    }
}
