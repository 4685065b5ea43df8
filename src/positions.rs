// src/positions.rs
//! The position pipeline: capture → extract → baseline → history → outputs.
//!
//! Any failure here fails the run. Nothing is written before extraction
//! produced at least one record, so a broken upstream never truncates the
//! files downstream consumers read.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::path::Path;

use crate::baseline::{resolve_baseline, BaselineSource};
use crate::config::{DebugOptions, Paths, ScannerConfig, SnapshotResolution};
use crate::error::WatchError;
use crate::extract::{extract_queues, DashboardCapture, DashboardSource, Strategy};
use crate::history::{snapshot_ts, HistoryStore};
use crate::metrics::{EXTRACTION_FALLBACKS, HISTORY_POINTS_APPENDED, QUEUES_EXTRACTED};
use crate::progress::{progress_since_start, window_progress};
use crate::snapshot::CurrentSnapshot;

pub struct PositionJob<'a> {
    pub paths: &'a Paths,
    pub scanner: &'a ScannerConfig,
    pub resolution: SnapshotResolution,
    pub debug: &'a DebugOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionsReport {
    pub strategy: Strategy,
    pub queues: usize,
    pub appended: usize,
    pub baseline: BaselineSource,
}

impl PositionJob<'_> {
    pub async fn run(&self, source: &dyn DashboardSource, now: DateTime<Utc>) -> Result<PositionsReport> {
        let capture = source
            .capture()
            .await
            .with_context(|| format!("capture via {}", source.name()))?;
        tracing::info!(
            target: "positions",
            source = source.name(),
            payloads = capture.payloads.len(),
            pages = capture.pages.len(),
            "dashboard captured"
        );

        if self.debug.dump_payloads {
            dump_capture(&capture, &self.debug.dump_dir);
        }

        if capture.is_empty() {
            return Err(WatchError::EmptyResult { payloads: 0 }.into());
        }
        let extraction = extract_queues(&capture, self.scanner).map_err(|miss| {
            WatchError::ExtractionMiss {
                stage: "positions",
                tried: miss.tried,
            }
        })?;
        if extraction.strategy != Strategy::Subscriptions {
            counter!(EXTRACTION_FALLBACKS).increment(1);
        }

        let mut records = extraction.records;
        if !records.iter().any(|r| r.has_placement()) {
            return Err(WatchError::EmptyResult {
                payloads: capture.payloads.len(),
            }
            .into());
        }

        let (baseline, baseline_source) = resolve_baseline(
            &self.paths.start_positions,
            &self.paths.start_positions_override,
            &records,
        )?;

        let mut history = HistoryStore::load(&self.paths.history_json)?;
        let ts = snapshot_ts(now, self.resolution);
        let appended = history.append_snapshot(ts, &records);

        for rec in &mut records {
            rec.progress = progress_since_start(rec.position, baseline.get(rec.key()));
            rec.windows = window_progress(history.series(&rec.id), ts);
        }

        history.save(&self.paths.history_json)?;
        let names: HashMap<String, String> = records
            .iter()
            .map(|r| (r.id.clone(), r.name.clone()))
            .collect();
        history.write_csv(&names, &self.paths.history_csv)?;

        let snapshot = CurrentSnapshot::new(now, records);
        snapshot.write(&self.paths.current_json)?;

        counter!(HISTORY_POINTS_APPENDED).increment(appended as u64);
        gauge!(QUEUES_EXTRACTED).set(snapshot.queues.len() as f64);
        tracing::info!(
            target: "positions",
            strategy = extraction.strategy.label(),
            queues = snapshot.queues.len(),
            appended,
            baseline = ?baseline_source,
            "positions updated"
        );

        Ok(PositionsReport {
            strategy: extraction.strategy,
            queues: snapshot.queues.len(),
            appended,
            baseline: baseline_source,
        })
    }
}

/// Best effort: a failed dump is logged and the run goes on.
fn dump_capture(capture: &DashboardCapture, dir: &Path) {
    if let Err(e) = try_dump(capture, dir) {
        tracing::warn!(target: "positions", dir = %dir.display(), error = %e, "debug dump failed");
    }
}

fn try_dump(capture: &DashboardCapture, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for (i, p) in capture.payloads.iter().enumerate() {
        let body = serde_json::to_vec_pretty(p)?;
        std::fs::write(dir.join(format!("payload-{i:03}.json")), body)?;
    }
    for (i, html) in capture.pages.iter().enumerate() {
        std::fs::write(dir.join(format!("page-{i:03}.html")), html)?;
    }
    tracing::debug!(target: "positions", dir = %dir.display(), "capture dumped");
    Ok(())
}
