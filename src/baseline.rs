// src/baseline.rs
//! Start positions used for lifetime progress.
//!
//! `start_positions.override.json` (hand-edited) wins when it has entries;
//! otherwise `start_positions.json`. When neither exists the plain file is
//! written once, seeded from the first observed positions. An existing file
//! is never rewritten.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::extract::scanner::coerce_int;
use crate::extract::QueueRecord;
use crate::history::write_json_pretty;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartBaseline {
    pub start_positions: BTreeMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct RawBaseline {
    #[serde(default)]
    start_positions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSource {
    Override,
    Plain,
    Seeded,
}

impl StartBaseline {
    pub fn get(&self, id: &str) -> Option<i64> {
        self.start_positions.get(id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.start_positions.is_empty()
    }

    /// Values may be hand-typed as strings ("120"); anything else is dropped.
    pub fn parse(s: &str) -> Result<Self> {
        let raw: RawBaseline = serde_json::from_str(s).context("parsing start positions")?;
        let start_positions = raw
            .start_positions
            .into_iter()
            .filter_map(|(k, v)| coerce_int(&v).map(|n| (k, n)))
            .collect();
        Ok(Self { start_positions })
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading baseline {}", path.display()))?;
        if s.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        Self::parse(&s)
            .with_context(|| format!("in {}", path.display()))
            .map(Some)
    }

    pub fn seeded_from(records: &[QueueRecord]) -> Self {
        let start_positions = records
            .iter()
            .filter(|r| !r.id.is_empty())
            .filter_map(|r| r.position.map(|p| (r.id.clone(), p)))
            .collect();
        Self { start_positions }
    }
}

/// Resolve the baseline for this run, writing the seeded file if needed.
pub fn resolve_baseline(
    plain: &Path,
    override_path: &Path,
    records: &[QueueRecord],
) -> Result<(StartBaseline, BaselineSource)> {
    if let Some(b) = StartBaseline::read(override_path)? {
        if !b.is_empty() {
            return Ok((b, BaselineSource::Override));
        }
        tracing::debug!(target: "baseline", "override file present but empty, ignored");
    }
    if let Some(b) = StartBaseline::read(plain)? {
        return Ok((b, BaselineSource::Plain));
    }

    let seeded = StartBaseline::seeded_from(records);
    write_json_pretty(plain, &seeded)?;
    tracing::info!(
        target: "baseline",
        path = %plain.display(),
        queues = seeded.start_positions.len(),
        "no start positions found, wrote seeded baseline"
    );
    Ok((seeded, BaselineSource::Seeded))
}
