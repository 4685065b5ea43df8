// src/history.rs
//! Per-queue time series of (timestamp, position, total).
//!
//! Append-only: points are never rewritten or pruned. A re-run with the same
//! timestamp does not add a second point.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::SnapshotResolution;
use crate::extract::QueueRecord;

pub const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(deserialize_with = "de_ts")]
    pub ts: DateTime<Utc>,
    pub position: i64,
    pub total: i64,
}

/// Accepts RFC 3339 and the plain `YYYY-MM-DD` dates older files used.
fn de_ts<'de, D>(d: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    parse_ts(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw:?}")))
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Run timestamp as stored in history.
pub fn snapshot_ts(now: DateTime<Utc>, resolution: SnapshotResolution) -> DateTime<Utc> {
    match resolution {
        SnapshotResolution::Second => now.trunc_subsecs(0),
        SnapshotResolution::Day => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|n| Utc.from_utc_datetime(&n))
            .unwrap_or(now),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStore {
    pub version: u32,
    #[serde(default)]
    pub lists: BTreeMap<String, Vec<HistoryPoint>>,
    /// Last name seen per id; kept after a queue leaves the account.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub names: BTreeMap<String, String>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            lists: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }
}

impl HistoryStore {
    /// Missing file → empty store. A file that exists but does not parse is
    /// an error: overwriting it would lose history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading history from {}", path.display()))?;
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let store: HistoryStore = serde_json::from_str(&s)
            .with_context(|| format!("parsing history {}", path.display()))?;
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self)
    }

    pub fn series(&self, id: &str) -> &[HistoryPoint] {
        self.lists.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append one point per record that has both position and total.
    /// Returns how many points were added.
    pub fn append_snapshot(&mut self, ts: DateTime<Utc>, records: &[QueueRecord]) -> usize {
        let mut added = 0usize;
        for rec in records {
            if !rec.id.is_empty() && !rec.name.is_empty() {
                self.names.insert(rec.id.clone(), rec.name.clone());
            }
            let (Some(position), Some(total)) = (rec.position, rec.total) else {
                continue;
            };
            if rec.id.is_empty() {
                continue;
            }
            let series = self.lists.entry(rec.id.clone()).or_default();
            if let Some(last) = series.last() {
                if last.ts == ts {
                    tracing::trace!(target: "history", id = %rec.id, "same timestamp, skipped");
                    continue;
                }
                if last.ts > ts {
                    tracing::warn!(
                        target: "history",
                        id = %rec.id,
                        last = %last.ts,
                        %ts,
                        "timestamp older than newest point, skipped"
                    );
                    continue;
                }
            }
            series.push(HistoryPoint {
                ts,
                position,
                total,
            });
            added += 1;
        }
        added
    }

    /// Flatten every series into `timestamp,list_id,name,position,total` rows.
    /// `names` wins over the stored last-known names.
    /// Series are emitted by id, points in insertion (chronological) order.
    pub fn export_csv<W: Write>(&self, names: &HashMap<String, String>, out: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(["timestamp", "list_id", "name", "position", "total"])
            .context("writing csv header")?;
        for (id, series) in &self.lists {
            let name = names
                .get(id)
                .or_else(|| self.names.get(id))
                .map(String::as_str)
                .unwrap_or("");
            for p in series {
                wtr.write_record([
                    p.ts.to_rfc3339(),
                    id.clone(),
                    name.to_string(),
                    p.position.to_string(),
                    p.total.to_string(),
                ])
                .context("writing csv row")?;
            }
        }
        wtr.flush().context("flushing csv")?;
        Ok(())
    }

    pub fn write_csv(&self, names: &HashMap<String, String>, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let file = fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        self.export_csv(names, file)
    }

    pub fn point_count(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(())
}

/// Pretty JSON with a trailing newline, written through a sibling temp file.
pub(crate) fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let mut bytes = serde_json::to_vec_pretty(value).context("serializing json")?;
    bytes.push(b'\n');
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rec(id: &str, position: Option<i64>, total: Option<i64>) -> QueueRecord {
        QueueRecord {
            id: id.into(),
            name: format!("List {id}"),
            position,
            total,
            ..Default::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 7, 30, 0).unwrap()
    }

    #[test]
    fn same_timestamp_appends_once() {
        let mut h = HistoryStore::default();
        let recs = [rec("42", Some(100), Some(900))];
        assert_eq!(h.append_snapshot(t0(), &recs), 1);
        assert_eq!(h.append_snapshot(t0(), &recs), 0);
        assert_eq!(h.series("42").len(), 1);
    }

    #[test]
    fn records_without_placement_are_skipped() {
        let mut h = HistoryStore::default();
        let recs = [rec("1", Some(5), None), rec("2", None, Some(9)), rec("3", Some(1), Some(2))];
        assert_eq!(h.append_snapshot(t0(), &recs), 1);
        assert!(h.series("1").is_empty());
        assert_eq!(h.series("3")[0].position, 1);
    }

    #[test]
    fn older_timestamp_never_rewrites_history() {
        let mut h = HistoryStore::default();
        h.append_snapshot(t0(), &[rec("a", Some(10), Some(50))]);
        let added = h.append_snapshot(t0() - Duration::days(1), &[rec("a", Some(11), Some(50))]);
        assert_eq!(added, 0);
        assert_eq!(h.series("a"), &[HistoryPoint { ts: t0(), position: 10, total: 50 }]);
    }

    #[test]
    fn csv_rows_follow_series_order() {
        let mut h = HistoryStore::default();
        h.append_snapshot(t0(), &[rec("b", Some(7), Some(70)), rec("a", Some(3), Some(30))]);
        h.append_snapshot(t0() + Duration::days(1), &[rec("a", Some(2), Some(31))]);
        let names: HashMap<String, String> = [("a".to_string(), "Andel, A/S".to_string())].into();

        let mut buf = Vec::new();
        h.export_csv(&names, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,list_id,name,position,total");
        assert_eq!(lines[1], "2025-01-10T07:30:00+00:00,a,\"Andel, A/S\",3,30");
        assert_eq!(lines[2], "2025-01-11T07:30:00+00:00,a,\"Andel, A/S\",2,31");
        // no name passed for b: the stored one is used
        assert_eq!(lines[3], "2025-01-10T07:30:00+00:00,b,List b,7,70");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn dropped_queue_keeps_its_name_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut h = HistoryStore::default();
        h.append_snapshot(t0(), &[rec("gone", Some(9), Some(90)), rec("stay", Some(4), Some(40))]);
        h.save(&path).unwrap();

        let mut h = HistoryStore::load(&path).unwrap();
        h.append_snapshot(t0() + Duration::days(1), &[rec("stay", Some(3), Some(40))]);
        let names: HashMap<String, String> = [("stay".to_string(), "Stay".to_string())].into();
        let mut buf = Vec::new();
        h.export_csv(&names, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(",gone,List gone,9,90"));
        assert!(text.contains(",stay,Stay,3,40"));
    }

    #[test]
    fn loads_date_only_timestamps() {
        let raw = r#"{"version":1,"lists":{"9":[{"ts":"2024-12-01","position":4,"total":8}]}}"#;
        let h: HistoryStore = serde_json::from_str(raw).unwrap();
        let p = h.series("9")[0];
        assert_eq!(p.ts, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn save_then_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let mut h = HistoryStore::default();
        h.append_snapshot(t0(), &[rec("x", Some(1), Some(2))]);
        h.save(&path).unwrap();
        assert_eq!(HistoryStore::load(&path).unwrap(), h);
        assert_eq!(HistoryStore::load(&dir.path().join("none.json")).unwrap().point_count(), 0);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{not json").unwrap();
        assert!(HistoryStore::load(&path).is_err());
    }

    #[test]
    fn day_resolution_truncates_to_midnight() {
        let ts = snapshot_ts(t0(), SnapshotResolution::Day);
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
    }
}
