// src/snapshot.rs
//! `current.json`: the fresh result of one run for downstream consumers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::extract::QueueRecord;
use crate::history::write_json_pretty;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSnapshot {
    pub updated_at: DateTime<Utc>,
    pub queues: Vec<QueueRecord>,
}

impl CurrentSnapshot {
    /// Queues are ordered by case-folded name, then id.
    pub fn new(updated_at: DateTime<Utc>, mut queues: Vec<QueueRecord>) -> Self {
        queues.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { updated_at, queues }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self).with_context(|| format!("writing {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressSinceStart, WindowProgress};
    use chrono::TimeZone;

    #[test]
    fn serialized_shape_omits_missing_parts() {
        let ts = Utc.with_ymd_and_hms(2025, 2, 1, 5, 0, 0).unwrap();
        let snap = CurrentSnapshot::new(
            ts,
            vec![
                QueueRecord {
                    id: "2".into(),
                    name: "beta".into(),
                    position: Some(10),
                    total: Some(100),
                    progress: Some(ProgressSinceStart {
                        start_position: 20,
                        moved: 10,
                        moved_pct: 50.0,
                    }),
                    windows: WindowProgress {
                        week: Some(1),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                QueueRecord {
                    id: "1".into(),
                    name: "Alpha".into(),
                    ..Default::default()
                },
            ],
        );
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["updated_at"], "2025-02-01T05:00:00Z");
        assert_eq!(v["queues"][0], serde_json::json!({ "id": "1", "name": "Alpha" }));
        assert_eq!(v["queues"][1]["progress"]["moved_pct"], 50.0);
        assert_eq!(v["queues"][1]["windows"], serde_json::json!({ "week": 1 }));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("current.json");
        let snap = CurrentSnapshot::new(Utc::now(), vec![]);
        snap.write(&p).unwrap();
        assert_eq!(CurrentSnapshot::read(&p).unwrap().queues.len(), 0);
    }
}
