//! # Progress
//! Movement of a queue position, lower is better.
//!
//! - [`progress_since_start`] compares against the user's start baseline.
//! - [`window_progress`] compares against history at 7/30/365 days back.
//!
//! Both are pure; the pipeline attaches the results to `QueueRecord`s.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::history::HistoryPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSinceStart {
    pub start_position: i64,
    /// `start_position - current_position`; positive means the queue moved up.
    pub moved: i64,
    pub moved_pct: f64,
}

/// `None` when either side is missing, the start position is not positive,
/// or the difference does not fit an `i64`.
pub fn progress_since_start(
    current_position: Option<i64>,
    start_position: Option<i64>,
) -> Option<ProgressSinceStart> {
    let current = current_position?;
    let start = start_position.filter(|s| *s > 0)?;
    let moved = start.checked_sub(current)?;
    Some(ProgressSinceStart {
        start_position: start,
        moved,
        moved_pct: round2(moved as f64 / start as f64 * 100.0),
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Deltas against history; a window without a qualifying point is `None`
/// and is left out of the serialized object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
}

impl WindowProgress {
    pub fn is_empty(&self) -> bool {
        self.week.is_none() && self.month.is_none() && self.year.is_none()
    }
}

pub const WEEK_DAYS: i64 = 7;
pub const MONTH_DAYS: i64 = 30;
pub const YEAR_DAYS: i64 = 365;

/// For each window, take the most recent point at or before `now - days`
/// and report `that.position - latest.position`.
///
/// The latest point is the current observation and never counts as
/// history for itself, so a single-point series yields no windows.
/// Among equal timestamps the later-appended point wins. A delta that
/// overflows leaves that window empty.
pub fn window_progress(series: &[HistoryPoint], now: DateTime<Utc>) -> WindowProgress {
    let Some((latest, earlier)) = series.split_last() else {
        return WindowProgress::default();
    };

    let delta_for = |days: i64| -> Option<i64> {
        let target = now - Duration::days(days);
        earlier
            .iter()
            .filter(|p| p.ts <= target)
            .max_by_key(|p| p.ts)
            .and_then(|p| p.position.checked_sub(latest.position))
    };

    WindowProgress {
        week: delta_for(WEEK_DAYS),
        month: delta_for(MONTH_DAYS),
        year: delta_for(YEAR_DAYS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(ts: DateTime<Utc>, position: i64) -> HistoryPoint {
        HistoryPoint {
            ts,
            position,
            total: 1_000,
        }
    }

    #[test]
    fn since_start_basic() {
        let p = progress_since_start(Some(90), Some(120)).unwrap();
        assert_eq!(p.start_position, 120);
        assert_eq!(p.moved, 30);
        assert_eq!(p.moved_pct, 25.0);
    }

    #[test]
    fn since_start_undefined_cases() {
        assert_eq!(progress_since_start(Some(10), Some(0)), None);
        assert_eq!(progress_since_start(Some(10), Some(-4)), None);
        assert_eq!(progress_since_start(None, Some(50)), None);
        assert_eq!(progress_since_start(Some(50), None), None);
    }

    #[test]
    fn since_start_rounds_and_allows_regression() {
        let p = progress_since_start(Some(2), Some(3)).unwrap();
        assert_eq!(p.moved_pct, 33.33);
        let back = progress_since_start(Some(130), Some(120)).unwrap();
        assert_eq!(back.moved, -10);
        assert_eq!(back.moved_pct, -8.33);
    }

    #[test]
    fn single_point_has_no_windows() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let w = window_progress(&[point(now - Duration::days(500), 10)], now);
        assert!(w.is_empty());
        assert!(window_progress(&[], now).is_empty());
    }

    #[test]
    fn windows_pick_nearest_prior_point() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let series = vec![
            point(t - Duration::days(400), 500),
            point(t - Duration::days(40), 300),
            point(t - Duration::days(10), 250),
            point(t, 200),
        ];
        let w = window_progress(&series, t);
        assert_eq!(w.week, Some(50));
        assert_eq!(w.month, Some(100));
        assert_eq!(w.year, Some(300));
    }

    #[test]
    fn missing_window_is_absent_not_zero() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let series = vec![point(t - Duration::days(8), 40), point(t, 35)];
        let w = window_progress(&series, t);
        assert_eq!(w.week, Some(5));
        assert_eq!(w.month, None);
        assert_eq!(w.year, None);

        let json = serde_json::to_value(w).unwrap();
        assert_eq!(json, serde_json::json!({ "week": 5 }));
    }

    #[test]
    fn overflowing_deltas_are_absent() {
        assert_eq!(progress_since_start(Some(i64::MIN), Some(5)), None);
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let series = vec![point(t - Duration::days(8), i64::MAX), point(t, -5)];
        assert_eq!(window_progress(&series, t), WindowProgress::default());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let series = vec![point(t - Duration::days(7), 12), point(t, 10)];
        assert_eq!(window_progress(&series, t).week, Some(2));
    }
}
