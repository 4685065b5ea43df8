// tests/positions_pipeline.rs
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::path::Path;

use waitly_watch::baseline::BaselineSource;
use waitly_watch::config::{DebugOptions, Paths, ScannerConfig, SnapshotResolution};
use waitly_watch::extract::capture::CaptureSource;
use waitly_watch::extract::{CapturedPayload, DashboardCapture, Strategy};
use waitly_watch::history::HistoryStore;
use waitly_watch::positions::PositionJob;
use waitly_watch::snapshot::CurrentSnapshot;

fn subscriptions(a_pos: i64, b_pos: i64) -> Value {
    json!({ "data": [
        { "placement": a_pos, "active": true,
          "list": { "id": 11, "name": "Familieboliger", "company": { "name": "AKB" }, "subscribers": 900 } },
        { "placement": b_pos,
          "list": { "id": 12, "name": "Andelsforeningen Nord", "subscribers": 400 } }
    ]})
}

fn source(body: Value) -> CaptureSource {
    CaptureSource::from_static(DashboardCapture {
        payloads: vec![CapturedPayload {
            url: Some("https://app.waitly.dk/api/v2/subscriptions".into()),
            body,
        }],
        pages: vec![],
    })
}

async fn run_once(dir: &Path, body: Value, now: chrono::DateTime<Utc>) -> anyhow::Result<waitly_watch::positions::PositionsReport> {
    let paths = Paths::under(dir, &dir.join("state"));
    let scanner = ScannerConfig::default();
    let debug = DebugOptions::default();
    PositionJob {
        paths: &paths,
        scanner: &scanner,
        resolution: SnapshotResolution::Second,
        debug: &debug,
    }
    .run(&source(body), now)
    .await
}

#[tokio::test]
async fn first_run_seeds_baseline_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();

    let report = run_once(dir.path(), subscriptions(120, 40), now).await.unwrap();
    assert_eq!(report.strategy, Strategy::Subscriptions);
    assert_eq!(report.queues, 2);
    assert_eq!(report.appended, 2);
    assert_eq!(report.baseline, BaselineSource::Seeded);

    let seeded: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("start_positions.json")).unwrap())
            .unwrap();
    assert_eq!(seeded["start_positions"]["11"], json!(120));

    let snap = CurrentSnapshot::read(&dir.path().join("current.json")).unwrap();
    let names: Vec<&str> = snap.queues.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["AKB - Familieboliger", "Andelsforeningen Nord"]);
    let p = snap.queues[0].progress.as_ref().unwrap();
    assert_eq!((p.start_position, p.moved), (120, 0));
    assert!(snap.queues[0].windows.is_empty());

    let csv = std::fs::read_to_string(dir.path().join("history.csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("timestamp,list_id,name,position,total"));
    assert_eq!(lines.count(), 2);
}

#[tokio::test]
async fn later_runs_accumulate_history_and_windows() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();

    run_once(dir.path(), subscriptions(120, 40), t0).await.unwrap();
    run_once(dir.path(), subscriptions(110, 40), t0 + Duration::days(8)).await.unwrap();
    // same instant again: no duplicate points
    let again = run_once(dir.path(), subscriptions(110, 40), t0 + Duration::days(8)).await.unwrap();
    assert_eq!(again.appended, 0);
    assert_eq!(again.baseline, BaselineSource::Plain);

    let history = HistoryStore::load(&dir.path().join("history.json")).unwrap();
    assert_eq!(history.series("11").len(), 2);
    assert_eq!(history.point_count(), 4);

    let snap = CurrentSnapshot::read(&dir.path().join("current.json")).unwrap();
    let akb = snap.queues.iter().find(|q| q.id == "11").unwrap();
    assert_eq!(akb.windows.week, Some(10));
    assert_eq!(akb.windows.month, None);
    let p = akb.progress.as_ref().unwrap();
    assert_eq!(p.moved, 10);
    assert!((p.moved_pct - 8.33).abs() < 1e-9);
}

#[tokio::test]
async fn override_baseline_wins() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("start_positions.override.json"),
        r#"{"start_positions":{"11":"200"}}"#,
    )
    .unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
    let report = run_once(dir.path(), subscriptions(150, 40), now).await.unwrap();
    assert_eq!(report.baseline, BaselineSource::Override);

    let snap = CurrentSnapshot::read(&dir.path().join("current.json")).unwrap();
    let akb = snap.queues.iter().find(|q| q.id == "11").unwrap();
    assert_eq!(akb.progress.as_ref().unwrap().moved, 50);
    // not in the override: no progress block
    let nord = snap.queues.iter().find(|q| q.id == "12").unwrap();
    assert!(nord.progress.is_none());
}

#[tokio::test]
async fn scanner_fallback_from_capture_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cap = dir.path().join("capture");
    std::fs::create_dir_all(&cap).unwrap();
    std::fs::write(
        cap.join("001.json"),
        json!({ "url": "https://app.waitly.dk/api/widgets", "body": {
            "widgets": [ { "title": "Boligselskabet Syd", "rank": "33", "members": 500 } ]
        }})
        .to_string(),
    )
    .unwrap();
    std::fs::write(cap.join("002.json"), "{ not json").unwrap();

    let paths = Paths::under(dir.path(), &dir.path().join("state"));
    let scanner = ScannerConfig::default();
    let debug = DebugOptions::default();
    let report = PositionJob {
        paths: &paths,
        scanner: &scanner,
        resolution: SnapshotResolution::Day,
        debug: &debug,
    }
    .run(&CaptureSource::from_dir(&cap), Utc::now())
    .await
    .unwrap();

    assert_eq!(report.strategy, Strategy::ScanPayloads);
    let snap = CurrentSnapshot::read(&paths.current_json).unwrap();
    assert_eq!(snap.queues[0].id, "boligselskabet-syd");
    assert_eq!(snap.queues[0].position, Some(33));
    assert_eq!(snap.queues[0].total, Some(500));
}

#[tokio::test]
async fn corrupt_history_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("history.json"), "{ broken").unwrap();
    let err = run_once(dir.path(), subscriptions(1, 2), Utc::now()).await;
    assert!(err.is_err());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("history.json")).unwrap(),
        "{ broken"
    );
    assert!(!dir.path().join("current.json").exists());
}

#[tokio::test]
async fn csv_keeps_names_of_queues_that_left() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
    run_once(dir.path(), subscriptions(120, 40), t0).await.unwrap();

    let only_akb = json!({ "data": [
        { "placement": 118,
          "list": { "id": 11, "name": "Familieboliger", "company": { "name": "AKB" }, "subscribers": 900 } }
    ]});
    run_once(dir.path(), only_akb.clone(), t0 + Duration::days(1)).await.unwrap();
    run_once(dir.path(), only_akb, t0 + Duration::days(2)).await.unwrap();

    let csv = std::fs::read_to_string(dir.path().join("history.csv")).unwrap();
    let nord: Vec<&str> = csv.lines().filter(|l| l.contains(",12,")).collect();
    assert_eq!(nord.len(), 1);
    assert!(nord[0].contains(",12,Andelsforeningen Nord,40,400"));
}
