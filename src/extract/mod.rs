// src/extract/mod.rs
pub mod capture;
pub mod probe;
pub mod scanner;
pub mod subscription;
pub mod types;

pub use types::{CapturedPayload, DashboardCapture, DashboardSource, QueueRecord};

use std::collections::HashSet;

use crate::config::ScannerConfig;
use probe::{first_success, ProbeMiss};

/// Extraction paths in priority order: the deterministic parser first, the
/// heuristic scanner only as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Subscriptions,
    ScanPayloads,
    ScanPages,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [Self::Subscriptions, Self::ScanPayloads, Self::ScanPages];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Subscriptions => "subscriptions-payload",
            Self::ScanPayloads => "json-scanner",
            Self::ScanPages => "html-scanner",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub strategy: Strategy,
    pub records: Vec<QueueRecord>,
}

fn from_subscriptions(capture: &DashboardCapture) -> Vec<QueueRecord> {
    let mut seen = HashSet::new();
    capture
        .payloads
        .iter()
        .filter(|p| subscription::looks_like_subscriptions(&p.body))
        .flat_map(|p| subscription::parse_subscriptions(&p.body))
        .filter(|r| seen.insert(r.key().to_string()))
        .collect()
}

fn from_scanner(bodies: impl Iterator<Item = Vec<scanner::ScanCandidate>>) -> Vec<QueueRecord> {
    let mut seen = HashSet::new();
    let candidates: Vec<_> = bodies
        .flatten()
        .filter(|c| seen.insert(c.name.to_lowercase()))
        .collect();
    scanner::candidates_to_records(&candidates)
}

fn run_strategy(
    strategy: Strategy,
    capture: &DashboardCapture,
    cfg: &ScannerConfig,
) -> Vec<QueueRecord> {
    match strategy {
        Strategy::Subscriptions => from_subscriptions(capture),
        Strategy::ScanPayloads => from_scanner(
            capture
                .payloads
                .iter()
                .map(|p| scanner::scan_payload(&p.body, cfg)),
        ),
        Strategy::ScanPages => {
            from_scanner(capture.pages.iter().map(|html| scanner::scan_html(html, cfg)))
        }
    }
}

/// First strategy that yields at least one record wins.
pub fn extract_queues(
    capture: &DashboardCapture,
    cfg: &ScannerConfig,
) -> Result<Extraction, ProbeMiss> {
    let hit = first_success(
        Strategy::ORDER,
        |s| s.label().to_string(),
        |s| Some(run_strategy(*s, capture, cfg)).filter(|recs| !recs.is_empty()),
    )?;

    if !hit.missed.is_empty() {
        tracing::warn!(
            target: "extract",
            used = hit.candidate.label(),
            missed = ?hit.missed,
            "deterministic path missed, using fallback"
        );
    }
    Ok(Extraction {
        strategy: hit.candidate,
        records: hit.value,
    })
}
