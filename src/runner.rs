// src/runner.rs
//! One batch invocation. The sitemap and opening watchers are isolated: their
//! failures are logged, counted and mailed but never stop the run. The
//! position pipeline is critical: its failure is mailed and returned.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};

use crate::change_detector::fetch::PageFetcher;
use crate::change_detector::opening::{OpeningReport, OpeningWatch};
use crate::change_detector::sitemap::{SitemapReport, SitemapWatch};
use crate::config::WatchConfig;
use crate::extract::DashboardSource;
use crate::metrics::{LAST_RUN_TS, STAGE_FAILURES};
use crate::notify::Notifier;
use crate::positions::{PositionJob, PositionsReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sitemap,
    Openings,
    Positions,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Sitemap, Stage::Openings, Stage::Positions];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Sitemap => "sitemap",
            Stage::Openings => "openings",
            Stage::Positions => "positions",
        }
    }

    fn failure_subject(&self) -> &'static str {
        match self {
            Stage::Sitemap => "Waitly Watch: sitemap-scan fejlede",
            Stage::Openings => "Waitly Watch: åbnings-overvågning fejlede",
            Stage::Positions => "Waitly Watch: dashboard export fejlede",
        }
    }

    /// Stage selection from CLI args; no args means every stage.
    pub fn from_args<I, S>(args: I) -> Result<Vec<Stage>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for a in args {
            let picked: &[Stage] = match a.as_ref().trim().to_ascii_lowercase().as_str() {
                "all" => &Self::ALL,
                "sitemap" => &[Stage::Sitemap],
                "openings" | "opening" | "watch" => &[Stage::Openings],
                "positions" | "export" => &[Stage::Positions],
                other => bail!("unknown stage {other:?} (expected sitemap, openings, positions or all)"),
            };
            for s in picked {
                if !out.contains(s) {
                    out.push(*s);
                }
            }
        }
        if out.is_empty() {
            out.extend(Self::ALL);
        }
        // execution order is fixed regardless of argument order
        out.sort_by_key(|s| Self::ALL.iter().position(|x| x == s));
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub sitemap: Option<SitemapReport>,
    pub openings: Option<OpeningReport>,
    pub positions: Option<PositionsReport>,
    /// Isolated stages that failed; the run itself still succeeded.
    pub failed: Vec<Stage>,
}

pub struct Runner<'a> {
    pub cfg: &'a WatchConfig,
    pub notifier: &'a dyn Notifier,
    pub fetcher: &'a dyn PageFetcher,
    pub source: &'a dyn DashboardSource,
}

impl Runner<'_> {
    pub async fn run(&self, stages: &[Stage], now: DateTime<Utc>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for stage in stages {
            match stage {
                Stage::Sitemap => match self.sitemap(now).await {
                    Ok(r) => summary.sitemap = Some(r),
                    Err(e) => {
                        self.report_failure(*stage, &e).await;
                        summary.failed.push(*stage);
                    }
                },
                Stage::Openings => match self.openings(now).await {
                    Ok(r) => summary.openings = Some(r),
                    Err(e) => {
                        self.report_failure(*stage, &e).await;
                        summary.failed.push(*stage);
                    }
                },
                Stage::Positions => match self.positions(now).await {
                    Ok(r) => summary.positions = Some(r),
                    Err(e) => {
                        self.report_failure(*stage, &e).await;
                        return Err(e);
                    }
                },
            }
        }

        gauge!(LAST_RUN_TS).set(now.timestamp() as f64);
        Ok(summary)
    }

    async fn sitemap(&self, now: DateTime<Utc>) -> Result<SitemapReport> {
        let p = &self.cfg.paths;
        SitemapWatch {
            sitemap_url: &self.cfg.sitemap_url,
            scope: &self.cfg.file.sitemap,
            baseline_path: &p.known_sitemap_urls,
            discovered_log_path: &p.discovered_log,
        }
        .run(self.fetcher, self.notifier, now)
        .await
    }

    async fn openings(&self, now: DateTime<Utc>) -> Result<OpeningReport> {
        OpeningWatch {
            watch_list: &self.cfg.paths.watch_urls,
            state_path: &self.cfg.paths.open_state,
            rules: &self.cfg.file.opening,
            delay: self.cfg.opening_delay,
        }
        .run(self.fetcher, self.notifier, now)
        .await
    }

    async fn positions(&self, now: DateTime<Utc>) -> Result<PositionsReport> {
        PositionJob {
            paths: &self.cfg.paths,
            scanner: &self.cfg.file.scanner,
            resolution: self.cfg.resolution,
            debug: &self.cfg.debug,
        }
        .run(self.source, now)
        .await
    }

    async fn report_failure(&self, stage: Stage, err: &anyhow::Error) {
        counter!(STAGE_FAILURES, "stage" => stage.label()).increment(1);
        tracing::error!(target: "runner", stage = stage.label(), error = %format!("{err:#}"), "stage failed");
        let body = format!("Stage: {}\n\n{err:#}\n", stage.label());
        if let Err(mail_err) = self.notifier.deliver(stage.failure_subject(), &body).await {
            tracing::warn!(target: "runner", stage = stage.label(), error = %mail_err, "failure mail not sent");
        }
    }
}
