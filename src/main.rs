//! waitly-watch: one batch run of the waitlist monitor.
//!
//! Usage: `waitly-watch [sitemap|openings|positions|all]...`
//! Configuration comes from `WAITLY_*` env vars (`.env` is honored) and the
//! optional `config/waitly.toml`.

use std::process::ExitCode;

use chrono::Utc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use waitly_watch::change_detector::fetch::HttpFetcher;
use waitly_watch::extract::capture::CaptureSource;
use waitly_watch::metrics::RunMetrics;
use waitly_watch::notify::build_notifier;
use waitly_watch::{Runner, Stage, WatchConfig};

/// Compact logs by default, JSON lines with WAITLY_LOG_JSON=1.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("waitly_watch=info,warn"));
    let json = std::env::var("WAITLY_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn run() -> anyhow::Result<()> {
    let stages = Stage::from_args(std::env::args().skip(1))?;
    let cfg = WatchConfig::from_env()?;
    let metrics = RunMetrics::init(cfg.metrics_path.as_deref());

    let notifier = build_notifier(cfg.smtp.as_ref())?;
    let fetcher = HttpFetcher::new(cfg.http_timeout)?;
    let source = CaptureSource::from_config(&cfg.capture, cfg.credentials.clone());

    tracing::info!(
        target: "runner",
        stages = ?stages.iter().map(Stage::label).collect::<Vec<_>>(),
        notifier = notifier.name(),
        "run started"
    );

    let runner = Runner {
        cfg: &cfg,
        notifier: notifier.as_ref(),
        fetcher: &fetcher,
        source: &source,
    };
    let result = runner.run(&stages, Utc::now()).await;
    metrics.flush();

    let summary = result?;
    tracing::info!(
        target: "runner",
        failed = ?summary.failed.iter().map(Stage::label).collect::<Vec<_>>(),
        "run finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(target: "runner", error = %format!("{e:#}"), "run failed");
            ExitCode::FAILURE
        }
    }
}
