// src/config/mod.rs
//! Run configuration: environment (`WAITLY_*`, `.env` via dotenvy) plus an
//! optional TOML file for the fuzzy parts (scanner keywords, sitemap scope,
//! opening detection rules).
//!
//! Everything that used to be an ambient switch (debug dumps, snapshot
//! resolution) is a field here and is passed down explicitly.

pub mod scanner;
pub mod smtp;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::change_detector::opening::OpeningRules;
use crate::change_detector::sitemap::SitemapScope;
use crate::error::WatchError;

pub use scanner::ScannerConfig;
pub use smtp::SmtpConfig;

pub const ENV_CONFIG_PATH: &str = "WAITLY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/waitly.toml";
pub const DEFAULT_SITEMAP_URL: &str = "https://waitly.eu/da/sitemap";

/// Sections of `config/waitly.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub scanner: ScannerConfig,
    pub sitemap: SitemapScope,
    pub opening: OpeningRules,
}

impl FileConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: FileConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        cfg.scanner = cfg.scanner.normalized();
        Ok(cfg)
    }

    /// 1) $WAITLY_CONFIG (must exist)
    /// 2) config/waitly.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        Ok(Self::default())
    }
}

/// How run timestamps are truncated before they become history points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotResolution {
    #[default]
    Second,
    /// One point per UTC day; re-runs on the same day dedupe.
    Day,
}

impl SnapshotResolution {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" | "s" => Some(Self::Second),
            "day" | "daily" | "d" => Some(Self::Day),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugOptions {
    /// Write every captured payload to `dump_dir` before parsing.
    pub dump_payloads: bool,
    pub dump_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Directory the browser driver writes captured responses into.
    pub dir: PathBuf,
    /// Optional driver command (run through `sh -c`) that fills `dir`.
    pub command: Option<String>,
    pub timeout: Duration,
}

/// File locations. Relative paths resolve against the working directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub current_json: PathBuf,
    pub history_json: PathBuf,
    pub history_csv: PathBuf,
    pub start_positions: PathBuf,
    pub start_positions_override: PathBuf,
    pub known_sitemap_urls: PathBuf,
    pub discovered_log: PathBuf,
    pub open_state: PathBuf,
    pub watch_urls: PathBuf,
}

impl Paths {
    pub fn under(data_dir: &Path, state_dir: &Path) -> Self {
        Self {
            current_json: data_dir.join("current.json"),
            history_json: data_dir.join("history.json"),
            history_csv: data_dir.join("history.csv"),
            start_positions: data_dir.join("start_positions.json"),
            start_positions_override: data_dir.join("start_positions.override.json"),
            known_sitemap_urls: state_dir.join("known_sitemap_urls.json"),
            discovered_log: state_dir.join("discovered_forenings_log.json"),
            open_state: state_dir.join("open_state.json"),
            watch_urls: data_dir.join("watch_urls.txt"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub paths: Paths,
    pub sitemap_url: String,
    pub http_timeout: Duration,
    /// Pause between consecutive opening-page checks.
    pub opening_delay: Duration,
    pub resolution: SnapshotResolution,
    pub capture: CaptureConfig,
    pub credentials: Option<Credentials>,
    pub smtp: Option<SmtpConfig>,
    pub debug: DebugOptions,
    pub metrics_path: Option<PathBuf>,
    pub file: FileConfig,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    env_opt(name).is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
}

fn env_u64(name: &str, default: u64) -> u64 {
    env_opt(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl WatchConfig {
    /// Build the run configuration. SMTP problems surface here as
    /// `WatchError::Config`; missing login credentials do not (they only
    /// matter when a capture command has to log in).
    pub fn from_env() -> Result<Self> {
        let data_dir = env_opt("WAITLY_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| ".".into());
        let state_dir = env_opt("WAITLY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("state"));

        let resolution = match env_opt("WAITLY_SNAPSHOT_RESOLUTION") {
            Some(raw) => SnapshotResolution::parse(&raw).ok_or_else(|| {
                WatchError::config(format!("WAITLY_SNAPSHOT_RESOLUTION: unknown value {raw:?}"))
            })?,
            None => SnapshotResolution::default(),
        };

        let credentials = match (env_opt("WAITLY_LOGIN_EMAIL"), env_opt("WAITLY_LOGIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        };

        let capture = CaptureConfig {
            dir: env_opt("WAITLY_CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join("capture")),
            command: env_opt("WAITLY_CAPTURE_CMD"),
            timeout: Duration::from_secs(env_u64("WAITLY_CAPTURE_TIMEOUT_SECS", 180)),
        };

        let debug = DebugOptions {
            dump_payloads: env_flag("WAITLY_DEBUG_DUMP"),
            dump_dir: env_opt("WAITLY_DEBUG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join("debug")),
        };

        Ok(Self {
            paths: Paths::under(&data_dir, &state_dir),
            sitemap_url: env_opt("WAITLY_SITEMAP_URL").unwrap_or_else(|| DEFAULT_SITEMAP_URL.into()),
            http_timeout: Duration::from_secs(env_u64("WAITLY_HTTP_TIMEOUT_SECS", 30)),
            opening_delay: Duration::from_millis(env_u64("WAITLY_OPENING_DELAY_MS", 1_500)),
            resolution,
            capture,
            credentials,
            smtp: SmtpConfig::from_env()?,
            debug,
            metrics_path: env_opt("WAITLY_METRICS_PATH").map(PathBuf::from),
            file: FileConfig::load_default()?,
        })
    }
}
