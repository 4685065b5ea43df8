// src/extract/capture.rs
//! Where captured dashboard traffic comes from.
//!
//! The browser driver (login, navigation, response capture) is an external
//! program. It writes one file per captured response into a directory:
//! `*.json` holding either the raw body or `{"url": ..., "body": ...}`, and
//! `*.html` DOM snapshots. This module reads that directory, optionally
//! running the driver first.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::{CaptureConfig, Credentials};
use crate::error::WatchError;
use crate::extract::types::{CapturedPayload, DashboardCapture, DashboardSource};

pub struct CaptureSource {
    mode: Mode,
}

enum Mode {
    Static(DashboardCapture),
    Dir(PathBuf),
    Command {
        command: String,
        dir: PathBuf,
        timeout: Duration,
        credentials: Option<Credentials>,
    },
}

impl CaptureSource {
    /// Fixed capture, for tests and replays.
    pub fn from_static(capture: DashboardCapture) -> Self {
        Self {
            mode: Mode::Static(capture),
        }
    }

    /// Read whatever a previous driver run left in `dir`.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Dir(dir.into()),
        }
    }

    pub fn from_config(cfg: &CaptureConfig, credentials: Option<Credentials>) -> Self {
        match &cfg.command {
            Some(command) => Self {
                mode: Mode::Command {
                    command: command.clone(),
                    dir: cfg.dir.clone(),
                    timeout: cfg.timeout,
                    credentials,
                },
            },
            None => Self::from_dir(cfg.dir.clone()),
        }
    }
}

#[async_trait]
impl DashboardSource for CaptureSource {
    async fn capture(&self) -> Result<DashboardCapture> {
        match &self.mode {
            Mode::Static(c) => Ok(c.clone()),
            Mode::Dir(dir) => read_capture_dir(dir).await,
            Mode::Command {
                command,
                dir,
                timeout,
                credentials,
            } => {
                let creds = credentials.as_ref().ok_or_else(|| {
                    WatchError::config("WAITLY_LOGIN_EMAIL / WAITLY_LOGIN_PASSWORD not set")
                })?;
                clear_captures(dir).await?;
                run_driver(command, dir, *timeout, creds).await?;
                read_capture_dir(dir).await
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Static(_) => "static",
            Mode::Dir(_) => "capture-dir",
            Mode::Command { .. } => "capture-command",
        }
    }
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// A `{"url", "body"}` wrapper, or the raw response body.
fn to_payload(v: Value) -> CapturedPayload {
    let is_wrapper = v
        .as_object()
        .is_some_and(|m| m.contains_key("body") && m.keys().all(|k| k == "url" || k == "body"));
    if is_wrapper {
        if let Ok(p) = serde_json::from_value::<CapturedPayload>(v.clone()) {
            return p;
        }
    }
    CapturedPayload { url: None, body: v }
}

pub async fn read_capture_dir(dir: &Path) -> Result<DashboardCapture> {
    let mut rd = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading capture dir {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();

    let mut capture = DashboardCapture::default();
    for path in paths {
        match ext_of(&path).as_str() {
            "json" => {
                let raw = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                match serde_json::from_str::<Value>(&raw) {
                    Ok(v) => capture.payloads.push(to_payload(v)),
                    Err(e) => {
                        tracing::warn!(target: "capture", file = %path.display(), error = %e, "unparseable capture skipped")
                    }
                }
            }
            "html" | "htm" => {
                let html = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                capture.pages.push(html);
            }
            _ => {}
        }
    }

    tracing::debug!(
        target: "capture",
        dir = %dir.display(),
        payloads = capture.payloads.len(),
        pages = capture.pages.len(),
        "capture dir read"
    );
    Ok(capture)
}

/// Stale files from an earlier run must not stand in for a failed login.
async fn clear_captures(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating capture dir {}", dir.display()))?;
    let mut rd = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if matches!(ext_of(&path).as_str(), "json" | "html" | "htm") {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("removing stale {}", path.display()))?;
        }
    }
    Ok(())
}

async fn run_driver(command: &str, dir: &Path, timeout: Duration, creds: &Credentials) -> Result<()> {
    tracing::info!(target: "capture", %command, "running browser driver");
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("WAITLY_LOGIN_EMAIL", &creds.email)
        .env("WAITLY_LOGIN_PASSWORD", &creds.password)
        .env("WAITLY_CAPTURE_DIR", dir)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("spawning browser driver")?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(res) => res.context("waiting for browser driver")?,
        Err(_) => bail!("browser driver timed out after {}s", timeout.as_secs()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        bail!("browser driver exited with {}: {}", output.status, tail);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dir_reads_wrapped_raw_and_html_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("01.json"),
            r#"{"url":"https://my.waitly.dk/api/subscriptions","body":{"data":[]}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("02.json"), r#"{"data":[1]}"#).unwrap();
        std::fs::write(dir.path().join("03.json"), "{oops").unwrap();
        std::fs::write(dir.path().join("page.html"), "<html></html>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let c = CaptureSource::from_dir(dir.path()).capture().await.unwrap();
        assert_eq!(c.payloads.len(), 2);
        assert_eq!(
            c.payloads[0].url.as_deref(),
            Some("https://my.waitly.dk/api/subscriptions")
        );
        assert_eq!(c.payloads[0].body, json!({ "data": [] }));
        assert_eq!(c.payloads[1].url, None);
        assert_eq!(c.pages.len(), 1);
    }

    #[tokio::test]
    async fn missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = CaptureSource::from_dir(dir.path().join("nope"));
        assert!(src.capture().await.is_err());
    }

    #[tokio::test]
    async fn command_without_credentials_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CaptureConfig {
            dir: dir.path().to_path_buf(),
            command: Some("true".into()),
            timeout: Duration::from_secs(5),
        };
        let err = CaptureSource::from_config(&cfg, None).capture().await.unwrap_err();
        let typed = err.downcast_ref::<WatchError>().unwrap();
        assert!(typed.is_config());
    }

    #[test]
    fn body_key_alone_is_not_always_a_wrapper() {
        let p = to_payload(json!({ "body": 1, "data": [] }));
        assert_eq!(p.url, None);
        assert_eq!(p.body, json!({ "body": 1, "data": [] }));
    }
}
