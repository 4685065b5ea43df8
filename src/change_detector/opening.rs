// src/change_detector/opening.rs
//! Watched association pages: report the ones whose waitlist signup opened.
//!
//! Per URL: unknown → closed|open, closed → open (alert), open → closed.
//! The first observation of a URL never alerts. Pages answering 404/410 are
//! dropped from the watch list and the state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use super::fetch::PageFetcher;
use super::read_state;
use crate::history::{ensure_parent, write_json_pretty};
use crate::metrics::{OPENINGS_DETECTED, WATCH_FETCH_ERRORS};
use crate::notify::{list_body, Notifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpeningRules {
    /// Case-insensitive substrings of the signup anchor text.
    pub keywords: Vec<String>,
    /// Signup hosts; subdomains match too.
    pub allowed_hosts: Vec<String>,
    /// Without a matching anchor, count a plain mention of an allowed host.
    pub text_fallback: bool,
    /// Stop watching a page once it has opened.
    pub drop_opened: bool,
}

impl Default for OpeningRules {
    fn default() -> Self {
        Self {
            keywords: vec!["tilmeld".into(), "signup".into(), "sign up".into()],
            allowed_hosts: vec!["app.waitly.dk".into(), "app.waitly.eu".into()],
            text_fallback: true,
            drop_opened: true,
        }
    }
}

impl OpeningRules {
    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|h| {
            let h = h.to_ascii_lowercase();
            host == h || host.ends_with(&format!(".{h}"))
        })
    }

    fn text_has_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenSignal {
    SignupLink,
    HostMention,
}

static ANCHOR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// How the page looks open, or `None` when it looks closed.
pub fn detect_open(html: &str, rules: &OpeningRules) -> Option<OpenSignal> {
    let doc = Html::parse_document(html);
    let link = doc.select(&ANCHOR_SEL).any(|a| {
        let text: String = a.text().collect();
        let host_ok = a
            .value()
            .attr("href")
            .and_then(|href| Url::parse(href.trim()).ok())
            .and_then(|u| u.host_str().map(|h| rules.host_allowed(h)))
            .unwrap_or(false);
        host_ok && rules.text_has_keyword(&text)
    });
    if link {
        return Some(OpenSignal::SignupLink);
    }
    if rules.text_fallback {
        let lower = html.to_lowercase();
        if rules
            .allowed_hosts
            .iter()
            .any(|h| lower.contains(&h.to_lowercase()))
        {
            return Some(OpenSignal::HostMention);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenState {
    pub pages: BTreeMap<String, PageState>,
}

/// Older state files mapped URL → bool directly.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OpenStateAny {
    Current(OpenState),
    Legacy(BTreeMap<String, bool>),
}

impl From<OpenStateAny> for OpenState {
    fn from(any: OpenStateAny) -> Self {
        match any {
            OpenStateAny::Current(s) => s,
            OpenStateAny::Legacy(m) => OpenState {
                pages: m
                    .into_iter()
                    .map(|(url, open)| {
                        (
                            url,
                            PageState {
                                open,
                                last_seen: None,
                            },
                        )
                    })
                    .collect(),
            },
        }
    }
}

impl OpenState {
    pub fn load(path: &Path) -> Self {
        read_state::<OpenStateAny>(path)
            .map(OpenState::from)
            .unwrap_or_default()
    }

    /// Record an observation; true only for an observed closed → open.
    pub fn observe(&mut self, url: &str, open: bool, now: DateTime<Utc>) -> bool {
        let prev = self.pages.insert(
            url.to_string(),
            PageState {
                open,
                last_seen: Some(now),
            },
        );
        open && prev.is_some_and(|p| !p.open)
    }
}

/// Non-empty, non-comment lines.
pub fn read_watch_list(path: &Path) -> Result<Vec<String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let mut seen = HashSet::new();
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| seen.insert(l.to_string()))
        .map(String::from)
        .collect())
}

/// Rewrite the watch list without `removed`; comments and blank lines stay.
pub fn remove_from_watch_list(path: &Path, removed: &HashSet<String>) -> Result<()> {
    if removed.is_empty() {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        if removed.contains(line.trim()) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    ensure_parent(path)?;
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

pub struct OpeningWatch<'a> {
    pub watch_list: &'a Path,
    pub state_path: &'a Path,
    pub rules: &'a OpeningRules,
    pub delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpeningReport {
    pub checked: usize,
    pub opened: Vec<String>,
    pub gone: Vec<String>,
    pub failed: Vec<String>,
}

impl OpeningWatch<'_> {
    /// Check every watched page once, sequentially with `delay` between
    /// fetches. Mails go out before state is written, so a failed send is
    /// re-detected by the next run.
    pub async fn run(
        &self,
        fetcher: &dyn PageFetcher,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<OpeningReport> {
        let urls = read_watch_list(self.watch_list)?;
        let mut state = OpenState::load(self.state_path);
        if urls.is_empty() {
            tracing::info!(target: "opening", path = %self.watch_list.display(), "watch list empty");
            if !state.pages.is_empty() {
                write_json_pretty(self.state_path, &OpenState::default())?;
            }
            return Ok(OpeningReport::default());
        }
        let mut report = OpeningReport::default();

        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            report.checked += 1;

            let page = match fetcher.fetch(url).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(target: "opening", %url, error = %e, "fetch failed, keeping url");
                    counter!(WATCH_FETCH_ERRORS).increment(1);
                    report.failed.push(url.clone());
                    continue;
                }
            };
            if page.is_gone() {
                tracing::info!(target: "opening", %url, status = page.status, "page gone, dropping");
                state.pages.remove(url);
                report.gone.push(url.clone());
                continue;
            }
            if !page.is_success() {
                tracing::warn!(target: "opening", %url, status = page.status, "unexpected status, keeping url");
                counter!(WATCH_FETCH_ERRORS).increment(1);
                report.failed.push(url.clone());
                continue;
            }

            let signal = detect_open(&page.body, self.rules);
            let alert = state.observe(url, signal.is_some(), now);
            tracing::debug!(target: "opening", %url, ?signal, alert, "checked");
            if alert {
                report.opened.push(url.clone());
            }
        }

        if !report.opened.is_empty() {
            notifier
                .deliver(
                    "Waitly Watch: ventelister åbnede!",
                    &list_body("Disse ventelister ser ud til at være åbne for tilmelding:", &report.opened),
                )
                .await?;
            counter!(OPENINGS_DETECTED).increment(report.opened.len() as u64);
        }
        if !report.gone.is_empty() {
            notifier
                .deliver(
                    "Waitly Watch: ventelister fjernet (404/410)",
                    &list_body("Disse sider findes ikke længere og er fjernet fra overvågningen:", &report.gone),
                )
                .await?;
        }

        let mut removed: HashSet<String> = report.gone.iter().cloned().collect();
        if self.rules.drop_opened {
            removed.extend(report.opened.iter().cloned());
        }
        // state only tracks what is still watched, including hand-removed urls
        let watched: HashSet<&str> = urls.iter().map(String::as_str).collect();
        state
            .pages
            .retain(|url, _| watched.contains(url.as_str()) && !removed.contains(url));
        write_json_pretty(self.state_path, &state)?;
        remove_from_watch_list(self.watch_list, &removed)?;

        tracing::info!(
            target: "opening",
            checked = report.checked,
            opened = report.opened.len(),
            gone = report.gone.len(),
            failed = report.failed.len(),
            "opening watch done"
        );
        Ok(report)
    }
}
