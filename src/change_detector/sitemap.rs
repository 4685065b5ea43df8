// src/change_detector/sitemap.rs
//! New association ("forening") pages in the public sitemap.
//!
//! States per URL: unknown → known. The first run without a baseline only
//! records the current set. Later runs report URLs that are in scope and not
//! in the baseline, then replace the baseline with the current set.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use super::fetch::PageFetcher;
use super::read_state;
use crate::history::write_json_pretty;
use crate::metrics::SITEMAP_NEW_URLS;
use crate::notify::{list_body, Notifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaRange {
    pub label: String,
    pub from: u32,
    pub to: u32,
}

impl AreaRange {
    fn new(label: &str, from: u32, to: u32) -> Self {
        Self {
            label: label.to_string(),
            from,
            to,
        }
    }
}

/// Which postcodes count as "in scope". Defaults to Copenhagen + Frederiksberg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SitemapScope {
    pub areas: Vec<AreaRange>,
}

impl Default for SitemapScope {
    fn default() -> Self {
        Self {
            areas: vec![
                AreaRange::new("København K", 1000, 1499),
                AreaRange::new("København V", 1500, 1799),
                AreaRange::new("Frederiksberg", 1800, 2000),
                AreaRange::new("København Ø", 2100, 2100),
                AreaRange::new("København N", 2200, 2200),
                AreaRange::new("København S", 2300, 2450),
            ],
        }
    }
}

impl SitemapScope {
    pub fn area_for(&self, postcode: u32) -> Option<&str> {
        self.areas
            .iter()
            .find(|a| (a.from..=a.to).contains(&postcode))
            .map(|a| a.label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeningUrl {
    pub url: String,
    pub postcode: u32,
    pub area: String,
    pub slug: String,
}

static FORENING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/da/foreninger/(\d{4})-[^/]+/([^/?#]+)").expect("forening path regex")
});

/// In-scope association page, or `None`.
pub fn classify(url: &str, scope: &SitemapScope) -> Option<ForeningUrl> {
    let parsed = Url::parse(url).ok()?;
    let caps = FORENING_RE.captures(parsed.path())?;
    let postcode: u32 = caps.get(1)?.as_str().parse().ok()?;
    let area = scope.area_for(postcode)?;
    Some(ForeningUrl {
        url: url.to_string(),
        postcode,
        area: area.to_string(),
        slug: caps.get(2)?.as_str().to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct XmlSitemap {
    #[serde(rename = "url", default)]
    urls: Vec<XmlLoc>,
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<XmlLoc>,
}

#[derive(Debug, Deserialize)]
struct XmlLoc {
    loc: String,
}

static ANCHOR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Absolute URLs from an XML sitemap (`<loc>`) or, failing that, from the
/// anchors of an HTML sitemap page. Relative hrefs resolve against `base`.
pub fn extract_sitemap_urls(text: &str, base: &str) -> Vec<String> {
    if let Ok(xml) = quick_xml::de::from_str::<XmlSitemap>(text) {
        let locs: BTreeSet<String> = xml
            .urls
            .into_iter()
            .chain(xml.sitemaps)
            .map(|l| l.loc.trim().to_string())
            .filter(|l| l.starts_with("http"))
            .collect();
        if !locs.is_empty() {
            return locs.into_iter().collect();
        }
    }

    let base = Url::parse(base).ok();
    let doc = Html::parse_document(text);
    let urls: BTreeSet<String> = doc
        .select(&ANCHOR_SEL)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter_map(|href| match Url::parse(href) {
            Ok(u) => Some(u),
            Err(_) => base.as_ref().and_then(|b| b.join(href).ok()),
        })
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
        .collect();
    urls.into_iter().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitemapBaseline {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Older state files were a bare JSON array of URLs.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BaselineAny {
    Current(SitemapBaseline),
    Legacy(Vec<String>),
}

impl From<BaselineAny> for SitemapBaseline {
    fn from(any: BaselineAny) -> Self {
        match any {
            BaselineAny::Current(b) => b,
            BaselineAny::Legacy(urls) => SitemapBaseline {
                urls,
                ..Default::default()
            },
        }
    }
}

pub fn load_baseline(path: &Path) -> Option<SitemapBaseline> {
    read_state::<BaselineAny>(path).map(SitemapBaseline::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapDiff {
    /// True when there was no baseline; nothing is reported then.
    pub initialized: bool,
    pub new_urls: Vec<ForeningUrl>,
}

/// Pure set difference against the previous baseline.
pub fn diff_against(baseline: Option<&SitemapBaseline>, current: &[ForeningUrl]) -> SitemapDiff {
    let Some(b) = baseline else {
        return SitemapDiff {
            initialized: true,
            new_urls: Vec::new(),
        };
    };
    let known: HashSet<&str> = b.urls.iter().map(String::as_str).collect();
    SitemapDiff {
        initialized: false,
        new_urls: current
            .iter()
            .filter(|f| !known.contains(f.url.as_str()))
            .cloned()
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEntry {
    #[serde(flatten)]
    pub forening: ForeningUrl,
    pub discovered_at: DateTime<Utc>,
}

fn append_discovered(path: &Path, found: &[ForeningUrl], now: DateTime<Utc>) -> Result<()> {
    let mut log: Vec<DiscoveredEntry> = read_state(path).unwrap_or_default();
    log.extend(found.iter().cloned().map(|forening| DiscoveredEntry {
        forening,
        discovered_at: now,
    }));
    write_json_pretty(path, &log)
}

fn alert_body(found: &[ForeningUrl]) -> String {
    let mut by_area: BTreeMap<&str, Vec<&ForeningUrl>> = BTreeMap::new();
    for f in found {
        by_area.entry(f.area.as_str()).or_default().push(f);
    }
    let lines: Vec<String> = by_area
        .into_iter()
        .flat_map(|(area, items)| {
            items
                .into_iter()
                .map(move |f| format!("{area} ({}): {}", f.postcode, f.url))
        })
        .collect();
    list_body("Nye relevante Waitly-sider fundet via sitemap:", &lines)
}

pub struct SitemapWatch<'a> {
    pub sitemap_url: &'a str,
    pub scope: &'a SitemapScope,
    pub baseline_path: &'a Path,
    pub discovered_log_path: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapReport {
    pub total_urls: usize,
    pub in_scope: usize,
    pub initialized: bool,
    pub new_urls: Vec<String>,
}

impl SitemapWatch<'_> {
    /// Fetch, diff, alert, then persist. The baseline is only replaced after
    /// the alert went out, so a failed send is retried by the next run.
    pub async fn run(
        &self,
        fetcher: &dyn PageFetcher,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<SitemapReport> {
        let page = fetcher.fetch(self.sitemap_url).await.context("sitemap fetch")?;
        if !page.is_success() {
            bail!("sitemap fetch returned HTTP {}", page.status);
        }

        let all = extract_sitemap_urls(&page.body, self.sitemap_url);
        let in_scope: Vec<ForeningUrl> = all.iter().filter_map(|u| classify(u, self.scope)).collect();

        let previous = load_baseline(self.baseline_path);
        let diff = diff_against(previous.as_ref(), &in_scope);

        tracing::info!(
            target: "sitemap",
            total = all.len(),
            relevant = in_scope.len(),
            new = diff.new_urls.len(),
            initialized = diff.initialized,
            "sitemap scanned"
        );

        if !diff.new_urls.is_empty() {
            let subject = format!(
                "Waitly Watch: {} nye relevante ventelister",
                diff.new_urls.len()
            );
            notifier.deliver(&subject, &alert_body(&diff.new_urls)).await?;
            counter!(SITEMAP_NEW_URLS).increment(diff.new_urls.len() as u64);
            if let Err(e) = append_discovered(self.discovered_log_path, &diff.new_urls, now) {
                tracing::warn!(target: "sitemap", error = %e, "discovered log not updated");
            }
        }

        let baseline = SitemapBaseline {
            urls: in_scope.iter().map(|f| f.url.clone()).collect(),
            initialized_at: previous
                .as_ref()
                .and_then(|p| p.initialized_at)
                .or(Some(now)),
            updated_at: (!diff.initialized).then_some(now),
        };
        write_json_pretty(self.baseline_path, &baseline)?;

        Ok(SitemapReport {
            total_urls: all.len(),
            in_scope: in_scope.len(),
            initialized: diff.initialized,
            new_urls: diff.new_urls.into_iter().map(|f| f.url).collect(),
        })
    }
}
