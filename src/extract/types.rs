// src/extract/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::{ProgressSinceStart, WindowProgress};

/// One queue the account is enrolled in, as seen in this run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSinceStart>,
    #[serde(default, skip_serializing_if = "WindowProgress::is_empty")]
    pub windows: WindowProgress,
}

impl QueueRecord {
    /// Dedup key: the id, or the name when the upstream id was missing.
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }

    pub fn has_placement(&self) -> bool {
        self.position.is_some() && self.total.is_some()
    }
}

/// A JSON response body captured by the browser driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedPayload {
    #[serde(default)]
    pub url: Option<String>,
    pub body: Value,
}

/// Everything the browser driver handed over for one login session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardCapture {
    pub payloads: Vec<CapturedPayload>,
    /// Raw page HTML (DOM snapshots), scanned for embedded JSON.
    pub pages: Vec<String>,
}

impl DashboardCapture {
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty() && self.pages.is_empty()
    }
}

/// Seam to the browser-automation collaborator.
#[async_trait::async_trait]
pub trait DashboardSource: Send + Sync {
    async fn capture(&self) -> Result<DashboardCapture>;
    fn name(&self) -> &'static str;
}
