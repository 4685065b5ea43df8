// src/error.rs
//! Typed failures for the run stages. Call sites still return `anyhow::Result`
//! and wrap these with context; the variants exist so the entrypoint (and
//! tests) can tell configuration problems from extraction breaks.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Missing or invalid settings. The affected stage must not continue.
    #[error("configuration error: {0}")]
    Config(String),

    /// The expected payload or page shape was not found upstream.
    /// `tried` lists the probes in the order they were attempted.
    #[error("extraction miss in {stage}: none of [{}] matched", tried.join(", "))]
    ExtractionMiss { stage: &'static str, tried: Vec<String> },

    /// Valid credentials but zero queue records: almost always a silent break.
    #[error("no queue records extracted from {payloads} captured payload(s)")]
    EmptyResult { payloads: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl WatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        WatchError::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, WatchError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_miss_lists_probes() {
        let e = WatchError::ExtractionMiss {
            stage: "positions",
            tried: vec!["subscriptions".into(), "scanner".into()],
        };
        let s = e.to_string();
        assert!(s.contains("positions"));
        assert!(s.contains("subscriptions, scanner"));
    }

    #[test]
    fn config_helper_flags_kind() {
        assert!(WatchError::config("SMTP_HOST missing").is_config());
        assert!(!WatchError::EmptyResult { payloads: 3 }.is_config());
    }
}
