// src/change_detector/mod.rs
//! Watchers that compare what is online now with what was seen last run.

pub mod fetch;
pub mod opening;
pub mod sitemap;

use serde::de::DeserializeOwned;
use std::path::Path;

/// Previous state, or `None` when the file is missing or unreadable.
/// A broken state file is treated like a first run.
pub(crate) fn read_state<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(target: "state", path = %path.display(), error = %e, "state file unreadable");
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(target: "state", path = %path.display(), error = %e, "state file unparseable, starting over");
            None
        }
    }
}
