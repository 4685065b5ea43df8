// src/config/scanner.rs
//! Keyword lists for the heuristic payload scanner.
//!
//! The upstream dashboard has changed its JSON shape several times, so the
//! lists are data, not code: defaults live here and `[scanner]` in the TOML
//! config can replace any of them.

use serde::Deserialize;

fn default_name_hints() -> Vec<String> {
    to_owned(&["name", "title", "queue", "waitlist", "list"])
}
fn default_position_hints() -> Vec<String> {
    to_owned(&["position", "placement", "rank", "place", "spot", "number"])
}
fn default_total_hints() -> Vec<String> {
    to_owned(&["total", "size", "members", "subscribers", "count", "capacity"])
}
fn default_name_keys() -> Vec<String> {
    to_owned(&["name", "title", "full_name", "waitlistName", "listName", "queueName"])
}
fn default_position_keys() -> Vec<String> {
    to_owned(&["position", "placement", "rank", "place", "spot", "number"])
}
fn default_total_keys() -> Vec<String> {
    to_owned(&[
        "total",
        "active_subscribers",
        "subscribers",
        "size",
        "waitlistSize",
        "members",
        "count",
        "capacity",
        "spots",
    ])
}
fn default_max_nodes() -> usize {
    20_000
}
fn default_max_elements() -> usize {
    100
}

fn to_owned(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Lower-case substrings that make a key "name-like".
    #[serde(default = "default_name_hints")]
    pub name_hints: Vec<String>,
    /// Lower-case substrings that make a key "position-like".
    #[serde(default = "default_position_hints")]
    pub position_hints: Vec<String>,
    /// Lower-case substrings that make a key "total-like".
    #[serde(default = "default_total_hints")]
    pub total_hints: Vec<String>,
    /// Exact keys tried first (in order) when extracting values.
    #[serde(default = "default_name_keys")]
    pub name_keys: Vec<String>,
    #[serde(default = "default_position_keys")]
    pub position_keys: Vec<String>,
    #[serde(default = "default_total_keys")]
    pub total_keys: Vec<String>,
    /// Hard cap on visited JSON nodes per scan.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    /// Elements inspected per array.
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            name_hints: default_name_hints(),
            position_hints: default_position_hints(),
            total_hints: default_total_hints(),
            name_keys: default_name_keys(),
            position_keys: default_position_keys(),
            total_keys: default_total_keys(),
            max_nodes: default_max_nodes(),
            max_elements: default_max_elements(),
        }
    }
}

impl ScannerConfig {
    /// Lower-case the hint lists and drop blanks so matching can stay cheap.
    pub fn normalized(mut self) -> Self {
        for list in [
            &mut self.name_hints,
            &mut self.position_hints,
            &mut self.total_hints,
        ] {
            *list = list
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if self.max_nodes == 0 {
            self.max_nodes = default_max_nodes();
        }
        if self.max_elements == 0 {
            self.max_elements = default_max_elements();
        }
        self
    }
}
