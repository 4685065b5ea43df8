// src/extract/scanner.rs
//! Heuristic fallback: find queue-like objects anywhere in a JSON payload.
//!
//! Used only when the subscription payload is not among the captures. The
//! key lists come from [`ScannerConfig`]; nothing here can fail, malformed
//! input just yields no candidates.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::ScannerConfig;
use crate::extract::QueueRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    pub name: String,
    /// Integer when coercible, otherwise the raw upstream value.
    pub position: Option<Value>,
    pub total: Option<Value>,
}

impl ScanCandidate {
    pub fn position_int(&self) -> Option<i64> {
        self.position.as_ref().and_then(coerce_int)
    }

    pub fn total_int(&self) -> Option<i64> {
        self.total.as_ref().and_then(coerce_int)
    }
}

/// Integers, integral floats and plain digit strings. Booleans are not numbers.
pub fn coerce_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let t = s.trim();
            if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) {
                t.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn coerce_str(v: &Value) -> Option<String> {
    match v {
        // Names lifted from server-rendered markup can still carry entities.
        Value::String(s) => Some(html_escape::decode_html_entities(s.trim()).trim().to_string())
            .filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn key_matches(key: &str, hints: &[String]) -> bool {
    let k = key.to_ascii_lowercase();
    hints.iter().any(|h| k.contains(h.as_str()))
}

fn is_candidate(obj: &Map<String, Value>, cfg: &ScannerConfig) -> bool {
    let has_name = obj.keys().any(|k| key_matches(k, &cfg.name_hints));
    let has_count = obj
        .keys()
        .any(|k| key_matches(k, &cfg.position_hints) || key_matches(k, &cfg.total_hints));
    has_name && has_count
}

/// Preferred exact keys first, then any key containing one of the hints.
fn pick<'a>(
    obj: &'a Map<String, Value>,
    exact: &[String],
    hints: &[String],
    usable: impl Fn(&Value) -> bool,
) -> Option<&'a Value> {
    exact
        .iter()
        .filter_map(|k| obj.get(k))
        .find(|v| usable(*v))
        .or_else(|| {
            obj.iter()
                .filter(|(k, _)| key_matches(k, hints))
                .map(|(_, v)| v)
                .find(|v| usable(*v))
        })
}

fn extract_candidate(obj: &Map<String, Value>, cfg: &ScannerConfig) -> Option<ScanCandidate> {
    let name = pick(obj, &cfg.name_keys, &cfg.name_hints, |v| coerce_str(v).is_some())
        .and_then(coerce_str)?;
    let present = |v: &Value| !v.is_null();
    let normalize = |v: &Value| coerce_int(v).map(Value::from).unwrap_or_else(|| v.clone());

    let position = pick(obj, &cfg.position_keys, &cfg.position_hints, present).map(normalize);
    let total = pick(obj, &cfg.total_keys, &cfg.total_hints, present).map(normalize);

    Some(ScanCandidate {
        name,
        position,
        total,
    })
}

/// Walk `value` and collect queue-like objects found inside arrays.
///
/// Traversal uses an explicit stack and stops after `cfg.max_nodes` visited
/// nodes; only the first `cfg.max_elements` objects of each array are
/// inspected as candidates. Candidates are unique by (case-folded) name.
pub fn scan_payload(value: &Value, cfg: &ScannerConfig) -> Vec<ScanCandidate> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    scan_into(value, cfg, &mut out, &mut seen);
    out
}

fn scan_into(
    value: &Value,
    cfg: &ScannerConfig,
    out: &mut Vec<ScanCandidate>,
    seen: &mut HashSet<String>,
) {
    let mut stack: Vec<&Value> = vec![value];
    let mut visited = 0usize;

    while let Some(node) = stack.pop() {
        visited += 1;
        if visited > cfg.max_nodes {
            tracing::debug!(target: "scanner", visited, "node cap reached, stopping early");
            break;
        }
        match node {
            Value::Object(map) => {
                for v in map.values() {
                    if stack.len() + visited >= cfg.max_nodes {
                        break;
                    }
                    stack.push(v);
                }
            }
            Value::Array(items) => {
                for obj in items.iter().take(cfg.max_elements).filter_map(Value::as_object) {
                    if !is_candidate(obj, cfg) {
                        continue;
                    }
                    if let Some(c) = extract_candidate(obj, cfg) {
                        if seen.insert(c.name.to_lowercase()) {
                            out.push(c);
                        }
                    }
                }
                for v in items {
                    if stack.len() + visited >= cfg.max_nodes {
                        break;
                    }
                    stack.push(v);
                }
            }
            _ => {}
        }
    }
}

static SCRIPT_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/json"], script[type="application/ld+json"], script#__NEXT_DATA__"#)
        .expect("script selector")
});

/// Scan JSON embedded in page HTML (`<script type="application/json">`,
/// `__NEXT_DATA__`). Blocks that do not parse are ignored.
pub fn scan_html(html: &str, cfg: &ScannerConfig) -> Vec<ScanCandidate> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for el in doc.select(&SCRIPT_SEL) {
        let text: String = el.text().collect();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(v) => scan_into(&v, cfg, &mut out, &mut seen),
            Err(e) => tracing::trace!(target: "scanner", error = %e, "embedded json skipped"),
        }
    }
    out
}

pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for ch in s.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Turn candidates into records. Only candidates with integer position and
/// total survive; ids are slugs of the name. Sorted by case-folded name.
pub fn candidates_to_records(candidates: &[ScanCandidate]) -> Vec<QueueRecord> {
    let mut seen = HashSet::new();
    let mut out: Vec<QueueRecord> = candidates
        .iter()
        .filter_map(|c| {
            let (position, total) = (c.position_int()?, c.total_int()?);
            let slug = slugify(&c.name);
            let id = if slug.is_empty() { c.name.clone() } else { slug };
            seen.insert(id.clone()).then(|| QueueRecord {
                id,
                name: c.name.clone(),
                position: Some(position),
                total: Some(total),
                ..Default::default()
            })
        })
        .collect();
    out.sort_by_key(|r| r.name.to_lowercase());
    out
}
