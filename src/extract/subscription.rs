// src/extract/subscription.rs
//! Deterministic mapping of the dashboard's subscriptions payload:
//!
//! ```json
//! { "data": [ { "id": 1, "placement": 17, "active": true,
//!               "list": { "id": 9, "name": "...", "subscribers": 400,
//!                         "company": { "name": "..." },
//!                         "template": { "lists": [ { "id": 9, "active_subscribers": 380 } ] } } } ] }
//! ```
//!
//! Items are read one by one; an item of the wrong shape is skipped, a
//! payload of the wrong shape yields nothing.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::extract::scanner::coerce_int;
use crate::extract::QueueRecord;

pub const UNKNOWN_NAME: &str = "Unknown waitlist";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubscriptionItem {
    id: Value,
    placement: Value,
    active: Value,
    completed: Value,
    approved: Value,
    list: Value,
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text<'a>(v: Option<&'a Value>) -> Option<&'a str> {
    v.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn flag(v: &Value) -> Option<bool> {
    v.as_bool()
}

/// True when `v` has the subscriptions shape (a `data` array holding at
/// least one object with an embedded `list` object).
pub fn looks_like_subscriptions(v: &Value) -> bool {
    v.get("data")
        .and_then(Value::as_array)
        .is_some_and(|items| items.iter().any(|it| it.get("list").is_some_and(Value::is_object)))
}

/// `list.subscribers`, else the matching `list.template.lists[]` entry
/// (`active_subscribers` before `subscribers`).
fn total_for(list: &Value, list_id: Option<&str>) -> Option<i64> {
    if let Some(n) = list.get("subscribers").and_then(coerce_int) {
        return Some(n);
    }
    let want = list_id?;
    list.pointer("/template/lists")
        .and_then(Value::as_array)?
        .iter()
        .find(|entry| entry.get("id").and_then(id_string).as_deref() == Some(want))
        .and_then(|entry| {
            entry
                .get("active_subscribers")
                .and_then(coerce_int)
                .or_else(|| entry.get("subscribers").and_then(coerce_int))
        })
}

fn display_name(list: &Value) -> String {
    let company = text(list.pointer("/company/name"));
    let list_name = text(list.get("name"));

    if let (Some(company), Some(list_name)) = (company, list_name) {
        if list_name.to_lowercase().contains(&company.to_lowercase()) {
            return list_name.to_string();
        }
        return format!("{company} - {list_name}");
    }

    text(list.get("full_name"))
        .or(list_name)
        .or(company)
        .unwrap_or(UNKNOWN_NAME)
        .to_string()
}

fn parse_item(raw: &Value) -> Option<QueueRecord> {
    let item = SubscriptionItem::deserialize(raw).ok()?;
    let list = &item.list;
    if !list.is_object() && item.placement.is_null() {
        return None;
    }

    let list_id = list.get("id").and_then(id_string);
    let id = list_id.clone().or_else(|| id_string(&item.id)).unwrap_or_default();

    Some(QueueRecord {
        name: display_name(list),
        position: coerce_int(&item.placement),
        total: total_for(list, list_id.as_deref()),
        active: flag(&item.active),
        completed: flag(&item.completed),
        approved: flag(&item.approved),
        id,
        ..Default::default()
    })
}

/// One record per subscription item, first occurrence per id (or per name
/// when the id is empty) wins.
pub fn parse_subscriptions(payload: &Value) -> Vec<QueueRecord> {
    let Some(items) = payload.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(parse_item)
        .filter(|r| seen.insert(r.key().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrong_shapes_yield_nothing() {
        for v in [
            json!(null),
            json!([]),
            json!({}),
            json!({ "data": "nope" }),
            json!({ "data": [1, "x", null] }),
        ] {
            assert!(parse_subscriptions(&v).is_empty(), "{v}");
            assert!(!looks_like_subscriptions(&v));
        }
    }

    #[test]
    fn company_prefix_rules() {
        let v = json!({ "data": [
            { "placement": 5, "list": { "id": 1, "name": "Kbh Andel Nord", "company": { "name": "kbh andel" }, "subscribers": 10 } },
            { "placement": 6, "list": { "id": 2, "name": "Familieboliger", "company": { "name": "AKB" }, "subscribers": 20 } }
        ]});
        let recs = parse_subscriptions(&v);
        assert_eq!(recs[0].name, "Kbh Andel Nord");
        assert_eq!(recs[1].name, "AKB - Familieboliger");
    }

    #[test]
    fn name_fallback_chain() {
        let v = json!({ "data": [
            { "placement": 1, "list": { "id": 1, "full_name": "Full", "name": "Short" } },
            { "placement": 1, "list": { "id": 2, "name": "Short" } },
            { "placement": 1, "list": { "id": 3, "company": { "name": "Co" } } },
            { "placement": 1, "list": { "id": 4, "name": "  " } }
        ]});
        let names: Vec<String> = parse_subscriptions(&v).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Full", "Short", "Co", UNKNOWN_NAME]);
    }

    #[test]
    fn total_falls_back_to_template_lists() {
        let v = json!({ "data": [
            { "placement": "17", "list": { "id": 9, "name": "A", "template": { "lists": [
                { "id": 8, "active_subscribers": 1 },
                { "id": "9", "active_subscribers": 380, "subscribers": 400 }
            ] } } },
            { "placement": 3, "list": { "id": 10, "name": "B", "template": { "lists": [
                { "id": 10, "subscribers": 55 }
            ] } } }
        ]});
        let recs = parse_subscriptions(&v);
        assert_eq!(recs[0].position, Some(17));
        assert_eq!(recs[0].total, Some(380));
        assert_eq!(recs[1].total, Some(55));
    }

    #[test]
    fn id_falls_back_to_item_and_flags_pass_through() {
        let v = json!({ "data": [
            { "id": 77, "placement": 2, "active": true, "completed": false, "approved": "yes",
              "list": { "name": "NoId", "subscribers": 9 } }
        ]});
        let r = &parse_subscriptions(&v)[0];
        assert_eq!(r.id, "77");
        assert_eq!(r.active, Some(true));
        assert_eq!(r.completed, Some(false));
        assert_eq!(r.approved, None);
    }

    #[test]
    fn duplicates_collapse_first_wins() {
        let v = json!({ "data": [
            { "placement": 10, "list": { "id": 5, "name": "First", "subscribers": 100 } },
            { "placement": 11, "list": { "id": 5, "name": "Second", "subscribers": 100 } },
            { "placement": 12, "list": { "name": "Anon" } },
            { "placement": 13, "list": { "name": "Anon" } }
        ]});
        let recs = parse_subscriptions(&v);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].name, "First");
        assert_eq!(recs[0].position, Some(10));
        assert_eq!(recs[1].id, "");
        assert_eq!(recs[1].position, Some(12));
        assert!(recs.iter().all(|r| !r.name.is_empty()));
    }

    #[test]
    fn missing_placement_is_omitted() {
        let v = json!({ "data": [ { "list": { "id": 1, "name": "X", "subscribers": 3 } } ] });
        let r = &parse_subscriptions(&v)[0];
        assert_eq!(r.position, None);
        assert!(!r.has_placement());
    }
}
