//! # Source-document schema and JSON projection builder
//!
//! The external document store keeps one document per uid:
//!
//! ```text
//! { _id:uid, v:int, app:string, ts:int64,
//!   category: { <name>: { config:string, ts:int64, w:[ {k:string,v:double}, … ] }, … },
//!   tag:      { <name>: same shape },
//!   category_stat: { <name>: { num:int, sum:double }, … },
//!   tag_stat:      { <name>: { num:int, sum:double }, … } }
//! ```
//!
//! The decoder here is tolerant: unknown top-level keys are ignored, and a
//! wrong-type sub-value is logged and skipped rather than failing the
//! whole document. Nothing in this module ever panics on malformed input,
//! worst case a projection is built from less data than the document
//! actually has.

use serde_json::{json, Value};

use crate::task::TaskType;

/// Top-level field this task type reads from, and whether that field is a
/// map keyed by name (`category`/`tag`) or a flat stat map
/// (`category_stat`/`tag_stat`).
pub fn root_field(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Category => "category",
        TaskType::Tag => "tag",
        TaskType::CategoryStat => "category_stat",
        TaskType::TagStat => "tag_stat",
    }
}

/// Builds the document-store projection for a task: a single named
/// sub-path for `category`/`tag`, or `{ts, <stat_root>}` for the `_stat`
/// variants.
pub fn projection_for(task_type: TaskType, param: Option<&str>) -> Vec<String> {
    let root = root_field(task_type);
    match param {
        Some(name) => vec![format!("{root}.{name}")],
        None => vec!["ts".to_string(), root.to_string()],
    }
}

/// One decoded `category`/`tag` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedEntry {
    pub ts: i64,
    pub weights: Vec<(String, f64)>,
}

/// Decodes `doc[root][name]` into a [`WeightedEntry`], tolerating missing
/// or wrong-typed fields by dropping them rather than failing outright.
/// Returns `None` only when the named entry itself is absent or not an
/// object.
pub fn decode_weighted_entry(doc: &Value, root: &str, name: &str) -> Option<WeightedEntry> {
    let entry = doc.get(root)?.get(name)?.as_object()?;

    let ts = entry.get("ts").and_then(Value::as_i64).unwrap_or(0);

    let weights = entry
        .get("w")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let k = item.get("k")?.as_str()?.to_string();
                    let v = item.get("v")?.as_f64()?;
                    Some((k, v))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(WeightedEntry { ts, weights })
}

/// Shapes a [`WeightedEntry`] into `{"ts":…, "weighted":[{"tag":k,"weight":v},…]}`
/// with weights rounded to at most 3 decimal places.
pub fn shape_weighted(entry: &WeightedEntry) -> Value {
    let weighted: Vec<Value> = entry
        .weights
        .iter()
        .map(|(tag, weight)| json!({ "tag": tag, "weight": round3(*weight) }))
        .collect();
    json!({ "ts": entry.ts, "weighted": weighted })
}

/// Shapes a `category_stat`/`tag_stat` document: renames the stat root to
/// `"data"`, keeps `ts`. Emits `{}` when `ts` or the stat root is missing
///, a document that fails these checks is treated as if no document were
/// found at all.
pub fn shape_stat(doc: &Value, root: &str) -> Value {
    let ts = match doc.get("ts").and_then(Value::as_i64) {
        Some(ts) => ts,
        None => return json!({}),
    };
    let data = match doc.get(root) {
        Some(data) => data.clone(),
        None => return json!({}),
    };
    json!({ "ts": ts, "data": data })
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_weighted_entry() {
        let doc = json!({
            "category": {
                "c1": { "config": "x", "ts": 100, "w": [{"k": "a", "v": 1.23456}, {"k": "b", "v": 2.0}] }
            }
        });
        let entry = decode_weighted_entry(&doc, "category", "c1").unwrap();
        assert_eq!(entry.ts, 100);
        assert_eq!(entry.weights, vec![("a".to_string(), 1.23456), ("b".to_string(), 2.0)]);
    }

    #[test]
    fn missing_named_entry_returns_none() {
        let doc = json!({ "category": {} });
        assert!(decode_weighted_entry(&doc, "category", "missing").is_none());
    }

    #[test]
    fn skips_malformed_weight_items_without_failing() {
        let doc = json!({
            "category": {
                "c1": { "ts": 1, "w": [{"k": "a", "v": 1.0}, {"k": "bad-no-v"}, "not even an object"] }
            }
        });
        let entry = decode_weighted_entry(&doc, "category", "c1").unwrap();
        assert_eq!(entry.weights, vec![("a".to_string(), 1.0)]);
    }

    #[test]
    fn shape_weighted_rounds_to_three_decimals() {
        let entry = WeightedEntry { ts: 5, weights: vec![("a".to_string(), 1.0 / 3.0)] };
        let shaped = shape_weighted(&entry);
        assert_eq!(shaped["ts"], json!(5));
        assert_eq!(shaped["weighted"][0]["weight"], json!(0.333));
    }

    #[test]
    fn shape_stat_renames_root_to_data() {
        let doc = json!({ "ts": 42, "category_stat": {"c1": {"num": 3, "sum": 9.0}} });
        let shaped = shape_stat(&doc, "category_stat");
        assert_eq!(shaped, json!({ "ts": 42, "data": {"c1": {"num": 3, "sum": 9.0}} }));
    }

    #[test]
    fn shape_stat_empty_object_when_ts_missing() {
        let doc = json!({ "category_stat": {} });
        assert_eq!(shape_stat(&doc, "category_stat"), json!({}));
    }

    #[test]
    fn shape_stat_empty_object_when_root_missing() {
        let doc = json!({ "ts": 1 });
        assert_eq!(shape_stat(&doc, "category_stat"), json!({}));
    }

    #[test]
    fn projection_for_category_targets_named_subpath() {
        assert_eq!(
            projection_for(TaskType::Category, Some("c1")),
            vec!["category.c1".to_string()]
        );
    }

    #[test]
    fn projection_for_stat_targets_root_and_ts() {
        assert_eq!(
            projection_for(TaskType::TagStat, None),
            vec!["ts".to_string(), "tag_stat".to_string()]
        );
    }
}
