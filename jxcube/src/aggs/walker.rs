//! Depth-first walk over a buffered aggregation response.
//!
//! Each invocation is a fresh, finite pass producing `(row, leaf)` pairs;
//! re-invoking over the same response restarts the walk, which is what the
//! two-pass decode relies on. The partial row is threaded explicitly through
//! the recursion, with completed rows accumulated into the output sequence.

use serde_json::Value;

use crate::error::{JxError, Result};

/// One edge-column slot of a decoded row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowSlot<'a> {
    /// A `_match` bucket carrying a key.
    Bucket(&'a Value),
    /// The `_other` bucket: documents beyond the requested terms.
    Overflow(&'a Value),
    /// The `_missing` bucket: documents with no value at this edge.
    Missing,
}

pub type Row<'a> = Vec<RowSlot<'a>>;

/// Strip `_filter`/`_nested` wrappers. Transparent and repeatable at any
/// depth; a node may carry both.
pub fn unwrap_node(node: &Value) -> &Value {
    let mut node = node;
    loop {
        if let Some(inner) = node.get("_filter") {
            node = inner;
        } else if let Some(inner) = node.get("_nested") {
            node = inner;
        } else {
            return node;
        }
    }
}

/// Walk the response tree. `columns` is the total number of edge columns;
/// the innermost bucket of each path is yielded as the leaf, still holding
/// its `doc_count` and metric sub-aggregations.
pub fn walk<'a>(root: &'a Value, columns: usize) -> Result<Vec<(Row<'a>, &'a Value)>> {
    let mut out = Vec::new();
    let mut row: Row<'a> = Vec::with_capacity(columns);
    descend(root, columns, &mut row, &mut out)?;
    Ok(out)
}

fn descend<'a>(
    node: &'a Value,
    remaining: usize,
    row: &mut Row<'a>,
    out: &mut Vec<(Row<'a>, &'a Value)>,
) -> Result<()> {
    let node = unwrap_node(node);
    if remaining == 0 {
        out.push((row.clone(), node));
        return Ok(());
    }

    let mut seen_branch = false;
    if let Some(matched) = node.get("_match") {
        seen_branch = true;
        let buckets = matched
            .get("buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                JxError::Decode(format!("_match aggregation has no bucket list: {matched}"))
            })?;
        for bucket in buckets {
            row.push(RowSlot::Bucket(bucket));
            descend(bucket, remaining - 1, row, out)?;
            row.pop();
        }
    }
    if let Some(other) = node.get("_other") {
        seen_branch = true;
        row.push(RowSlot::Overflow(other));
        descend(other, remaining - 1, row, out)?;
        row.pop();
    }
    if let Some(missing) = node.get("_missing") {
        seen_branch = true;
        if doc_count(missing) > 0 {
            row.push(RowSlot::Missing);
            descend(missing, remaining - 1, row, out)?;
            row.pop();
        }
    }

    if !seen_branch {
        return Err(JxError::Decode(format!(
            "response shape does not match request: expected _match/_other/_missing \
             with {remaining} edge columns left, got {}",
            node_keys(node)
        )));
    }
    Ok(())
}

pub fn doc_count(node: &Value) -> u64 {
    node.get("doc_count").and_then(Value::as_u64).unwrap_or(0)
}

fn node_keys(node: &Value) -> String {
    match node.as_object() {
        Some(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("[{}]", keys.join(", "))
        }
        None => node.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwrap_is_repeatable() {
        let node = json!({"_filter": {"_nested": {"_filter": {"_match": {"buckets": []}}}}});
        assert_eq!(unwrap_node(&node), &json!({"_match": {"buckets": []}}));
    }

    #[test]
    fn visits_match_then_missing() {
        let root = json!({
            "_match": {"buckets": [
                {"key": "a", "doc_count": 2},
                {"key": "b", "doc_count": 1}
            ]},
            "_missing": {"doc_count": 3}
        });
        let rows = walk(&root, 1).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0].0[0], RowSlot::Bucket(b) if b["key"] == json!("a")));
        assert!(matches!(rows[1].0[0], RowSlot::Bucket(b) if b["key"] == json!("b")));
        assert!(matches!(rows[2].0[0], RowSlot::Missing));
        assert_eq!(rows[2].1, &json!({"doc_count": 3}));
    }

    #[test]
    fn empty_missing_bucket_is_skipped() {
        let root = json!({
            "_match": {"buckets": [{"key": "a", "doc_count": 1}]},
            "_missing": {"doc_count": 0}
        });
        let rows = walk(&root, 1).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn walk_is_restartable() {
        let root = json!({
            "_match": {"buckets": [{"key": "a", "doc_count": 1}]},
            "_missing": {"doc_count": 1}
        });
        let first = walk(&root, 1).unwrap();
        let second = walk(&root, 1).unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn zero_columns_yields_the_unwrapped_root() {
        let root = json!({"_filter": {"doc_count": 5, "total": {"value": 9}}});
        let rows = walk(&root, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].0.is_empty());
        assert_eq!(rows[0].1["total"]["value"], json!(9));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let root = json!({"doc_count": 5});
        let err = walk(&root, 1).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
