//! Integration tests for the aggregation compiler/decoder.
//!
//! Every response here is canned ES aggregation JSON; nothing talks to a
//! live cluster. Requests are compiled first so the fixtures mirror the
//! shape the builder actually asks for.

use jxcube::aggs::{self, AggsBuilder, CompiledRequest};
use jxcube::dialect::Es5Dialect;
use jxcube::query::Query;
use jxcube::JxError;
use serde_json::{json, Value};

fn compile(query: &Value) -> (Query, CompiledRequest) {
    let query: Query = serde_json::from_value(query.clone()).unwrap();
    let compiled = AggsBuilder::new(&Es5Dialect).build(&query, &[]).unwrap();
    (query, compiled)
}

fn decode(query: &Value, response: &Value) -> Value {
    let (query, mut compiled) = compile(query);
    aggs::decode(&mut compiled, &query, response).unwrap()
}

// ============================================================================
// Round-trip scenarios
// ============================================================================

#[test]
fn groupby_count_round_trip() {
    let query = json!({"from": "task", "groupby": "a", "select": "count"});
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 2},
            {"key": "c", "doc_count": 3}
        ]},
        "_missing": {"doc_count": 1}
    }});

    let out = decode(&query, &response);
    assert_eq!(out["meta"]["format"], json!("table"));
    assert_eq!(out["header"], json!(["a", "count"]));
    assert_eq!(out["data"], json!([["b", 2], ["c", 3], [null, 1]]));
}

#[test]
fn sum_with_default_distinguishes_empty_groups() {
    let query = json!({
        "from": "task",
        "groupby": "a",
        "select": {"value": "v", "aggregate": "sum", "default": 0}
    });
    let (_, compiled) = compile(&query);
    let leaf = &compiled.body["aggs"]["_match"]["aggs"];
    assert_eq!(leaf["v_stats"], json!({"stats": {"field": "v"}}));

    // group "c" exists but holds no values of v; its sum must come out as
    // the select default, not as stats' zero
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 2,
             "v_stats": {"count": 1, "min": 2.0, "max": 2.0, "avg": 2.0, "sum": 2.0}},
            {"key": "c", "doc_count": 1,
             "v_stats": {"count": 0, "min": null, "max": null, "avg": null, "sum": 0.0}}
        ]},
        "_missing": {"doc_count": 1,
            "v_stats": {"count": 1, "min": 3.0, "max": 3.0, "avg": 3.0, "sum": 3.0}}
    }});

    let out = decode(&query, &response);
    assert_eq!(out["header"], json!(["a", "v"]));
    assert_eq!(out["data"], json!([["b", 2], ["c", 0], [null, 3]]));
}

#[test]
fn combined_stats_matches_independent_metrics() {
    let combined = json!({
        "from": "task",
        "groupby": "b",
        "select": [
            {"name": "hi", "value": "a.b.c", "aggregate": "max"},
            {"name": "lo", "value": "a.b.c", "aggregate": "min"}
        ]
    });
    let (_, compiled) = compile(&combined);
    let leaf = compiled.body["aggs"]["_match"]["aggs"].as_object().unwrap();
    assert_eq!(leaf.len(), 1, "one stats agg, not two metrics: {leaf:?}");

    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 1,
             "a_b_c_stats": {"count": 1, "min": 2.0, "max": 2.0, "avg": 2.0, "sum": 2.0}},
            {"key": "c", "doc_count": 3,
             "a_b_c_stats": {"count": 3, "min": 7.0, "max": 13.0, "avg": 10.33, "sum": 31.0}}
        ]},
        "_missing": {"doc_count": 0}
    }});
    let out = decode(&combined, &response);
    assert_eq!(out["data"], json!([["b", 2, 2], ["c", 13, 7]]));

    // each metric alone, over the same data, sees the same values
    let lone_max = json!({
        "from": "task",
        "groupby": "b",
        "select": {"name": "hi", "value": "a.b.c", "aggregate": "max"}
    });
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 1, "hi": {"value": 2.0}},
            {"key": "c", "doc_count": 3, "hi": {"value": 13.0}}
        ]},
        "_missing": {"doc_count": 0}
    }});
    let out = decode(&lone_max, &response);
    assert_eq!(out["data"], json!([["b", 2], ["c", 13]]));
}

#[test]
fn boolean_aggregates_over_an_expression() {
    // docs [{"a":1},{"a":2},{"a":3},{"a":null},{}] scored by eq(a, 1)
    let query = json!({
        "from": "task",
        "select": [
            {"name": "and", "value": {"eq": {"a": 1}}, "aggregate": "and"},
            {"name": "or", "value": {"eq": {"a": 1}}, "aggregate": "or"},
            {"name": "min", "value": {"eq": {"a": 1}}, "aggregate": "min"},
            {"name": "max", "value": {"eq": {"a": 1}}, "aggregate": "max"}
        ]
    });
    let response = json!({"aggregations": {
        "and": {"value": 0.0},
        "or": {"value": 1.0},
        "script_stats": {"count": 5, "min": 0.0, "max": 1.0, "avg": 0.2, "sum": 1.0}
    }});

    let out = decode(&query, &response);
    assert_eq!(out["meta"]["format"], json!("cube"));
    assert_eq!(out["edges"], json!([]));
    assert_eq!(
        out["data"],
        json!({"and": false, "or": true, "min": 0, "max": 1})
    );
}

// ============================================================================
// Cube properties
// ============================================================================

#[test]
fn static_cube_is_complete_and_conserves_counts() {
    let query = json!({
        "from": "task",
        "edges": [
            {"name": "a", "value": "a", "allowNulls": true,
             "domain": {"type": "set", "partitions": ["b", "c"]}},
            {"name": "dur", "value": "dur",
             "domain": {"type": "range", "partitions": [
                 {"min": 0.0, "max": 10.0},
                 {"min": 10.0, "max": 20.0}
             ]}}
        ],
        "select": "count"
    });
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 3, "_match": {"buckets": [
                {"from": 0.0, "to": 10.0, "doc_count": 2},
                {"from": 10.0, "to": 20.0, "doc_count": 1}
            ]}},
            {"key": "c", "doc_count": 2, "_match": {"buckets": [
                {"from": 0.0, "to": 10.0, "doc_count": 0},
                {"from": 10.0, "to": 20.0, "doc_count": 2}
            ]}}
        ]},
        "_missing": {"doc_count": 1, "_match": {"buckets": [
            {"from": 0.0, "to": 10.0, "doc_count": 1},
            {"from": 10.0, "to": 20.0, "doc_count": 0}
        ]}}
    }});

    let out = decode(&query, &response);
    // (2 partitions + null) x 2 partitions, every cell present
    let data = &out["data"]["count"];
    assert_eq!(data, &json!([[2, 1], [0, 2], [1, 0]]));

    let total: i64 = data
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|row| row.as_array().unwrap())
        .map(|cell| cell.as_i64().unwrap())
        .sum();
    assert_eq!(total, 6, "every document lands in exactly one cell");
}

#[test]
fn unvisited_cells_follow_the_missing_cell_policy() {
    let query = json!({
        "from": "task",
        "edges": [{"name": "a", "value": "a", "allowNulls": true,
                   "domain": {"type": "set", "partitions": ["b", "c"]}}],
        "select": "count",
        "format": "table"
    });
    let response = json!({"aggregations": {
        "_match": {"buckets": [{"key": "c", "doc_count": 3}]},
        "_missing": {"doc_count": 0}
    }});

    // edge-mode tables are dense: never-seen coordinates still appear,
    // counts fill with zero
    let out = decode(&query, &response);
    assert_eq!(out["data"], json!([["b", 0], ["c", 3], [null, 0]]));
}

#[test]
fn decoding_twice_over_one_response_is_stable() {
    let (query, mut compiled) =
        compile(&json!({"from": "task", "groupby": "a", "select": "count"}));
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "c", "doc_count": 3},
            {"key": "b", "doc_count": 2}
        ]},
        "_missing": {"doc_count": 1}
    }});

    let first = aggs::decode(&mut compiled, &query, &response).unwrap();
    let second = aggs::decode(&mut compiled, &query, &response).unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Range domains
// ============================================================================

#[test]
fn range_missing_filter_complements_the_partitions() {
    let query = json!({
        "from": "task",
        "edges": [{"name": "dur", "value": "dur", "allowNulls": true,
            "domain": {"type": "duration", "partitions": [
                {"min": 0.0, "max": 10.0},
                {"min": 10.0, "max": 20.0},
                {"min": 20.0, "max": 60.0}
            ]}}],
        "select": "count"
    });
    let (_, compiled) = compile(&query);

    // null OR below the bottom OR at/above the top
    let missing = &compiled.body["aggs"]["_missing"]["filter"];
    let clauses = missing["bool"]["should"].as_array().unwrap();
    assert_eq!(clauses.len(), 3);
    assert_eq!(
        clauses[0],
        json!({"bool": {"must_not": {"exists": {"field": "dur"}}}})
    );
    assert_eq!(clauses[1], json!({"range": {"dur": {"lt": 0.0}}}));
    assert_eq!(clauses[2], json!({"range": {"dur": {"gte": 60.0}}}));

    // "in exactly one partition" and "outside" are exclusive and exhaustive,
    // boundaries included
    let partitions = [(0.0, 10.0), (10.0, 20.0), (20.0, 60.0)];
    for v in [-5.0, 0.0, 9.999, 10.0, 19.999, 20.0, 59.999, 60.0, 75.0] {
        let hits = partitions.iter().filter(|(lo, hi)| *lo <= v && v < *hi).count();
        let outside = v < 0.0 || v >= 60.0;
        assert_eq!(hits == 1, !outside, "value {v}");
        assert!(hits <= 1, "value {v} in more than one partition");
    }
}

// ============================================================================
// Walker edge cases
// ============================================================================

#[test]
fn nested_and_filter_wrappers_unwrap_transparently() {
    let query = json!({
        "from": "task.action.timings",
        "groupby": "step",
        "select": "count",
        "where": {"eq": {"state": "done"}}
    });
    let (_, compiled) = compile(&query);
    assert_eq!(compiled.index, "task");
    assert_eq!(
        compiled.body["aggs"]["_nested"]["nested"]["path"],
        json!("action.timings")
    );

    let response = json!({"aggregations": {"_nested": {"doc_count": 10,
        "_filter": {"doc_count": 8,
            "_match": {"buckets": [
                {"key": "build", "doc_count": 5},
                {"key": "test", "doc_count": 3}
            ]},
            "_missing": {"doc_count": 0}
        }}}});

    let out = decode(&query, &response);
    assert_eq!(out["data"], json!([["build", 5], ["test", 3]]));
}

#[test]
fn overflow_bucket_rows_are_dropped() {
    let query = json!({"from": "task", "groupby": "a", "select": "count"});
    let response = json!({"aggregations": {
        "_match": {"buckets": [{"key": "b", "doc_count": 2}]},
        "_other": {"doc_count": 7},
        "_missing": {"doc_count": 0}
    }});

    // documents beyond the requested terms have no partition; the row is
    // dropped, never misfiled
    let out = decode(&query, &response);
    assert_eq!(out["data"], json!([["b", 2]]));
}

#[test]
fn tuple_edge_decodes_nested_levels() {
    let query = json!({
        "from": "task",
        "groupby": [{"name": "machine", "value": ["os", "bits"]}],
        "select": "count"
    });
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "linux", "doc_count": 3,
             "_match": {"buckets": [
                 {"key": 32, "doc_count": 1},
                 {"key": 64, "doc_count": 2}
             ]},
             "_missing": {"doc_count": 0}},
            {"key": "win", "doc_count": 2,
             "_match": {"buckets": [{"key": 64, "doc_count": 2}]},
             "_missing": {"doc_count": 0}}
        ]},
        "_missing": {"doc_count": 1,
            "_match": {"buckets": []},
            "_missing": {"doc_count": 1}}
    }});

    let out = decode(&query, &response);
    assert_eq!(out["header"], json!(["machine", "count"]));
    assert_eq!(
        out["data"],
        json!([
            [["linux", 32], 1],
            [["linux", 64], 2],
            [["win", 64], 2],
            [null, 1]
        ])
    );
}

#[test]
fn list_format_returns_named_records() {
    let query = json!({
        "from": "task", "groupby": "a", "select": "count", "format": "list"
    });
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 2},
            {"key": "c", "doc_count": 3}
        ]},
        "_missing": {"doc_count": 1}
    }});

    let out = decode(&query, &response);
    assert_eq!(out["meta"]["format"], json!("list"));
    assert_eq!(
        out["data"],
        json!([
            {"a": "b", "count": 2},
            {"a": "c", "count": 3},
            {"a": null, "count": 1}
        ])
    );
}

#[test]
fn limit_truncates_groupby_rows() {
    let query = json!({
        "from": "task", "groupby": "a", "select": "count", "limit": 1
    });
    let response = json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 2},
            {"key": "c", "doc_count": 3}
        ]},
        "_missing": {"doc_count": 1}
    }});

    let out = decode(&query, &response);
    assert_eq!(out["data"], json!([["b", 2]]));
}

#[test]
fn shape_mismatch_aborts_the_decode() {
    let query = json!({"from": "task", "groupby": "a", "select": "count"});
    let (query, mut compiled) = compile(&query);
    let err = aggs::decode(
        &mut compiled,
        &query,
        &json!({"aggregations": {"doc_count": 4}}),
    )
    .unwrap_err();
    assert!(matches!(err, JxError::Decode(_)), "got {err}");
}
