//! End-to-end: validate → compile → search → decode, with the search seam
//! scripted over canned JSON.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use jxcube::dialect::{Es5Dialect, EsDialect};
use jxcube::metadata::{Column, ColumnType};
use jxcube::{run_query, Cluster, ColumnStore, JxError, Query, Result};

struct ScriptedCluster {
    response: Value,
    seen: Mutex<Vec<(String, Value)>>,
}

impl ScriptedCluster {
    fn new(response: Value) -> Self {
        Self {
            response,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Cluster for ScriptedCluster {
    fn dialect(&self) -> &(dyn EsDialect + Send + Sync) {
        &Es5Dialect
    }

    async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        self.seen
            .lock()
            .unwrap()
            .push((index.to_string(), body.clone()));
        Ok(self.response.clone())
    }
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("jxcube=debug")
            .try_init();
    });
}

fn parse(query: Value) -> Query {
    serde_json::from_value(query).unwrap()
}

#[tokio::test]
async fn groupby_count_through_the_runtime() -> anyhow::Result<()> {
    init_tracing();
    let cluster = ScriptedCluster::new(json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 2},
            {"key": "c", "doc_count": 3}
        ]},
        "_missing": {"doc_count": 1}
    }}));
    let metadata = ColumnStore::new();

    let query = parse(json!({"from": "task", "groupby": "a", "select": "count"}));
    let out = run_query(&cluster, &metadata, &query).await?;

    assert_eq!(out["header"], json!(["a", "count"]));
    assert_eq!(out["data"], json!([["b", 2], ["c", 3], [null, 1]]));

    let seen = cluster.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (index, body) = &seen[0];
    assert_eq!(index, "task");
    assert_eq!(body["size"], json!(0));
    assert!(body["aggs"]["_match"]["terms"].is_object());
    Ok(())
}

#[tokio::test]
async fn set_domain_seeds_from_column_metadata() -> anyhow::Result<()> {
    init_tracing();
    let cluster = ScriptedCluster::new(json!({"aggregations": {
        "_match": {"buckets": [
            {"key": "b", "doc_count": 4},
            {"key": "c", "doc_count": 2}
        ]}
    }}));

    let metadata = ColumnStore::new();
    metadata.insert_table(
        "task",
        vec![Column {
            name: "a".to_string(),
            es_column: "a".to_string(),
            jx_type: ColumnType::String,
            nested_path: None,
            cardinality: Some(2),
            partitions: Some(vec![json!("b"), json!("c")]),
        }],
    );

    let query = parse(json!({
        "from": "task",
        "edges": [{"name": "a", "value": "a", "domain": {"type": "set"}}],
        "select": "count"
    }));
    let out = run_query(&cluster, &metadata, &query).await?;

    assert_eq!(out["meta"]["format"], json!("cube"));
    assert_eq!(out["data"]["count"], json!([4, 2]));
    assert_eq!(
        out["edges"][0]["domain"]["partitions"],
        json!(["b", "c"]),
        "partitions came from the column crawler"
    );

    let seen = cluster.seen.lock().unwrap();
    let (_, body) = &seen[0];
    assert_eq!(
        body["aggs"]["_match"]["terms"]["include"],
        json!(["b", "c"])
    );
    Ok(())
}

#[tokio::test]
async fn invalid_queries_never_reach_the_cluster() -> anyhow::Result<()> {
    init_tracing();
    let cluster = ScriptedCluster::new(json!({}));
    let metadata = ColumnStore::new();

    let query = parse(json!({
        "from": "task",
        "edges": ["a"],
        "groupby": ["b"],
        "select": "count"
    }));
    let err = run_query(&cluster, &metadata, &query).await.unwrap_err();
    assert!(matches!(err, JxError::Query(_)), "got {err}");
    assert!(cluster.seen.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn plain_aggregate_produces_one_row() -> anyhow::Result<()> {
    init_tracing();
    let cluster = ScriptedCluster::new(json!({"aggregations": {
        "_filter": {"doc_count": 6}
    }}));
    let metadata = ColumnStore::new();

    let query = parse(json!({
        "from": "task", "select": "count", "format": "table"
    }));
    let out = run_query(&cluster, &metadata, &query).await?;
    assert_eq!(out["header"], json!(["count"]));
    assert_eq!(out["data"], json!([[6]]));
    Ok(())
}
