use std::time::Instant;

use serde_json::Value;

use crate::aggs::{self, AggsBuilder};
use crate::cluster::Cluster;
use crate::error::Result;
use crate::metadata::ColumnStore;
use crate::query::Query;
use crate::validation;

/// Execute one query end to end: validate, compile, search, decode.
/// The query and its compiled state are owned by this call; only the
/// metadata store is shared.
pub async fn run_query(
    cluster: &dyn Cluster,
    metadata: &ColumnStore,
    query: &Query,
) -> Result<Value> {
    validation::validate(query)?;

    let columns = metadata.columns(&query.from).unwrap_or_default();
    let builder = AggsBuilder::new(cluster.dialect());
    let mut compiled = builder.build(query, &columns)?;

    let started = Instant::now();
    let response = cluster.search(&compiled.index, &compiled.body).await?;
    let output = aggs::decode(&mut compiled, query, &response)?;

    tracing::debug!(
        from = %query.from,
        edges = query.dimensions().len(),
        ms = started.elapsed().as_millis() as u64,
        "query complete"
    );
    Ok(output)
}
