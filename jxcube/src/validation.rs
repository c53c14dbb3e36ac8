use std::collections::HashSet;

use crate::error::{JxError, Result};
use crate::query::{FormatKind, Query};

/// Pre-flight checks on a query. Anything caught here is a configuration
/// error: the request is never built, nothing is retried.
pub fn validate(query: &Query) -> Result<()> {
    check(
        !query.from.is_empty(),
        "query requires a from clause".to_string(),
    )?;
    check(
        query.edges.is_empty() || query.groupby.is_empty(),
        "query cannot mix edges and groupby".to_string(),
    )?;
    check(
        !(query.format == Some(FormatKind::Cube) && !query.groupby.is_empty()),
        "groupby queries produce table or list output, not cube".to_string(),
    )?;
    check(
        query.limit != Some(0),
        "limit must be positive".to_string(),
    )?;

    let mut edge_names = HashSet::new();
    for edge in query.dimensions() {
        check(
            edge_names.insert(edge.name.as_str()),
            format!("duplicate edge name {}", edge.name),
        )?;
    }

    let mut select_names = HashSet::new();
    for select in &query.select {
        check(
            select_names.insert(select.name.as_str()),
            format!("duplicate select name {}", select.name),
        )?;
    }
    Ok(())
}

fn check(condition: bool, message: String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(JxError::Query(message))
    }
}
