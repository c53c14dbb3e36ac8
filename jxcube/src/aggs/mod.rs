//! The aggregation compiler/decoder: query in, ES aggregation request out,
//! response buckets back to cube/table/list results.

use serde_json::Value;

use crate::error::{JxError, Result};
use crate::query::{FormatKind, Query};

mod decoder;
mod format;
mod request;
mod resolve;
mod walker;

pub use decoder::{make_decoder, DecoderContext, EdgeDecoder};
pub use format::{format_cube, format_list, format_table};
pub use request::{split_from, AggsBuilder, BoundSelect, CompiledRequest, Pull};
pub use resolve::resolve_domains;
pub use walker::{unwrap_node, walk, Row, RowSlot};

/// Decode a buffered aggregation response against its compiled request.
/// Runs domain discovery first when any edge needs it, then formats. The
/// query value itself is read-only throughout.
pub fn decode(
    compiled: &mut CompiledRequest,
    query: &Query,
    response: &Value,
) -> Result<Value> {
    let root = response.get("aggregations").unwrap_or(response);

    resolve_domains(&mut compiled.decoders, root, compiled.columns_total)?;

    let dense = query.groupby.is_empty();
    let limit = Some(query.limit.unwrap_or(compiled.row_limit));
    match query.format() {
        FormatKind::Cube => {
            if !query.groupby.is_empty() {
                return Err(JxError::Query(
                    "groupby queries produce table or list output, not cube".to_string(),
                ));
            }
            format_cube(
                &compiled.decoders,
                &compiled.selects,
                root,
                compiled.columns_total,
            )
        }
        FormatKind::Table => format_table(
            &compiled.decoders,
            &compiled.selects,
            root,
            compiled.columns_total,
            dense,
            limit,
        ),
        FormatKind::List => format_list(
            &compiled.decoders,
            &compiled.selects,
            root,
            compiled.columns_total,
            dense,
            limit,
        ),
    }
}
