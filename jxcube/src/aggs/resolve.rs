//! First decode pass: populate domains that were unknown at query time.
//!
//! The discovery state lives on the per-request decoders, never on the
//! query, so resolving leaves the original query value reusable. Resolution
//! over the same buffered response is idempotent: observed values accumulate
//! into an ordered set and finalization rebuilds the partition list from it.

use serde_json::Value;

use crate::error::Result;

use super::decoder::EdgeDecoder;
use super::walker::walk;

/// Run the discovery pass when any decoder needs it. Afterwards every
/// decoder's `get_index` is well-defined and domains are frozen.
pub fn resolve_domains(
    decoders: &mut [Box<dyn EdgeDecoder>],
    root: &Value,
    columns_total: usize,
) -> Result<()> {
    if !decoders.iter().any(|d| d.needs_resolution()) {
        return Ok(());
    }

    let rows = walk(root, columns_total)?;
    for (row, _leaf) in &rows {
        for decoder in decoders.iter_mut() {
            if decoder.needs_resolution() {
                decoder.count(row);
            }
        }
    }
    for decoder in decoders.iter_mut() {
        if decoder.needs_resolution() {
            decoder.finalize_domain();
        }
    }

    tracing::debug!(
        rows = rows.len(),
        edges = decoders.len(),
        "resolved unknown domains"
    );
    Ok(())
}
