//! Second decode pass: turn walked rows into cube, table, or list output.
//!
//! Edge-mode output is dense: one N-dimensional array per select, sized
//! from the frozen domains, with unvisited cells left at the aggregate's
//! missing-cell value. Groupby-mode output is sparse: one record per walked
//! row, in walk order, with no completeness guarantee.

use serde_json::{json, Map, Value};

use crate::error::{JxError, Result};
use crate::matrix::Matrix;
use crate::query::Aggregate;

use super::decoder::EdgeDecoder;
use super::request::{BoundSelect, Pull};
use super::walker::{walk, Row};

/// Extract one select's value from a leaf aggregation node.
pub fn pull_value(pull: &Pull, leaf: &Value, default: Option<&Value>) -> Value {
    let fallback = || default.cloned().unwrap_or(Value::Null);
    match pull {
        Pull::DocCount => leaf.get("doc_count").cloned().unwrap_or_else(|| json!(0)),
        Pull::Metric { agg, key } => {
            let v = leaf
                .get(agg)
                .and_then(|a| a.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            if v.is_null() {
                fallback()
            } else {
                normalize_number(v)
            }
        }
        Pull::StatsSum { agg } => {
            let stats = leaf.get(agg);
            let count = stats
                .and_then(|s| s.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            // a sum over zero values is "no data", not zero
            if count == 0 {
                fallback()
            } else {
                stats
                    .and_then(|s| s.get("sum"))
                    .cloned()
                    .map(normalize_number)
                    .unwrap_or_else(fallback)
            }
        }
        Pull::BoolMetric { agg, key } => {
            match leaf.get(agg).and_then(|a| a.get(key)).and_then(Value::as_f64) {
                Some(x) => Value::Bool(x != 0.0),
                None => fallback(),
            }
        }
    }
}

/// Value of a cube cell no row ever touched.
fn missing_cell(bound: &BoundSelect) -> Value {
    if bound.select.aggregate == Aggregate::Count {
        json!(0)
    } else {
        bound.select.default.clone().unwrap_or(Value::Null)
    }
}

/// ES reports many integral metrics as floats; fold them back.
fn normalize_number(v: Value) -> Value {
    if let Value::Number(n) = &v {
        if let Some(f) = n.as_f64() {
            if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                return json!(f as i64);
            }
        }
    }
    v
}

fn coordinate(
    decoders: &[Box<dyn EdgeDecoder>],
    row: &Row<'_>,
) -> Result<Option<Vec<usize>>> {
    let mut coord = Vec::with_capacity(decoders.len());
    for decoder in decoders {
        match decoder.get_index(row)? {
            Some(i) => coord.push(i),
            None => return Ok(None),
        }
    }
    Ok(Some(coord))
}

/// Walk the response and write every row's metrics into per-select
/// matrices sized from the frozen domains.
fn fill_matrices(
    decoders: &[Box<dyn EdgeDecoder>],
    selects: &[BoundSelect],
    root: &Value,
    columns_total: usize,
) -> Result<(Vec<usize>, Vec<Matrix>)> {
    let dims: Vec<usize> = decoders.iter().map(|d| d.cardinality()).collect();
    let mut matrices: Vec<Matrix> = selects
        .iter()
        .map(|s| Matrix::new(dims.clone(), missing_cell(s)))
        .collect();

    for (row, leaf) in walk(root, columns_total)? {
        let coord = match coordinate(decoders, &row)? {
            Some(c) => c,
            None => continue,
        };
        for (bound, matrix) in selects.iter().zip(matrices.iter_mut()) {
            let value = pull_value(&bound.pull, leaf, bound.select.default.as_ref());
            if !matrix.set(&coord, value) {
                return Err(JxError::Decode(format!(
                    "coordinate {coord:?} out of range for edge sizes {dims:?}"
                )));
            }
        }
    }
    Ok((dims, matrices))
}

pub fn format_cube(
    decoders: &[Box<dyn EdgeDecoder>],
    selects: &[BoundSelect],
    root: &Value,
    columns_total: usize,
) -> Result<Value> {
    let (_dims, matrices) = fill_matrices(decoders, selects, root, columns_total)?;
    let mut data = Map::new();
    for (bound, matrix) in selects.iter().zip(matrices) {
        data.insert(bound.select.name.clone(), matrix.into_json());
    }
    let edges: Vec<Value> = decoders.iter().map(|d| d.edge_descriptor()).collect();
    Ok(json!({
        "meta": {"format": "cube"},
        "edges": edges,
        "data": data
    }))
}

pub fn format_table(
    decoders: &[Box<dyn EdgeDecoder>],
    selects: &[BoundSelect],
    root: &Value,
    columns_total: usize,
    dense: bool,
    limit: Option<u64>,
) -> Result<Value> {
    let mut header: Vec<String> = decoders.iter().map(|d| d.name().to_string()).collect();
    header.extend(selects.iter().map(|b| b.select.name.clone()));

    let mut rows = if dense {
        dense_rows(decoders, selects, root, columns_total)?
    } else {
        sparse_rows(decoders, selects, root, columns_total)?
    };
    if let Some(limit) = limit {
        rows.truncate(limit as usize);
    }
    Ok(json!({
        "meta": {"format": "table"},
        "header": header,
        "data": rows
    }))
}

pub fn format_list(
    decoders: &[Box<dyn EdgeDecoder>],
    selects: &[BoundSelect],
    root: &Value,
    columns_total: usize,
    dense: bool,
    limit: Option<u64>,
) -> Result<Value> {
    let table = format_table(decoders, selects, root, columns_total, dense, limit)?;
    let header: Vec<String> = table["header"]
        .as_array()
        .unwrap_or(&Vec::new())
        .iter()
        .filter_map(|h| h.as_str().map(String::from))
        .collect();
    let records: Vec<Value> = table["data"]
        .as_array()
        .unwrap_or(&Vec::new())
        .iter()
        .map(|row| {
            let mut obj = Map::new();
            if let Some(cells) = row.as_array() {
                for (name, cell) in header.iter().zip(cells) {
                    obj.insert(name.clone(), cell.clone());
                }
            }
            Value::Object(obj)
        })
        .collect();
    Ok(json!({
        "meta": {"format": "list"},
        "data": records
    }))
}

/// Every coordinate of the cube becomes one row, in row-major order.
fn dense_rows(
    decoders: &[Box<dyn EdgeDecoder>],
    selects: &[BoundSelect],
    root: &Value,
    columns_total: usize,
) -> Result<Vec<Value>> {
    let (dims, matrices) = fill_matrices(decoders, selects, root, columns_total)?;
    let total: usize = dims.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut coord = vec![0usize; dims.len()];
    for _ in 0..total {
        let mut cells: Vec<Value> = decoders
            .iter()
            .zip(&coord)
            .map(|(d, &i)| d.partition_value(i))
            .collect();
        for matrix in &matrices {
            cells.push(matrix.get(&coord).cloned().unwrap_or(Value::Null));
        }
        out.push(Value::Array(cells));
        for axis in (0..dims.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < dims[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    Ok(out)
}

/// One row per walked response row, dropped rows excluded, walk order kept.
fn sparse_rows(
    decoders: &[Box<dyn EdgeDecoder>],
    selects: &[BoundSelect],
    root: &Value,
    columns_total: usize,
) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for (row, leaf) in walk(root, columns_total)? {
        let coord = match coordinate(decoders, &row)? {
            Some(c) => c,
            None => continue,
        };
        let mut cells: Vec<Value> = decoders
            .iter()
            .zip(&coord)
            .map(|(d, &i)| d.partition_value(i))
            .collect();
        for bound in selects {
            cells.push(pull_value(&bound.pull, leaf, bound.select.default.as_ref()));
        }
        out.push(Value::Array(cells));
    }
    Ok(out)
}
