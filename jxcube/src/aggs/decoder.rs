//! Per-edge decoders: each one knows how to extend the aggregation request
//! with its bucket clauses and how to map a response bucket path back to a
//! partition index.
//!
//! The variant is chosen by [`make_decoder`] from the edge's domain and the
//! shape of its value expression. Domains that are unknown until query time
//! (`Default`, `DimensionFields`) participate in the two-pass protocol:
//! `count` observes values during the first response pass, `finalize_domain`
//! freezes them, and only then is `get_index` well-defined.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Map, Value};

use crate::dialect::{AggTarget, EsDialect};
use crate::domain::{Domain, Interval, ValueKey};
use crate::error::{JxError, Result};
use crate::expr;
use crate::metadata::{column_or_default, Column};
use crate::query::Edge;

use super::walker::{Row, RowSlot};

pub trait EdgeDecoder: Send {
    fn name(&self) -> &str;

    /// First row column owned by this decoder.
    fn start_column(&self) -> usize;

    fn num_columns(&self) -> usize {
        1
    }

    /// Whether the domain must be discovered from the response before
    /// `get_index` can be called.
    fn needs_resolution(&self) -> bool {
        false
    }

    /// Wrap the child aggregations with this edge's bucket clauses.
    fn append_query(&self, children: Map<String, Value>) -> Map<String, Value>;

    /// Observe one row during the discovery pass.
    fn count(&mut self, _row: &Row<'_>) {}

    /// Freeze discovered partitions; idempotent over the same response.
    fn finalize_domain(&mut self) {}

    /// Partition index for this row; `None` drops the row.
    fn get_index(&self, row: &Row<'_>) -> Result<Option<usize>>;

    /// Cells along this edge: partitions plus the trailing null slot.
    fn cardinality(&self) -> usize;

    /// Displayed value for a partition index; the null slot renders as null.
    fn partition_value(&self, index: usize) -> Value;

    fn allow_nulls(&self) -> bool;

    /// Edge descriptor with the resolved domain, for cube output.
    fn edge_descriptor(&self) -> Value;
}

pub struct DecoderContext<'a> {
    pub dialect: &'a dyn EsDialect,
    pub columns: &'a [Column],
    pub default_limit: usize,
}

/// Choose the decoder variant for an edge. Unusable configurations (a set
/// domain with no known partitions, a range edge without a stored field, a
/// tuple edge whose members are not field names) are query errors: the
/// request cannot be built.
pub fn make_decoder(
    edge: &Edge,
    start: usize,
    ctx: &DecoderContext<'_>,
) -> Result<Box<dyn EdgeDecoder>> {
    match &edge.domain {
        Domain::Set { partitions } => {
            let partitions = if partitions.is_empty() {
                seed_partitions(edge, ctx)?
            } else {
                partitions.clone()
            };
            Ok(Box::new(SetDecoder::new(edge, start, partitions, ctx)?))
        }
        Domain::Range { partitions } => {
            RangeDecoder::new(edge, start, "range", partitions.clone(), ctx).map(boxed)
        }
        Domain::Time { partitions } => {
            RangeDecoder::new(edge, start, "time", partitions.clone(), ctx).map(boxed)
        }
        Domain::Duration { partitions } => {
            RangeDecoder::new(edge, start, "duration", partitions.clone(), ctx).map(boxed)
        }
        Domain::Default { limit, .. } => match &edge.value {
            Some(Value::Array(_)) | Some(Value::Object(_))
                if tuple_fields(edge).is_some() =>
            {
                TupleDecoder::new(edge, start, ctx).map(boxed)
            }
            _ => DefaultDecoder::new(edge, start, *limit, ctx).map(boxed),
        },
        Domain::DimensionFields { .. } => TupleDecoder::new(edge, start, ctx).map(boxed),
    }
}

fn boxed<D: EdgeDecoder + 'static>(d: D) -> Box<dyn EdgeDecoder> {
    Box::new(d)
}

fn seed_partitions(edge: &Edge, ctx: &DecoderContext<'_>) -> Result<Vec<Value>> {
    if let Some(field) = edge.value.as_ref().and_then(expr::as_variable) {
        if let Some(col) = ctx.columns.iter().find(|c| c.name == field) {
            if let Some(parts) = &col.partitions {
                return Ok(parts.clone());
            }
        }
    }
    Err(JxError::Query(format!(
        "set domain on edge {} has no partitions and none are known for its column",
        edge.name
    )))
}

/// Resolve an edge or select value to what the aggregation measures.
/// Returns the target plus the stored field name when there is one (the
/// missing bucket needs a field; scripts have none).
pub fn resolve_target(
    value: &Value,
    ctx: &DecoderContext<'_>,
) -> Result<(AggTarget, Option<String>)> {
    if let Some(field) = expr::as_variable(value) {
        let col = column_or_default(ctx.columns, field);
        return Ok((AggTarget::Field(col.es_column.clone()), Some(col.es_column)));
    }
    Ok((AggTarget::Script(expr::es_script(value)?), None))
}

fn edge_target(edge: &Edge, ctx: &DecoderContext<'_>) -> Result<(AggTarget, Option<String>)> {
    let value = edge.value.as_ref().ok_or_else(|| {
        JxError::Query(format!("edge {} requires a value expression", edge.name))
    })?;
    resolve_target(value, ctx)
}

fn with_children(mut clause: Value, children: &Map<String, Value>) -> Value {
    if !children.is_empty() {
        clause["aggs"] = Value::Object(children.clone());
    }
    clause
}

fn bucket_key(bucket: &Value) -> Value {
    bucket.get("key").cloned().unwrap_or(Value::Null)
}

/// Canonical lookup key for a bucket or partition value. Booleans fold onto
/// 0/1 because terms buckets over boolean fields key that way.
fn canon_key(v: &Value) -> String {
    match v {
        Value::Null => "\u{0}null".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn slot_error(name: &str, start: usize) -> JxError {
    JxError::Decode(format!(
        "row has no slot at column {start} for edge {name}"
    ))
}

// ---------------------------------------------------------------------------
// Set: enumerable domain known at query construction.

pub struct SetDecoder {
    name: String,
    start: usize,
    partitions: Vec<Value>,
    index_by_key: HashMap<String, usize>,
    allow_nulls: bool,
    match_clause: Value,
    missing_clause: Option<Value>,
}

impl SetDecoder {
    fn new(
        edge: &Edge,
        start: usize,
        partitions: Vec<Value>,
        ctx: &DecoderContext<'_>,
    ) -> Result<Self> {
        let (target, field) = edge_target(edge, ctx)?;
        let include: Option<Vec<Value>> = partitions
            .iter()
            .all(|p| p.is_string())
            .then(|| partitions.clone());
        let match_clause = ctx
            .dialect
            .terms(&target, partitions.len().max(1), include.as_deref());
        let missing_clause = match (&field, edge.allow_nulls) {
            (Some(f), true) => Some(ctx.dialect.missing(f)),
            _ => None,
        };
        let index_by_key = partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (canon_key(p), i))
            .collect();
        Ok(Self {
            name: edge.name.clone(),
            start,
            partitions,
            index_by_key,
            allow_nulls: edge.allow_nulls,
            match_clause,
            missing_clause,
        })
    }
}

impl EdgeDecoder for SetDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_column(&self) -> usize {
        self.start
    }

    fn append_query(&self, children: Map<String, Value>) -> Map<String, Value> {
        let mut level = Map::new();
        level.insert(
            "_match".to_string(),
            with_children(self.match_clause.clone(), &children),
        );
        if let Some(missing) = &self.missing_clause {
            level.insert(
                "_missing".to_string(),
                with_children(missing.clone(), &children),
            );
        }
        level
    }

    fn get_index(&self, row: &Row<'_>) -> Result<Option<usize>> {
        match row.get(self.start) {
            Some(RowSlot::Bucket(b)) => {
                // keys outside the configured set are not part of this cube
                Ok(self.index_by_key.get(&canon_key(&bucket_key(b))).copied())
            }
            Some(RowSlot::Missing) => Ok(self.allow_nulls.then_some(self.partitions.len())),
            Some(RowSlot::Overflow(_)) => Ok(None),
            None => Err(slot_error(&self.name, self.start)),
        }
    }

    fn cardinality(&self) -> usize {
        self.partitions.len() + usize::from(self.allow_nulls)
    }

    fn partition_value(&self, index: usize) -> Value {
        self.partitions.get(index).cloned().unwrap_or(Value::Null)
    }

    fn allow_nulls(&self) -> bool {
        self.allow_nulls
    }

    fn edge_descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "allowNulls": self.allow_nulls,
            "domain": {"type": "set", "partitions": self.partitions}
        })
    }
}

// ---------------------------------------------------------------------------
// Default: open domain, discovered from the response (two-pass).

pub struct DefaultDecoder {
    name: String,
    start: usize,
    allow_nulls: bool,
    observed: BTreeSet<ValueKey>,
    saw_null: bool,
    partitions: Vec<Value>,
    index_by_key: HashMap<String, usize>,
    frozen: bool,
    match_clause: Value,
    missing_clause: Option<Value>,
}

impl DefaultDecoder {
    fn new(
        edge: &Edge,
        start: usize,
        limit: Option<usize>,
        ctx: &DecoderContext<'_>,
    ) -> Result<Self> {
        let (target, field) = edge_target(edge, ctx)?;
        let limit = limit.unwrap_or(ctx.default_limit);
        let match_clause = ctx.dialect.terms(&target, limit, None);
        // the missing bucket is always requested so nulls can be discovered
        let missing_clause = field.as_deref().map(|f| ctx.dialect.missing(f));
        Ok(Self {
            name: edge.name.clone(),
            start,
            allow_nulls: edge.allow_nulls,
            observed: BTreeSet::new(),
            saw_null: false,
            partitions: Vec::new(),
            index_by_key: HashMap::new(),
            frozen: false,
            match_clause,
            missing_clause,
        })
    }
}

impl EdgeDecoder for DefaultDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_column(&self) -> usize {
        self.start
    }

    fn needs_resolution(&self) -> bool {
        true
    }

    fn append_query(&self, children: Map<String, Value>) -> Map<String, Value> {
        let mut level = Map::new();
        level.insert(
            "_match".to_string(),
            with_children(self.match_clause.clone(), &children),
        );
        if let Some(missing) = &self.missing_clause {
            level.insert(
                "_missing".to_string(),
                with_children(missing.clone(), &children),
            );
        }
        level
    }

    fn count(&mut self, row: &Row<'_>) {
        match row.get(self.start) {
            Some(RowSlot::Bucket(b)) => {
                self.observed.insert(ValueKey(bucket_key(b)));
            }
            Some(RowSlot::Missing) => self.saw_null = true,
            _ => {}
        }
    }

    fn finalize_domain(&mut self) {
        self.partitions = self.observed.iter().map(|k| k.0.clone()).collect();
        self.index_by_key = self
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (canon_key(p), i))
            .collect();
        if self.saw_null {
            self.allow_nulls = true;
        }
        self.frozen = true;
    }

    fn get_index(&self, row: &Row<'_>) -> Result<Option<usize>> {
        if !self.frozen {
            return Err(JxError::Decode(format!(
                "edge {} used before its domain was resolved",
                self.name
            )));
        }
        match row.get(self.start) {
            Some(RowSlot::Bucket(b)) => {
                let key = bucket_key(b);
                match self.index_by_key.get(&canon_key(&key)) {
                    Some(i) => Ok(Some(*i)),
                    // every key was observed during discovery; a miss here is
                    // a bookkeeping bug, not a data condition
                    None => Err(JxError::Decode(format!(
                        "edge {}: bucket key {key} missing from resolved domain",
                        self.name
                    ))),
                }
            }
            Some(RowSlot::Missing) => Ok(self.allow_nulls.then_some(self.partitions.len())),
            Some(RowSlot::Overflow(_)) => Ok(None),
            None => Err(slot_error(&self.name, self.start)),
        }
    }

    fn cardinality(&self) -> usize {
        self.partitions.len() + usize::from(self.allow_nulls)
    }

    fn partition_value(&self, index: usize) -> Value {
        self.partitions.get(index).cloned().unwrap_or(Value::Null)
    }

    fn allow_nulls(&self) -> bool {
        self.allow_nulls
    }

    fn edge_descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "allowNulls": self.allow_nulls,
            "domain": {"type": "set", "partitions": self.partitions}
        })
    }
}

// ---------------------------------------------------------------------------
// Range / time / duration: explicit interval partitions.

pub struct RangeDecoder {
    name: String,
    start: usize,
    kind: &'static str,
    partitions: Vec<Interval>,
    allow_nulls: bool,
    match_clause: Value,
    missing_clause: Option<Value>,
}

impl RangeDecoder {
    fn new(
        edge: &Edge,
        start: usize,
        kind: &'static str,
        partitions: Vec<Interval>,
        ctx: &DecoderContext<'_>,
    ) -> Result<Self> {
        if partitions.is_empty() {
            return Err(JxError::Query(format!(
                "{kind} domain on edge {} has no partitions",
                edge.name
            )));
        }
        let (target, field) = edge_target(edge, ctx)?;
        let field = match (target, field) {
            (AggTarget::Field(_), Some(f)) => f,
            _ => {
                return Err(JxError::Query(format!(
                    "{kind} domain on edge {} requires a stored field",
                    edge.name
                )))
            }
        };
        let match_clause = ctx.dialect.range(&field, &partitions);
        let missing_clause = edge.allow_nulls.then(|| {
            // null OR below every partition OR at/above the top: the exact
            // complement of "falls in some partition"
            let low = partitions.iter().map(|p| p.min).fold(f64::INFINITY, f64::min);
            let high = partitions
                .iter()
                .map(|p| p.max)
                .fold(f64::NEG_INFINITY, f64::max);
            let clause = ctx.dialect.any_of(vec![
                ctx.dialect.not_exists(&field),
                json!({"range": {field.as_str(): {"lt": low}}}),
                json!({"range": {field.as_str(): {"gte": high}}}),
            ]);
            json!({ "filter": clause })
        });
        Ok(Self {
            name: edge.name.clone(),
            start,
            kind,
            partitions,
            allow_nulls: edge.allow_nulls,
            match_clause,
            missing_clause,
        })
    }
}

impl EdgeDecoder for RangeDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_column(&self) -> usize {
        self.start
    }

    fn append_query(&self, children: Map<String, Value>) -> Map<String, Value> {
        let mut level = Map::new();
        level.insert(
            "_match".to_string(),
            with_children(self.match_clause.clone(), &children),
        );
        if let Some(missing) = &self.missing_clause {
            level.insert(
                "_missing".to_string(),
                with_children(missing.clone(), &children),
            );
        }
        level
    }

    fn get_index(&self, row: &Row<'_>) -> Result<Option<usize>> {
        match row.get(self.start) {
            Some(RowSlot::Bucket(b)) => {
                let from = b
                    .get("from")
                    .and_then(Value::as_f64)
                    .or_else(|| b.get("key").and_then(Value::as_f64));
                let from = from.ok_or_else(|| {
                    JxError::Decode(format!(
                        "edge {}: range bucket has no boundary: {b}",
                        self.name
                    ))
                })?;
                match self.partitions.iter().position(|p| p.min == from) {
                    Some(i) => Ok(Some(i)),
                    None => Err(JxError::Decode(format!(
                        "edge {}: range bucket from={from} matches no partition",
                        self.name
                    ))),
                }
            }
            Some(RowSlot::Missing) => Ok(self.allow_nulls.then_some(self.partitions.len())),
            Some(RowSlot::Overflow(_)) => Ok(None),
            None => Err(slot_error(&self.name, self.start)),
        }
    }

    fn cardinality(&self) -> usize {
        self.partitions.len() + usize::from(self.allow_nulls)
    }

    fn partition_value(&self, index: usize) -> Value {
        match self.partitions.get(index) {
            Some(p) => json!({"min": p.min, "max": p.max}),
            None => Value::Null,
        }
    }

    fn allow_nulls(&self) -> bool {
        self.allow_nulls
    }

    fn edge_descriptor(&self) -> Value {
        let parts: Vec<Value> = self
            .partitions
            .iter()
            .map(|p| json!({"min": p.min, "max": p.max}))
            .collect();
        json!({
            "name": self.name,
            "allowNulls": self.allow_nulls,
            "domain": {"type": self.kind, "partitions": parts}
        })
    }
}

// ---------------------------------------------------------------------------
// Tuple edges: the value is a list or named set of fields; one nested terms
// level per field, partitions discovered as tuples.

fn tuple_fields(edge: &Edge) -> Option<Vec<(Option<String>, String)>> {
    match &edge.value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(|s| (None, s.to_string())))
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(label, v)| v.as_str().map(|s| (Some(label.clone()), s.to_string())))
            .collect(),
        _ => None,
    }
}

pub struct TupleDecoder {
    name: String,
    start: usize,
    labels: Option<Vec<String>>,
    levels: Vec<(Value, Value)>,
    allow_nulls: bool,
    observed: BTreeSet<ValueKey>,
    saw_null: bool,
    partitions: Vec<Value>,
    index_by_key: HashMap<String, usize>,
    frozen: bool,
}

impl TupleDecoder {
    fn new(edge: &Edge, start: usize, ctx: &DecoderContext<'_>) -> Result<Self> {
        let fields = tuple_fields(edge).ok_or_else(|| {
            JxError::Query(format!(
                "edge {} requires a list or object of field names",
                edge.name
            ))
        })?;
        if fields.is_empty() {
            return Err(JxError::Query(format!(
                "edge {} has an empty field tuple",
                edge.name
            )));
        }
        let labels = fields[0]
            .0
            .is_some()
            .then(|| fields.iter().map(|(l, _)| l.clone().unwrap()).collect());
        let levels = fields
            .iter()
            .map(|(_, name)| {
                let col = column_or_default(ctx.columns, name);
                let target = AggTarget::Field(col.es_column.clone());
                (
                    ctx.dialect.terms(&target, ctx.default_limit, None),
                    ctx.dialect.missing(&col.es_column),
                )
            })
            .collect();
        Ok(Self {
            name: edge.name.clone(),
            start,
            labels,
            levels,
            allow_nulls: edge.allow_nulls,
            observed: BTreeSet::new(),
            saw_null: false,
            partitions: Vec::new(),
            index_by_key: HashMap::new(),
            frozen: false,
        })
    }

    /// Bucket values at this decoder's columns; `None` when the row went
    /// through an overflow bucket.
    fn tuple_of(&self, row: &Row<'_>) -> Result<Option<Vec<Value>>> {
        let mut tuple = Vec::with_capacity(self.levels.len());
        for i in 0..self.levels.len() {
            match row.get(self.start + i) {
                Some(RowSlot::Bucket(b)) => tuple.push(bucket_key(b)),
                Some(RowSlot::Missing) => tuple.push(Value::Null),
                Some(RowSlot::Overflow(_)) => return Ok(None),
                None => return Err(slot_error(&self.name, self.start + i)),
            }
        }
        Ok(Some(tuple))
    }
}

impl EdgeDecoder for TupleDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_column(&self) -> usize {
        self.start
    }

    fn num_columns(&self) -> usize {
        self.levels.len()
    }

    fn needs_resolution(&self) -> bool {
        true
    }

    fn append_query(&self, children: Map<String, Value>) -> Map<String, Value> {
        let mut current = children;
        for (match_clause, missing_clause) in self.levels.iter().rev() {
            let mut level = Map::new();
            level.insert(
                "_match".to_string(),
                with_children(match_clause.clone(), &current),
            );
            level.insert(
                "_missing".to_string(),
                with_children(missing_clause.clone(), &current),
            );
            current = level;
        }
        current
    }

    fn count(&mut self, row: &Row<'_>) {
        match self.tuple_of(row) {
            Ok(Some(tuple)) => {
                if tuple.iter().all(Value::is_null) {
                    self.saw_null = true;
                } else {
                    self.observed.insert(ValueKey(Value::Array(tuple)));
                }
            }
            _ => {}
        }
    }

    fn finalize_domain(&mut self) {
        self.partitions = self.observed.iter().map(|k| k.0.clone()).collect();
        self.index_by_key = self
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (canon_key(p), i))
            .collect();
        if self.saw_null {
            self.allow_nulls = true;
        }
        self.frozen = true;
    }

    fn get_index(&self, row: &Row<'_>) -> Result<Option<usize>> {
        if !self.frozen {
            return Err(JxError::Decode(format!(
                "edge {} used before its domain was resolved",
                self.name
            )));
        }
        let tuple = match self.tuple_of(row)? {
            Some(t) => t,
            None => return Ok(None),
        };
        if tuple.iter().all(Value::is_null) {
            return Ok(self.allow_nulls.then_some(self.partitions.len()));
        }
        let key = canon_key(&Value::Array(tuple.clone()));
        match self.index_by_key.get(&key) {
            Some(i) => Ok(Some(*i)),
            None => Err(JxError::Decode(format!(
                "edge {}: tuple {} missing from resolved domain",
                self.name,
                Value::Array(tuple)
            ))),
        }
    }

    fn cardinality(&self) -> usize {
        self.partitions.len() + usize::from(self.allow_nulls)
    }

    fn partition_value(&self, index: usize) -> Value {
        let tuple = match self.partitions.get(index) {
            Some(Value::Array(items)) => items.clone(),
            _ => return Value::Null,
        };
        match &self.labels {
            Some(labels) => {
                let mut obj = Map::new();
                for (label, item) in labels.iter().zip(tuple) {
                    obj.insert(label.clone(), item);
                }
                Value::Object(obj)
            }
            None => Value::Array(tuple),
        }
    }

    fn allow_nulls(&self) -> bool {
        self.allow_nulls
    }

    fn edge_descriptor(&self) -> Value {
        let parts: Vec<Value> = (0..self.partitions.len())
            .map(|i| self.partition_value(i))
            .collect();
        json!({
            "name": self.name,
            "allowNulls": self.allow_nulls,
            "domain": {"type": "set", "partitions": parts}
        })
    }
}
