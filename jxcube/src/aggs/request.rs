//! Composition of one ES aggregation request from a query: metric
//! aggregations for the selects at the leaf, one bucket layer per edge
//! around them, then `_filter` and `_nested` wrappers around the whole
//! tree.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::dialect::{AggTarget, EsDialect, MetricKind};
use crate::error::{JxError, Result};
use crate::expr;
use crate::metadata::Column;
use crate::query::{Aggregate, Query, Select};

use super::decoder::{make_decoder, resolve_target, DecoderContext, EdgeDecoder};

/// Where a select's value lives in a decoded leaf node, assigned at build
/// time and consumed by the formatters.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    /// The bucket's own document count.
    DocCount,
    /// `leaf[agg][key]`, null when the bucket held no values.
    Metric { agg: String, key: String },
    /// Sum out of a stats aggregation; `count == 0` distinguishes the sum
    /// of nothing from a true zero.
    StatsSum { agg: String },
    /// A 0/1 metric coerced to a boolean.
    BoolMetric { agg: String, key: String },
}

#[derive(Debug, Clone)]
pub struct BoundSelect {
    pub select: Select,
    pub pull: Pull,
}

/// A compiled aggregation request plus everything needed to decode its
/// response. Owned exclusively by one request; the decoders carry the
/// mutable discovery state, never the query itself.
pub struct CompiledRequest {
    pub index: String,
    pub body: Value,
    pub decoders: Vec<Box<dyn EdgeDecoder>>,
    pub selects: Vec<BoundSelect>,
    pub columns_total: usize,
    pub row_limit: u64,
}

pub struct AggsBuilder<'a> {
    dialect: &'a dyn EsDialect,
    edge_limit: usize,
    row_limit: u64,
}

impl<'a> AggsBuilder<'a> {
    pub fn new(dialect: &'a dyn EsDialect) -> Self {
        let defaults = crate::config::QueryConfig::default();
        Self {
            dialect,
            edge_limit: defaults.default_edge_limit,
            row_limit: defaults.default_row_limit,
        }
    }

    pub fn with_config(mut self, config: &crate::config::QueryConfig) -> Self {
        self.edge_limit = config.default_edge_limit;
        self.row_limit = config.default_row_limit;
        self
    }

    pub fn with_edge_limit(mut self, limit: usize) -> Self {
        self.edge_limit = limit;
        self
    }

    pub fn build(&self, query: &Query, columns: &[Column]) -> Result<CompiledRequest> {
        let ctx = DecoderContext {
            dialect: self.dialect,
            columns,
            default_limit: self.edge_limit,
        };

        let mut decoders: Vec<Box<dyn EdgeDecoder>> = Vec::new();
        let mut columns_total = 0;
        for edge in query.dimensions() {
            let decoder = make_decoder(edge, columns_total, &ctx)?;
            columns_total += decoder.num_columns();
            decoders.push(decoder);
        }

        let (leaf, selects) = self.plan_selects(&query.select, &ctx)?;

        // Edges wrap from the last (innermost) to the first (outermost), so
        // response nesting depth equals edge declaration order. The walker
        // depends on this.
        let mut aggs = leaf;
        for decoder in decoders.iter().rev() {
            aggs = decoder.append_query(aggs);
        }

        // A plain count with no edges has no bucket to read doc_count from,
        // so a match_all filter bucket stands in.
        let count_shim = decoders.is_empty()
            && selects.iter().any(|b| b.pull == Pull::DocCount);
        let filter_clause = match &query.filter {
            Some(f) if !expr::is_trivial_filter(Some(f)) => Some(expr::es_filter(f)?),
            _ if count_shim => Some(json!({"match_all": {}})),
            _ => None,
        };
        if let Some(clause) = filter_clause {
            let mut wrapped = Map::new();
            wrapped.insert(
                "_filter".to_string(),
                attach(json!({ "filter": clause }), aggs),
            );
            aggs = wrapped;
        }

        let (index, nested_path) = split_from(&query.from);
        if let Some(path) = nested_path {
            let mut wrapped = Map::new();
            wrapped.insert(
                "_nested".to_string(),
                attach(json!({"nested": {"path": path}}), aggs),
            );
            aggs = wrapped;
        }

        Ok(CompiledRequest {
            index: index.to_string(),
            body: json!({"aggs": aggs, "size": 0}),
            decoders,
            selects,
            columns_total,
            row_limit: self.row_limit,
        })
    }

    /// Metric aggregations for the selects, grouped so that several metrics
    /// over one target share a single stats aggregation. Sums always go
    /// through stats: the count field is what tells a sum-of-nothing apart
    /// from a real zero.
    fn plan_selects(
        &self,
        selects: &[Select],
        ctx: &DecoderContext<'_>,
    ) -> Result<(Map<String, Value>, Vec<BoundSelect>)> {
        let selects: Vec<Select> = if selects.is_empty() {
            vec![Select {
                name: "count".to_string(),
                value: None,
                aggregate: Aggregate::Count,
                default: None,
            }]
        } else {
            selects.to_vec()
        };

        // first pass: which targets need a combined stats aggregation
        let mut stats_demand: HashMap<AggTarget, (usize, bool)> = HashMap::new();
        for select in &selects {
            if let (Some(value), true) = (&select.value, is_stats_kind(select.aggregate)) {
                let (target, _) = resolve_target(value, ctx)?;
                let entry = stats_demand.entry(target).or_insert((0, false));
                entry.0 += 1;
                entry.1 |= select.aggregate == Aggregate::Sum;
            }
        }

        let mut aggs = Map::new();
        let mut names = NameAllocator::default();
        let mut stats_names: HashMap<AggTarget, String> = HashMap::new();
        let mut bound = Vec::with_capacity(selects.len());

        for select in selects {
            let pull = match (select.aggregate, &select.value) {
                (Aggregate::None, _) => {
                    return Err(JxError::Query(format!(
                        "select {} has no aggregation translation; use count, sum, min, \
                         max, avg or cardinality",
                        select.name
                    )))
                }
                (Aggregate::Count, None) => Pull::DocCount,
                (Aggregate::Count, Some(value)) => {
                    let (target, _) = resolve_target(value, ctx)?;
                    let agg = names.claim(&select.name);
                    aggs.insert(
                        agg.clone(),
                        self.dialect.metric(MetricKind::ValueCount, &target),
                    );
                    Pull::Metric {
                        agg,
                        key: "value".to_string(),
                    }
                }
                (Aggregate::Cardinality, Some(value)) => {
                    let (target, _) = resolve_target(value, ctx)?;
                    let agg = names.claim(&select.name);
                    aggs.insert(
                        agg.clone(),
                        self.dialect.metric(MetricKind::Cardinality, &target),
                    );
                    Pull::Metric {
                        agg,
                        key: "value".to_string(),
                    }
                }
                (Aggregate::And, Some(value)) | (Aggregate::Or, Some(value)) => {
                    let script = expr::es_script(value)?;
                    let target = AggTarget::Script(script);
                    let kind = if select.aggregate == Aggregate::And {
                        MetricKind::Min
                    } else {
                        MetricKind::Max
                    };
                    let agg = names.claim(&select.name);
                    aggs.insert(agg.clone(), self.dialect.metric(kind, &target));
                    Pull::BoolMetric {
                        agg,
                        key: "value".to_string(),
                    }
                }
                (
                    agg_kind @ (Aggregate::Sum | Aggregate::Min | Aggregate::Max | Aggregate::Avg),
                    Some(value),
                ) => {
                    let (target, _) = resolve_target(value, ctx)?;
                    let (uses, has_sum) = stats_demand[&target];
                    if uses > 1 || has_sum {
                        let agg = stats_names
                            .entry(target.clone())
                            .or_insert_with(|| {
                                let name = names.claim(&format!("{}_stats", target_label(&target)));
                                aggs.insert(
                                    name.clone(),
                                    self.dialect.metric(MetricKind::Stats, &target),
                                );
                                name
                            })
                            .clone();
                        match agg_kind {
                            Aggregate::Sum => Pull::StatsSum { agg },
                            _ => Pull::Metric {
                                agg,
                                key: agg_kind.as_str().to_string(),
                            },
                        }
                    } else {
                        let kind = match agg_kind {
                            Aggregate::Min => MetricKind::Min,
                            Aggregate::Max => MetricKind::Max,
                            _ => MetricKind::Avg,
                        };
                        let agg = names.claim(&select.name);
                        aggs.insert(agg.clone(), self.dialect.metric(kind, &target));
                        Pull::Metric {
                            agg,
                            key: "value".to_string(),
                        }
                    }
                }
                (agg_kind, None) => {
                    return Err(JxError::Query(format!(
                        "select {} uses aggregate {} but has no value",
                        select.name,
                        agg_kind.as_str()
                    )))
                }
            };
            bound.push(BoundSelect { select, pull });
        }
        Ok((aggs, bound))
    }
}

fn is_stats_kind(agg: Aggregate) -> bool {
    matches!(
        agg,
        Aggregate::Sum | Aggregate::Min | Aggregate::Max | Aggregate::Avg
    )
}

fn attach(mut clause: Value, children: Map<String, Value>) -> Value {
    if !children.is_empty() {
        clause["aggs"] = Value::Object(children);
    }
    clause
}

/// `task.action.timings` addresses the `timings` nested documents of the
/// `task` index; everything after the first segment is the nested path.
pub fn split_from(from: &str) -> (&str, Option<&str>) {
    match from.split_once('.') {
        Some((index, path)) if !path.is_empty() => (index, Some(path)),
        _ => (from, None),
    }
}

fn target_label(target: &AggTarget) -> String {
    match target {
        AggTarget::Field(f) => f.clone(),
        AggTarget::Script(_) => "script".to_string(),
    }
}

/// Aggregation names must be unique within the request; ES also rejects
/// some punctuation, so everything odd folds to underscores.
#[derive(Default)]
struct NameAllocator {
    taken: HashMap<String, usize>,
}

impl NameAllocator {
    fn claim(&mut self, wanted: &str) -> String {
        let base: String = wanted
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let n = self.taken.entry(base.clone()).or_insert(0);
        *n += 1;
        if *n == 1 {
            base
        } else {
            format!("{base}_{n}")
        }
    }
}
