use serde_json::{json, Value};

use crate::domain::Interval;

/// What an aggregation measures: a stored field or a computed script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AggTarget {
    Field(String),
    Script(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Sum,
    Min,
    Max,
    Avg,
    Cardinality,
    ValueCount,
    Stats,
}

impl MetricKind {
    fn es_name(&self) -> &'static str {
        match self {
            MetricKind::Sum => "sum",
            MetricKind::Min => "min",
            MetricKind::Max => "max",
            MetricKind::Avg => "avg",
            MetricKind::Cardinality => "cardinality",
            MetricKind::ValueCount => "value_count",
            MetricKind::Stats => "stats",
        }
    }
}

/// Dialects render individual aggregation clauses for one ES version.
/// Request composition and response decoding live in `aggs`; the dialect
/// only maps logical constructs to wire fragments, so version differences
/// stay thin adapters instead of parallel decoder implementations.
pub trait EsDialect: Send + Sync {
    fn version(&self) -> &'static str;

    /// How a script is embedded in a clause body.
    fn script_clause(&self, script: &str) -> Value;

    /// A terms bucket over the target, optionally restricted to known keys.
    fn terms(&self, target: &AggTarget, size: usize, include: Option<&[Value]>) -> Value {
        let mut body = self.target_body(target);
        body["size"] = json!(size);
        if let Some(keys) = include {
            body["include"] = json!(keys);
        }
        json!({ "terms": body })
    }

    /// Explicit range buckets, one per partition, in partition order.
    fn range(&self, field: &str, partitions: &[Interval]) -> Value {
        let ranges: Vec<Value> = partitions
            .iter()
            .map(|p| json!({"from": p.min, "to": p.max}))
            .collect();
        json!({"range": {"field": field, "ranges": ranges}})
    }

    /// The bucket of documents with no value for the field.
    fn missing(&self, field: &str) -> Value {
        json!({"missing": {"field": field}})
    }

    fn metric(&self, kind: MetricKind, target: &AggTarget) -> Value {
        json!({ kind.es_name(): self.target_body(target) })
    }

    /// Disjunction of filter clauses.
    fn any_of(&self, clauses: Vec<Value>) -> Value {
        json!({"bool": {"should": clauses, "minimum_should_match": 1}})
    }

    /// Documents with no value for the field.
    fn not_exists(&self, field: &str) -> Value {
        json!({"bool": {"must_not": {"exists": {"field": field}}}})
    }

    fn target_body(&self, target: &AggTarget) -> Value {
        match target {
            AggTarget::Field(f) => json!({"field": f}),
            AggTarget::Script(s) => json!({"script": self.script_clause(s)}),
        }
    }
}

/// Modern clusters (5.x and later): painless scripts, native missing agg.
#[derive(Debug, Default, Clone, Copy)]
pub struct Es5Dialect;

impl EsDialect for Es5Dialect {
    fn version(&self) -> &'static str {
        "5.x"
    }

    fn script_clause(&self, script: &str) -> Value {
        json!({"source": script, "lang": "painless"})
    }
}

/// Legacy 1.x clusters: bare script strings, no missing aggregation (a
/// not-exists filter stands in), cardinality needs an explicit precision.
#[derive(Debug, Default, Clone, Copy)]
pub struct Es1Dialect;

impl EsDialect for Es1Dialect {
    fn version(&self) -> &'static str {
        "1.x"
    }

    fn script_clause(&self, script: &str) -> Value {
        Value::String(script.to_string())
    }

    fn terms(&self, target: &AggTarget, size: usize, _include: Option<&[Value]>) -> Value {
        // 1.x include is a regex, not a key list; request everything and let
        // the decoder drop unknown keys instead.
        let mut body = self.target_body(target);
        body["size"] = json!(size);
        json!({ "terms": body })
    }

    fn missing(&self, field: &str) -> Value {
        json!({"filter": {"not": {"exists": {"field": field}}}})
    }

    fn any_of(&self, clauses: Vec<Value>) -> Value {
        json!({ "or": clauses })
    }

    fn not_exists(&self, field: &str) -> Value {
        json!({"not": {"exists": {"field": field}}})
    }

    fn metric(&self, kind: MetricKind, target: &AggTarget) -> Value {
        let mut body = self.target_body(target);
        if kind == MetricKind::Cardinality {
            body["precision_threshold"] = json!(40000);
        }
        json!({ kind.es_name(): body })
    }
}
