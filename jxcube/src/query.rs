use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::Domain;

/// One jx query as received on the wire.
///
/// Exactly one of `edges` / `groupby` may be non-empty; when both are empty
/// the query is a plain aggregate producing a single row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub from: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub edges: Vec<Edge>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub groupby: Vec<Edge>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub select: Vec<Select>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatKind>,
}

impl Query {
    /// The edge list in effect: `edges` for cube-shaped queries, `groupby`
    /// for direct table/list queries.
    pub fn dimensions(&self) -> &[Edge] {
        if self.edges.is_empty() {
            &self.groupby
        } else {
            &self.edges
        }
    }

    /// Requested output shape, defaulting to cube for edge queries and
    /// table for groupby queries.
    pub fn format(&self) -> FormatKind {
        match self.format {
            Some(f) => f,
            None if !self.groupby.is_empty() => FormatKind::Table,
            None => FormatKind::Cube,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Cube,
    Table,
    List,
}

/// One dimension of the result: a name, an optional jx value expression,
/// and the domain of values it can take.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub name: String,
    pub value: Option<Value>,
    pub domain: Domain,
    pub allow_nulls: bool,
}

impl<'de> Deserialize<'de> for Edge {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            // A bare string is shorthand for grouping on that field.
            Value::String(s) => Ok(Edge {
                name: s.clone(),
                value: Some(Value::String(s)),
                domain: Domain::default(),
                allow_nulls: false,
            }),
            other => {
                #[derive(Deserialize)]
                struct Full {
                    name: Option<String>,
                    value: Option<Value>,
                    #[serde(default)]
                    domain: Domain,
                    #[serde(default, alias = "allowNulls")]
                    allow_nulls: bool,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                let name = match (&full.name, &full.value) {
                    (Some(n), _) => n.clone(),
                    (None, Some(Value::String(s))) => s.clone(),
                    _ => return Err(de::Error::custom("edge requires a name")),
                };
                Ok(Edge {
                    name,
                    value: full.value,
                    domain: full.domain,
                    allow_nulls: full.allow_nulls,
                })
            }
        }
    }
}

/// One metric column: a name, an optional jx value expression, and the
/// reduction applied per cell. `pull` locations are assigned separately by
/// the request builder, so the query value itself stays immutable.
#[derive(Debug, Clone, Serialize)]
pub struct Select {
    pub name: String,
    pub value: Option<Value>,
    pub aggregate: Aggregate,
    pub default: Option<Value>,
}

impl<'de> Deserialize<'de> for Select {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            // "count" is the record count; any other bare string pulls that
            // field with no aggregate.
            Value::String(s) if s == "count" => Ok(Select {
                name: s,
                value: None,
                aggregate: Aggregate::Count,
                default: None,
            }),
            Value::String(s) => Ok(Select {
                name: s.clone(),
                value: Some(Value::String(s)),
                aggregate: Aggregate::None,
                default: None,
            }),
            other => {
                #[derive(Deserialize)]
                struct Full {
                    name: Option<String>,
                    value: Option<Value>,
                    aggregate: Option<Aggregate>,
                    default: Option<Value>,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                let aggregate = match full.aggregate {
                    Some(a) => a,
                    None if full.value.is_none() => Aggregate::Count,
                    None => Aggregate::None,
                };
                let name = match (&full.name, &full.value) {
                    (Some(n), _) => n.clone(),
                    (None, Some(Value::String(s))) => s.clone(),
                    (None, _) => aggregate.as_str().to_string(),
                };
                Ok(Select {
                    name,
                    value: full.value,
                    aggregate,
                    default: full.default,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    None,
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Cardinality,
    And,
    Or,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::None => "none",
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Avg => "avg",
            Aggregate::Cardinality => "cardinality",
            Aggregate::And => "and",
            Aggregate::Or => "or",
        }
    }
}

/// Accept a single element where the wire format allows omitting the list.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| T::deserialize(item).map_err(de::Error::custom))
            .collect(),
        other => Ok(vec![T::deserialize(other).map_err(de::Error::custom)?]),
    }
}
