use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The possible values of one edge, and their index ordering.
///
/// `Default` and `DimensionFields` start with no partitions; they are
/// discovered from the response during the first decode pass. The other
/// variants are fixed when the query is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    Default {
        #[serde(default)]
        partitions: Vec<Value>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Set {
        #[serde(default)]
        partitions: Vec<Value>,
    },
    Range {
        partitions: Vec<Interval>,
    },
    Time {
        partitions: Vec<Interval>,
    },
    Duration {
        partitions: Vec<Interval>,
    },
    DimensionFields {
        #[serde(default)]
        partitions: Vec<Value>,
    },
}

impl Default for Domain {
    fn default() -> Self {
        Domain::Default {
            partitions: Vec::new(),
            limit: None,
        }
    }
}

impl Domain {
    /// Whether partitions are unknown until the response has been scanned.
    pub fn needs_resolution(&self) -> bool {
        matches!(self, Domain::Default { .. } | Domain::DimensionFields { .. })
    }
}

/// One `[min, max)` partition of a numeric, time, or duration domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub fn contains(&self, v: f64) -> bool {
        self.min <= v && v < self.max
    }
}

/// Total order over JSON values: null, then booleans, numbers, strings,
/// arrays, objects. Used to give discovered partitions a stable index.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = cmp_values(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A JSON value wrapper ordered by [`cmp_values`], so observed partition
/// values can live in a `BTreeSet` during domain discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueKey(pub Value);

impl Eq for ValueKey {}

impl PartialOrd for ValueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_values(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_order_is_total_and_stable() {
        let mut values = vec![
            json!("b"),
            json!(null),
            json!(2),
            json!("a"),
            json!(true),
            json!(1.5),
        ];
        values.sort_by(cmp_values);
        assert_eq!(
            values,
            vec![
                json!(null),
                json!(true),
                json!(1.5),
                json!(2),
                json!("a"),
                json!("b")
            ]
        );
    }

    #[test]
    fn interval_is_half_open() {
        let part = Interval { min: 0.0, max: 10.0 };
        assert!(part.contains(0.0));
        assert!(part.contains(9.999));
        assert!(!part.contains(10.0));
        assert!(!part.contains(-0.1));
    }

    #[test]
    fn domain_deserializes_from_tagged_json() {
        let d: Domain = serde_json::from_value(json!({
            "type": "set",
            "partitions": ["a", "b"]
        }))
        .unwrap();
        assert!(matches!(d, Domain::Set { ref partitions } if partitions.len() == 2));

        let d: Domain = serde_json::from_value(json!({"type": "default"})).unwrap();
        assert!(d.needs_resolution());
    }
}
