//! Translation of small jx expression fragments into ES filter clauses and
//! painless scripts.
//!
//! This is the seam to the full jx expression compiler, which is outside
//! this crate. Only the fragment forms the aggregation path needs are
//! handled; anything else is rejected with a query error naming the
//! operator, never guessed at.

use serde_json::{json, Map, Value};

use crate::error::{JxError, Result};

/// A bare string expression is a field reference.
pub fn as_variable(expr: &Value) -> Option<&str> {
    expr.as_str()
}

/// Filters that do not restrict the document set need no `_filter` wrapper.
pub fn is_trivial_filter(expr: Option<&Value>) -> bool {
    match expr {
        None | Some(Value::Null) | Some(Value::Bool(true)) => true,
        Some(Value::Object(map)) => map.is_empty() || map.contains_key("match_all"),
        _ => false,
    }
}

/// Compile a jx filter fragment to an ES query clause.
pub fn es_filter(expr: &Value) -> Result<Value> {
    match expr {
        Value::Bool(true) | Value::Null => Ok(json!({"match_all": {}})),
        Value::Bool(false) => Ok(json!({"bool": {"must_not": {"match_all": {}}}})),
        Value::Object(map) => {
            let (op, operand) = single_entry(map, "filter")?;
            match op {
                "match_all" => Ok(json!({"match_all": {}})),
                "and" => Ok(json!({"bool": {"must": compile_list(operand)?}})),
                "or" => Ok(json!({
                    "bool": {"should": compile_list(operand)?, "minimum_should_match": 1}
                })),
                "not" => Ok(json!({"bool": {"must_not": es_filter(operand)?}})),
                "eq" => {
                    let pairs = operand.as_object().ok_or_else(|| {
                        JxError::Query("eq filter expects {field: value}".to_string())
                    })?;
                    let terms: Vec<Value> = pairs
                        .iter()
                        .map(|(f, v)| json!({"term": {f.as_str(): v}}))
                        .collect();
                    Ok(combine_must(terms))
                }
                "ne" | "neq" => {
                    let inner = es_filter(&json!({ "eq": operand }))?;
                    Ok(json!({"bool": {"must_not": inner}}))
                }
                "in" => {
                    let pairs = operand.as_object().ok_or_else(|| {
                        JxError::Query("in filter expects {field: [values]}".to_string())
                    })?;
                    let terms: Vec<Value> = pairs
                        .iter()
                        .map(|(f, v)| json!({"terms": {f.as_str(): v}}))
                        .collect();
                    Ok(combine_must(terms))
                }
                "gt" | "gte" | "lt" | "lte" => {
                    let pairs = operand.as_object().ok_or_else(|| {
                        JxError::Query(format!("{op} filter expects {{field: value}}"))
                    })?;
                    let clauses: Vec<Value> = pairs
                        .iter()
                        .map(|(f, v)| json!({"range": {f.as_str(): {op: v}}}))
                        .collect();
                    Ok(combine_must(clauses))
                }
                "exists" => Ok(json!({"exists": {"field": field_operand(operand)?}})),
                "missing" => Ok(json!({
                    "bool": {"must_not": {"exists": {"field": field_operand(operand)?}}}
                })),
                "prefix" => {
                    let pairs = operand.as_object().ok_or_else(|| {
                        JxError::Query("prefix filter expects {field: value}".to_string())
                    })?;
                    let clauses: Vec<Value> = pairs
                        .iter()
                        .map(|(f, v)| json!({"prefix": {f.as_str(): v}}))
                        .collect();
                    Ok(combine_must(clauses))
                }
                other => Err(JxError::Query(format!(
                    "unsupported filter operator '{other}'"
                ))),
            }
        }
        other => Err(JxError::Query(format!(
            "cannot compile filter from {other}"
        ))),
    }
}

/// Compile a jx value fragment to a painless script. Missing fields
/// evaluate to null so metric aggregations skip them; comparisons treat a
/// missing field as not-equal and yield 0/1 for boolean reductions.
pub fn es_script(expr: &Value) -> Result<String> {
    match expr {
        Value::String(field) => Ok(format!(
            "doc[{f}].size() == 0 ? null : doc[{f}].value",
            f = quote(field)
        )),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Object(map) => {
            let (op, operand) = single_entry(map, "expression")?;
            match op {
                "literal" => Ok(script_literal(operand)),
                "eq" => {
                    let pairs = operand.as_object().ok_or_else(|| {
                        JxError::Query("eq expression expects {field: value}".to_string())
                    })?;
                    let clauses: Vec<String> = pairs
                        .iter()
                        .map(|(f, v)| {
                            format!(
                                "(doc[{f}].size() > 0 && doc[{f}].value == {lit})",
                                f = quote(f),
                                lit = script_literal(v)
                            )
                        })
                        .collect();
                    Ok(format!("({}) ? 1 : 0", clauses.join(" && ")))
                }
                "add" | "sub" | "mult" | "div" => {
                    let args = operand.as_array().ok_or_else(|| {
                        JxError::Query(format!("{op} expression expects a list"))
                    })?;
                    let symbol = match op {
                        "add" => "+",
                        "sub" => "-",
                        "mult" => "*",
                        _ => "/",
                    };
                    let rendered: Result<Vec<String>> = args.iter().map(es_script).collect();
                    Ok(format!("({})", rendered?.join(&format!(" {symbol} "))))
                }
                other => Err(JxError::Query(format!(
                    "unsupported value operator '{other}'"
                ))),
            }
        }
        other => Err(JxError::Query(format!(
            "cannot compile script from {other}"
        ))),
    }
}

fn single_entry<'a>(map: &'a Map<String, Value>, what: &str) -> Result<(&'a str, &'a Value)> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((k, v)), None) => Ok((k.as_str(), v)),
        _ => Err(JxError::Query(format!(
            "{what} must have exactly one operator, got {}",
            Value::Object(map.clone())
        ))),
    }
}

fn compile_list(operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| JxError::Query("and/or expects a list of filters".to_string()))?
        .iter()
        .map(es_filter)
        .collect()
}

fn combine_must(mut clauses: Vec<Value>) -> Value {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        json!({"bool": {"must": clauses}})
    }
}

fn field_operand(operand: &Value) -> Result<&str> {
    operand
        .as_str()
        .or_else(|| operand.get("field").and_then(Value::as_str))
        .ok_or_else(|| JxError::Query("exists/missing expects a field name".to_string()))
}

fn quote(field: &str) -> String {
    format!("'{}'", field.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn script_literal(v: &Value) -> String {
    match v {
        Value::String(s) => quote(s),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_filter_becomes_term() {
        let f = es_filter(&json!({"eq": {"a": 1}})).unwrap();
        assert_eq!(f, json!({"term": {"a": 1}}));
    }

    #[test]
    fn and_of_filters() {
        let f = es_filter(&json!({"and": [{"eq": {"a": 1}}, {"exists": "b"}]})).unwrap();
        assert_eq!(
            f,
            json!({"bool": {"must": [
                {"term": {"a": 1}},
                {"exists": {"field": "b"}}
            ]}})
        );
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = es_filter(&json!({"regexp_weird": {"a": "x"}})).unwrap_err();
        assert!(err.to_string().contains("regexp_weird"));
    }

    #[test]
    fn eq_script_guards_missing_fields() {
        let s = es_script(&json!({"eq": {"a": 1}})).unwrap();
        assert_eq!(s, "((doc['a'].size() > 0 && doc['a'].value == 1)) ? 1 : 0");
    }

    #[test]
    fn trivial_filters() {
        assert!(is_trivial_filter(None));
        assert!(is_trivial_filter(Some(&json!(true))));
        assert!(is_trivial_filter(Some(&json!({"match_all": {}}))));
        assert!(!is_trivial_filter(Some(&json!({"eq": {"a": 1}}))));
    }
}
