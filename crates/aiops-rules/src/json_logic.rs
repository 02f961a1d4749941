//! A small JsonLogic-style predicate evaluator. Only the subset of
//! operators a remediation rule realistically needs is implemented; there
//! is no dependency on an external JsonLogic crate since none in the
//! corpus is actively maintained against current serde_json.

use serde_json::Value;

/// Evaluates a JsonLogic rule tree (`{"op": [args...]}` or a literal) against
/// a data object, coercing the result to a boolean the way JsonLogic does:
/// `false`, `null`, `0`, `""`, and empty arrays are falsy.
pub fn evaluate(rule: &Value, data: &Value) -> bool {
    truthy(&eval(rule, data))
}

fn eval(rule: &Value, data: &Value) -> Value {
    match rule {
        Value::Object(map) if map.len() == 1 => {
            let (op, args) = map.iter().next().unwrap();
            let args: Vec<Value> = match args {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            apply(op, &args, data)
        }
        other => other.clone(),
    }
}

fn apply(op: &str, args: &[Value], data: &Value) -> Value {
    match op {
        "var" => {
            let path = args.first().and_then(Value::as_str).unwrap_or("");
            lookup(data, path)
        }
        "==" => Value::Bool(binary_eq(args, data)),
        "!=" => Value::Bool(!binary_eq(args, data)),
        "and" => Value::Bool(args.iter().all(|a| truthy(&eval(a, data)))),
        "or" => Value::Bool(args.iter().any(|a| truthy(&eval(a, data)))),
        "!" => Value::Bool(args.first().map(|a| !truthy(&eval(a, data))).unwrap_or(true)),
        ">" => Value::Bool(compare(args, data, |a, b| a > b)),
        ">=" => Value::Bool(compare(args, data, |a, b| a >= b)),
        "<" => Value::Bool(compare(args, data, |a, b| a < b)),
        "<=" => Value::Bool(compare(args, data, |a, b| a <= b)),
        "in" => {
            let needle = args.first().map(|a| eval(a, data)).unwrap_or(Value::Null);
            let haystack = args.get(1).map(|a| eval(a, data)).unwrap_or(Value::Null);
            Value::Bool(match haystack {
                Value::Array(items) => items.contains(&needle),
                Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
                _ => false,
            })
        }
        _ => Value::Null,
    }
}

fn binary_eq(args: &[Value], data: &Value) -> bool {
    let a = args.first().map(|v| eval(v, data)).unwrap_or(Value::Null);
    let b = args.get(1).map(|v| eval(v, data)).unwrap_or(Value::Null);
    a == b
}

fn compare(args: &[Value], data: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    let a = args.first().map(|v| eval(v, data)).unwrap_or(Value::Null);
    let b = args.get(1).map(|v| eval(v, data)).unwrap_or(Value::Null);
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn lookup(data: &Value, path: &str) -> Value {
    if path.is_empty() {
        return data.clone();
    }
    path.split('.')
        .try_fold(data.clone(), |acc, segment| match acc {
            Value::Object(mut map) => map.remove(segment),
            _ => None,
        })
        .unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_on_a_nested_var_path() {
        let rule = json!({"==": [{"var": "labels.team"}, "payments"]});
        let data = json!({"labels": {"team": "payments"}});
        assert!(evaluate(&rule, &data));
    }

    #[test]
    fn and_requires_every_clause() {
        let rule = json!({
            "and": [
                {"==": [{"var": "severity"}, "critical"]},
                {">": [{"var": "occurrence_count"}, 2]}
            ]
        });
        assert!(evaluate(&rule, &json!({"severity": "critical", "occurrence_count": 3})));
        assert!(!evaluate(&rule, &json!({"severity": "critical", "occurrence_count": 1})));
    }

    #[test]
    fn missing_var_resolves_to_null_and_fails_equality() {
        let rule = json!({"==": [{"var": "instance"}, "db-01"]});
        assert!(!evaluate(&rule, &json!({})));
    }
}
