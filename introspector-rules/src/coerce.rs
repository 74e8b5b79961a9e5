//! Numeric coercion for condition operators.
//!
//! Mirrors `coerce()` in the original rules plugin: the field value is cast
//! into whatever numeric family the *declared* comparison value belongs to
//! (float, integer, or left alone) before the two are compared.

use serde_json::Value;

use crate::error::{RulesError, RulesResult};

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Coerces `field` toward the numeric family of `expected`, for use as the
/// left-hand side of a comparison operator.
pub fn coerce(field: &Value, expected: &Value, op_name: &str) -> RulesResult<Value> {
    match expected {
        Value::Number(n) if n.is_f64() && n.as_i64().is_none() && n.as_u64().is_none() => {
            as_f64(field)
                .map(|f| Value::from(f))
                .ok_or_else(|| RulesError::InvalidConditionParam {
                    op: op_name.to_string(),
                    reason: format!("cannot coerce {field} to a float"),
                })
        }
        Value::Number(_) => as_i64(field)
            .map(|i| Value::from(i))
            .ok_or_else(|| RulesError::InvalidConditionParam {
                op: op_name.to_string(),
                reason: format!("cannot coerce {field} to an integer"),
            }),
        _ => Ok(field.clone()),
    }
}

/// Orders two already-coerced values for the relational operators. Numbers
/// compare numerically; everything else falls back to string comparison
/// the way Python would compare mismatched-but-coercible types.
pub fn compare(lhs: &Value, rhs: &Value) -> RulesResult<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) {
        return a.partial_cmp(&b).ok_or_else(|| RulesError::InvalidConditionParam {
            op: "compare".to_string(),
            reason: "NaN is not ordered".to_string(),
        });
    }
    Ok(lhs.to_string().cmp(&rhs.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerce_to_float_parses_numeric_string() {
        let coerced = coerce(&json!("12288"), &json!(12288.0), "eq").unwrap();
        assert_eq!(coerced, json!(12288.0));
    }

    #[test]
    fn coerce_to_int_truncates_nothing_but_parses() {
        let coerced = coerce(&json!("998"), &json!(998), "eq").unwrap();
        assert_eq!(coerced, json!(998));
    }

    #[test]
    fn coerce_non_numeric_expected_passes_through() {
        let coerced = coerce(&json!("abc"), &json!("xyz"), "eq").unwrap();
        assert_eq!(coerced, json!("abc"));
    }

    #[test]
    fn compare_numeric_orders_by_value() {
        assert_eq!(compare(&json!(5), &json!(10)).unwrap(), std::cmp::Ordering::Less);
    }
}
