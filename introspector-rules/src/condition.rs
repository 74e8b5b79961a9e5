//! Built-in condition operators.
//!
//! Each operator is a small plugin over a resolved field value and the
//! condition's parameter map, grounded operator-for-operator on
//! `ironic_inspector/plugins/rules.py`'s `SimpleCondition` family,
//! `EmptyCondition`, `NetCondition`, `ReCondition`/`MatchesCondition`/
//! `ContainsCondition`.

use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::coerce::{coerce, compare};
use crate::error::{RulesError, RulesResult};

pub trait ConditionPlugin: Send + Sync {
    fn required_params(&self) -> &'static [&'static str] {
        &["value"]
    }

    /// Whether this operator should still run when the field could not be
    /// resolved at all, treating it as `null`. Every built-in but `is-empty`
    /// declares `false`, matching `ALLOW_NONE` in the original.
    fn allow_none(&self) -> bool {
        false
    }

    /// Operator-specific validation run once, at rule-creation time (e.g.
    /// compiling a regex or parsing a CIDR up front).
    fn validate(&self, _params: &Map<String, Value>) -> RulesResult<()> {
        Ok(())
    }

    fn check(&self, op_name: &str, field: &Value, params: &Map<String, Value>) -> RulesResult<bool>;
}

fn required_value<'a>(op_name: &str, params: &'a Map<String, Value>) -> RulesResult<&'a Value> {
    params.get("value").ok_or_else(|| RulesError::MissingConditionParam {
        op: op_name.to_string(),
        param: "value".to_string(),
    })
}

struct SimpleCondition {
    compare: fn(Ordering) -> bool,
}

impl ConditionPlugin for SimpleCondition {
    fn check(&self, op_name: &str, field: &Value, params: &Map<String, Value>) -> RulesResult<bool> {
        let expected = required_value(op_name, params)?;
        let coerced = coerce(field, expected, op_name)?;
        Ok((self.compare)(compare(&coerced, expected)?))
    }
}

struct EmptyCondition;

impl ConditionPlugin for EmptyCondition {
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn allow_none(&self) -> bool {
        true
    }

    fn check(&self, _op_name: &str, field: &Value, _params: &Map<String, Value>) -> RulesResult<bool> {
        Ok(match field {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        })
    }
}

struct NetCondition;

impl ConditionPlugin for NetCondition {
    fn validate(&self, params: &Map<String, Value>) -> RulesResult<()> {
        let expected = required_value("in-net", params)?;
        let cidr = expected.as_str().ok_or_else(|| RulesError::InvalidConditionParam {
            op: "in-net".to_string(),
            reason: "value must be a string CIDR".to_string(),
        })?;
        cidr.parse::<ipnetwork::IpNetwork>()
            .map_err(|e| RulesError::InvalidConditionParam {
                op: "in-net".to_string(),
                reason: format!("invalid CIDR '{cidr}': {e}"),
            })?;
        Ok(())
    }

    fn check(&self, op_name: &str, field: &Value, params: &Map<String, Value>) -> RulesResult<bool> {
        let expected = required_value(op_name, params)?;
        let cidr: ipnetwork::IpNetwork =
            expected
                .as_str()
                .unwrap_or_default()
                .parse()
                .map_err(|e| RulesError::InvalidConditionParam {
                    op: op_name.to_string(),
                    reason: format!("invalid CIDR: {e}"),
                })?;
        let addr: std::net::IpAddr = field
            .as_str()
            .unwrap_or_default()
            .parse()
            .map_err(|e| RulesError::InvalidConditionParam {
                op: op_name.to_string(),
                reason: format!("field is not an IP address: {e}"),
            })?;
        Ok(cidr.contains(addr))
    }
}

struct MatchesCondition;

impl ConditionPlugin for MatchesCondition {
    fn validate(&self, params: &Map<String, Value>) -> RulesResult<()> {
        let expected = required_value("matches", params)?;
        let pattern = expected.as_str().unwrap_or_default();
        regex::Regex::new(pattern).map_err(|e| RulesError::InvalidConditionParam {
            op: "matches".to_string(),
            reason: format!("invalid regular expression: {e}"),
        })?;
        Ok(())
    }

    fn check(&self, op_name: &str, field: &Value, params: &Map<String, Value>) -> RulesResult<bool> {
        let expected = required_value(op_name, params)?;
        let mut pattern = expected.as_str().unwrap_or_default().to_string();
        if !pattern.ends_with('$') {
            pattern.push('$');
        }
        let regex = regex::Regex::new(&pattern).map_err(|e| RulesError::InvalidConditionParam {
            op: op_name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(regex.is_match(&field_as_string(field)))
    }
}

struct ContainsCondition;

impl ConditionPlugin for ContainsCondition {
    fn validate(&self, params: &Map<String, Value>) -> RulesResult<()> {
        let expected = required_value("contains", params)?;
        regex::Regex::new(expected.as_str().unwrap_or_default()).map_err(|e| {
            RulesError::InvalidConditionParam {
                op: "contains".to_string(),
                reason: format!("invalid regular expression: {e}"),
            }
        })?;
        Ok(())
    }

    fn check(&self, op_name: &str, field: &Value, params: &Map<String, Value>) -> RulesResult<bool> {
        let expected = required_value(op_name, params)?;
        let regex = regex::Regex::new(expected.as_str().unwrap_or_default()).map_err(|e| {
            RulesError::InvalidConditionParam {
                op: op_name.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(regex.is_match(&field_as_string(field)))
    }
}

fn field_as_string(field: &Value) -> String {
    match field {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ConditionRegistry {
    plugins: HashMap<&'static str, Arc<dyn ConditionPlugin>>,
}

impl ConditionRegistry {
    pub fn get(&self, op: &str) -> Option<Arc<dyn ConditionPlugin>> {
        self.plugins.get(op).cloned()
    }
}

pub static CONDITIONS: Lazy<ConditionRegistry> = Lazy::new(|| {
    let mut plugins: HashMap<&'static str, Arc<dyn ConditionPlugin>> = HashMap::new();
    plugins.insert("eq", Arc::new(SimpleCondition { compare: |o| o == Ordering::Equal }));
    plugins.insert("ne", Arc::new(SimpleCondition { compare: |o| o != Ordering::Equal }));
    plugins.insert("lt", Arc::new(SimpleCondition { compare: |o| o == Ordering::Less }));
    plugins.insert("gt", Arc::new(SimpleCondition { compare: |o| o == Ordering::Greater }));
    plugins.insert(
        "le",
        Arc::new(SimpleCondition { compare: |o| o != Ordering::Greater }),
    );
    plugins.insert("ge", Arc::new(SimpleCondition { compare: |o| o != Ordering::Less }));
    plugins.insert("is-empty", Arc::new(EmptyCondition));
    plugins.insert("in-net", Arc::new(NetCondition));
    plugins.insert("matches", Arc::new(MatchesCondition));
    plugins.insert("contains", Arc::new(ContainsCondition));
    ConditionRegistry { plugins }
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("value".to_string(), value);
        map
    }

    #[test]
    fn eq_coerces_field_to_float() {
        let plugin = CONDITIONS.get("eq").unwrap();
        assert!(plugin.check("eq", &json!("12288"), &params(json!(12288.0))).unwrap());
    }

    #[test]
    fn gt_and_lt_on_integers() {
        let gt = CONDITIONS.get("gt").unwrap();
        let lt = CONDITIONS.get("lt").unwrap();
        assert!(gt.check("gt", &json!(999), &params(json!(998))).unwrap());
        assert!(lt.check("lt", &json!(999), &params(json!(1000))).unwrap());
    }

    #[test]
    fn matches_anchors_at_end_of_string() {
        let plugin = CONDITIONS.get("matches").unwrap();
        assert!(plugin.check("matches", &json!("42"), &params(json!("[0-9]+"))).unwrap());
        assert!(!plugin.check("matches", &json!("42x"), &params(json!("[0-9]+"))).unwrap());
    }

    #[test]
    fn contains_searches_anywhere() {
        let plugin = CONDITIONS.get("contains").unwrap();
        assert!(plugin.check("contains", &json!("x86_64"), &params(json!("[0-9]+"))).unwrap());
    }

    #[test]
    fn is_empty_covers_all_empty_shapes() {
        let plugin = CONDITIONS.get("is-empty").unwrap();
        let empty_params = Map::new();
        assert!(plugin.check("is-empty", &Value::Null, &empty_params).unwrap());
        assert!(plugin.check("is-empty", &json!(""), &empty_params).unwrap());
        assert!(plugin.check("is-empty", &json!([]), &empty_params).unwrap());
        assert!(plugin.check("is-empty", &json!({}), &empty_params).unwrap());
        assert!(!plugin.check("is-empty", &json!("x"), &empty_params).unwrap());
    }

    #[test]
    fn in_net_matches_cidr_membership() {
        let plugin = CONDITIONS.get("in-net").unwrap();
        assert!(plugin
            .check("in-net", &json!("192.168.1.5"), &params(json!("192.168.1.0/24")))
            .unwrap());
        assert!(!plugin
            .check("in-net", &json!("10.0.0.5"), &params(json!("192.168.1.0/24")))
            .unwrap());
    }

    #[test]
    fn in_net_validate_rejects_bad_cidr() {
        let plugin = CONDITIONS.get("in-net").unwrap();
        assert!(plugin.validate(&params(json!("not-a-cidr"))).is_err());
    }
}
