//! Rule evaluation: matching a rule's conditions against a submission and
//! applying its actions when every condition holds.
//!
//! An empty condition list matches every submission, the same as the
//! original's bare `if all(...)` over an empty generator.

use introspector_core::{Condition, Rule, RuleUuid};
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{render_params, ACTIONS};
use crate::condition::CONDITIONS;
use crate::error::{RulesError, RulesResult};
use crate::field::{reduce_multiple, resolve, FieldPath, FieldScheme, Resolved};
use crate::target::RuleTarget;

/// Evaluates a single condition against the submitted data and the node
/// object, returning the clause's truth value after `invert` is applied.
pub fn evaluate_condition(condition: &Condition, data: &Value, node: &Value) -> RulesResult<bool> {
    let path = FieldPath::parse(&condition.field)?;
    let root = match path.scheme {
        FieldScheme::Data => data,
        FieldScheme::Node => node,
    };

    let plugin = CONDITIONS
        .get(&condition.op)
        .ok_or_else(|| RulesError::UnknownCondition { op: condition.op.clone() })?;

    for param in plugin.required_params() {
        if !condition.params.contains_key(*param) {
            return Err(RulesError::MissingConditionParam {
                op: condition.op.clone(),
                param: (*param).to_string(),
            });
        }
    }

    let resolved = resolve(root, &path.segments);
    let truth = match resolved {
        Resolved::Missing if plugin.allow_none() => {
            plugin.check(&condition.op, &Value::Null, &condition.params)?
        }
        Resolved::Missing => false,
        Resolved::Values(values) => {
            let mut results = Vec::with_capacity(values.len());
            for value in &values {
                results.push(plugin.check(&condition.op, value, &condition.params)?);
            }
            reduce_multiple(&results, condition.multiple)
        }
    };

    Ok(truth != condition.invert)
}

/// Whether every condition in `rule` holds for this submission.
pub fn rule_matches(rule: &Rule, data: &Value, node: &Value) -> RulesResult<bool> {
    for condition in &rule.conditions {
        if !evaluate_condition(condition, data, node)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Runs every enabled rule's actions against `target` if its conditions
/// match, in rule order and then action order, returning the uuids of
/// rules that fired. A `fail` action's [`RulesError::Aborted`] propagates
/// immediately, stopping evaluation of later rules (the original's
/// `FailAction` raises `utils.Error`, which `apply_rules` lets through).
pub async fn apply_rules(
    rules: &[Rule],
    data: &Value,
    target: &mut dyn RuleTarget,
) -> RulesResult<Vec<RuleUuid>> {
    let mut fired = Vec::new();

    for rule in rules.iter().filter(|r| r.is_enabled()) {
        let node = target.node_snapshot();
        if !rule_matches(rule, data, &node)? {
            continue;
        }

        debug!(rule = %rule.uuid, "rule matched, applying actions");
        for action_clause in &rule.actions {
            let plugin = ACTIONS.get(&action_clause.name).ok_or_else(|| RulesError::UnknownAction {
                action: action_clause.name.clone(),
            })?;

            for param in plugin.required_params() {
                if !action_clause.params.contains_key(*param) {
                    return Err(RulesError::MissingActionParam {
                        action: action_clause.name.clone(),
                        param: (*param).to_string(),
                    });
                }
            }

            let node_for_format = target.node_snapshot();
            let rendered = render_params(plugin.as_ref(), &action_clause.params, data, &node_for_format)?;
            if let Err(err) = plugin.apply(target, &rendered, Some(rule.uuid)).await {
                warn!(rule = %rule.uuid, action = %action_clause.name, error = %err, "rule action failed");
                return Err(err);
            }
        }
        fired.push(rule.uuid);
    }

    Ok(fired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use introspector_core::{Action, EntityIdType, MultiplePolicy, RuleUuid};
    use serde_json::{json, Map};

    fn condition(op: &str, field: &str, value: Value) -> Condition {
        let mut params = Map::new();
        params.insert("value".to_string(), value);
        Condition {
            op: op.to_string(),
            field: field.to_string(),
            multiple: MultiplePolicy::Any,
            invert: false,
            params,
        }
    }

    #[test]
    fn empty_condition_list_matches_everything() {
        let rule = Rule {
            uuid: RuleUuid::now_v7(),
            description: None,
            disabled: false,
            conditions: vec![],
            actions: vec![],
            scope: None,
        };
        assert!(rule_matches(&rule, &json!({}), &json!({})).unwrap());
    }

    #[test]
    fn matching_requires_every_condition() {
        let rule = Rule {
            uuid: RuleUuid::now_v7(),
            description: None,
            disabled: false,
            conditions: vec![
                condition("eq", "memory_mb", json!(12288.0)),
                condition("gt", "local_gb", json!(998)),
            ],
            actions: vec![],
            scope: None,
        };
        let data = json!({"memory_mb": 12288, "local_gb": 999});
        assert!(rule_matches(&rule, &data, &json!({})).unwrap());

        let data_mismatch = json!({"memory_mb": 8192, "local_gb": 999});
        assert!(!rule_matches(&rule, &data_mismatch, &json!({})).unwrap());
    }

    #[test]
    fn inverted_contains_condition() {
        let mut cond = condition(
            "contains",
            "inventory.interfaces[*].ipv4_address",
            json!("127\\.0\\.0\\.1"),
        );
        cond.invert = true;
        cond.multiple = MultiplePolicy::All;

        let rule = Rule {
            uuid: RuleUuid::now_v7(),
            description: None,
            disabled: false,
            conditions: vec![cond],
            actions: vec![],
            scope: None,
        };
        let data = json!({"inventory": {"interfaces": [{"ipv4_address": "10.0.0.1"}]}});
        assert!(rule_matches(&rule, &data, &json!({})).unwrap());

        let data_with_loopback =
            json!({"inventory": {"interfaces": [{"ipv4_address": "127.0.0.1"}]}});
        assert!(!rule_matches(&rule, &data_with_loopback, &json!({})).unwrap());
    }

    struct RecordingTarget {
        node: Value,
        applied: Vec<(String, Value)>,
    }

    #[async_trait::async_trait]
    impl RuleTarget for RecordingTarget {
        fn get_by_path(&self, path: &str) -> Option<Value> {
            self.node.pointer(&path.replace('/', "/")).cloned()
        }

        async fn patch(&mut self, patches: Vec<introspector_core::JsonPatch>) -> RulesResult<()> {
            for patch in patches {
                if let Some(value) = patch.value {
                    self.applied.push((patch.path, value));
                }
            }
            Ok(())
        }

        fn node_snapshot(&self) -> Value {
            self.node.clone()
        }
    }

    #[tokio::test]
    async fn apply_rules_runs_actions_for_matching_rules() {
        let rule = Rule {
            uuid: RuleUuid::now_v7(),
            description: None,
            disabled: false,
            conditions: vec![condition("eq", "memory_mb", json!(12288.0))],
            actions: vec![Action {
                name: "set-attribute".to_string(),
                params: {
                    let mut p = Map::new();
                    p.insert("path".to_string(), json!("/extra/foo"));
                    p.insert("value".to_string(), json!("bar"));
                    p
                },
            }],
            scope: None,
        };
        let data = json!({"memory_mb": 12288});
        let mut target = RecordingTarget { node: json!({}), applied: vec![] };

        let fired = apply_rules(&[rule.clone()], &data, &mut target).await.unwrap();
        assert_eq!(fired, vec![rule.uuid]);
        assert_eq!(target.applied, vec![("/extra/foo".to_string(), json!("bar"))]);
    }

    #[tokio::test]
    async fn disabled_rules_never_fire() {
        let rule = Rule {
            uuid: RuleUuid::now_v7(),
            description: None,
            disabled: true,
            conditions: vec![],
            actions: vec![Action {
                name: "fail".to_string(),
                params: {
                    let mut p = Map::new();
                    p.insert("message".to_string(), json!("should not run"));
                    p
                },
            }],
            scope: None,
        };
        let data = json!({});
        let mut target = RecordingTarget { node: json!({}), applied: vec![] };
        let fired = apply_rules(&[rule], &data, &mut target).await.unwrap();
        assert!(fired.is_empty());
    }
}
