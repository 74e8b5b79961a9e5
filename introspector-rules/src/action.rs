//! Built-in rule actions.
//!
//! Grounded on `FailAction`, `SetAttributeAction`, `SetCapabilityAction`,
//! `ExtendAttributeAction` in `ironic_inspector/plugins/rules.py`, built on
//! top of [`RuleTarget`]'s `get_by_path`/`patch` the same way the original
//! layers `update_capabilities`/`replace_field` over them.

use async_trait::async_trait;
use introspector_core::{JsonPatch, RuleUuid};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RulesError, RulesResult};
use crate::formatter::format_value;
use crate::target::RuleTarget;

#[async_trait]
pub trait ActionPlugin: Send + Sync {
    fn required_params(&self) -> &'static [&'static str];

    fn formatted_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn apply(
        &self,
        target: &mut dyn RuleTarget,
        params: &Map<String, Value>,
        rule_uuid: Option<RuleUuid>,
    ) -> RulesResult<()>;
}

fn require<'a>(action: &str, params: &'a Map<String, Value>, key: &str) -> RulesResult<&'a Value> {
    params.get(key).ok_or_else(|| RulesError::MissingActionParam {
        action: action.to_string(),
        param: key.to_string(),
    })
}

/// Parses ironic's `k1:v1,k2:v2` capability string into a map.
pub fn capabilities_to_map(raw: Option<&str>) -> HashMap<String, String> {
    raw.unwrap_or_default()
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Serializes a capability map back into ironic's `k1:v1,k2:v2` form, with
/// deterministic key order for stable patches.
pub fn map_to_capabilities(map: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{k}:{}", map[k]))
        .collect::<Vec<_>>()
        .join(",")
}

struct FailAction;

#[async_trait]
impl ActionPlugin for FailAction {
    fn required_params(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn apply(
        &self,
        _target: &mut dyn RuleTarget,
        params: &Map<String, Value>,
        rule_uuid: Option<RuleUuid>,
    ) -> RulesResult<()> {
        let message = require("fail", params, "message")?;
        Err(RulesError::Aborted {
            uuid: rule_uuid,
            message: message.as_str().unwrap_or_default().to_string(),
        })
    }
}

struct SetAttributeAction;

#[async_trait]
impl ActionPlugin for SetAttributeAction {
    fn required_params(&self) -> &'static [&'static str] {
        &["path", "value"]
    }

    fn formatted_params(&self) -> &'static [&'static str] {
        &["value"]
    }

    async fn apply(
        &self,
        target: &mut dyn RuleTarget,
        params: &Map<String, Value>,
        _rule_uuid: Option<RuleUuid>,
    ) -> RulesResult<()> {
        let path = require("set-attribute", params, "path")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let value = require("set-attribute", params, "value")?.clone();
        target.patch(vec![JsonPatch::add(path, value)]).await
    }
}

struct SetCapabilityAction;

#[async_trait]
impl ActionPlugin for SetCapabilityAction {
    fn required_params(&self) -> &'static [&'static str] {
        &["name"]
    }

    fn formatted_params(&self) -> &'static [&'static str] {
        &["value"]
    }

    async fn apply(
        &self,
        target: &mut dyn RuleTarget,
        params: &Map<String, Value>,
        _rule_uuid: Option<RuleUuid>,
    ) -> RulesResult<()> {
        let name = require("set-capability", params, "name")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        let value_str = match &value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let existing = target.get_by_path("/properties/capabilities");
        let existing_str = existing.as_ref().and_then(Value::as_str);
        let mut caps = capabilities_to_map(existing_str);
        caps.insert(name, value_str);

        let op = if existing.is_some() { "replace" } else { "add" };
        let patch = JsonPatch {
            op: if op == "replace" {
                introspector_core::PatchOp::Replace
            } else {
                introspector_core::PatchOp::Add
            },
            path: "/properties/capabilities".to_string(),
            value: Some(Value::String(map_to_capabilities(&caps))),
        };
        target.patch(vec![patch]).await
    }
}

struct ExtendAttributeAction;

#[async_trait]
impl ActionPlugin for ExtendAttributeAction {
    fn required_params(&self) -> &'static [&'static str] {
        &["path", "value"]
    }

    fn formatted_params(&self) -> &'static [&'static str] {
        &["value"]
    }

    async fn apply(
        &self,
        target: &mut dyn RuleTarget,
        params: &Map<String, Value>,
        _rule_uuid: Option<RuleUuid>,
    ) -> RulesResult<()> {
        let path = require("extend-attribute", params, "path")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let value = require("extend-attribute", params, "value")?.clone();
        let unique = params.get("unique").and_then(Value::as_bool).unwrap_or(false);

        let existing = target.get_by_path(&path);
        let op = if existing.is_some() { "replace" } else { "add" };
        let mut values = existing
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        if !unique || !values.contains(&value) {
            values.push(value);
        }

        let patch = JsonPatch {
            op: if op == "replace" {
                introspector_core::PatchOp::Replace
            } else {
                introspector_core::PatchOp::Add
            },
            path,
            value: Some(Value::Array(values)),
        };
        target.patch(vec![patch]).await
    }
}

pub struct ActionRegistry {
    plugins: HashMap<&'static str, Arc<dyn ActionPlugin>>,
}

impl ActionRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionPlugin>> {
        self.plugins.get(name).cloned()
    }
}

pub static ACTIONS: Lazy<ActionRegistry> = Lazy::new(|| {
    let mut plugins: HashMap<&'static str, Arc<dyn ActionPlugin>> = HashMap::new();
    plugins.insert("fail", Arc::new(FailAction));
    plugins.insert("set-attribute", Arc::new(SetAttributeAction));
    plugins.insert("set-capability", Arc::new(SetCapabilityAction));
    plugins.insert("extend-attribute", Arc::new(ExtendAttributeAction));
    ActionRegistry { plugins }
});

/// Applies [`format_value`] to every parameter an action declares as
/// formatted, producing the concrete parameter map `apply` should run with.
pub fn render_params(
    action: &dyn ActionPlugin,
    params: &Map<String, Value>,
    data: &Value,
    node: &Value,
) -> RulesResult<Map<String, Value>> {
    let mut rendered = params.clone();
    for key in action.formatted_params() {
        if let Some(value) = rendered.get(*key) {
            rendered.insert((*key).to_string(), format_value(value, data, node)?);
        }
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    struct FakeTarget {
        node: Value,
        patches: Vec<JsonPatch>,
    }

    impl FakeTarget {
        fn new(node: Value) -> Self {
            Self { node, patches: Vec::new() }
        }
    }

    #[async_trait]
    impl RuleTarget for FakeTarget {
        fn get_by_path(&self, path: &str) -> Option<Value> {
            let trimmed = path.trim_start_matches('/');
            let mut current = &self.node;
            for segment in trimmed.split('/') {
                current = current.get(segment)?;
            }
            Some(current.clone())
        }

        async fn patch(&mut self, patches: Vec<JsonPatch>) -> RulesResult<()> {
            for p in &patches {
                if let Some(value) = &p.value {
                    let trimmed = p.path.trim_start_matches('/');
                    if let Some(obj) = self.node.as_object_mut() {
                        obj.insert(trimmed.to_string(), value.clone());
                    }
                }
            }
            self.patches.extend(patches);
            Ok(())
        }

        fn node_snapshot(&self) -> Value {
            self.node.clone()
        }
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn set_attribute_emits_add_patch() {
        let action = ACTIONS.get("set-attribute").unwrap();
        let mut target = FakeTarget::new(json!({}));
        action
            .apply(&mut target, &params(&[("path", json!("/extra/foo")), ("value", json!("bar"))]), None)
            .await
            .unwrap();
        assert_eq!(target.patches[0].path, "/extra/foo");
        assert_eq!(target.patches[0].value, Some(json!("bar")));
    }

    #[tokio::test]
    async fn fail_action_aborts_with_message() {
        let action = ACTIONS.get("fail").unwrap();
        let mut target = FakeTarget::new(json!({}));
        let err = action
            .apply(&mut target, &params(&[("message", json!("bad disk"))]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RulesError::Aborted { message, .. } if message == "bad disk"));
    }

    #[test]
    fn capabilities_round_trip_through_string_form() {
        let mut map = StdHashMap::new();
        map.insert("boot_mode".to_string(), "uefi".to_string());
        map.insert("cpu_vt".to_string(), "true".to_string());
        let serialized = map_to_capabilities(&map);
        let parsed = capabilities_to_map(Some(&serialized));
        assert_eq!(parsed, map);
    }

    #[tokio::test]
    async fn extend_attribute_is_unique_when_requested() {
        let action = ACTIONS.get("extend-attribute").unwrap();
        let mut target = FakeTarget::new(json!({"extra": {"tags": ["a"]}}));
        action
            .apply(
                &mut target,
                &params(&[("path", json!("/extra/tags")), ("value", json!("a")), ("unique", json!(true))]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(target.patches[0].value, Some(json!(["a"])));
    }

    #[test]
    fn render_params_formats_only_declared_formatted_params() {
        let action = ACTIONS.get("set-attribute").unwrap();
        let data = json!({"inventory": {"bmc_address": "10.0.0.5"}});
        let node = json!({});
        let raw = params(&[("path", json!("/extra/bmc")), ("value", json!("{data[inventory][bmc_address]}"))]);
        let rendered = render_params(action.as_ref(), &raw, &data, &node).unwrap();
        assert_eq!(rendered["value"], "10.0.0.5");
        assert_eq!(rendered["path"], "/extra/bmc");
    }
}
