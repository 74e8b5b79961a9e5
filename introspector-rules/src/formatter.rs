//! Templating for actions' `FORMATTED_PARAMS` values.
//!
//! A formatted parameter like `"{data[inventory][bmc_address]}"` expands
//! at apply time against the submission data and the remote node object,
//! mirroring the original's `value.format(data=..., node=...)` pass over
//! `SetAttributeAction`/`SetCapabilityAction`/`ExtendAttributeAction`'s
//! `value` parameter.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{RulesError, RulesResult};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(data|node)((?:\[[^\]]+\])*)\}").unwrap());

fn lookup(root: &Value, brackets: &str) -> Option<Value> {
    let mut current = root.clone();
    for key in brackets
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split("][")
        .filter(|s| !s.is_empty())
    {
        current = current.get(key)?.clone();
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expands every `{data[...]}`/`{node[...]}` placeholder in `template`
/// against `data`/`node`. Non-string action parameters pass through
/// [`format_value`] untouched.
pub fn format_template(template: &str, data: &Value, node: &Value) -> RulesResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).unwrap();
        out.push_str(&template[last_end..whole.start()]);

        let root_name = &caps[1];
        let brackets = &caps[2];
        let root = if root_name == "data" { data } else { node };
        let resolved = lookup(root, brackets).ok_or_else(|| RulesError::InvalidConditionParam {
            op: "format".to_string(),
            reason: format!("unresolvable placeholder '{}'", whole.as_str()),
        })?;
        out.push_str(&stringify(&resolved));
        last_end = whole.end();
    }
    out.push_str(&template[last_end..]);
    Ok(out)
}

/// Applies [`format_template`] to a formatted action parameter, passing
/// non-string values through unchanged.
pub fn format_value(value: &Value, data: &Value, node: &Value) -> RulesResult<Value> {
    match value {
        Value::String(s) => Ok(Value::String(format_template(s, data, node)?)),
        other => Ok(other.clone()),
    }
}
