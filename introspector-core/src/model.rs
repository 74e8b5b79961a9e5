//! Data model: nodes, lookup attributes, options, and declarative rules.

use crate::identity::{NodeUuid, RuleUuid, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A node under introspection. Mirrors the `nodes` table: one row per
/// active or recently-finished introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub uuid: NodeUuid,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn new(uuid: NodeUuid, started_at: Timestamp) -> Self {
        Self {
            uuid,
            started_at,
            finished_at: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A `(name, value)` pair used to look a node up before its identity is
/// known (MAC address, BMC address, etc). Uniqueness of `(name, value)`
/// holds only across *active* nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupAttribute {
    pub name: String,
    pub value: String,
    pub uuid: NodeUuid,
}

/// A per-node, per-name setting stashed by the pipeline or its hooks (e.g.
/// new IPMI credentials pending settlement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOption {
    pub uuid: NodeUuid,
    pub name: String,
    pub value: Value,
}

/// How a `foo[*]` wildcard selection is reduced to a single truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MultiplePolicy {
    #[default]
    Any,
    All,
    First,
    Last,
}

/// A single condition clause within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: String,
    pub field: String,
    #[serde(default)]
    pub multiple: MultiplePolicy,
    #[serde(default)]
    pub invert: bool,
    /// Everything else in the clause (`value`, or an operator-specific
    /// parameter such as `in-net`'s CIDR string) flattens in here.
    #[serde(flatten, default)]
    pub params: Map<String, Value>,
}

/// A single action clause within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "action")]
    pub name: String,
    /// Everything else in the clause (`path`, `value`, `unique`, ...)
    /// flattens in here.
    #[serde(flatten, default)]
    pub params: Map<String, Value>,
}

/// A single RFC 6902-flavored JSON patch operation, as sent to the
/// bare-metal adapter's node/port update calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl JsonPatch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// A persisted introspection rule: if every condition holds, every action
/// runs. An empty condition list matches every submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub uuid: RuleUuid,
    pub description: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub scope: Option<String>,
}

impl Rule {
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}
