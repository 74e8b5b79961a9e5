//! The narrow surface rule actions need from whatever holds node state.
//!
//! Deliberately smaller than the full node-cache API: actions only ever
//! read a field by ironic-style path (`get_by_path` in the original) and
//! apply JSON patches (`patch`). Everything else — `set-capability`,
//! `extend-attribute` — is built from those two primitives here, the same
//! way the original layers `update_capabilities`/`replace_field` on top of
//! `get_by_path`/`patch`.

use async_trait::async_trait;
use introspector_core::JsonPatch;
use serde_json::Value;

use crate::error::RulesResult;

#[async_trait]
pub trait RuleTarget: Send + Sync {
    /// Reads a field by ironic-style path (e.g. `/properties/capabilities`)
    /// from the node object backing this target. `None` if absent.
    fn get_by_path(&self, path: &str) -> Option<Value>;

    /// Applies patches to the underlying node, refreshing any cached copy.
    async fn patch(&mut self, patches: Vec<JsonPatch>) -> RulesResult<()>;

    /// A snapshot of the full node object, for `node://` field resolution
    /// and the `{node[...]}` formatter namespace.
    fn node_snapshot(&self) -> Value;
}
