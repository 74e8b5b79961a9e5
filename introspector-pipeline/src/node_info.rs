//! `NodeInfo`: one node's cached state plus everything needed to mutate it.
//!
//! Grounded line-for-line on `node_cache.py`'s `NodeInfo` class: lazily
//! fetched/cached node object, ports, options, and lookup attributes, with
//! `patch`/`update_capabilities`-equivalent mutators on top. A `NodeInfo`
//! is per-task, the same way the original documents "you need to create a
//! new instance for every thread" — it is not `Sync`.

use async_trait::async_trait;
use introspector_adapters::{BareMetalClient, CreatePortOutcome, Port, PowerState};
use introspector_core::{Acquired, CoreError, JsonPatch, Lock, LockRegistry, NodeUuid, PipelineError, Timestamp};
use introspector_rules::{RulesError, RulesResult, RuleTarget};
use introspector_storage::StorageTrait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{map_adapter_error, PipelineResult};

/// Navigates an ironic-style path (`/properties/capabilities`, `extra`) to
/// a value inside a JSON node object, the way `get_by_path` walks
/// `getattr`/`__getitem__` on the real node object.
pub fn navigate_path(node: &Value, path: &str) -> Option<Value> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Some(node.clone());
    }
    let mut current = node;
    for segment in trimmed.split('/') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

pub struct NodeInfo {
    pub uuid: NodeUuid,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub error: Option<String>,

    storage: Arc<dyn StorageTrait>,
    baremetal: Arc<dyn BareMetalClient>,
    lock: Option<Lock<Acquired>>,

    node: Option<Value>,
    ports: Option<HashMap<String, Port>>,
    options: Option<HashMap<String, Value>>,
    attributes: Option<HashMap<String, Vec<String>>>,
}

impl NodeInfo {
    pub fn new(
        uuid: NodeUuid,
        started_at: Timestamp,
        storage: Arc<dyn StorageTrait>,
        baremetal: Arc<dyn BareMetalClient>,
    ) -> Self {
        Self {
            uuid,
            started_at,
            finished_at: None,
            error: None,
            storage,
            baremetal,
            lock: None,
            node: None,
            ports: None,
            options: None,
            attributes: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Attaches a lock already acquired by the cache, e.g. by `find_node`
    /// or a locked `get_node`.
    pub(crate) fn attach_lock(&mut self, lock: Lock<Acquired>) {
        self.lock = Some(lock);
    }

    /// Acquires the registry lock for this node, unless this `NodeInfo`
    /// already holds it. Returns whether the caller now holds the lock.
    pub async fn acquire_lock(&mut self, registry: &LockRegistry, blocking: bool) -> bool {
        if self.lock.is_some() {
            return true;
        }
        if blocking {
            self.lock = Some(registry.acquire(self.uuid).await);
            true
        } else {
            match registry.try_acquire(self.uuid).await {
                Some(lock) => {
                    self.lock = Some(lock);
                    true
                }
                None => false,
            }
        }
    }

    /// Releases the lock if this `NodeInfo` holds it. Idempotent.
    pub fn release_lock(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.node = None;
        self.ports = None;
    }

    pub async fn node(&mut self) -> PipelineResult<&Value> {
        if self.node.is_none() {
            let fetched = self.baremetal.get_node(self.uuid).await.map_err(map_adapter_error)?;
            self.node = Some(fetched);
        }
        Ok(self.node.as_ref().unwrap())
    }

    pub async fn patch(&mut self, patches: Vec<JsonPatch>) -> PipelineResult<()> {
        debug!(uuid = %self.uuid, count = patches.len(), "patching node");
        let updated = self
            .baremetal
            .patch_node(self.uuid, &patches)
            .await
            .map_err(map_adapter_error)?;
        self.node = Some(updated);
        Ok(())
    }

    /// Merges `caps` into the node's `/properties/capabilities` string,
    /// the way `update_capabilities` layers a dict merge over `patch`.
    pub async fn update_capabilities(&mut self, caps: HashMap<String, String>) -> PipelineResult<()> {
        let existing_str = self
            .node()
            .await?
            .pointer("/properties/capabilities")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut merged = introspector_rules::capabilities_to_map(existing_str.as_deref());
        merged.extend(caps);
        let serialized = introspector_rules::map_to_capabilities(&merged);
        self.patch(vec![JsonPatch::add("/properties/capabilities", Value::String(serialized))])
            .await
    }

    pub async fn update_properties(&mut self, props: &[(&str, Value)]) -> PipelineResult<()> {
        let patches = props
            .iter()
            .map(|(key, value)| JsonPatch::add(format!("/properties/{key}"), value.clone()))
            .collect();
        self.patch(patches).await
    }

    pub async fn ports(&mut self) -> PipelineResult<&HashMap<String, Port>> {
        if self.ports.is_none() {
            let fetched = self.baremetal.list_ports(self.uuid).await.map_err(map_adapter_error)?;
            self.ports = Some(fetched.into_iter().map(|p| (p.address.clone(), p)).collect());
        }
        Ok(self.ports.as_ref().unwrap())
    }

    pub async fn create_port(&mut self, mac: &str) -> PipelineResult<CreatePortOutcome> {
        let outcome = self.baremetal.create_port(self.uuid, mac).await.map_err(map_adapter_error)?;
        self.ports = None;
        Ok(outcome)
    }

    pub async fn delete_port(&mut self, port_uuid: &str) -> PipelineResult<()> {
        self.baremetal.delete_port(port_uuid).await.map_err(map_adapter_error)?;
        self.ports = None;
        Ok(())
    }

    pub async fn set_power_state(&mut self, state: PowerState) -> PipelineResult<()> {
        self.baremetal.set_power_state(self.uuid, state).await.map_err(map_adapter_error)
    }

    pub async fn options(&mut self) -> PipelineResult<&HashMap<String, Value>> {
        if self.options.is_none() {
            let fetched = self
                .storage
                .list_options(self.uuid)
                .await
                .map_err(crate::error::map_storage_error)?;
            self.options = Some(fetched);
        }
        Ok(self.options.as_ref().unwrap())
    }

    pub async fn set_option(&mut self, name: &str, value: Value) -> PipelineResult<()> {
        self.storage
            .set_option(self.uuid, name, value.clone())
            .await
            .map_err(crate::error::map_storage_error)?;
        if let Some(options) = self.options.as_mut() {
            options.insert(name.to_string(), value);
        }
        Ok(())
    }

    pub async fn attributes(&mut self) -> PipelineResult<&HashMap<String, Vec<String>>> {
        if self.attributes.is_none() {
            let fetched = self
                .storage
                .list_attributes(self.uuid)
                .await
                .map_err(crate::error::map_storage_error)?;
            self.attributes = Some(fetched);
        }
        Ok(self.attributes.as_ref().unwrap())
    }

    /// Stores look-up attributes for this node, skipping empty values, the
    /// way `add_attribute` does. Fails with `DuplicateAttribute` if any
    /// `(name, value)` pair already belongs to a different active node.
    pub async fn add_attribute(&mut self, name: &str, values: Vec<String>) -> PipelineResult<()> {
        let pairs: Vec<(String, String)> = values
            .into_iter()
            .filter(|v| !v.is_empty())
            .map(|v| (name.to_string(), v))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }
        for (name, value) in &pairs {
            let owned = self
                .storage
                .attribute_owned_by_other_active_node(name, value, self.uuid)
                .await
                .map_err(crate::error::map_storage_error)?;
            if owned {
                return Err(PipelineError::Core(CoreError::DuplicateAttribute {
                    name: name.clone(),
                    value: value.clone(),
                }));
            }
        }
        self.storage
            .insert_attributes(self.uuid, &pairs)
            .await
            .map_err(crate::error::map_storage_error)?;
        self.attributes = None;
        Ok(())
    }

    /// Marks this node finished, the way `_finish` records `finished_at`
    /// and an optional error on the row. Lookup attributes and options are
    /// deleted in the same step — both invariants hold only while a node
    /// is active.
    pub async fn finish(&mut self, now: Timestamp, error: Option<String>) -> PipelineResult<()> {
        self.storage
            .finish_node(self.uuid, now, error.clone())
            .await
            .map_err(crate::error::map_storage_error)?;
        self.storage.delete_attributes(self.uuid).await.map_err(crate::error::map_storage_error)?;
        self.storage.delete_options(self.uuid).await.map_err(crate::error::map_storage_error)?;
        self.finished_at = Some(now);
        self.error = error;
        self.attributes = None;
        self.options = None;
        Ok(())
    }

    /// Reads the value at `path` (or `default` if absent), applies `f`, and
    /// emits a patch only if the result differs — an `add` when the path
    /// was absent and a default was supplied, a `replace` otherwise.
    /// Mirrors `replace_field` in the original node cache.
    pub async fn replace_field<F>(
        &mut self,
        path: &str,
        f: F,
        default: Option<Value>,
    ) -> PipelineResult<()>
    where
        F: FnOnce(Value) -> Value,
    {
        let current = navigate_path(self.node().await?, path);
        let (previous, is_add) = match current {
            Some(value) => (value, false),
            None => match default {
                Some(value) => (value, true),
                None => {
                    return Err(PipelineError::ExternalServiceError {
                        reason: format!("field '{path}' not found and no default supplied"),
                    })
                }
            },
        };

        let updated = f(previous.clone());
        if updated == previous {
            return Ok(());
        }
        let patch = if is_add { JsonPatch::add(path, updated) } else { JsonPatch::replace(path, updated) };
        self.patch(vec![patch]).await
    }
}

#[async_trait]
impl RuleTarget for NodeInfo {
    fn get_by_path(&self, path: &str) -> Option<Value> {
        self.node.as_ref().and_then(|node| navigate_path(node, path))
    }

    async fn patch(&mut self, patches: Vec<JsonPatch>) -> RulesResult<()> {
        NodeInfo::patch(self, patches)
            .await
            .map_err(|e| RulesError::ActionFailed { reason: e.to_string() })
    }

    fn node_snapshot(&self) -> Value {
        self.node.clone().unwrap_or(Value::Null)
    }
}
