//! Bare-metal control-plane adapter.
//!
//! Covers the narrow slice of an ironic-style node/port API the coordinator
//! actually drives: fetch a node, patch it, list/create ports, flip power
//! state, read the boot device. Shaped after the client surface in
//! `dtantsur/rust-openstack`'s `baremetal::nodes` module, cut down from a
//! full OpenStack SDK to this one trait plus an in-memory stand-in for
//! tests.

use async_trait::async_trait;
use introspector_core::NodeUuid;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{AdapterError, AdapterResult};
use introspector_core::{JsonPatch, PatchOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::On => "power on",
            PowerState::Off => "power off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub uuid: String,
    pub node_uuid: NodeUuid,
    pub address: String,
    pub pxe_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePortOutcome {
    Created,
    AlreadyExists,
}

/// The bare-metal control plane as the coordinator needs to see it.
#[async_trait]
pub trait BareMetalClient: Send + Sync {
    async fn get_node(&self, uuid: NodeUuid) -> AdapterResult<Value>;

    async fn patch_node(&self, uuid: NodeUuid, patches: &[JsonPatch]) -> AdapterResult<Value>;

    async fn list_ports(&self, uuid: NodeUuid) -> AdapterResult<Vec<Port>>;

    async fn create_port(&self, uuid: NodeUuid, mac: &str) -> AdapterResult<CreatePortOutcome>;

    async fn delete_port(&self, port_uuid: &str) -> AdapterResult<()>;

    async fn set_power_state(&self, uuid: NodeUuid, state: PowerState) -> AdapterResult<()>;

    async fn get_boot_device(&self, uuid: NodeUuid) -> AdapterResult<String>;
}

/// Applies one JSON Patch clause to a JSON object in place, creating
/// intermediate map levels for `add` the way the bare-metal service's own
/// patch handler does.
pub fn apply_json_patch(target: &mut Value, patch: &JsonPatch) -> AdapterResult<()> {
    let segments: Vec<&str> = patch.path.trim_start_matches('/').split('/').collect();
    if segments.is_empty() || segments == [""] {
        return Err(AdapterError::BareMetalRequestFailed {
            reason: "empty patch path".to_string(),
        });
    }

    let (last, parents) = segments.split_last().unwrap();
    let mut cursor = target;
    for segment in parents {
        let map = cursor.as_object_mut().ok_or_else(|| AdapterError::BareMetalRequestFailed {
            reason: format!("path segment '{segment}' is not an object"),
        })?;
        cursor = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let map = cursor.as_object_mut().ok_or_else(|| AdapterError::BareMetalRequestFailed {
        reason: format!("parent of '{last}' is not an object"),
    })?;

    match patch.op {
        PatchOp::Add | PatchOp::Replace => {
            let value = patch.value.clone().ok_or_else(|| AdapterError::BareMetalRequestFailed {
                reason: format!("{:?} of '{last}' requires a value", patch.op),
            })?;
            map.insert(last.to_string(), value);
        }
        PatchOp::Remove => {
            map.remove(*last);
        }
    }
    Ok(())
}

/// In-memory stand-in for the bare-metal service, used by pipeline tests.
#[derive(Default)]
pub struct InMemoryBareMetal {
    nodes: RwLock<HashMap<NodeUuid, Value>>,
    ports: RwLock<HashMap<NodeUuid, Vec<Port>>>,
    power: RwLock<HashMap<NodeUuid, PowerState>>,
    boot_device: RwLock<HashMap<NodeUuid, String>>,
    next_port_id: RwLock<u64>,
}

impl InMemoryBareMetal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a node the way a caller sets up fixtures before exercising the
    /// pipeline against this adapter.
    pub fn seed_node(&self, uuid: NodeUuid, body: Value) {
        self.nodes.write().unwrap().insert(uuid, body);
        self.power.write().unwrap().insert(uuid, PowerState::On);
        self.boot_device
            .write()
            .unwrap()
            .insert(uuid, "pxe".to_string());
    }
}

#[async_trait]
impl BareMetalClient for InMemoryBareMetal {
    async fn get_node(&self, uuid: NodeUuid) -> AdapterResult<Value> {
        self.nodes
            .read()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or(AdapterError::NodeNotFound { uuid })
    }

    async fn patch_node(&self, uuid: NodeUuid, patches: &[JsonPatch]) -> AdapterResult<Value> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.get_mut(&uuid).ok_or(AdapterError::NodeNotFound { uuid })?;
        for patch in patches {
            apply_json_patch(node, patch)?;
        }
        Ok(node.clone())
    }

    async fn list_ports(&self, uuid: NodeUuid) -> AdapterResult<Vec<Port>> {
        Ok(self.ports.read().unwrap().get(&uuid).cloned().unwrap_or_default())
    }

    async fn create_port(&self, uuid: NodeUuid, mac: &str) -> AdapterResult<CreatePortOutcome> {
        let mut ports = self.ports.write().unwrap();
        let existing = ports.entry(uuid).or_default();
        if existing.iter().any(|p| p.address.eq_ignore_ascii_case(mac)) {
            return Ok(CreatePortOutcome::AlreadyExists);
        }
        let mut next_id = self.next_port_id.write().unwrap();
        *next_id += 1;
        existing.push(Port {
            uuid: format!("port-{next_id}"),
            node_uuid: uuid,
            address: mac.to_string(),
            pxe_enabled: true,
        });
        Ok(CreatePortOutcome::Created)
    }

    async fn delete_port(&self, port_uuid: &str) -> AdapterResult<()> {
        let mut ports = self.ports.write().unwrap();
        for node_ports in ports.values_mut() {
            node_ports.retain(|p| p.uuid != port_uuid);
        }
        Ok(())
    }

    async fn set_power_state(&self, uuid: NodeUuid, state: PowerState) -> AdapterResult<()> {
        if !self.nodes.read().unwrap().contains_key(&uuid) {
            return Err(AdapterError::NodeNotFound { uuid });
        }
        self.power.write().unwrap().insert(uuid, state);
        Ok(())
    }

    async fn get_boot_device(&self, uuid: NodeUuid) -> AdapterResult<String> {
        self.boot_device
            .read()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or(AdapterError::NodeNotFound { uuid })
    }
}
