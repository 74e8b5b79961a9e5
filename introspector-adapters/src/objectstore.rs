//! Object-store adapter for archiving introspection payloads.
//!
//! Naming and the delete-after window are grounded on `common/swift.py`:
//! objects are named `inspector_data-<uuid>[-<suffix>]`, and a retention
//! window in seconds maps to (on a real Swift backend) the
//! `X-Delete-After` header.

use async_trait::async_trait;
use introspector_core::NodeUuid;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::{AdapterError, AdapterResult};

pub const OBJECT_NAME_PREFIX: &str = "inspector_data";

/// Builds the object name the way `common/swift.py`'s `get_name` does:
/// `inspector_data-<uuid>` for the unprocessed/processed payload, or
/// `inspector_data-<uuid>-<suffix>` for a named extra (e.g. `introspection`).
pub fn object_name(uuid: NodeUuid, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{OBJECT_NAME_PREFIX}-{uuid}-{suffix}"),
        _ => format!("{OBJECT_NAME_PREFIX}-{uuid}"),
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under the node's object name, optionally expiring it
    /// after `delete_after_secs` seconds. Returns the object name.
    async fn put(
        &self,
        uuid: NodeUuid,
        suffix: Option<&str>,
        data: &Value,
        delete_after_secs: Option<u64>,
    ) -> AdapterResult<String>;

    async fn get(&self, uuid: NodeUuid, suffix: Option<&str>) -> AdapterResult<Value>;
}

struct StoredObject {
    data: Value,
    expires_at: Option<Instant>,
}

/// In-memory stand-in for a Swift-like object store, used by pipeline tests.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        uuid: NodeUuid,
        suffix: Option<&str>,
        data: &Value,
        delete_after_secs: Option<u64>,
    ) -> AdapterResult<String> {
        let name = object_name(uuid, suffix);
        let expires_at = delete_after_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.objects.write().unwrap().insert(
            name.clone(),
            StoredObject {
                data: data.clone(),
                expires_at,
            },
        );
        Ok(name)
    }

    async fn get(&self, uuid: NodeUuid, suffix: Option<&str>) -> AdapterResult<Value> {
        let name = object_name(uuid, suffix);
        let objects = self.objects.read().unwrap();
        let stored = objects.get(&name).ok_or_else(|| AdapterError::ObjectNotFound { name: name.clone() })?;
        if let Some(expires_at) = stored.expires_at {
            if Instant::now() >= expires_at {
                return Err(AdapterError::ObjectNotFound { name });
            }
        }
        Ok(stored.data.clone())
    }
}
