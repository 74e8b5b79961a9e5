//! Errors surfaced by the external-service adapters.

use introspector_core::NodeUuid;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("node {uuid} not found on the bare-metal service")]
    NodeNotFound { uuid: NodeUuid },

    #[error("bare-metal request failed: {reason}")]
    BareMetalRequestFailed { reason: String },

    #[error("object {name} not found in the object store")]
    ObjectNotFound { name: String },

    #[error("object store request failed: {reason}")]
    ObjectStoreRequestFailed { reason: String },

    #[error("failed to store ramdisk logs: {reason}")]
    RamdiskLogWriteFailed { reason: String },
}

pub type AdapterResult<T> = Result<T, AdapterError>;
