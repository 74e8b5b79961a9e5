//! Introspector Pipeline - the node cache and processing pipeline tying
//! storage, the bare-metal adapter, the rules engine, and hooks together
//! into `process`/`reapply`/`abort`.
//!
//! Grounded on `node_cache.py` and `process.py`: a lazily-populated,
//! per-task `NodeInfo` handle; a `NodeCache` factory for fetching/locking
//! nodes; a hook registry; and the `Pipeline` that drives the full
//! identify/hook/rule sequence for an incoming submission.

mod cache;
mod error;
mod executor;
mod hooks;
mod node_info;
mod pipeline;
mod settler;
mod submission;

pub use cache::NodeCache;
pub use error::{map_adapter_error, map_rules_error, map_storage_error, PipelineResult};
pub use executor::BackgroundExecutor;
pub use hooks::{
    CapabilitiesHook, HookRegistry, NodeNotFoundHook, PciDevicesHook, ProcessingHook,
    RamdiskErrorHook, SchedulerHook, ValidateInterfacesHook,
};
pub use node_info::{navigate_path, NodeInfo};
pub use pipeline::Pipeline;
pub use settler::{finish as settle_finish, settle_credentials, CREDENTIALS_WAIT_PERIOD, CREDENTIALS_WAIT_RETRIES};
pub use submission::{filter_excluded_keys, ipmi_address, pxe_mac, valid_macs, STORAGE_EXCLUDED_KEYS, UNPROCESSED_SUFFIX};
