//! Pre-processing and post-processing hook registries.
//!
//! A hook is declared by name and may implement `before_processing`
//! (pre-identification, working on the raw submission) and/or
//! `before_update` (post-identification, with the matched `NodeInfo`).
//! Registration order is preserved, mirroring `plugins/base.py`'s
//! `ProcessingHook` contract.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use introspector_core::PipelineError;
use serde_json::Value;
use tracing::warn;

use crate::error::PipelineResult;
use crate::node_info::NodeInfo;
use crate::submission::valid_macs;

#[async_trait]
pub trait ProcessingHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before_processing(&self, _data: &mut Value) -> PipelineResult<()> {
        Ok(())
    }

    async fn before_update(&self, _data: &Value, _node_info: &mut NodeInfo) -> PipelineResult<()> {
        Ok(())
    }
}

/// Synthesizes a `NodeInfo` for a submission that did not match any
/// cached node, the way a node-not-found hook may enroll a new node on
/// the fly.
#[async_trait]
pub trait NodeNotFoundHook: Send + Sync {
    async fn handle(&self, data: &Value) -> PipelineResult<Option<NodeInfo>>;
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<&'static str, Arc<dyn ProcessingHook>>,
    node_not_found: Option<Arc<dyn NodeNotFoundHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn ProcessingHook>) {
        self.hooks.insert(hook.name(), hook);
    }

    pub fn set_node_not_found_hook(&mut self, hook: Arc<dyn NodeNotFoundHook>) {
        self.node_not_found = Some(hook);
    }

    pub fn node_not_found_hook(&self) -> Option<Arc<dyn NodeNotFoundHook>> {
        self.node_not_found.clone()
    }

    /// Runs every named pre-hook in order against the working copy of the
    /// submission, collecting failures instead of aborting. Names with no
    /// registered hook are skipped with a warning — plugin discovery is
    /// out of scope, so a configured name may simply have no
    /// implementation in this build.
    pub async fn run_pre_hooks(&self, names: &[String], data: &mut Value) -> Vec<(String, PipelineError)> {
        let mut failures = Vec::new();
        for name in names {
            let Some(hook) = self.hooks.get(name.as_str()) else {
                warn!(hook = %name, "pre-hook has no registered implementation, skipping");
                continue;
            };
            if let Err(err) = hook.before_processing(data).await {
                failures.push((name.clone(), err));
            }
        }
        failures
    }

    /// Runs every named post-hook in order; the first failure aborts the
    /// remaining hooks and propagates.
    pub async fn run_post_hooks(
        &self,
        names: &[String],
        data: &Value,
        node_info: &mut NodeInfo,
    ) -> PipelineResult<()> {
        for name in names {
            let Some(hook) = self.hooks.get(name.as_str()) else {
                warn!(hook = %name, "post-hook has no registered implementation, skipping");
                continue;
            };
            hook.before_update(data, node_info).await.map_err(|err| {
                PipelineError::HookFailure { hook: name.clone(), reason: err.to_string() }
            })?;
        }
        Ok(())
    }

    pub fn registered_names(&self) -> HashSet<&'static str> {
        self.hooks.keys().copied().collect()
    }
}

/// Derives the standard scheduling properties (`cpus`, `cpu_arch`,
/// `memory_mb`, `local_gb`) from submitted inventory and patches them onto
/// the node. Named by the `"scheduler"` entry in
/// `CoordinatorConfig::default()`'s post-hook list, mirroring the
/// `scheduler` processing plugin referenced by `process.py`'s default hook
/// chain; the plugin's own source file wasn't among the kept
/// `original_source/` files, so this reconstructs the one load-bearing
/// contract spec.md's end-to-end scenario 1 pins down exactly: `cpus`
/// from `inventory.cpu.count`, `cpu_arch` from
/// `inventory.cpu.architecture`, `memory_mb` from
/// `inventory.memory.physical_mb`, and `local_gb` as the root disk's size
/// in whole gigabytes minus one (reserved for partitioning).
#[derive(Default)]
pub struct SchedulerHook;

impl SchedulerHook {
    /// Picks the root disk: `root_disk` if the submission named one,
    /// otherwise the largest disk in `inventory.disks` by size.
    fn root_disk_size_bytes(data: &Value) -> Option<u64> {
        if let Some(size) = data.get("root_disk").and_then(|d| d.get("size")).and_then(Value::as_u64) {
            return Some(size);
        }
        data.get("inventory")
            .and_then(|i| i.get("disks"))
            .and_then(Value::as_array)
            .and_then(|disks| disks.iter().filter_map(|d| d.get("size")).filter_map(Value::as_u64).max())
    }
}

#[async_trait]
impl ProcessingHook for SchedulerHook {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn before_update(&self, data: &Value, node_info: &mut NodeInfo) -> PipelineResult<()> {
        let inventory = data.get("inventory");
        let mut props: Vec<(&str, Value)> = Vec::new();

        if let Some(count) = inventory.and_then(|i| i.get("cpu")).and_then(|c| c.get("count")) {
            props.push(("cpus", count.clone()));
        }
        if let Some(arch) = inventory.and_then(|i| i.get("cpu")).and_then(|c| c.get("architecture")) {
            props.push(("cpu_arch", arch.clone()));
        }
        if let Some(mb) = inventory.and_then(|i| i.get("memory")).and_then(|m| m.get("physical_mb")) {
            props.push(("memory_mb", mb.clone()));
        }
        if let Some(size) = Self::root_disk_size_bytes(data) {
            let size_gb = size / (1024 * 1024 * 1024);
            let local_gb = size_gb.saturating_sub(1);
            props.push(("local_gb", Value::from(local_gb)));
        }

        if props.is_empty() {
            return Ok(());
        }
        node_info.update_properties(&props).await
    }
}

/// Maps a CPU feature flag (as reported by the ramdisk) to the capability
/// name it implies once present.
const DEFAULT_CPU_FLAGS_MAPPING: &[(&str, &str)] = &[
    ("vmx", "cpu_vt"),
    ("svm", "cpu_vt"),
    ("aes", "cpu_aes"),
    ("pse", "cpu_hugepages"),
    ("pdpe1gb", "cpu_hugepages_1g"),
    ("smx", "cpu_txt"),
];

/// Derives `boot_mode` (if enabled) and CPU-flag capabilities from
/// submitted inventory, grounded on `plugins/capabilities.py`.
pub struct CapabilitiesHook {
    pub detect_boot_mode: bool,
    pub cpu_flags: HashMap<String, String>,
}

impl Default for CapabilitiesHook {
    fn default() -> Self {
        Self {
            detect_boot_mode: false,
            cpu_flags: DEFAULT_CPU_FLAGS_MAPPING
                .iter()
                .map(|(flag, cap)| (flag.to_string(), cap.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl ProcessingHook for CapabilitiesHook {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    async fn before_update(&self, data: &Value, node_info: &mut NodeInfo) -> PipelineResult<()> {
        let inventory = data.get("inventory");
        let mut caps: HashMap<String, String> = HashMap::new();

        if self.detect_boot_mode {
            if let Some(mode) = inventory
                .and_then(|i| i.get("boot"))
                .and_then(|b| b.get("current_boot_mode"))
                .and_then(Value::as_str)
            {
                caps.insert("boot_mode".to_string(), mode.to_string());
            }
        }

        let flags: HashSet<String> = inventory
            .and_then(|i| i.get("cpu"))
            .and_then(|c| c.get("flags"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        for (flag, name) in &self.cpu_flags {
            if flags.contains(flag) {
                caps.insert(name.clone(), "true".to_string());
            }
        }

        if caps.is_empty() {
            return Ok(());
        }
        node_info.update_capabilities(caps).await
    }
}

/// Counts submitted `pci_devices` entries against a configured
/// `(vendor_id, product_id) -> alias` table, grounded on
/// `plugins/pci_devices.py`.
pub struct PciDevicesHook {
    pub aliases: HashMap<(String, String), String>,
}

#[async_trait]
impl ProcessingHook for PciDevicesHook {
    fn name(&self) -> &'static str {
        "pci_devices"
    }

    async fn before_update(&self, data: &Value, node_info: &mut NodeInfo) -> PipelineResult<()> {
        let Some(devices) = data.get("pci_devices").and_then(Value::as_array) else {
            return Ok(());
        };

        let mut counts: HashMap<String, u64> = HashMap::new();
        for device in devices {
            let vendor = device.get("vendor_id").and_then(Value::as_str).unwrap_or_default();
            let product = device.get("product_id").and_then(Value::as_str).unwrap_or_default();
            if let Some(alias) = self.aliases.get(&(vendor.to_string(), product.to_string())) {
                *counts.entry(alias.clone()).or_insert(0) += 1;
            }
        }

        if counts.is_empty() {
            return Ok(());
        }
        let caps = counts.into_iter().map(|(alias, count)| (alias, count.to_string())).collect();
        node_info.update_capabilities(caps).await
    }
}

/// Populates `data["macs"]` from the submitted inventory and rejects a
/// submission with no usable interface at all. Named for the
/// `"validate_interfaces"` entry in the default pre-hook list; grounded on
/// `utils.get_valid_macs`'s use from `process.py` (the original's own
/// `validate_interfaces` plugin was not among the kept source files, so
/// this reconstructs its one load-bearing contract: a submission must name
/// at least one interface to be identifiable).
#[derive(Default)]
pub struct ValidateInterfacesHook;

#[async_trait]
impl ProcessingHook for ValidateInterfacesHook {
    fn name(&self) -> &'static str {
        "validate_interfaces"
    }

    async fn before_processing(&self, data: &mut Value) -> PipelineResult<()> {
        let macs = valid_macs(data);
        if macs.is_empty() {
            return Err(PipelineError::HookFailure {
                hook: self.name().to_string(),
                reason: "no valid interfaces found in submitted inventory".to_string(),
            });
        }
        if let Some(map) = data.as_object_mut() {
            map.insert("macs".to_string(), Value::Array(macs.into_iter().map(Value::String).collect()));
        }
        Ok(())
    }
}

/// Aborts post-processing if the ramdisk reported an error, grounded on
/// `plugins/rules.py`'s sibling `ramdisk_error` plugin referenced by the
/// default post-hook list.
#[derive(Default)]
pub struct RamdiskErrorHook;

#[async_trait]
impl ProcessingHook for RamdiskErrorHook {
    fn name(&self) -> &'static str {
        "ramdisk_error"
    }

    async fn before_update(&self, data: &Value, _node_info: &mut NodeInfo) -> PipelineResult<()> {
        if let Some(error) = data.get("error").and_then(Value::as_str) {
            if !error.is_empty() {
                return Err(PipelineError::HookFailure {
                    hook: self.name().to_string(),
                    reason: format!("ramdisk reported an error: {error}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use introspector_adapters::InMemoryBareMetal;
    use introspector_core::EntityIdType;
    use introspector_core::NodeUuid;
    use introspector_storage::{MockStorage, StorageTrait};
    use serde_json::json;

    fn node_info_for_tests() -> NodeInfo {
        let baremetal = Arc::new(InMemoryBareMetal::new());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
        NodeInfo::new(uuid, chrono::Utc::now(), storage, baremetal)
    }

    #[tokio::test]
    async fn scheduler_hook_derives_properties_from_inventory() {
        let hook = SchedulerHook;
        let mut node_info = node_info_for_tests();
        let data = json!({
            "inventory": {
                "cpu": {"count": 4, "architecture": "x86_64"},
                "memory": {"physical_mb": 12288},
                "disks": [
                    {"name": "/dev/sda", "model": "foo", "size": 1000u64 * 1024 * 1024 * 1024},
                    {"name": "/dev/sdb", "model": "bar", "size": 20u64 * 1024 * 1024 * 1024}
                ]
            }
        });

        hook.before_update(&data, &mut node_info).await.unwrap();
        let node = node_info.node().await.unwrap();
        assert_eq!(node["properties"]["cpus"], json!(4));
        assert_eq!(node["properties"]["cpu_arch"], "x86_64");
        assert_eq!(node["properties"]["memory_mb"], json!(12288));
        assert_eq!(node["properties"]["local_gb"], json!(999));
    }

    #[tokio::test]
    async fn scheduler_hook_prefers_explicit_root_disk() {
        let hook = SchedulerHook;
        let mut node_info = node_info_for_tests();
        let data = json!({
            "inventory": {"disks": [{"name": "/dev/sda", "size": 20u64 * 1024 * 1024 * 1024}]},
            "root_disk": {"name": "/dev/sdb", "size": 500u64 * 1024 * 1024 * 1024}
        });

        hook.before_update(&data, &mut node_info).await.unwrap();
        let node = node_info.node().await.unwrap();
        assert_eq!(node["properties"]["local_gb"], json!(499));
    }

    #[tokio::test]
    async fn scheduler_hook_is_a_no_op_without_inventory() {
        let hook = SchedulerHook;
        let mut node_info = node_info_for_tests();
        hook.before_update(&json!({}), &mut node_info).await.unwrap();
        let node = node_info.node().await.unwrap();
        assert!(node.get("properties").is_none());
    }

    #[tokio::test]
    async fn capabilities_hook_detects_cpu_flags() {
        let hook = CapabilitiesHook::default();
        let mut node_info = node_info_for_tests();
        let data = json!({"inventory": {"cpu": {"flags": ["vmx", "aes"]}}});

        hook.before_update(&data, &mut node_info).await.unwrap();
        let caps = node_info.node().await.unwrap()["properties"]["capabilities"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(caps.contains("cpu_vt:true"));
        assert!(caps.contains("cpu_aes:true"));
    }

    #[tokio::test]
    async fn capabilities_hook_skips_boot_mode_when_disabled() {
        let hook = CapabilitiesHook { detect_boot_mode: false, ..CapabilitiesHook::default() };
        let mut node_info = node_info_for_tests();
        let data = json!({"inventory": {"boot": {"current_boot_mode": "uefi"}}});

        hook.before_update(&data, &mut node_info).await.unwrap();
        let node = node_info.node().await.unwrap();
        assert!(node.get("properties").is_none());
    }

    #[tokio::test]
    async fn pci_devices_hook_counts_aliased_devices() {
        let mut aliases = HashMap::new();
        aliases.insert(("8086".to_string(), "1521".to_string()), "nic".to_string());
        let hook = PciDevicesHook { aliases };
        let mut node_info = node_info_for_tests();
        let data = json!({
            "pci_devices": [
                {"vendor_id": "8086", "product_id": "1521"},
                {"vendor_id": "8086", "product_id": "1521"},
                {"vendor_id": "dead", "product_id": "beef"}
            ]
        });

        hook.before_update(&data, &mut node_info).await.unwrap();
        let caps = node_info.node().await.unwrap()["properties"]["capabilities"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(caps.contains("nic:2"));
    }

    #[tokio::test]
    async fn registry_skips_unregistered_hook_names_in_pre_hooks() {
        let registry = HookRegistry::new();
        let mut data = json!({});
        let failures = registry.run_pre_hooks(&["scheduler".to_string()], &mut data).await;
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn validate_interfaces_populates_macs_from_inventory() {
        let hook = ValidateInterfacesHook;
        let mut data = json!({"inventory": {"interfaces": [{"mac_address": "aa:bb:cc:dd:ee:ff"}]}});
        hook.before_processing(&mut data).await.unwrap();
        assert_eq!(data["macs"], json!(["aa:bb:cc:dd:ee:ff"]));
    }

    #[tokio::test]
    async fn validate_interfaces_rejects_submission_with_no_macs() {
        let hook = ValidateInterfacesHook;
        let mut data = json!({});
        let err = hook.before_processing(&mut data).await.unwrap_err();
        assert!(matches!(err, PipelineError::HookFailure { .. }));
    }

    #[tokio::test]
    async fn ramdisk_error_hook_fails_post_processing_on_reported_error() {
        let hook = RamdiskErrorHook;
        let mut node_info = node_info_for_tests();
        let data = json!({"error": "ramdisk panic"});
        let err = hook.before_update(&data, &mut node_info).await.unwrap_err();
        assert!(matches!(err, PipelineError::HookFailure { .. }));
    }

    #[tokio::test]
    async fn ramdisk_error_hook_passes_when_no_error_reported() {
        let hook = RamdiskErrorHook;
        let mut node_info = node_info_for_tests();
        let data = json!({});
        hook.before_update(&data, &mut node_info).await.unwrap();
    }
}
