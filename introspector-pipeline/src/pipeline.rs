//! The processing pipeline: `process`, `reapply`, and `abort`, the three
//! entry points a caller drives a node's introspection through.
//!
//! Grounded line-for-line on `process()`/`_process_node()`/
//! `_finish_set_ipmi_credentials()`/`reapply()`/`_reapply()` in
//! `process.py`, generalized from module-level functions closing over a
//! global database session and a global greenthread pool into methods on
//! a `Pipeline` holding its dependencies as `Arc`s (cheap to clone into a
//! background task, the way the original closes a greenthread over
//! `node_info` by reference).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use introspector_adapters::{BareMetalClient, FirewallUpdater, ObjectStore, RamdiskLogContext, RamdiskLogSink};
use introspector_core::{
    CoordinatorConfig, CoreError, JsonPatch, LockRegistry, NodeUuid, PipelineError, StoreData,
};
use introspector_storage::StorageTrait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cache::NodeCache;
use crate::error::{map_adapter_error, map_rules_error, map_storage_error, PipelineResult};
use crate::executor::BackgroundExecutor;
use crate::hooks::HookRegistry;
use crate::node_info::NodeInfo;
use crate::settler;
use crate::submission;

#[derive(Clone)]
pub struct Pipeline {
    storage: Arc<dyn StorageTrait>,
    baremetal: Arc<dyn BareMetalClient>,
    objectstore: Arc<dyn ObjectStore>,
    firewall: Arc<dyn FirewallUpdater>,
    ramdisk_logs: Option<Arc<dyn RamdiskLogSink>>,
    locks: Arc<LockRegistry>,
    hooks: Arc<HookRegistry>,
    config: Arc<CoordinatorConfig>,
    cache: Arc<NodeCache>,
    executor: Arc<BackgroundExecutor>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        baremetal: Arc<dyn BareMetalClient>,
        objectstore: Arc<dyn ObjectStore>,
        firewall: Arc<dyn FirewallUpdater>,
        ramdisk_logs: Option<Arc<dyn RamdiskLogSink>>,
        hooks: Arc<HookRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        let config = Arc::new(config);
        let locks = Arc::new(LockRegistry::new());
        let cache = Arc::new(NodeCache::new(
            storage.clone(),
            baremetal.clone(),
            locks.clone(),
            (*config).clone(),
        ));
        let executor = Arc::new(BackgroundExecutor::new(config.background_executor_size));
        Self { storage, baremetal, objectstore, firewall, ramdisk_logs, locks, hooks, config, cache, executor }
    }

    /// `process(submission)`: identifies the node the submission belongs
    /// to, runs the full pre/post hook and rule sequence against it, and
    /// either hands back a credential-settle acknowledgement or an
    /// acknowledgement of the node being queued to finish.
    pub async fn process(&self, submission: Value) -> PipelineResult<Value> {
        let raw = submission.clone();
        let mut data = submission;

        let pre_failures = self.hooks.run_pre_hooks(&self.config.pre_hooks, &mut data).await;
        let mut failures: Vec<String> =
            pre_failures.iter().map(|(hook, err)| format!("{hook}: {err}")).collect();

        let (node_info_opt, identify_failures) = self.identify(&data).await;
        failures.extend(identify_failures);
        let mut node_info = node_info_opt;

        if !failures.is_empty() || node_info.is_none() {
            if let Some(info) = node_info.as_mut() {
                let _ = info.finish(Utc::now(), Some(failures.join("; "))).await;
            }
            self.store_logs_best_effort(&data, node_info.as_ref().map(|n| n.uuid)).await;
            return Err(PipelineError::ProcessingFailed { reasons: failures });
        }
        let mut node_info = node_info.unwrap();
        let uuid = node_info.uuid;

        if node_info.finished_at.is_some() {
            return Err(PipelineError::Core(CoreError::AlreadyFinished { uuid }));
        }

        if matches!(self.config.store_data, StoreData::Swift) {
            let objectstore = self.objectstore.clone();
            let raw_clone = raw.clone();
            let delete_after = self.config.delete_after;
            self.executor.spawn(async move {
                if let Err(err) = objectstore
                    .put(uuid, Some(submission::UNPROCESSED_SUFFIX), &raw_clone, delete_after)
                    .await
                {
                    warn!(%uuid, error = %err, "failed to archive unprocessed introspection data");
                }
            });
        }

        if let Err(err) = node_info.node().await {
            let _ = node_info.finish(Utc::now(), Some(err.to_string())).await;
            self.store_logs_best_effort(&data, Some(uuid)).await;
            node_info.release_lock();
            return Err(err);
        }

        if let Err(err) = self.run_post_phase(&data, &mut node_info).await {
            let _ = node_info.finish(Utc::now(), Some(err.to_string())).await;
            self.store_logs_best_effort(&data, Some(uuid)).await;
            node_info.release_lock();
            return Err(err);
        }

        let credentials = match node_info.options().await {
            Ok(options) => options.get("new_ipmi_credentials").cloned(),
            Err(err) => {
                let _ = node_info.finish(Utc::now(), Some(err.to_string())).await;
                node_info.release_lock();
                return Err(err);
            }
        };

        if let Some(raw_credentials) = credentials {
            let Some((username, password)) = parse_ipmi_credentials(&raw_credentials) else {
                let message = "malformed new_ipmi_credentials option".to_string();
                let _ = node_info.finish(Utc::now(), Some(message.clone())).await;
                node_info.release_lock();
                return Err(PipelineError::ExternalServiceError { reason: message });
            };

            let patches = vec![
                JsonPatch::add("/driver_info/ipmi_username", Value::String(username.clone())),
                JsonPatch::add("/driver_info/ipmi_password", Value::String(password.clone())),
            ];
            if let Err(err) = node_info.patch(patches).await {
                let _ = node_info.finish(Utc::now(), Some(err.to_string())).await;
                node_info.release_lock();
                return Err(err);
            }

            info!(%uuid, "settling new IPMI credentials in the background");
            let baremetal = self.baremetal.clone();
            let power_off = self.config.power_off;
            self.executor.spawn(async move {
                settler::settle_credentials(node_info, baremetal.as_ref(), power_off).await;
            });

            return Ok(json!({
                "uuid": uuid.to_string(),
                "ipmi_setup_credentials": true,
                "ipmi_username": username,
                "ipmi_password": password,
            }));
        }

        let power_off = self.config.power_off;
        self.executor.spawn(async move {
            settler::finish(node_info, power_off).await;
        });
        Ok(json!({ "uuid": uuid.to_string() }))
    }

    /// `reapply(uuid)`: re-runs the full pre/post sequence against the
    /// node's last `UNPROCESSED` payload, without touching power state.
    pub async fn reapply(&self, uuid: NodeUuid) -> PipelineResult<()> {
        let mut node_info = self.cache.get_node(uuid, false).await?;
        if !node_info.acquire_lock(&self.locks, false).await {
            return Err(PipelineError::Core(CoreError::Locked { uuid }));
        }

        let pipeline = self.clone();
        self.executor.spawn(async move {
            pipeline.reapply_task(node_info).await;
        });
        Ok(())
    }

    async fn reapply_task(&self, mut node_info: NodeInfo) {
        let uuid = node_info.uuid;
        let data = match self.objectstore.get(uuid, Some(submission::UNPROCESSED_SUFFIX)).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%uuid, error = %err, "reapply: no unprocessed data available");
                let _ = node_info.finish(Utc::now(), Some(format!("reapply failed: {err}"))).await;
                node_info.release_lock();
                return;
            }
        };

        let mut data = data;
        let pre_failures = self.hooks.run_pre_hooks(&self.config.pre_hooks, &mut data).await;
        if !pre_failures.is_empty() {
            let message =
                pre_failures.into_iter().map(|(h, e)| format!("{h}: {e}")).collect::<Vec<_>>().join("; ");
            let _ = node_info.finish(Utc::now(), Some(message)).await;
            node_info.release_lock();
            return;
        }

        if let Err(err) = self.run_post_phase(&data, &mut node_info).await {
            let _ = node_info.finish(Utc::now(), Some(err.to_string())).await;
            node_info.release_lock();
            return;
        }

        settler::finish(node_info, false).await;
    }

    /// `abort(uuid)`: cancels an in-flight introspection. Non-blocking lock
    /// acquisition; a held lock fails the request rather than waiting.
    pub async fn abort(&self, uuid: NodeUuid) -> PipelineResult<()> {
        let mut node_info = self.cache.get_node(uuid, false).await?;
        if node_info.finished_at.is_some() {
            return Err(PipelineError::Core(CoreError::AlreadyFinished { uuid }));
        }
        if !node_info.acquire_lock(&self.locks, false).await {
            return Err(PipelineError::Core(CoreError::Locked { uuid }));
        }
        node_info.finish(Utc::now(), Some("Canceled by operator".to_string())).await?;
        node_info.release_lock();
        Ok(())
    }

    pub async fn clean_up(&self) -> PipelineResult<Vec<NodeUuid>> {
        self.cache.clean_up().await
    }

    pub async fn delete_nodes_not_in_list(&self, active_uuids: &HashSet<NodeUuid>) -> PipelineResult<()> {
        self.cache.delete_nodes_not_in_list(active_uuids).await
    }

    /// Identification step: `find_node` by BMC address/MAC, falling back to
    /// the node-not-found hook on a cache miss. Returns the failures
    /// accumulated along the way rather than short-circuiting, the same as
    /// the original's `_find_node_info` collecting into a shared list.
    async fn identify(&self, data: &Value) -> (Option<NodeInfo>, Vec<String>) {
        let mut failures = Vec::new();
        let mut attrs: Vec<(String, String)> = Vec::new();
        if let Some(bmc) = submission::ipmi_address(data) {
            attrs.push(("bmc_address".to_string(), bmc));
        }
        for mac in submission::valid_macs(data) {
            attrs.push(("mac".to_string(), mac));
        }

        match self.cache.find_node(&attrs).await {
            Ok(node_info) => (Some(node_info), failures),
            Err(PipelineError::Core(CoreError::NotFoundInCache)) => {
                let Some(hook) = self.hooks.node_not_found_hook() else {
                    failures.push("no node matched submitted lookup attributes".to_string());
                    return (None, failures);
                };
                match hook.handle(data).await {
                    Ok(Some(mut node_info)) => {
                        if !node_info.acquire_lock(&self.locks, true).await {
                            failures.push("failed to acquire lock for synthesized node".to_string());
                        }
                        (Some(node_info), failures)
                    }
                    Ok(None) => {
                        failures.push("node-not-found hook did not synthesize a node".to_string());
                        (None, failures)
                    }
                    Err(err) => {
                        failures.push(format!("node-not-found hook failed: {err}"));
                        (None, failures)
                    }
                }
            }
            Err(err) => {
                failures.push(format!("node lookup failed: {err}"));
                (None, failures)
            }
        }
    }

    /// `_process_node`: steps 9a-9g of the processing contract.
    async fn run_post_phase(&self, data: &Value, node_info: &mut NodeInfo) -> PipelineResult<()> {
        self.check_provision_state(node_info).await?;

        let existing_ports = node_info.ports().await?.clone();
        for mac in submission::valid_macs(data) {
            if !existing_ports.contains_key(&mac) {
                node_info.create_port(&mac).await?;
            }
        }

        self.hooks.run_post_hooks(&self.config.post_hooks, data, node_info).await?;

        if matches!(self.config.store_data, StoreData::Swift) {
            let filtered = submission::filter_excluded_keys(data);
            let name = self
                .objectstore
                .put(node_info.uuid, None, &filtered, self.config.delete_after)
                .await
                .map_err(map_adapter_error)?;
            if !self.config.store_data_location.is_empty() {
                node_info
                    .patch(vec![JsonPatch::add(
                        format!("/extra/{}", self.config.store_data_location),
                        Value::String(name),
                    )])
                    .await?;
            }
        }

        self.firewall.update_filters().await.map_err(map_adapter_error)?;

        node_info.invalidate_cache();
        // `node://` rule conditions read the cached node synchronously
        // (`RuleTarget::get_by_path`/`node_snapshot`), so the invalidated
        // cache must be refilled before handing `node_info` to the rules
        // engine, or every such condition would see a missing node.
        node_info.node().await?;

        let rules = self.storage.list_enabled_rules().await.map_err(map_storage_error)?;
        introspector_rules::apply_rules(&rules, data, node_info).await.map_err(map_rules_error)?;

        if self.config.always_store_ramdisk_logs {
            self.store_logs_best_effort(data, Some(node_info.uuid)).await;
        }

        Ok(())
    }

    /// Rejects provisioning states a freshly-ramdisk-booted node has no
    /// business being in while introspection data is applied (the node is
    /// mid-deploy or being torn down elsewhere). The original's equivalent
    /// check lives outside the files kept for this rework; this is a
    /// conservative reconstruction, recorded as an open decision.
    async fn check_provision_state(&self, node_info: &mut NodeInfo) -> PipelineResult<()> {
        const DISALLOWED: &[&str] = &["active", "deploying", "deploy failed", "deleting", "rescue"];
        let uuid = node_info.uuid;
        let node = node_info.node().await?;
        if let Some(state) = node.get("provision_state").and_then(Value::as_str) {
            if DISALLOWED.contains(&state) {
                return Err(PipelineError::ExternalServiceError {
                    reason: format!("node {uuid} is in provision state '{state}', not eligible for introspection"),
                });
            }
        }
        Ok(())
    }

    async fn store_logs_best_effort(&self, data: &Value, uuid: Option<NodeUuid>) {
        let Some(sink) = self.ramdisk_logs.as_ref() else { return };
        let Some(logs) = data.get("logs").and_then(Value::as_str) else { return };
        let mac = submission::pxe_mac(data);
        let bmc = submission::ipmi_address(data);
        let ctx = RamdiskLogContext { uuid, mac: mac.as_deref(), bmc_address: bmc.as_deref(), now: Utc::now() };
        if let Err(err) = sink.store(&ctx, logs) {
            warn!(?uuid, error = %err, "failed to store ramdisk logs");
        }
    }
}

/// `new_ipmi_credentials` is stored as a two-element `[username, password]`
/// array, mirroring the original's tuple-unpacked option value.
fn parse_ipmi_credentials(value: &Value) -> Option<(String, String)> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    Some((arr[0].as_str()?.to_string(), arr[1].as_str()?.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use introspector_adapters::{InMemoryBareMetal, InMemoryObjectStore, NoopFirewallUpdater};
    use introspector_core::EntityIdType;
    use introspector_storage::MockStorage;
    use serde_json::json;

    fn pipeline_with(config: CoordinatorConfig) -> (Pipeline, Arc<InMemoryBareMetal>, Arc<dyn StorageTrait>) {
        let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
        let baremetal = Arc::new(InMemoryBareMetal::new());
        let objectstore = Arc::new(InMemoryObjectStore::new());
        let firewall = Arc::new(NoopFirewallUpdater);
        let hooks = Arc::new(HookRegistry::new());
        let pipeline = Pipeline::new(
            storage.clone(),
            baremetal.clone(),
            objectstore,
            firewall,
            None,
            hooks,
            config,
        );
        (pipeline, baremetal, storage)
    }

    #[tokio::test]
    async fn process_with_no_matching_node_and_no_hook_fails_with_processing_failed() {
        let (pipeline, _baremetal, _storage) = pipeline_with(CoordinatorConfig::default());
        let submission = json!({"inventory": {"interfaces": [{"mac_address": "aa:bb:cc:dd:ee:ff"}]}});
        let err = pipeline.process(submission).await.unwrap_err();
        assert!(matches!(err, PipelineError::ProcessingFailed { .. }));
    }

    #[tokio::test]
    async fn process_finishes_a_matched_node_without_credentials() {
        let (pipeline, baremetal, storage) = pipeline_with(CoordinatorConfig { power_off: false, ..Default::default() });
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        storage
            .insert_node(&introspector_core::NodeRecord::new(uuid, Utc::now()))
            .await
            .unwrap();
        storage
            .insert_attributes(uuid, &[("mac".to_string(), "aa:bb:cc:dd:ee:ff".to_string())])
            .await
            .unwrap();

        let submission = json!({"inventory": {"interfaces": [{"mac_address": "aa:bb:cc:dd:ee:ff"}]}});
        let result = pipeline.process(submission).await.unwrap();
        assert_eq!(result["uuid"], uuid.to_string());

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let record = storage.get_node(uuid).await.unwrap().unwrap();
        assert!(record.finished_at.is_some());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn process_returns_credential_ack_and_settles_in_background() {
        let (pipeline, baremetal, storage) = pipeline_with(CoordinatorConfig { power_off: false, ..Default::default() });
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        storage
            .insert_node(&introspector_core::NodeRecord::new(uuid, Utc::now()))
            .await
            .unwrap();
        storage
            .insert_attributes(uuid, &[("mac".to_string(), "aa:bb:cc:dd:ee:ff".to_string())])
            .await
            .unwrap();
        storage
            .set_option(uuid, "new_ipmi_credentials", json!(["admin", "hunter2"]))
            .await
            .unwrap();

        let submission = json!({"inventory": {"interfaces": [{"mac_address": "aa:bb:cc:dd:ee:ff"}]}});
        let result = pipeline.process(submission).await.unwrap();
        assert_eq!(result["ipmi_setup_credentials"], true);
        assert_eq!(result["ipmi_username"], "admin");

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let record = storage.get_node(uuid).await.unwrap().unwrap();
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn process_rejects_already_finished_node() {
        let (pipeline, baremetal, storage) = pipeline_with(CoordinatorConfig::default());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        storage
            .insert_node(&introspector_core::NodeRecord::new(uuid, Utc::now()))
            .await
            .unwrap();
        storage
            .insert_attributes(uuid, &[("mac".to_string(), "aa:bb:cc:dd:ee:ff".to_string())])
            .await
            .unwrap();
        storage.finish_node(uuid, Utc::now(), None).await.unwrap();

        let submission = json!({"inventory": {"interfaces": [{"mac_address": "aa:bb:cc:dd:ee:ff"}]}});
        let err = pipeline.process(submission).await.unwrap_err();
        assert!(matches!(err, PipelineError::Core(CoreError::AlreadyFinished { .. })));
    }

    #[tokio::test]
    async fn abort_marks_node_canceled_and_clears_lookup_state() {
        let (pipeline, baremetal, storage) = pipeline_with(CoordinatorConfig::default());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        storage
            .insert_node(&introspector_core::NodeRecord::new(uuid, Utc::now()))
            .await
            .unwrap();
        storage
            .insert_attributes(uuid, &[("mac".to_string(), "aa:bb:cc:dd:ee:ff".to_string())])
            .await
            .unwrap();

        pipeline.abort(uuid).await.unwrap();

        let record = storage.get_node(uuid).await.unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("Canceled by operator"));
        assert!(storage.list_attributes(uuid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_on_already_finished_node_fails() {
        let (pipeline, baremetal, storage) = pipeline_with(CoordinatorConfig::default());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        storage
            .insert_node(&introspector_core::NodeRecord::new(uuid, Utc::now()))
            .await
            .unwrap();
        storage.finish_node(uuid, Utc::now(), None).await.unwrap();

        let err = pipeline.abort(uuid).await.unwrap_err();
        assert!(matches!(err, PipelineError::Core(CoreError::AlreadyFinished { .. })));
    }

    #[tokio::test]
    async fn reapply_reprocesses_unprocessed_blob() {
        let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
        let baremetal = Arc::new(InMemoryBareMetal::new());
        let objectstore = Arc::new(InMemoryObjectStore::new());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        storage
            .insert_node(&introspector_core::NodeRecord::new(uuid, Utc::now()))
            .await
            .unwrap();
        objectstore
            .put(uuid, Some(submission::UNPROCESSED_SUFFIX), &json!({"inventory": {}}), None)
            .await
            .unwrap();

        let pipeline = Pipeline::new(
            storage.clone(),
            baremetal.clone(),
            objectstore,
            Arc::new(NoopFirewallUpdater),
            None,
            Arc::new(HookRegistry::new()),
            CoordinatorConfig { power_off: true, ..Default::default() },
        );

        pipeline.reapply(uuid).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let record = storage.get_node(uuid).await.unwrap().unwrap();
        assert!(record.finished_at.is_some());
        assert!(record.error.is_none());
    }
}
