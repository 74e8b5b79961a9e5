//! Node cache: the `NodeInfo` factory backed by storage, locks, and the
//! bare-metal adapter.
//!
//! Grounded on the module-level functions in `node_cache.py` —
//! `add_node`, `get_node`, `find_node`, `delete_nodes_not_in_list`,
//! `clean_up` — generalized from free functions closing over a global
//! database session into methods on a `NodeCache` holding its
//! dependencies explicitly.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use introspector_adapters::BareMetalClient;
use introspector_core::{CoordinatorConfig, CoreError, LockRegistry, NodeRecord, NodeUuid, PipelineError};
use introspector_storage::StorageTrait;
use tracing::warn;

use crate::error::{map_storage_error, PipelineResult};
use crate::node_info::NodeInfo;

pub struct NodeCache {
    storage: Arc<dyn StorageTrait>,
    baremetal: Arc<dyn BareMetalClient>,
    locks: Arc<LockRegistry>,
    config: CoordinatorConfig,
}

impl NodeCache {
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        baremetal: Arc<dyn BareMetalClient>,
        locks: Arc<LockRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { storage, baremetal, locks, config }
    }

    /// Starts tracking a node under introspection. Drops any pre-existing
    /// row for the same uuid first, the same as the original's
    /// `_delete_node` call before inserting.
    pub async fn add_node(
        &self,
        uuid: NodeUuid,
        attributes: Vec<(String, Vec<String>)>,
    ) -> PipelineResult<NodeInfo> {
        self.storage.delete_node(uuid).await.map_err(map_storage_error)?;

        let started_at = Utc::now();
        let record = NodeRecord::new(uuid, started_at);
        self.storage.insert_node(&record).await.map_err(map_storage_error)?;

        let mut node_info = NodeInfo::new(uuid, started_at, self.storage.clone(), self.baremetal.clone());
        for (name, values) in attributes {
            node_info.add_attribute(&name, values).await?;
        }
        Ok(node_info)
    }

    /// Fetches a `NodeInfo` by uuid, optionally under the registry lock.
    /// On any error after acquiring the lock, the lock is released before
    /// the error propagates — the original's `excutils.save_and_reraise_exception`
    /// pattern around `lock.release()`.
    pub async fn get_node(&self, uuid: NodeUuid, locked: bool) -> PipelineResult<NodeInfo> {
        let lock = if locked { Some(self.locks.acquire(uuid).await) } else { None };

        match self.storage.get_node(uuid).await.map_err(map_storage_error) {
            Ok(Some(record)) => {
                let mut node_info =
                    NodeInfo::new(uuid, record.started_at, self.storage.clone(), self.baremetal.clone());
                node_info.finished_at = record.finished_at;
                node_info.error = record.error;
                if let Some(lock) = lock {
                    node_info.attach_lock(lock);
                }
                Ok(node_info)
            }
            Ok(None) => {
                if let Some(lock) = lock {
                    lock.release();
                }
                Err(PipelineError::Core(CoreError::NotFound { uuid }))
            }
            Err(err) => {
                if let Some(lock) = lock {
                    lock.release();
                }
                Err(err)
            }
        }
    }

    /// Finds the single active node matching any of the given lookup
    /// attributes, acquiring its lock. Fails with `NotFoundInCache` if no
    /// active node matches, or `AmbiguousLookup` if more than one does.
    pub async fn find_node(&self, attributes: &[(String, String)]) -> PipelineResult<NodeInfo> {
        let non_empty: Vec<(String, String)> =
            attributes.iter().filter(|(_, v)| !v.is_empty()).cloned().collect();

        let found = self
            .storage
            .find_uuids_by_attributes(&non_empty)
            .await
            .map_err(map_storage_error)?;

        match found.len() {
            0 => Err(PipelineError::Core(CoreError::NotFoundInCache)),
            1 => self.get_node(found[0], true).await,
            _ => Err(PipelineError::Core(CoreError::AmbiguousLookup)),
        }
    }

    /// Drops every cached node whose uuid is absent from `active_uuids`,
    /// the set currently enrolled in the bare-metal service.
    pub async fn delete_nodes_not_in_list(&self, active_uuids: &HashSet<NodeUuid>) -> PipelineResult<()> {
        let cached = self.storage.list_all_uuids().await.map_err(map_storage_error)?;
        for uuid in cached {
            if !active_uuids.contains(&uuid) {
                warn!(%uuid, "node no longer present upstream, dropping from cache");
                let _lock = self.locks.acquire(uuid).await;
                self.storage.delete_node(uuid).await.map_err(map_storage_error)?;
            }
        }
        Ok(())
    }

    /// Finishes timed-out nodes and drops stale finished rows, mirroring
    /// `clean_up`'s two passes. Returns the uuids that were timed out in
    /// this pass.
    pub async fn clean_up(&self) -> PipelineResult<Vec<NodeUuid>> {
        let keep_cutoff = Utc::now() - self.config.node_status_keep_time();
        for uuid in self
            .storage
            .list_finished_before(keep_cutoff)
            .await
            .map_err(map_storage_error)?
        {
            self.storage.delete_node(uuid).await.map_err(map_storage_error)?;
        }

        if self.config.timeout_disabled() {
            return Ok(vec![]);
        }

        let timeout_cutoff = Utc::now() - chrono::Duration::seconds(self.config.timeout);
        let candidates = self
            .storage
            .list_unfinished_started_before(timeout_cutoff)
            .await
            .map_err(map_storage_error)?;
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        warn!(count = candidates.len(), "introspection timed out for nodes");
        let mut timed_out = Vec::new();
        for uuid in candidates {
            let mut node_info = match self.get_node(uuid, true).await {
                Ok(info) => info,
                Err(_) => continue,
            };
            if node_info.finished_at.is_some() || node_info.started_at > timeout_cutoff {
                node_info.release_lock();
                continue;
            }
            node_info.finish(Utc::now(), Some("Introspection timeout".to_string())).await?;
            node_info.release_lock();
            timed_out.push(uuid);
        }
        Ok(timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use introspector_adapters::InMemoryBareMetal;
    use introspector_core::EntityIdType;
    use introspector_storage::MockStorage;
    use serde_json::json;

    fn cache_with_config(config: CoordinatorConfig) -> (NodeCache, Arc<InMemoryBareMetal>) {
        let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
        let baremetal = Arc::new(InMemoryBareMetal::new());
        let locks = Arc::new(LockRegistry::new());
        (NodeCache::new(storage, baremetal.clone(), locks, config), baremetal)
    }

    #[tokio::test]
    async fn add_node_then_get_node_round_trips() {
        let (cache, baremetal) = cache_with_config(CoordinatorConfig::default());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));

        cache.add_node(uuid, vec![("mac".to_string(), vec!["aa:bb:cc:dd:ee:ff".to_string()])]).await.unwrap();
        let fetched = cache.get_node(uuid, false).await.unwrap();
        assert_eq!(fetched.uuid, uuid);
        assert!(!fetched.is_locked());
    }

    #[tokio::test]
    async fn get_node_missing_uuid_is_not_found() {
        let (cache, _baremetal) = cache_with_config(CoordinatorConfig::default());
        let err = cache.get_node(NodeUuid::now_v7(), false).await.unwrap_err();
        assert!(matches!(err, PipelineError::Core(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn find_node_locates_by_attribute() {
        let (cache, baremetal) = cache_with_config(CoordinatorConfig::default());
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        cache.add_node(uuid, vec![("mac".to_string(), vec!["aa:bb:cc:dd:ee:ff".to_string()])]).await.unwrap();

        let found = cache
            .find_node(&[("mac".to_string(), "aa:bb:cc:dd:ee:ff".to_string())])
            .await
            .unwrap();
        assert_eq!(found.uuid, uuid);
        assert!(found.is_locked());
    }

    #[tokio::test]
    async fn find_node_with_no_match_is_not_found_in_cache() {
        let (cache, _baremetal) = cache_with_config(CoordinatorConfig::default());
        let err = cache
            .find_node(&[("mac".to_string(), "aa:bb:cc:dd:ee:ff".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Core(CoreError::NotFoundInCache)));
    }

    #[tokio::test]
    async fn clean_up_times_out_stale_nodes() {
        let config = CoordinatorConfig { timeout: 1, ..CoordinatorConfig::default() };
        let (cache, baremetal) = cache_with_config(config);
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        cache.add_node(uuid, vec![]).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let timed_out = cache.clean_up().await.unwrap();
        assert_eq!(timed_out, vec![uuid]);
    }

    #[tokio::test]
    async fn clean_up_is_noop_when_timeout_disabled() {
        let config = CoordinatorConfig { timeout: 0, ..CoordinatorConfig::default() };
        let (cache, baremetal) = cache_with_config(config);
        let uuid = NodeUuid::now_v7();
        baremetal.seed_node(uuid, json!({}));
        cache.add_node(uuid, vec![]).await.unwrap();

        let timed_out = cache.clean_up().await.unwrap();
        assert!(timed_out.is_empty());
    }

    #[tokio::test]
    async fn delete_nodes_not_in_list_drops_stale_entries() {
        let (cache, baremetal) = cache_with_config(CoordinatorConfig::default());
        let kept = NodeUuid::now_v7();
        let dropped = NodeUuid::now_v7();
        baremetal.seed_node(kept, json!({}));
        baremetal.seed_node(dropped, json!({}));
        cache.add_node(kept, vec![]).await.unwrap();
        cache.add_node(dropped, vec![]).await.unwrap();

        let mut active = HashSet::new();
        active.insert(kept);
        cache.delete_nodes_not_in_list(&active).await.unwrap();

        assert!(cache.get_node(kept, false).await.is_ok());
        assert!(cache.get_node(dropped, false).await.is_err());
    }
}
