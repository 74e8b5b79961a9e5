//! In-memory `StorageTrait` implementation for tests.

use crate::{StorageResult, StorageTrait};
use async_trait::async_trait;
use introspector_core::{LookupAttribute, NodeRecord, NodeUuid, Rule, RuleUuid, StorageError, Timestamp};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe in-memory storage backend. Mirrors the shape of a real
/// database closely enough that the node cache's business logic (built on
/// top of `StorageTrait`) can be exercised without Postgres.
#[derive(Default)]
pub struct MockStorage {
    nodes: RwLock<HashMap<NodeUuid, NodeRecord>>,
    attributes: RwLock<Vec<LookupAttribute>>,
    options: RwLock<HashMap<(NodeUuid, String), Value>>,
    rules: RwLock<HashMap<RuleUuid, Rule>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.nodes.write().unwrap().clear();
        self.attributes.write().unwrap().clear();
        self.options.write().unwrap().clear();
        self.rules.write().unwrap().clear();
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.read().unwrap().len()
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn insert_node(&self, record: &NodeRecord) -> StorageResult<()> {
        let mut nodes = self.nodes.write().map_err(|_| StorageError::LockPoisoned)?;
        if nodes.contains_key(&record.uuid) {
            return Err(StorageError::InsertFailed {
                uuid: record.uuid,
                reason: "node already exists".to_string(),
            });
        }
        nodes.insert(record.uuid, record.clone());
        Ok(())
    }

    async fn get_node(&self, uuid: NodeUuid) -> StorageResult<Option<NodeRecord>> {
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(nodes.get(&uuid).cloned())
    }

    async fn delete_node(&self, uuid: NodeUuid) -> StorageResult<()> {
        self.nodes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&uuid);
        self.delete_attributes(uuid).await?;
        self.delete_options(uuid).await?;
        Ok(())
    }

    async fn finish_node(
        &self,
        uuid: NodeUuid,
        finished_at: Timestamp,
        error: Option<String>,
    ) -> StorageResult<()> {
        let mut nodes = self.nodes.write().map_err(|_| StorageError::LockPoisoned)?;
        let record = nodes
            .get_mut(&uuid)
            .ok_or(StorageError::NotFound { uuid })?;
        record.finished_at = Some(finished_at);
        record.error = error;
        Ok(())
    }

    async fn list_all_uuids(&self) -> StorageResult<Vec<NodeUuid>> {
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(nodes.keys().copied().collect())
    }

    async fn list_finished_before(&self, cutoff: Timestamp) -> StorageResult<Vec<NodeUuid>> {
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(nodes
            .values()
            .filter(|n| n.finished_at.is_some_and(|f| f < cutoff))
            .map(|n| n.uuid)
            .collect())
    }

    async fn list_unfinished_started_before(&self, cutoff: Timestamp) -> StorageResult<Vec<NodeUuid>> {
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(nodes
            .values()
            .filter(|n| n.finished_at.is_none() && n.started_at < cutoff)
            .map(|n| n.uuid)
            .collect())
    }

    async fn insert_attributes(&self, uuid: NodeUuid, attrs: &[(String, String)]) -> StorageResult<()> {
        let mut attributes = self.attributes.write().map_err(|_| StorageError::LockPoisoned)?;
        for (name, value) in attrs {
            if name.is_empty() || value.is_empty() {
                continue;
            }
            attributes.push(LookupAttribute {
                name: name.clone(),
                value: value.clone(),
                uuid,
            });
        }
        Ok(())
    }

    async fn list_attributes(&self, uuid: NodeUuid) -> StorageResult<HashMap<String, Vec<String>>> {
        let attributes = self.attributes.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for attr in attributes.iter().filter(|a| a.uuid == uuid) {
            out.entry(attr.name.clone()).or_default().push(attr.value.clone());
        }
        Ok(out)
    }

    async fn delete_attributes(&self, uuid: NodeUuid) -> StorageResult<()> {
        let mut attributes = self.attributes.write().map_err(|_| StorageError::LockPoisoned)?;
        attributes.retain(|a| a.uuid != uuid);
        Ok(())
    }

    async fn find_uuids_by_attributes(&self, attrs: &[(String, String)]) -> StorageResult<Vec<NodeUuid>> {
        let attributes = self.attributes.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut hits: Vec<NodeUuid> = Vec::new();
        for (name, value) in attrs {
            for attr in attributes.iter() {
                if attr.name == *name && attr.value == *value && !hits.contains(&attr.uuid) {
                    hits.push(attr.uuid);
                }
            }
        }
        Ok(hits)
    }

    async fn attribute_owned_by_other_active_node(
        &self,
        name: &str,
        value: &str,
        uuid: NodeUuid,
    ) -> StorageResult<bool> {
        let attributes = self.attributes.read().map_err(|_| StorageError::LockPoisoned)?;
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(attributes.iter().any(|a| {
            a.name == name
                && a.value == value
                && a.uuid != uuid
                && nodes.get(&a.uuid).is_some_and(|n| !n.is_finished())
        }))
    }

    async fn set_option(&self, uuid: NodeUuid, name: &str, value: Value) -> StorageResult<()> {
        self.options
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert((uuid, name.to_string()), value);
        Ok(())
    }

    async fn list_options(&self, uuid: NodeUuid) -> StorageResult<HashMap<String, Value>> {
        let options = self.options.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(options
            .iter()
            .filter(|((u, _), _)| *u == uuid)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect())
    }

    async fn delete_options(&self, uuid: NodeUuid) -> StorageResult<()> {
        self.options
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .retain(|(u, _), _| *u != uuid);
        Ok(())
    }

    async fn insert_rule(&self, rule: &Rule) -> StorageResult<()> {
        self.rules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(rule.uuid, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, uuid: RuleUuid) -> StorageResult<Option<Rule>> {
        Ok(self
            .rules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&uuid)
            .cloned())
    }

    async fn list_enabled_rules(&self) -> StorageResult<Vec<Rule>> {
        Ok(self
            .rules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .values()
            .filter(|r| r.is_enabled())
            .cloned()
            .collect())
    }

    async fn delete_rule(&self, uuid: RuleUuid) -> StorageResult<()> {
        self.rules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use introspector_core::EntityIdType;
    use chrono::Utc;

    fn uuid() -> NodeUuid {
        NodeUuid::now_v7()
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let storage = MockStorage::new();
        let record = NodeRecord::new(uuid(), Utc::now());
        storage.insert_node(&record).await.unwrap();

        let fetched = storage.get_node(record.uuid).await.unwrap();
        assert_eq!(fetched, Some(record));
    }

    #[tokio::test]
    async fn get_missing_node_returns_none() {
        let storage = MockStorage::new();
        assert_eq!(storage.get_node(uuid()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let storage = MockStorage::new();
        let record = NodeRecord::new(uuid(), Utc::now());
        storage.insert_node(&record).await.unwrap();

        let err = storage.insert_node(&record).await.unwrap_err();
        assert!(matches!(err, StorageError::InsertFailed { .. }));
    }

    #[tokio::test]
    async fn finish_unknown_node_fails_with_not_found() {
        let storage = MockStorage::new();
        let err = storage
            .finish_node(uuid(), Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_node_also_clears_attributes_and_options() {
        let storage = MockStorage::new();
        let id = uuid();
        storage.insert_node(&NodeRecord::new(id, Utc::now())).await.unwrap();
        storage
            .insert_attributes(id, &[("mac".to_string(), "aa:bb".to_string())])
            .await
            .unwrap();
        storage.set_option(id, "new_ipmi_password", Value::String("x".into())).await.unwrap();

        storage.delete_node(id).await.unwrap();

        assert!(storage.list_attributes(id).await.unwrap().is_empty());
        assert!(storage.list_options(id).await.unwrap().is_empty());
        assert_eq!(storage.get_node(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_uuids_by_attributes_returns_distinct_hits() {
        let storage = MockStorage::new();
        let id = uuid();
        storage
            .insert_attributes(
                id,
                &[
                    ("mac".to_string(), "aa:bb".to_string()),
                    ("bmc_address".to_string(), "1.2.3.4".to_string()),
                ],
            )
            .await
            .unwrap();

        let hits = storage
            .find_uuids_by_attributes(&[
                ("mac".to_string(), "aa:bb".to_string()),
                ("bmc_address".to_string(), "1.2.3.4".to_string()),
            ])
            .await
            .unwrap();
        assert_eq!(hits, vec![id]);
    }

    #[tokio::test]
    async fn attribute_owned_by_other_active_node_ignores_finished_nodes() {
        let storage = MockStorage::new();
        let id_a = uuid();
        let id_b = uuid();
        storage.insert_node(&NodeRecord::new(id_a, Utc::now())).await.unwrap();
        storage
            .insert_attributes(id_a, &[("mac".to_string(), "aa:bb".to_string())])
            .await
            .unwrap();

        assert!(
            storage
                .attribute_owned_by_other_active_node("mac", "aa:bb", id_b)
                .await
                .unwrap()
        );

        storage.finish_node(id_a, Utc::now(), None).await.unwrap();
        assert!(
            !storage
                .attribute_owned_by_other_active_node("mac", "aa:bb", id_b)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn set_option_overwrites_existing_value() {
        let storage = MockStorage::new();
        let id = uuid();
        storage.set_option(id, "k", Value::from(1)).await.unwrap();
        storage.set_option(id, "k", Value::from(2)).await.unwrap();

        let options = storage.list_options(id).await.unwrap();
        assert_eq!(options.get("k"), Some(&Value::from(2)));
    }
}
