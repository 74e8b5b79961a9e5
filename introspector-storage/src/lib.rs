//! Introspector Storage - persistence trait and implementations.
//!
//! Defines the storage abstraction the node cache is built on: plain CRUD
//! over nodes, their lookup attributes, their options, and persisted rules.
//! Locking and cross-entity business logic (re-reading under a lock,
//! rejecting duplicate attributes, timing nodes out) live one layer up, in
//! the pipeline crate's node cache — this crate only has to guarantee that
//! every read and write is parameterized, never string-concatenated SQL.

mod mock;
mod pg;

pub use mock::MockStorage;
pub use pg::{DbConfig, PgStorage};

use async_trait::async_trait;
use introspector_core::{NodeRecord, NodeUuid, Rule, RuleUuid, StorageError, Timestamp};
use serde_json::Value;
use std::collections::HashMap;

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence operations the node cache and rules engine are built on.
#[async_trait]
pub trait StorageTrait: Send + Sync {
    // === Node rows ===

    /// Insert a fresh node row. Fails with `InsertFailed` if one already
    /// exists for this uuid (callers are expected to `delete_node` first).
    async fn insert_node(&self, record: &NodeRecord) -> StorageResult<()>;

    /// Fetch a node row. `Ok(None)` when no row matches.
    async fn get_node(&self, uuid: NodeUuid) -> StorageResult<Option<NodeRecord>>;

    /// Delete a node row and all of its attributes/options.
    async fn delete_node(&self, uuid: NodeUuid) -> StorageResult<()>;

    /// Mark a node finished, with or without an error.
    async fn finish_node(
        &self,
        uuid: NodeUuid,
        finished_at: Timestamp,
        error: Option<String>,
    ) -> StorageResult<()>;

    /// All uuids with a row currently present (active or finished).
    async fn list_all_uuids(&self) -> StorageResult<Vec<NodeUuid>>;

    /// Uuids whose `finished_at` is older than `cutoff`.
    async fn list_finished_before(&self, cutoff: Timestamp) -> StorageResult<Vec<NodeUuid>>;

    /// Uuids that are unfinished and whose `started_at` is older than
    /// `cutoff`.
    async fn list_unfinished_started_before(&self, cutoff: Timestamp) -> StorageResult<Vec<NodeUuid>>;

    // === Lookup attributes ===

    /// Insert every non-empty `(name, value)` attribute for `uuid`.
    async fn insert_attributes(&self, uuid: NodeUuid, attrs: &[(String, String)]) -> StorageResult<()>;

    /// All attributes for `uuid`, grouped by name.
    async fn list_attributes(&self, uuid: NodeUuid) -> StorageResult<HashMap<String, Vec<String>>>;

    /// Delete every attribute belonging to `uuid`.
    async fn delete_attributes(&self, uuid: NodeUuid) -> StorageResult<()>;

    /// Every distinct uuid that owns at least one of the given
    /// `(name, value)` pairs, built as one bound-parameter disjunction per
    /// attribute name (never string-concatenated).
    async fn find_uuids_by_attributes(&self, attrs: &[(String, String)]) -> StorageResult<Vec<NodeUuid>>;

    /// `true` if `(name, value)` already belongs to a different, active
    /// uuid.
    async fn attribute_owned_by_other_active_node(
        &self,
        name: &str,
        value: &str,
        uuid: NodeUuid,
    ) -> StorageResult<bool>;

    // === Options ===

    /// Write (insert-or-replace) a single option.
    async fn set_option(&self, uuid: NodeUuid, name: &str, value: Value) -> StorageResult<()>;

    /// All options for `uuid`, by name.
    async fn list_options(&self, uuid: NodeUuid) -> StorageResult<HashMap<String, Value>>;

    /// Delete every option belonging to `uuid`.
    async fn delete_options(&self, uuid: NodeUuid) -> StorageResult<()>;

    // === Rules ===

    async fn insert_rule(&self, rule: &Rule) -> StorageResult<()>;

    async fn get_rule(&self, uuid: RuleUuid) -> StorageResult<Option<Rule>>;

    /// Every enabled rule, in a stable order (insertion order for the mock,
    /// primary-key order for Postgres).
    async fn list_enabled_rules(&self) -> StorageResult<Vec<Rule>>;

    async fn delete_rule(&self, uuid: RuleUuid) -> StorageResult<()>;
}
