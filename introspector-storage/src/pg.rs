//! Postgres-backed `StorageTrait` implementation.
//!
//! Every query here is parameterized (`$1`, `$2`, ...) against the real
//! `nodes`/`attributes`/`options`/`rules` tables — never string
//! concatenation, which is the one thing the original coordinator's
//! `find_node` got wrong and this implementation deliberately does not
//! repeat.

use crate::{StorageResult, StorageTrait};
use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use introspector_core::{Condition, EntityIdType, NodeRecord, NodeUuid, Rule, RuleUuid, StorageError, Timestamp};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

/// Connection parameters for the Postgres-backed storage.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "introspector".to_string(),
            user: "introspector".to_string(),
            password: String::new(),
            pool_size: 16,
        }
    }
}

impl DbConfig {
    /// Load from environment variables, falling back to [`DbConfig::default`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("INSPECTOR_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("INSPECTOR_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("INSPECTOR_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("INSPECTOR_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("INSPECTOR_DB_PASSWORD").unwrap_or(defaults.password),
            pool_size: std::env::var("INSPECTOR_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
        }
    }

    fn create_pool(&self) -> Result<Pool, deadpool_postgres::CreatePoolError> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.pool_size));
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
    }
}

/// Postgres-backed storage.
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    pub fn from_config(config: &DbConfig) -> Result<Self, deadpool_postgres::CreatePoolError> {
        Ok(Self {
            pool: config.create_pool()?,
        })
    }

    async fn conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            warn!(error = %e, "failed to check out a connection from the pool");
            StorageError::TransactionFailed { reason: e.to_string() }
        })
    }
}

fn row_to_node(row: &tokio_postgres::Row) -> Result<NodeRecord, StorageError> {
    let uuid_str: String = row.get("uuid");
    let uuid = NodeUuid::from_str(&uuid_str).map_err(|e| StorageError::QueryFailed {
        reason: e.to_string(),
    })?;
    Ok(NodeRecord {
        uuid,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error: row.get("error"),
    })
}

#[async_trait]
impl StorageTrait for PgStorage {
    async fn insert_node(&self, record: &NodeRecord) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = record.uuid.to_string();
        let rows = conn
            .execute(
                "INSERT INTO nodes (uuid, started_at, finished_at, error) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (uuid) DO NOTHING",
                &[&uuid_str, &record.started_at, &record.finished_at, &record.error],
            )
            .await
            .map_err(|e| StorageError::InsertFailed {
                uuid: record.uuid,
                reason: e.to_string(),
            })?;
        if rows == 0 {
            warn!(uuid = %record.uuid, "insert_node: row already exists");
            return Err(StorageError::InsertFailed {
                uuid: record.uuid,
                reason: "node already exists".to_string(),
            });
        }
        debug!(uuid = %record.uuid, "inserted node row");
        Ok(())
    }

    async fn get_node(&self, uuid: NodeUuid) -> StorageResult<Option<NodeRecord>> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        let row = conn
            .query_opt(
                "SELECT uuid, started_at, finished_at, error FROM nodes WHERE uuid = $1",
                &[&uuid_str],
            )
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn delete_node(&self, uuid: NodeUuid) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        conn.execute("DELETE FROM options WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        conn.execute("DELETE FROM attributes WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        conn.execute("DELETE FROM nodes WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        debug!(%uuid, "deleted node row and dependents");
        Ok(())
    }

    async fn finish_node(
        &self,
        uuid: NodeUuid,
        finished_at: Timestamp,
        error: Option<String>,
    ) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        let rows = conn
            .execute(
                "UPDATE nodes SET finished_at = $2, error = $3 WHERE uuid = $1",
                &[&uuid_str, &finished_at, &error],
            )
            .await
            .map_err(|e| StorageError::UpdateFailed {
                uuid,
                reason: e.to_string(),
            })?;
        if rows == 0 {
            return Err(StorageError::NotFound { uuid });
        }
        debug!(%uuid, has_error = error.is_some(), "finished node");
        Ok(())
    }

    async fn list_all_uuids(&self) -> StorageResult<Vec<NodeUuid>> {
        let conn = self.conn().await?;
        let rows = conn
            .query("SELECT uuid FROM nodes", &[])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        rows.iter()
            .map(|row| {
                let s: String = row.get("uuid");
                NodeUuid::from_str(&s).map_err(|e| StorageError::QueryFailed { reason: e.to_string() })
            })
            .collect()
    }

    async fn list_finished_before(&self, cutoff: Timestamp) -> StorageResult<Vec<NodeUuid>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT uuid FROM nodes WHERE finished_at IS NOT NULL AND finished_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        rows.iter()
            .map(|row| {
                let s: String = row.get("uuid");
                NodeUuid::from_str(&s).map_err(|e| StorageError::QueryFailed { reason: e.to_string() })
            })
            .collect()
    }

    async fn list_unfinished_started_before(&self, cutoff: Timestamp) -> StorageResult<Vec<NodeUuid>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT uuid FROM nodes WHERE finished_at IS NULL AND started_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        rows.iter()
            .map(|row| {
                let s: String = row.get("uuid");
                NodeUuid::from_str(&s).map_err(|e| StorageError::QueryFailed { reason: e.to_string() })
            })
            .collect()
    }

    async fn insert_attributes(&self, uuid: NodeUuid, attrs: &[(String, String)]) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        for (name, value) in attrs {
            if name.is_empty() || value.is_empty() {
                continue;
            }
            conn.execute(
                "INSERT INTO attributes (name, value, uuid) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
                &[name, value, &uuid_str],
            )
            .await
            .map_err(|e| StorageError::InsertFailed {
                uuid,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn list_attributes(&self, uuid: NodeUuid) -> StorageResult<HashMap<String, Vec<String>>> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        let rows = conn
            .query("SELECT name, value FROM attributes WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let name: String = row.get("name");
            let value: String = row.get("value");
            out.entry(name).or_default().push(value);
        }
        Ok(out)
    }

    async fn delete_attributes(&self, uuid: NodeUuid) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        conn.execute("DELETE FROM attributes WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        Ok(())
    }

    /// Builds one `(name = $n AND value = $n+1)` clause per attribute,
    /// OR-ed together, with every value bound — the parameterized
    /// replacement for the original's per-attribute string-built SQL.
    async fn find_uuids_by_attributes(&self, attrs: &[(String, String)]) -> StorageResult<Vec<NodeUuid>> {
        if attrs.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn().await?;

        let mut clauses = Vec::with_capacity(attrs.len());
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::with_capacity(attrs.len() * 2);
        let mut idx = 1;
        for (name, value) in attrs {
            clauses.push(format!("(name = ${} AND value = ${})", idx, idx + 1));
            params.push(name);
            params.push(value);
            idx += 2;
        }
        let query = format!(
            "SELECT DISTINCT uuid FROM attributes WHERE {}",
            clauses.join(" OR ")
        );

        let rows = conn
            .query(query.as_str(), &params)
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        if rows.len() > 1 {
            warn!(count = rows.len(), "lookup attributes matched more than one node");
        }
        rows.iter()
            .map(|row| {
                let s: String = row.get("uuid");
                NodeUuid::from_str(&s).map_err(|e| StorageError::QueryFailed { reason: e.to_string() })
            })
            .collect()
    }

    async fn attribute_owned_by_other_active_node(
        &self,
        name: &str,
        value: &str,
        uuid: NodeUuid,
    ) -> StorageResult<bool> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        let row = conn
            .query_opt(
                "SELECT 1 FROM attributes a JOIN nodes n ON n.uuid = a.uuid \
                 WHERE a.name = $1 AND a.value = $2 AND a.uuid != $3 AND n.finished_at IS NULL",
                &[&name, &value, &uuid_str],
            )
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        Ok(row.is_some())
    }

    async fn set_option(&self, uuid: NodeUuid, name: &str, value: Value) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        conn.execute(
            "INSERT INTO options (uuid, name, value) VALUES ($1, $2, $3) \
             ON CONFLICT (uuid, name) DO UPDATE SET value = EXCLUDED.value",
            &[&uuid_str, &name, &value],
        )
        .await
        .map_err(|e| StorageError::UpdateFailed {
            uuid,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn list_options(&self, uuid: NodeUuid) -> StorageResult<HashMap<String, Value>> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        let rows = conn
            .query("SELECT name, value FROM options WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>("name"), row.get::<_, Value>("value")))
            .collect())
    }

    async fn delete_options(&self, uuid: NodeUuid) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        conn.execute("DELETE FROM options WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        Ok(())
    }

    async fn insert_rule(&self, rule: &Rule) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = rule.uuid.to_string();
        let conditions = serde_json::to_value(&rule.conditions).map_err(|e| StorageError::InsertFailed {
            uuid: NodeUuid::nil(),
            reason: e.to_string(),
        })?;
        let actions = serde_json::to_value(&rule.actions).map_err(|e| StorageError::InsertFailed {
            uuid: NodeUuid::nil(),
            reason: e.to_string(),
        })?;
        conn.execute(
            "INSERT INTO rules (uuid, description, disabled, conditions, actions, scope) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (uuid) DO UPDATE SET description = EXCLUDED.description, \
             disabled = EXCLUDED.disabled, conditions = EXCLUDED.conditions, \
             actions = EXCLUDED.actions, scope = EXCLUDED.scope",
            &[&uuid_str, &rule.description, &rule.disabled, &conditions, &actions, &rule.scope],
        )
        .await
        .map_err(|e| StorageError::InsertFailed {
            uuid: NodeUuid::nil(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn get_rule(&self, uuid: RuleUuid) -> StorageResult<Option<Rule>> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        let row = conn
            .query_opt(
                "SELECT uuid, description, disabled, conditions, actions, scope FROM rules WHERE uuid = $1",
                &[&uuid_str],
            )
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        row.as_ref().map(row_to_rule).transpose()
    }

    async fn list_enabled_rules(&self) -> StorageResult<Vec<Rule>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT uuid, description, disabled, conditions, actions, scope FROM rules \
                 WHERE disabled = false ORDER BY uuid",
                &[],
            )
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn delete_rule(&self, uuid: RuleUuid) -> StorageResult<()> {
        let conn = self.conn().await?;
        let uuid_str = uuid.to_string();
        conn.execute("DELETE FROM rules WHERE uuid = $1", &[&uuid_str])
            .await
            .map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
        Ok(())
    }
}

fn row_to_rule(row: &tokio_postgres::Row) -> Result<Rule, StorageError> {
    let uuid_str: String = row.get("uuid");
    let uuid = RuleUuid::from_str(&uuid_str).map_err(|e| StorageError::QueryFailed {
        reason: e.to_string(),
    })?;
    let conditions: Value = row.get("conditions");
    let actions: Value = row.get("actions");
    let conditions: Vec<Condition> =
        serde_json::from_value(conditions).map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
    let actions = serde_json::from_value(actions).map_err(|e| StorageError::QueryFailed { reason: e.to_string() })?;
    Ok(Rule {
        uuid,
        description: row.get("description"),
        disabled: row.get("disabled"),
        conditions,
        actions,
        scope: row.get("scope"),
    })
}
