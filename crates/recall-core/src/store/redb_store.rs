// ============================================================================
// RedbStore: Embedded memory store (redb)
// ============================================================================
// Persistent local storage for namespaced memory items.
// Default path: ~/.recall/memories.redb (override via RECALL_DB_PATH env var)
// ============================================================================

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{rank_items, MemoryStore, SearchRequest, StoreItem};
use crate::config::DB_PATH_ENV;
use crate::error::{MemoryError, Result};

// Table definitions
const ITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("items");

/// On-disk envelope for one item. The JSON value is kept as text because
/// bincode cannot round-trip `serde_json::Value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    namespace: Vec<String>,
    key: String,
    value_json: String,
    created_at: i64,
    updated_at: i64,
}

impl StoredItem {
    fn into_item(self) -> Result<StoreItem> {
        let value = serde_json::from_str(&self.value_json)
            .map_err(|e| MemoryError::StoreRead(format!("Corrupt value for {}: {}", self.key, e)))?;
        Ok(StoreItem {
            namespace: self.namespace,
            key: self.key,
            value,
            created_at: self.created_at,
            updated_at: self.updated_at,
            score: None,
        })
    }
}

/// Item count for a single namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub namespace: Vec<String>,
    pub items: usize,
}

/// Store-wide statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_items: usize,
    pub namespaces: Vec<NamespaceStats>,
}

/// Memory store backed by an embedded redb database
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

fn table_key(namespace: &[String], key: &str) -> Result<String> {
    serde_json::to_string(&(namespace, key)).map_err(MemoryError::from)
}

fn read_err(context: &str, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::StoreRead(format!("{}: {}", context, e))
}

fn write_err(context: &str, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::StoreWrite(format!("{}: {}", context, e))
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses RECALL_DB_PATH env var or ~/.recall/memories.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var(DB_PATH_ENV) {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| MemoryError::Config("Cannot determine home directory".into()))?;
            let recall_dir = home.join(".recall");
            std::fs::create_dir_all(&recall_dir)
                .map_err(|e| write_err("Failed to create .recall directory", e))?;
            recall_dir.join("memories.redb")
        };

        info!("Opening memory store at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(|e| read_err("Failed to open database", e))?;

        // Ensure the table exists by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| write_err("Failed to begin write", e))?;
        {
            let _ = write_txn
                .open_table(ITEMS)
                .map_err(|e| write_err("Failed to create items table", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| write_err("Failed to commit init", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Item Operations (blocking)
    // ========================================================================

    pub fn put_item(&self, namespace: &[String], key: &str, value: &Value) -> Result<()> {
        let entry_key = table_key(namespace, key)?;
        let now = chrono::Utc::now().timestamp();
        let created_at = self
            .get_item(namespace, key)
            .map_err(|e| write_err("Failed to read previous item", e))?
            .map_or(now, |item| item.created_at);

        let stored = StoredItem {
            namespace: namespace.to_vec(),
            key: key.to_string(),
            value_json: serde_json::to_string(value)?,
            created_at,
            updated_at: now,
        };
        let bytes =
            bincode::serialize(&stored).map_err(|e| write_err("Failed to serialize item", e))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| write_err("Failed to begin write", e))?;
        {
            let mut table = write_txn
                .open_table(ITEMS)
                .map_err(|e| write_err("Failed to open items table", e))?;
            table
                .insert(entry_key.as_str(), bytes.as_slice())
                .map_err(|e| write_err("Failed to insert item", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| write_err("Failed to commit", e))?;

        debug!("Stored item {:?}/{}", namespace, key);
        Ok(())
    }

    pub fn get_item(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>> {
        let entry_key = table_key(namespace, key)?;

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| read_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(ITEMS)
            .map_err(|e| read_err("Failed to open items table", e))?;

        match table
            .get(entry_key.as_str())
            .map_err(|e| read_err("Failed to get item", e))?
        {
            Some(value) => {
                let stored: StoredItem = bincode::deserialize(value.value())
                    .map_err(|e| read_err("Failed to deserialize item", e))?;
                Ok(Some(stored.into_item()?))
            }
            None => Ok(None),
        }
    }

    /// Remove an item, returning whether it existed
    pub fn delete_item(&self, namespace: &[String], key: &str) -> Result<bool> {
        let entry_key = table_key(namespace, key)?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| write_err("Failed to begin write", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(ITEMS)
                .map_err(|e| write_err("Failed to open items table", e))?;
            removed = table
                .remove(entry_key.as_str())
                .map_err(|e| write_err("Failed to remove item", e))?
                .is_some();
        }
        write_txn
            .commit()
            .map_err(|e| write_err("Failed to commit delete", e))?;

        if removed {
            debug!("Deleted item {:?}/{}", namespace, key);
        }
        Ok(removed)
    }

    /// Every item whose namespace starts with `namespace_prefix`
    pub fn list_items(&self, namespace_prefix: &[String]) -> Result<Vec<StoreItem>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| read_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(ITEMS)
            .map_err(|e| read_err("Failed to open items table", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| read_err("Failed to iterate items", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| read_err("Failed to read entry", e))?;
            let stored: StoredItem = bincode::deserialize(value.value())
                .map_err(|e| read_err("Failed to deserialize item", e))?;
            if stored.namespace.starts_with(namespace_prefix) {
                results.push(stored.into_item()?);
            }
        }
        Ok(results)
    }

    pub fn search_items(
        &self,
        namespace_prefix: &[String],
        request: &SearchRequest,
    ) -> Result<Vec<StoreItem>> {
        let candidates = self.list_items(namespace_prefix)?;
        let results = rank_items(candidates, request);
        debug!(
            "Search under {:?} returned {} items",
            namespace_prefix,
            results.len()
        );
        Ok(results)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let items = self.list_items(&[])?;

        let mut counts: BTreeMap<Vec<String>, usize> = BTreeMap::new();
        for item in &items {
            *counts.entry(item.namespace.clone()).or_insert(0) += 1;
        }

        Ok(StoreStats {
            total_items: items.len(),
            namespaces: counts
                .into_iter()
                .map(|(namespace, items)| NamespaceStats { namespace, items })
                .collect(),
        })
    }
}

#[async_trait]
impl MemoryStore for RedbStore {
    async fn search(
        &self,
        namespace_prefix: &[String],
        request: &SearchRequest,
    ) -> Result<Vec<StoreItem>> {
        self.search_items(namespace_prefix, request)
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>> {
        self.get_item(namespace, key)
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        self.put_item(namespace, key, &value)
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<()> {
        self.delete_item(namespace, key).map(|_| ())
    }
}
