//! Column metadata for the indexes a query can address.
//!
//! The schema crawler itself lives outside this crate; it is consumed
//! through [`ColumnProvider`]. The store is an explicitly constructed
//! service passed by handle into the request path, with an optional
//! background refresh task and a shutdown handle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MetadataCacheConfig;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub es_column: String,
    pub jx_type: ColumnType,
    #[serde(default)]
    pub nested_path: Option<String>,
    #[serde(default)]
    pub cardinality: Option<u64>,
    /// Known values, when the crawler found few enough to enumerate. Used
    /// to pre-seed set domains.
    #[serde(default)]
    pub partitions: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Integer,
    Double,
    String,
    Object,
    Nested,
}

/// Seam to the schema crawler.
#[async_trait]
pub trait ColumnProvider: Send + Sync {
    async fn fetch_columns(&self, table: &str) -> Result<Vec<Column>>;
}

#[derive(Debug)]
struct TableEntry {
    columns: Vec<Column>,
    inserted_at: Instant,
}

/// Per-table column lists with TTL eviction. Read-mostly and shared across
/// concurrent decodes; writes come from `insert_table` and the refresh task.
#[derive(Debug)]
pub struct ColumnStore {
    tables: RwLock<HashMap<String, TableEntry>>,
    ttl: Duration,
    max_size: usize,
}

impl Default for ColumnStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnStore {
    pub fn new() -> Self {
        Self::with_config(&MetadataCacheConfig::default())
    }

    pub fn with_config(config: &MetadataCacheConfig) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            max_size: config.max_size,
        }
    }

    pub fn insert_table(&self, table: impl Into<String>, columns: Vec<Column>) {
        let mut tables = self.tables.write().unwrap();
        if tables.len() >= self.max_size {
            if let Some(oldest) = tables
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone())
            {
                tracing::debug!(table = %oldest, "evicting oldest table metadata");
                tables.remove(&oldest);
            }
        }
        tables.insert(
            table.into(),
            TableEntry {
                columns,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn columns(&self, table: &str) -> Option<Vec<Column>> {
        let tables = self.tables.read().unwrap();
        tables.get(table).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.columns.clone())
            } else {
                None
            }
        })
    }

    pub fn get_column(&self, table: &str, name: &str) -> Option<Column> {
        let tables = self.tables.read().unwrap();
        tables.get(table).and_then(|entry| {
            if entry.inserted_at.elapsed() >= self.ttl {
                return None;
            }
            entry.columns.iter().find(|c| c.name == name).cloned()
        })
    }

    /// Cached columns for the table, fetching through the provider on miss.
    pub async fn ensure(
        &self,
        provider: &dyn ColumnProvider,
        table: &str,
    ) -> Result<Vec<Column>> {
        if let Some(columns) = self.columns(table) {
            return Ok(columns);
        }
        let columns = provider.fetch_columns(table).await?;
        self.insert_table(table.to_string(), columns.clone());
        Ok(columns)
    }

    pub fn evict_expired(&self) {
        self.tables
            .write()
            .unwrap()
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().unwrap().is_empty()
    }
}

/// Handle to the background refresh task; dropping without `shutdown` lets
/// the task run until the runtime stops.
pub struct RefreshHandle {
    task: tokio::task::JoinHandle<()>,
    stop: tokio::sync::watch::Sender<bool>,
}

impl RefreshHandle {
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Re-fetch the given tables through the provider on an interval.
pub fn spawn_refresh(
    store: Arc<ColumnStore>,
    provider: Arc<dyn ColumnProvider>,
    tables: Vec<String>,
    interval: Duration,
) -> RefreshHandle {
    let (stop, mut stopped) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for table in &tables {
                        match provider.fetch_columns(table).await {
                            Ok(columns) => store.insert_table(table.clone(), columns),
                            Err(err) => {
                                tracing::warn!(table = %table, error = %err, "column refresh failed");
                            }
                        }
                    }
                }
                _ = stopped.changed() => break,
            }
        }
    });
    RefreshHandle { task, stop }
}

/// Look up one column by jx name, falling back to a synthetic column when
/// the crawler has not seen the field yet.
pub fn column_or_default(columns: &[Column], name: &str) -> Column {
    columns
        .iter()
        .find(|c| c.name == name)
        .cloned()
        .unwrap_or_else(|| Column {
            name: name.to_string(),
            es_column: name.to_string(),
            jx_type: ColumnType::String,
            nested_path: None,
            cardinality: None,
            partitions: None,
        })
}
