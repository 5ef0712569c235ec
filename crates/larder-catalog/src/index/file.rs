//! File-backed index: in-memory rows mirrored to a serialized table
//! document in the pantry.
//!
//! The durable representation is `{pantry_root}/index/{stamp}-index.json`
//! where `{stamp}` is a nanosecond timestamp. The stamp doubles as the
//! monotonic index version: local state is current exactly when no
//! durable table carries a newer stamp. Every mutation writes a fresh
//! table document; old documents accumulate until
//! [`FileIndex::cleanup_index_tables`] prunes them.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use larder_core::paths::{index_table_path, index_table_prefix, index_table_version};
use larder_core::{Error, Result, StorageBackend, WritePrecondition};

use crate::index::entry::{IndexEntry, TableQuery};
use crate::index::scan::{scan_pantry, ScanReport};
use crate::index::Index;

/// Number of stale table documents to keep by default when pruning.
pub const DEFAULT_TABLES_KEPT: usize = 20;

/// Index backend storing its catalog as a JSON table document inside
/// the pantry itself.
pub struct FileIndex {
    storage: Arc<dyn StorageBackend>,
    pantry_root: String,
    entries: Vec<IndexEntry>,
    /// Stamp of the durable table this instance last loaded or wrote.
    version: u128,
    loaded: bool,
}

impl FileIndex {
    /// Creates an index for the given pantry root. No I/O happens until
    /// the first operation; construction never assumes freshness.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, pantry_root: impl Into<String>) -> Self {
        Self {
            storage,
            pantry_root: pantry_root.into(),
            entries: Vec::new(),
            version: 0,
            loaded: false,
        }
    }

    /// Stamp of the durable table currently reflected in memory.
    #[must_use]
    pub fn version(&self) -> u128 {
        self.version
    }

    async fn table_documents(&self) -> Result<Vec<(u128, String)>> {
        let prefix = index_table_prefix(&self.pantry_root);
        let mut tables: Vec<(u128, String)> = self
            .storage
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|meta| index_table_version(&meta.path).map(|v| (v, meta.path)))
            .collect();
        tables.sort();
        Ok(tables)
    }

    async fn latest_table(&self) -> Result<Option<(u128, String)>> {
        Ok(self.table_documents().await?.into_iter().next_back())
    }

    async fn load_table(&mut self, version: u128, path: &str) -> Result<()> {
        let bytes = self.storage.get(path).await?;
        self.entries = serde_json::from_slice(&bytes)
            .map_err(|err| Error::serialization(format!("index table {path}: {err}")))?;
        self.version = version;
        self.loaded = true;
        Ok(())
    }

    async fn persist(&mut self) -> Result<()> {
        let now = u128::try_from(Utc::now().timestamp_nanos_opt().unwrap_or(0)).unwrap_or(0);
        let stamp = now.max(self.version + 1);
        let path = index_table_path(&self.pantry_root, stamp);
        let bytes = serde_json::to_vec(&self.entries)
            .map_err(|err| Error::serialization(err.to_string()))?;
        self.storage
            .put(&path, Bytes::from(bytes), WritePrecondition::None)
            .await?;
        self.version = stamp;
        self.loaded = true;
        Ok(())
    }

    /// Reloads from the durable table only when local state is behind.
    async fn ensure_fresh(&mut self) -> Result<()> {
        match self.latest_table().await? {
            Some((version, path)) => {
                if !self.loaded || version > self.version {
                    self.load_table(version, &path).await?;
                }
                Ok(())
            }
            None => {
                if !self.loaded {
                    // A root with no objects yet is an empty catalog,
                    // not an error.
                    if self.storage.exists(&self.pantry_root).await? {
                        self.generate_index().await?;
                    } else {
                        self.loaded = true;
                    }
                }
                Ok(())
            }
        }
    }

    /// Deletes all but the newest `keep` table documents.
    pub async fn cleanup_index_tables(&mut self, keep: usize) -> Result<usize> {
        let tables = self.table_documents().await?;
        if tables.len() <= keep {
            return Ok(0);
        }
        let stale = tables.len() - keep;
        for (_, path) in &tables[..stale] {
            self.storage.remove(path, false).await?;
        }
        Ok(stale)
    }

    fn filtered(
        &self,
        query: TableQuery,
        predicate: impl Fn(&IndexEntry) -> bool,
    ) -> Vec<IndexEntry> {
        self.entries
            .iter()
            .filter(|entry| predicate(entry))
            .skip(query.offset)
            .take(query.max_rows)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Index for FileIndex {
    fn pantry_root(&self) -> &str {
        &self.pantry_root
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn generate_index(&mut self) -> Result<ScanReport> {
        let report = scan_pantry(self.storage.as_ref(), &self.pantry_root).await?;
        self.entries = report.entries.clone();
        self.persist().await?;
        Ok(report)
    }

    async fn sync(&mut self) -> Result<()> {
        match self.latest_table().await? {
            Some((version, path)) => {
                if version > self.version || !self.loaded {
                    self.load_table(version, &path).await?;
                }
                Ok(())
            }
            None => {
                self.generate_index().await?;
                Ok(())
            }
        }
    }

    async fn track_baskets(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        self.ensure_fresh().await?;
        for entry in entries {
            if self.entries.iter().any(|e| e.uuid == entry.uuid) {
                tracing::warn!(uuid = %entry.uuid, "basket already tracked, skipping");
                continue;
            }
            self.entries.push(entry);
        }
        self.persist().await
    }

    async fn untrack_basket(&mut self, address_or_uuid: &str) -> Result<usize> {
        self.ensure_fresh().await?;
        let before = self.entries.len();
        self.entries
            .retain(|e| e.uuid != address_or_uuid && e.address != address_or_uuid);
        let removed = before - self.entries.len();
        if removed == 0 {
            tracing::warn!(
                target = %address_or_uuid,
                "incomplete request: basket was not being tracked to begin with"
            );
        }
        self.persist().await?;
        Ok(removed)
    }

    async fn len(&mut self) -> Result<usize> {
        self.ensure_fresh().await?;
        Ok(self.entries.len())
    }

    async fn to_table(&mut self, query: TableQuery) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        Ok(self.filtered(query, |_| true))
    }

    async fn get_rows(&mut self, addresses_or_uuids: &[String]) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        Ok(self
            .entries
            .iter()
            .filter(|e| {
                addresses_or_uuids
                    .iter()
                    .any(|id| *id == e.uuid || *id == e.address)
            })
            .cloned()
            .collect())
    }

    async fn get_baskets_of_type(
        &mut self,
        basket_type: &str,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        Ok(self.filtered(query, |e| e.basket_type == basket_type))
    }

    async fn get_baskets_of_label(
        &mut self,
        label: &str,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        Ok(self.filtered(query, |e| e.label == label))
    }

    async fn get_baskets_by_upload_time(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        Ok(self.filtered(query, |e| {
            start.map_or(true, |s| e.upload_time >= s)
                && end.map_or(true, |t| e.upload_time <= t)
        }))
    }

    async fn query(&mut self, expr: &str) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        let comparison = Comparison::parse(expr)?;
        Ok(self
            .entries
            .iter()
            .filter(|e| comparison.matches(e))
            .cloned()
            .collect())
    }

    async fn resolve_uuid(&mut self, address_or_uuid: &str) -> Result<Option<String>> {
        self.ensure_fresh().await?;
        Ok(self
            .entries
            .iter()
            .find(|e| e.uuid == address_or_uuid || e.address == address_or_uuid)
            .map(|e| e.uuid.clone()))
    }

    async fn lookup_edges_forward(&mut self, uuid: &str) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        let Some(entry) = self.entries.iter().find(|e| e.uuid == uuid) else {
            return Ok(Vec::new());
        };
        let parent_uuids = entry.parent_uuids.clone();
        Ok(self
            .entries
            .iter()
            .filter(|e| parent_uuids.contains(&e.uuid))
            .cloned()
            .collect())
    }

    async fn lookup_edges_reverse(&mut self, uuid: &str) -> Result<Vec<IndexEntry>> {
        self.ensure_fresh().await?;
        Ok(self
            .entries
            .iter()
            .filter(|e| e.parent_uuids.iter().any(|p| p == uuid))
            .cloned()
            .collect())
    }
}

/// A single `column op literal` comparison — the whole of the file
/// backend's query language.
struct Comparison {
    column: String,
    op: Op,
    literal: String,
}

#[derive(Clone, Copy)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Comparison {
    fn parse(expr: &str) -> Result<Self> {
        let mut parts = expr.splitn(3, char::is_whitespace);
        let (Some(column), Some(op), Some(literal)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidInput(format!(
                "expected 'column op literal' expression: '{expr}'"
            )));
        };
        let op = match op {
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "contains" => Op::Contains,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unsupported operator '{other}' in expression: '{expr}'"
                )));
            }
        };
        let literal = literal.trim().trim_matches('"').trim_matches('\'').to_string();
        Ok(Self {
            column: column.to_string(),
            op,
            literal,
        })
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        let field = match self.column.as_str() {
            "uuid" => entry.uuid.clone(),
            "basket_type" => entry.basket_type.clone(),
            "label" => entry.label.clone(),
            "address" => entry.address.clone(),
            "storage_type" => entry.storage_type.clone(),
            "format_version" => entry.format_version.clone(),
            "upload_time" => entry.upload_time.to_rfc3339(),
            _ => return false,
        };
        match self.op {
            Op::Eq => field == self.literal,
            Op::Ne => field != self.literal,
            Op::Lt => field < self.literal,
            Op::Le => field <= self.literal,
            Op::Gt => field > self.literal,
            Op::Ge => field >= self.literal,
            Op::Contains => field.contains(&self.literal),
        }
    }
}
