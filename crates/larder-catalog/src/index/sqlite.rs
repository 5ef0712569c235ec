//! SQLite-backed index.
//!
//! The database is the durable catalog; `sync` only rescans storage
//! when the tables are empty. Rows live in `pantry_index`, lineage
//! edges in `parent_uuids` so edge lookups in both directions are a
//! single join.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

use larder_core::{Error, Result, StorageBackend};

use crate::index::entry::{IndexEntry, TableQuery};
use crate::index::scan::{scan_pantry, ScanReport};
use crate::index::Index;

const ENTRY_COLUMNS: &str =
    "uuid, upload_time, parent_uuids, basket_type, label, format_version, address, storage_type";

/// Index backend storing the catalog in a SQLite database.
pub struct SqliteIndex {
    storage: Arc<dyn StorageBackend>,
    pantry_root: String,
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    uuid: String,
    upload_time: String,
    parent_uuids: String,
    basket_type: String,
    label: String,
    format_version: String,
    address: String,
    storage_type: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<IndexEntry> {
        let upload_time = DateTime::parse_from_rfc3339(&self.upload_time)
            .map_err(|err| Error::serialization(format!("upload_time column: {err}")))?
            .with_timezone(&Utc);
        let parent_uuids: Vec<String> = serde_json::from_str(&self.parent_uuids)
            .map_err(|err| Error::serialization(format!("parent_uuids column: {err}")))?;
        Ok(IndexEntry {
            uuid: self.uuid,
            upload_time,
            parent_uuids,
            basket_type: self.basket_type,
            label: self.label,
            format_version: self.format_version,
            address: self.address,
            storage_type: self.storage_type,
        })
    }
}

fn db_err(context: &str, err: sqlx::Error) -> Error {
    Error::database(context.to_string(), err)
}

// RFC 3339 with fixed precision and a Z offset so the TEXT column
// compares chronologically.
fn stamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteIndex {
    /// Connects to (creating if missing) the database at `database_url`
    /// and ensures the catalog tables exist.
    pub async fn connect(
        storage: Arc<dyn StorageBackend>,
        pantry_root: impl Into<String>,
        database_url: &str,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|err| db_err("invalid sqlite url", err))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|err| db_err("connecting to sqlite", err))?;

        let index = Self {
            storage,
            pantry_root: pantry_root.into(),
            pool,
        };
        index.create_tables().await?;
        Ok(index)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pantry_index (
                uuid TEXT PRIMARY KEY,
                upload_time TEXT NOT NULL,
                parent_uuids TEXT NOT NULL,
                basket_type TEXT NOT NULL,
                label TEXT NOT NULL,
                format_version TEXT NOT NULL,
                address TEXT NOT NULL,
                storage_type TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("creating pantry_index table", err))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS parent_uuids (
                uuid TEXT NOT NULL,
                parent_uuid TEXT NOT NULL,
                PRIMARY KEY (uuid, parent_uuid)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("creating parent_uuids table", err))?;
        Ok(())
    }

    async fn insert_entry(&self, entry: &IndexEntry) -> Result<bool> {
        let parent_json = serde_json::to_string(&entry.parent_uuids)
            .map_err(|err| Error::serialization(err.to_string()))?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO pantry_index
             (uuid, upload_time, parent_uuids, basket_type, label,
              format_version, address, storage_type)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.uuid)
        .bind(stamp(entry.upload_time))
        .bind(&parent_json)
        .bind(&entry.basket_type)
        .bind(&entry.label)
        .bind(&entry.format_version)
        .bind(&entry.address)
        .bind(&entry.storage_type)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("inserting index row", err))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        for parent in &entry.parent_uuids {
            sqlx::query("INSERT OR IGNORE INTO parent_uuids (uuid, parent_uuid) VALUES (?, ?)")
                .bind(&entry.uuid)
                .bind(parent)
                .execute(&self.pool)
                .await
                .map_err(|err| db_err("inserting lineage edge", err))?;
        }
        Ok(true)
    }

    async fn fetch(&self, sql: &str, binds: &[&str]) -> Result<Vec<IndexEntry>> {
        let mut query = sqlx::query_as::<_, EntryRow>(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|err| db_err("querying index rows", err))?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }
}

#[async_trait]
impl Index for SqliteIndex {
    fn pantry_root(&self) -> &str {
        &self.pantry_root
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn generate_index(&mut self) -> Result<ScanReport> {
        let report = scan_pantry(self.storage.as_ref(), &self.pantry_root).await?;
        sqlx::query("DELETE FROM pantry_index")
            .execute(&self.pool)
            .await
            .map_err(|err| db_err("clearing pantry_index table", err))?;
        sqlx::query("DELETE FROM parent_uuids")
            .execute(&self.pool)
            .await
            .map_err(|err| db_err("clearing parent_uuids table", err))?;
        for entry in &report.entries {
            self.insert_entry(entry).await?;
        }
        Ok(report)
    }

    async fn sync(&mut self) -> Result<()> {
        // The database itself is durable truth; only an empty catalog
        // warrants a storage rescan.
        if self.len().await? == 0 {
            self.generate_index().await?;
        }
        Ok(())
    }

    async fn track_baskets(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in entries {
            if !self.insert_entry(&entry).await? {
                tracing::warn!(uuid = %entry.uuid, "basket already tracked, skipping");
            }
        }
        Ok(())
    }

    async fn untrack_basket(&mut self, address_or_uuid: &str) -> Result<usize> {
        let uuids: Vec<String> = sqlx::query(
            "SELECT uuid FROM pantry_index WHERE uuid = ? OR address = ?",
        )
        .bind(address_or_uuid)
        .bind(address_or_uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("resolving basket to untrack", err))?
        .into_iter()
        .map(|row| row.get::<String, _>("uuid"))
        .collect();

        if uuids.is_empty() {
            tracing::warn!(
                target = %address_or_uuid,
                "incomplete request: basket was not being tracked to begin with"
            );
            return Ok(0);
        }
        for uuid in &uuids {
            sqlx::query("DELETE FROM pantry_index WHERE uuid = ?")
                .bind(uuid)
                .execute(&self.pool)
                .await
                .map_err(|err| db_err("deleting index row", err))?;
            sqlx::query("DELETE FROM parent_uuids WHERE uuid = ?")
                .bind(uuid)
                .execute(&self.pool)
                .await
                .map_err(|err| db_err("deleting lineage edges", err))?;
        }
        Ok(uuids.len())
    }

    async fn len(&mut self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pantry_index")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| db_err("counting index rows", err))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn to_table(&mut self, query: TableQuery) -> Result<Vec<IndexEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pantry_index ORDER BY address \
             LIMIT {} OFFSET {}",
            query.max_rows, query.offset
        );
        self.fetch(&sql, &[]).await
    }

    async fn get_rows(&mut self, addresses_or_uuids: &[String]) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for id in addresses_or_uuids {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM pantry_index WHERE uuid = ? OR address = ?"
            );
            for entry in self.fetch(&sql, &[id, id]).await? {
                if !entries.iter().any(|e: &IndexEntry| e.uuid == entry.uuid) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn get_baskets_of_type(
        &mut self,
        basket_type: &str,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pantry_index WHERE basket_type = ? \
             ORDER BY address LIMIT {} OFFSET {}",
            query.max_rows, query.offset
        );
        self.fetch(&sql, &[basket_type]).await
    }

    async fn get_baskets_of_label(
        &mut self,
        label: &str,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pantry_index WHERE label = ? \
             ORDER BY address LIMIT {} OFFSET {}",
            query.max_rows, query.offset
        );
        self.fetch(&sql, &[label]).await
    }

    async fn get_baskets_by_upload_time(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>> {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        let start = start.map(stamp);
        let end = end.map(stamp);
        if let Some(start) = &start {
            clauses.push("upload_time >= ?");
            binds.push(start.as_str());
        }
        if let Some(end) = &end {
            clauses.push("upload_time <= ?");
            binds.push(end.as_str());
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pantry_index {filter} \
             ORDER BY address LIMIT {} OFFSET {}",
            query.max_rows, query.offset
        );
        self.fetch(&sql, &binds).await
    }

    async fn query(&mut self, expr: &str) -> Result<Vec<IndexEntry>> {
        // The expression is a SQL WHERE clause over pantry_index.
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pantry_index WHERE {expr} ORDER BY address"
        );
        self.fetch(&sql, &[]).await
    }

    async fn resolve_uuid(&mut self, address_or_uuid: &str) -> Result<Option<String>> {
        let uuid: Option<String> = sqlx::query_scalar(
            "SELECT uuid FROM pantry_index WHERE uuid = ? OR address = ? LIMIT 1",
        )
        .bind(address_or_uuid)
        .bind(address_or_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("resolving basket uuid", err))?;
        Ok(uuid)
    }

    async fn lookup_edges_forward(&mut self, uuid: &str) -> Result<Vec<IndexEntry>> {
        let sql = format!(
            "SELECT e.uuid, e.upload_time, e.parent_uuids, e.basket_type, e.label, \
                    e.format_version, e.address, e.storage_type \
             FROM pantry_index e \
             JOIN parent_uuids p ON e.uuid = p.parent_uuid \
             WHERE p.uuid = ? ORDER BY e.uuid"
        );
        self.fetch(&sql, &[uuid]).await
    }

    async fn lookup_edges_reverse(&mut self, uuid: &str) -> Result<Vec<IndexEntry>> {
        let sql = format!(
            "SELECT e.uuid, e.upload_time, e.parent_uuids, e.basket_type, e.label, \
                    e.format_version, e.address, e.storage_type \
             FROM pantry_index e \
             JOIN parent_uuids p ON e.uuid = p.uuid \
             WHERE p.parent_uuid = ? ORDER BY e.uuid"
        );
        self.fetch(&sql, &[uuid]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit_basket, CommitRequest};
    use crate::schema::UploadItem;
    use larder_core::MemoryBackend;

    async fn seed_basket(storage: &MemoryBackend, id: &str, parents: &[&str]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(format!("{id}.txt"));
        std::fs::write(&file, id.as_bytes()).unwrap();

        let mut request = CommitRequest::new("raw");
        request.unique_id = Some(id.to_string());
        request.parent_ids = parents.iter().map(|p| p.to_string()).collect();
        request.upload_items = vec![UploadItem {
            path: file.to_string_lossy().into_owned(),
            stub: false,
        }];
        commit_basket(storage, "pantry", request)
            .await
            .unwrap()
            .address
    }

    async fn temp_index(storage: Arc<MemoryBackend>) -> (SqliteIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("index.db").display());
        let index = SqliteIndex::connect(storage, "pantry", &url).await.unwrap();
        (index, dir)
    }

    #[tokio::test]
    async fn generate_and_query_roundtrip() {
        let storage = Arc::new(MemoryBackend::new());
        seed_basket(&storage, "0001", &[]).await;
        seed_basket(&storage, "0002", &["0001"]).await;

        let (mut index, _dir) = temp_index(storage).await;
        let report = index.generate_index().await.unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(index.len().await.unwrap(), 2);

        let table = index.to_table(TableQuery::default()).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].uuid, "0001");

        let typed = index
            .get_baskets_of_type("raw", TableQuery::default())
            .await
            .unwrap();
        assert_eq!(typed.len(), 2);

        let rows = index
            .query("basket_type = 'raw' AND uuid = '0002'")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parent_uuids, vec!["0001"]);
    }

    #[tokio::test]
    async fn edge_lookups_follow_the_join_table() {
        let storage = Arc::new(MemoryBackend::new());
        seed_basket(&storage, "0001", &[]).await;
        seed_basket(&storage, "0002", &["0001"]).await;

        let (mut index, _dir) = temp_index(storage).await;
        index.sync().await.unwrap();

        let parents = index.lookup_edges_forward("0002").await.unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].uuid, "0001");

        let children = index.lookup_edges_reverse("0001").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].uuid, "0002");

        assert!(index.lookup_edges_forward("0001").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn untrack_by_uuid_or_address() {
        let storage = Arc::new(MemoryBackend::new());
        let address = seed_basket(&storage, "0001", &[]).await;
        seed_basket(&storage, "0002", &[]).await;

        let (mut index, _dir) = temp_index(storage).await;
        index.sync().await.unwrap();

        assert_eq!(index.untrack_basket(&address).await.unwrap(), 1);
        assert_eq!(index.untrack_basket("0002").await.unwrap(), 1);
        assert_eq!(index.untrack_basket("0002").await.unwrap(), 0);
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_track_is_skipped() {
        let storage = Arc::new(MemoryBackend::new());
        let address = seed_basket(&storage, "0001", &[]).await;

        let (mut index, _dir) = temp_index(storage.clone()).await;
        index.sync().await.unwrap();

        let entry = crate::index::scan::scan_basket(storage.as_ref(), &address)
            .await
            .unwrap();
        index.track_baskets(vec![entry]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resolve_uuid_accepts_both_forms() {
        let storage = Arc::new(MemoryBackend::new());
        let address = seed_basket(&storage, "0001", &[]).await;

        let (mut index, _dir) = temp_index(storage).await;
        index.sync().await.unwrap();

        assert_eq!(
            index.resolve_uuid(&address).await.unwrap(),
            Some("0001".to_string())
        );
        assert_eq!(
            index.resolve_uuid("0001").await.unwrap(),
            Some("0001".to_string())
        );
        assert_eq!(index.resolve_uuid("nope").await.unwrap(), None);
    }
}
