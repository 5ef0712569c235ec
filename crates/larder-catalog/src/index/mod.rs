//! The Index contract and its backends.
//!
//! An index is a derived, rebuildable catalog of every basket manifest
//! under a pantry root. The on-disk manifests are ground truth; any
//! backend must be able to regenerate itself from a full rescan.
//!
//! Lineage traversal is shared across backends (see [`crate::lineage`]):
//! each backend implements only the two edge-lookup primitives, and the
//! traversal, dedup, and cycle detection live in one place.
//!
//! A single index instance is not safe for unsynchronized concurrent
//! mutation; callers serialize `track`/`untrack`/`sync` against each
//! other. Across processes the durable representation is the source of
//! truth and `sync` reconciles against it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use larder_core::Result;

pub mod entry;
pub mod file;
pub mod postgres;
pub mod scan;
pub mod sqlite;

pub use entry::{IndexEntry, TableQuery};
pub use file::FileIndex;
pub use postgres::PostgresIndex;
pub use scan::{scan_basket, scan_pantry, ScanReport, ScanWarning};
pub use sqlite::SqliteIndex;

/// Backend-agnostic catalog of baskets in one pantry.
#[async_trait]
pub trait Index: Send + Sync {
    /// The pantry root this index catalogs.
    fn pantry_root(&self) -> &str;

    /// Short discriminator for the backend kind.
    fn backend_name(&self) -> &'static str;

    /// Full rescan: parses every manifest under the root, skipping
    /// malformed ones with a warning, and repopulates the catalog.
    async fn generate_index(&mut self) -> Result<ScanReport>;

    /// Reconciles local state with the durable index representation,
    /// rescanning from storage when no durable representation exists.
    async fn sync(&mut self) -> Result<()>;

    /// Appends already-known entries (used right after a commit to
    /// avoid a full rescan).
    async fn track_baskets(&mut self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Removes entries matching the given address or uuid, returning
    /// the number removed. Removing fewer than requested warns instead
    /// of failing.
    async fn untrack_basket(&mut self, address_or_uuid: &str) -> Result<usize>;

    /// Number of baskets currently tracked.
    async fn len(&mut self) -> Result<usize>;

    /// Tabular projection of the catalog.
    async fn to_table(&mut self, query: TableQuery) -> Result<Vec<IndexEntry>>;

    /// Rows matching the given addresses or uuids.
    async fn get_rows(&mut self, addresses_or_uuids: &[String]) -> Result<Vec<IndexEntry>>;

    /// Baskets of the given type.
    async fn get_baskets_of_type(
        &mut self,
        basket_type: &str,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>>;

    /// Baskets with the given label.
    async fn get_baskets_of_label(
        &mut self,
        label: &str,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>>;

    /// Baskets uploaded within the given bounds (inclusive); `None`
    /// leaves that side unbounded.
    async fn get_baskets_by_upload_time(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        query: TableQuery,
    ) -> Result<Vec<IndexEntry>>;

    /// Backend-specific query expression (SQL for relational backends,
    /// a single column comparison for the file backend).
    async fn query(&mut self, expr: &str) -> Result<Vec<IndexEntry>>;

    /// Resolves an address or uuid to the canonical basket uuid.
    async fn resolve_uuid(&mut self, address_or_uuid: &str) -> Result<Option<String>>;

    /// Entries for the parents of `uuid` (forward lineage edges).
    async fn lookup_edges_forward(&mut self, uuid: &str) -> Result<Vec<IndexEntry>>;

    /// Entries for the children of `uuid` (reverse lineage edges).
    async fn lookup_edges_reverse(&mut self, uuid: &str) -> Result<Vec<IndexEntry>>;
}
