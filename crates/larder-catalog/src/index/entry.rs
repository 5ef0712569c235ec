//! Index rows and read-projection paging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::BasketManifest;

/// One catalog row per basket: its manifest fields plus where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Basket uuid, unique within the pantry.
    pub uuid: String,
    /// Commit timestamp from the manifest.
    pub upload_time: DateTime<Utc>,
    /// Lineage edges, basket → parents.
    pub parent_uuids: Vec<String>,
    /// Basket type.
    pub basket_type: String,
    /// User-friendly label.
    pub label: String,
    /// Writer version recorded in the manifest.
    pub format_version: String,
    /// Storage path of the basket.
    pub address: String,
    /// Discriminator of the storage backend the basket was scanned from.
    pub storage_type: String,
}

impl IndexEntry {
    /// Builds an entry from a parsed manifest plus its location.
    #[must_use]
    pub fn from_manifest(
        manifest: BasketManifest,
        address: impl Into<String>,
        storage_type: impl Into<String>,
    ) -> Self {
        Self {
            uuid: manifest.uuid,
            upload_time: manifest.upload_time,
            parent_uuids: manifest.parent_uuids,
            basket_type: manifest.basket_type,
            label: manifest.label,
            format_version: manifest.format_version,
            address: address.into(),
            storage_type: storage_type.into(),
        }
    }
}

/// Paging for tabular read projections.
#[derive(Debug, Clone, Copy)]
pub struct TableQuery {
    /// Maximum rows returned.
    pub max_rows: usize,
    /// Rows skipped from the start of the table.
    pub offset: usize,
}

impl TableQuery {
    /// Convenience constructor for a row limit with no offset.
    #[must_use]
    pub const fn with_max_rows(max_rows: usize) -> Self {
        Self {
            max_rows,
            offset: 0,
        }
    }
}

impl Default for TableQuery {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            offset: 0,
        }
    }
}
