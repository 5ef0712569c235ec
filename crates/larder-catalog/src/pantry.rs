//! The pantry: one storage root plus the index that catalogs it.
//!
//! All user-facing operations go through here: committing baskets,
//! opening them, deleting them, lineage walks, validation, and
//! mirroring. The pantry decides writability once at construction and
//! refuses mutations afterwards when the storage turned out read-only.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use larder_core::paths::validate_path_in_pantry;
use larder_core::{Error, Result, StorageBackend, WritePrecondition};

use crate::basket::Basket;
use crate::commit::{commit_basket, CommitRequest};
use crate::index::{Index, IndexEntry, TableQuery};
use crate::lineage::{get_children, get_parents, LineageOptions, LineageRow};
use crate::mirror::{mirror_basket, DocumentMirror, MirrorReport};
use crate::validate::{validate_pantry, Violation};

/// Marker object written at the pantry root on first use.
const PANTRY_MARKER: &str = ".pantry";

/// A pantry bound to one storage root and one index backend.
pub struct Pantry {
    storage: Arc<dyn StorageBackend>,
    root: String,
    index: Box<dyn Index>,
    mirror: Option<Arc<dyn DocumentMirror>>,
    read_only: bool,
}

impl Pantry {
    /// Opens (creating on first use) the pantry at `root`.
    ///
    /// A marker object is written at the root; when that write fails
    /// against an existing root the pantry opens read-only instead of
    /// failing.
    pub async fn new(
        storage: Arc<dyn StorageBackend>,
        root: impl Into<String>,
        index: Box<dyn Index>,
    ) -> Result<Self> {
        let root = root.into();
        let marker = format!("{}/{PANTRY_MARKER}", root.trim_end_matches('/'));
        let read_only = if storage.exists(&marker).await? {
            !probe_writable(storage.as_ref(), &root).await
        } else {
            match storage
                .put(&marker, Bytes::new(), WritePrecondition::None)
                .await
            {
                Ok(_) => false,
                Err(err) => {
                    if !storage.exists(&root).await? {
                        return Err(err);
                    }
                    tracing::warn!(root = %root, error = %err, "pantry storage is read-only");
                    true
                }
            }
        };
        Ok(Self {
            storage,
            root,
            index,
            mirror: None,
            read_only,
        })
    }

    /// Attaches a document mirror; newly uploaded baskets are mirrored
    /// as part of the upload.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn DocumentMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// The pantry's storage root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether mutations are refused.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The pantry's index.
    pub fn index(&mut self) -> &mut dyn Index {
        self.index.as_mut()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.root.clone()));
        }
        Ok(())
    }

    /// Commits a basket and tracks it in the index.
    ///
    /// When a mirror is attached the new basket's documents are
    /// mirrored as well; a mirror failure does not undo the upload.
    pub async fn upload_basket(&mut self, request: CommitRequest) -> Result<Basket> {
        self.ensure_writable()?;
        self.index.sync().await?;

        let outcome = commit_basket(self.storage.as_ref(), &self.root, request).await?;
        let entry =
            crate::index::scan_basket(self.storage.as_ref(), &outcome.address).await?;
        self.index.track_baskets(vec![entry]).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(err) =
                mirror_basket(self.storage.clone(), mirror.as_ref(), &outcome.address).await
            {
                tracing::warn!(
                    basket = %outcome.address,
                    error = %err,
                    "failed to mirror freshly uploaded basket"
                );
            }
        }
        Basket::open(self.storage.clone(), &outcome.address).await
    }

    /// Opens a basket by address or uuid.
    pub async fn get_basket(&mut self, address_or_uuid: &str) -> Result<Basket> {
        let rows = self.index.get_rows(&[address_or_uuid.to_string()]).await?;
        let address = match rows.first() {
            Some(row) => row.address.clone(),
            None => {
                validate_path_in_pantry(&self.root, address_or_uuid)?;
                address_or_uuid.to_string()
            }
        };
        Basket::open(self.storage.clone(), &address).await
    }

    /// Deletes a basket and untracks it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the basket still has children; delete
    /// descendants first.
    pub async fn delete_basket(&mut self, address_or_uuid: &str) -> Result<()> {
        self.ensure_writable()?;
        let uuid = self
            .index
            .resolve_uuid(address_or_uuid)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("basket not found in index: {address_or_uuid}"))
            })?;

        let children = self.index.lookup_edges_reverse(&uuid).await?;
        if !children.is_empty() {
            return Err(Error::InvalidInput(format!(
                "basket {uuid} has {} child basket(s), delete those first",
                children.len()
            )));
        }

        let rows = self.index.get_rows(&[uuid.clone()]).await?;
        let address = rows
            .first()
            .map(|row| row.address.clone())
            .ok_or_else(|| Error::NotFound(format!("basket not found in index: {uuid}")))?;
        validate_path_in_pantry(&self.root, &address)?;

        self.storage.remove(&address, true).await?;
        self.index.untrack_basket(&uuid).await?;
        Ok(())
    }

    /// Ancestors of a basket, nearest first.
    pub async fn get_parents(
        &mut self,
        address_or_uuid: &str,
        options: LineageOptions,
    ) -> Result<Vec<LineageRow>> {
        get_parents(self.index.as_mut(), address_or_uuid, options).await
    }

    /// Descendants of a basket, nearest first.
    pub async fn get_children(
        &mut self,
        address_or_uuid: &str,
        options: LineageOptions,
    ) -> Result<Vec<LineageRow>> {
        get_children(self.index.as_mut(), address_or_uuid, options).await
    }

    /// Fetches the metadata document of a basket, if any.
    pub async fn get_metadata(&mut self, address_or_uuid: &str) -> Result<Option<Value>> {
        self.get_basket(address_or_uuid).await?.metadata().await
    }

    /// Structural validation of every basket under the root.
    pub async fn validate(&self) -> Result<Vec<Violation>> {
        validate_pantry(self.storage.as_ref(), &self.root).await
    }

    /// Mirrors every indexed basket into the attached document store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when no mirror is attached.
    pub async fn mirror_to_document_store(&mut self) -> Result<MirrorReport> {
        let mirror = self
            .mirror
            .clone()
            .ok_or_else(|| Error::InvalidInput("pantry has no document mirror attached".into()))?;

        self.index.sync().await?;
        let mut report = MirrorReport::default();
        let mut offset = 0;
        loop {
            let page: Vec<IndexEntry> = self
                .index
                .to_table(TableQuery {
                    max_rows: 100,
                    offset,
                })
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for entry in page {
                let partial =
                    mirror_basket(self.storage.clone(), mirror.as_ref(), &entry.address).await?;
                report.inserted += partial.inserted;
                report.skipped += partial.skipped;
            }
        }
        Ok(report)
    }
}

async fn probe_writable(storage: &dyn StorageBackend, root: &str) -> bool {
    let probe = format!("{}/{PANTRY_MARKER}.probe", root.trim_end_matches('/'));
    match storage
        .put(&probe, Bytes::new(), WritePrecondition::None)
        .await
    {
        Ok(_) => {
            if let Err(err) = storage.remove(&probe, false).await {
                tracing::warn!(probe = %probe, error = %err, "failed to remove write probe");
            }
            true
        }
        Err(_) => false,
    }
}
