//! Read-side access to a committed basket.

use serde_json::Value;
use std::sync::Arc;

use larder_core::paths::{
    is_reserved_filename, manifest_path, metadata_path, supplement_path,
};
use larder_core::{Error, Result, StorageBackend};

use crate::schema::{parse_manifest, parse_metadata, parse_supplement, BasketManifest,
    BasketSupplement};

/// A committed basket, opened from its storage address.
///
/// Opening verifies the required documents exist and loads the
/// manifest; the supplement and metadata are fetched on demand.
pub struct Basket {
    storage: Arc<dyn StorageBackend>,
    address: String,
    manifest: BasketManifest,
}

impl std::fmt::Debug for Basket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Basket")
            .field("address", &self.address)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl Basket {
    /// Opens the basket at `address`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the address, manifest, or supplement is
    /// missing, and `SchemaViolation` if the manifest does not parse.
    pub async fn open(storage: Arc<dyn StorageBackend>, address: &str) -> Result<Self> {
        if !storage.exists(address).await? {
            return Err(Error::NotFound(format!("basket does not exist: {address}")));
        }

        let manifest_key = manifest_path(address);
        if !storage.exists(&manifest_key).await? {
            return Err(Error::NotFound(format!(
                "invalid basket, basket_manifest.json does not exist: {manifest_key}"
            )));
        }
        let supplement_key = supplement_path(address);
        if !storage.exists(&supplement_key).await? {
            return Err(Error::NotFound(format!(
                "invalid basket, basket_supplement.json does not exist: {supplement_key}"
            )));
        }

        let bytes = storage.get(&manifest_key).await?;
        let manifest =
            parse_manifest(&bytes).map_err(|err| err.into_error(&manifest_key))?;

        Ok(Self {
            storage,
            address: address.to_string(),
            manifest,
        })
    }

    /// The basket's storage address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The basket's manifest.
    #[must_use]
    pub fn manifest(&self) -> &BasketManifest {
        &self.manifest
    }

    /// Fetches and parses the supplement document.
    pub async fn supplement(&self) -> Result<BasketSupplement> {
        let key = supplement_path(&self.address);
        let bytes = self.storage.get(&key).await?;
        parse_supplement(&bytes).map_err(|err| err.into_error(&key))
    }

    /// Fetches the metadata document.
    ///
    /// Returns `None` when the basket has no metadata — a valid state
    /// distinct from an empty document.
    pub async fn metadata(&self) -> Result<Option<Value>> {
        let key = metadata_path(&self.address);
        if !self.storage.exists(&key).await? {
            return Ok(None);
        }
        let bytes = self.storage.get(&key).await?;
        let value = parse_metadata(&bytes).map_err(|err| err.into_error(&key))?;
        Ok(Some(value))
    }

    /// Lists object keys in the basket, relative to `relative_path`
    /// under the basket root when given.
    ///
    /// The reserved basket documents are filtered from listings of the
    /// basket root.
    pub async fn ls(&self, relative_path: Option<&str>) -> Result<Vec<String>> {
        let at_root = relative_path.is_none();
        let base = match relative_path {
            Some(rel) => format!("{}/{}", self.address, rel.trim_matches('/')),
            None => self.address.clone(),
        };

        let mut keys: Vec<String> = self
            .storage
            .list(&format!("{base}/"))
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .filter(|path| {
                if !at_root {
                    return true;
                }
                let basename = path.rsplit('/').next().unwrap_or(path);
                let in_root = path
                    .strip_prefix(&format!("{base}/"))
                    .is_some_and(|rest| !rest.contains('/'));
                !(in_root && is_reserved_filename(basename))
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}
