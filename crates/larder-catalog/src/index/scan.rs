//! Pantry rescans: discovering basket manifests in storage.

use larder_core::paths::{MANIFEST_FILENAME, INDEX_BASKET_TYPE};
use larder_core::{Error, Result, StorageBackend};

use crate::index::entry::IndexEntry;
use crate::schema::parse_manifest;

/// A basket skipped during a rescan, with the reason.
#[derive(Debug, Clone)]
pub struct ScanWarning {
    /// Address of the offending basket.
    pub address: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of a full rescan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Entries for every well-formed basket found.
    pub entries: Vec<IndexEntry>,
    /// Baskets skipped because their manifest was malformed.
    pub warnings: Vec<ScanWarning>,
}

/// Scans the pantry for basket manifests and parses each into an entry.
///
/// Malformed manifests are skipped with a warning — one corrupt basket
/// never aborts cataloging the rest. Baskets of the reserved `index`
/// type are skipped to avoid self-reference.
///
/// # Errors
///
/// Returns `NotFound` if the root itself does not exist.
pub async fn scan_pantry(storage: &dyn StorageBackend, pantry_root: &str) -> Result<ScanReport> {
    if !storage.exists(pantry_root).await? {
        return Err(Error::NotFound(format!(
            "pantry root does not exist: '{pantry_root}'"
        )));
    }

    let prefix = format!("{}/", pantry_root.trim_end_matches('/'));
    let mut manifest_paths: Vec<String> = storage
        .list(&prefix)
        .await?
        .into_iter()
        .map(|meta| meta.path)
        .filter(|path| path.ends_with(&format!("/{MANIFEST_FILENAME}")))
        .collect();
    manifest_paths.sort();

    let mut report = ScanReport::default();
    for manifest_path in manifest_paths {
        let address = manifest_path
            .trim_end_matches(MANIFEST_FILENAME)
            .trim_end_matches('/')
            .to_string();
        let bytes = storage.get(&manifest_path).await?;
        match parse_manifest(&bytes) {
            Ok(manifest) => {
                if manifest.basket_type == INDEX_BASKET_TYPE {
                    continue;
                }
                report
                    .entries
                    .push(IndexEntry::from_manifest(manifest, address, storage.kind()));
            }
            Err(err) => {
                let reason = match err {
                    crate::schema::DocumentError::Unreadable(msg) => {
                        format!("manifest could not be loaded as json: {msg}")
                    }
                    crate::schema::DocumentError::SchemaMismatch(msg) => {
                        format!("manifest schema does not match: {msg}")
                    }
                };
                tracing::warn!(
                    basket = %address,
                    reason = %reason,
                    "skipping basket during rescan"
                );
                report.warnings.push(ScanWarning { address, reason });
            }
        }
    }
    Ok(report)
}

/// Scans a single basket directory into an entry — the fast path used
/// right after a commit, avoiding a full rescan.
pub async fn scan_basket(storage: &dyn StorageBackend, address: &str) -> Result<IndexEntry> {
    let manifest_path = larder_core::paths::manifest_path(address);
    let bytes = storage.get(&manifest_path).await?;
    let manifest = parse_manifest(&bytes).map_err(|err| err.into_error(&manifest_path))?;
    Ok(IndexEntry::from_manifest(manifest, address, storage.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit_basket, CommitRequest};
    use crate::schema::UploadItem;
    use bytes::Bytes;
    use larder_core::{MemoryBackend, WritePrecondition};

    async fn seed_basket(storage: &MemoryBackend, id: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(format!("{id}.txt"));
        std::fs::write(&file, id.as_bytes()).unwrap();

        let mut request = CommitRequest::new("raw");
        request.unique_id = Some(id.to_string());
        request.upload_items = vec![UploadItem {
            path: file.to_string_lossy().into_owned(),
            stub: false,
        }];
        commit_basket(storage, "pantry", request).await.unwrap().address
    }

    #[tokio::test]
    async fn scan_finds_committed_baskets() {
        let storage = MemoryBackend::new();
        seed_basket(&storage, "0001").await;
        seed_basket(&storage, "0002").await;

        let report = scan_pantry(&storage, "pantry").await.unwrap();
        assert_eq!(report.entries.len(), 2);
        assert!(report.warnings.is_empty());
        let uuids: Vec<&str> = report.entries.iter().map(|e| e.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["0001", "0002"]);
    }

    #[tokio::test]
    async fn malformed_manifest_is_skipped_with_warning() {
        let storage = MemoryBackend::new();
        seed_basket(&storage, "0001").await;
        storage
            .put(
                "pantry/raw/bad/basket_manifest.json",
                Bytes::from("{not json"),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        let report = scan_pantry(&storage, "pantry").await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].address, "pantry/raw/bad");
    }

    #[tokio::test]
    async fn index_type_baskets_are_skipped() {
        let storage = MemoryBackend::new();
        let manifest = serde_json::json!({
            "uuid": "idx",
            "upload_time": "2026-01-05T12:00:00Z",
            "parent_uuids": [],
            "basket_type": "index",
            "label": "",
            "format_version": "0.1.0",
        });
        storage
            .put(
                "pantry/index/idx/basket_manifest.json",
                Bytes::from(serde_json::to_vec(&manifest).unwrap()),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        let report = scan_pantry(&storage, "pantry").await.unwrap();
        assert!(report.entries.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_not_found() {
        let storage = MemoryBackend::new();
        let err = scan_pantry(&storage, "nowhere").await.unwrap_err();
        assert!(matches!(err, larder_core::Error::NotFound(_)));
    }
}
