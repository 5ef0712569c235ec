//! Structural validation of a pantry.
//!
//! The validator is read-only and reports every problem it finds as a
//! [`Violation`] instead of failing on the first one. A directory is
//! treated as a basket whenever it contains a `basket_manifest.json`,
//! even one that does not parse; a corrupt manifest marks a basket
//! whose documents are then checked like any other.

use std::collections::BTreeSet;
use std::fmt;

use larder_core::paths::{
    manifest_path, metadata_path, supplement_path, MANIFEST_FILENAME,
};
use larder_core::{Error, Result, StorageBackend};

use crate::schema::{parse_manifest, parse_metadata, parse_supplement, DocumentError};

/// What is wrong with a basket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ViolationReason {
    /// The basket has no supplement document.
    MissingSupplement,
    /// The manifest is not valid json.
    ManifestUnreadable(String),
    /// The manifest parses but does not match the schema.
    ManifestSchema(String),
    /// The supplement is not valid json.
    SupplementUnreadable(String),
    /// The supplement parses but does not match the schema.
    SupplementSchema(String),
    /// The metadata document is not valid json.
    MetadataUnreadable(String),
    /// The basket directory contains another basket.
    NestedBasket,
    /// The manifest names a parent uuid that is not in the pantry.
    MissingParent(String),
    /// The supplement lists an uploaded file that is not in the basket.
    SupplementFileMissing(String),
    /// The basket holds a file the supplement does not list.
    UnlistedFile(String),
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSupplement => write!(f, "basket has no basket_supplement.json"),
            Self::ManifestUnreadable(msg) => {
                write!(f, "manifest could not be loaded as json: {msg}")
            }
            Self::ManifestSchema(msg) => {
                write!(f, "manifest schema does not match: {msg}")
            }
            Self::SupplementUnreadable(msg) => {
                write!(f, "supplement could not be loaded as json: {msg}")
            }
            Self::SupplementSchema(msg) => {
                write!(f, "supplement schema does not match: {msg}")
            }
            Self::MetadataUnreadable(msg) => {
                write!(f, "metadata could not be loaded as json: {msg}")
            }
            Self::NestedBasket => write!(f, "basket stored within another basket"),
            Self::MissingParent(uuid) => {
                write!(f, "parent uuid not found in pantry: {uuid}")
            }
            Self::SupplementFileMissing(path) => {
                write!(f, "file listed in supplement is missing: {path}")
            }
            Self::UnlistedFile(path) => {
                write!(f, "file not listed in supplement: {path}")
            }
        }
    }
}

/// One structural problem found in the pantry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Violation {
    /// Address of the offending basket.
    pub path: String,
    /// What is wrong.
    pub reason: ViolationReason,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Checks every basket under `pantry_root` and returns the problems
/// found, sorted by basket address.
///
/// # Errors
///
/// Returns `NotFound` if the root itself does not exist; individual
/// basket problems never abort the walk.
pub async fn validate_pantry(
    storage: &dyn StorageBackend,
    pantry_root: &str,
) -> Result<Vec<Violation>> {
    if !storage.exists(pantry_root).await? {
        return Err(Error::NotFound(format!(
            "pantry root does not exist: '{pantry_root}'"
        )));
    }

    let prefix = format!("{}/", pantry_root.trim_end_matches('/'));
    let keys: Vec<String> = storage
        .list(&prefix)
        .await?
        .into_iter()
        .map(|meta| meta.path)
        .collect();

    let mut basket_dirs: Vec<String> = keys
        .iter()
        .filter(|key| key.ends_with(&format!("/{MANIFEST_FILENAME}")))
        .map(|key| {
            key.trim_end_matches(MANIFEST_FILENAME)
                .trim_end_matches('/')
                .to_string()
        })
        .collect();
    basket_dirs.sort();

    // Uuids of every basket with a readable manifest, for the parent
    // existence check.
    let mut known_uuids: BTreeSet<String> = BTreeSet::new();
    for dir in &basket_dirs {
        let bytes = storage.get(&manifest_path(dir)).await?;
        if let Ok(manifest) = parse_manifest(&bytes) {
            known_uuids.insert(manifest.uuid);
        }
    }

    let mut violations = Vec::new();
    for dir in &basket_dirs {
        if basket_dirs
            .iter()
            .any(|other| other != dir && dir.starts_with(&format!("{other}/")))
        {
            violations.push(Violation {
                path: dir.clone(),
                reason: ViolationReason::NestedBasket,
            });
        }
        check_basket(storage, dir, &basket_dirs, &known_uuids, &keys, &mut violations).await?;
    }
    violations.sort();
    Ok(violations)
}

async fn check_basket(
    storage: &dyn StorageBackend,
    dir: &str,
    basket_dirs: &[String],
    known_uuids: &BTreeSet<String>,
    keys: &[String],
    violations: &mut Vec<Violation>,
) -> Result<()> {
    let push = |violations: &mut Vec<Violation>, reason| {
        violations.push(Violation {
            path: dir.to_string(),
            reason,
        });
    };

    let manifest_key = manifest_path(dir);
    let manifest_bytes = storage.get(&manifest_key).await?;
    match parse_manifest(&manifest_bytes) {
        Ok(manifest) => {
            for parent in &manifest.parent_uuids {
                if !known_uuids.contains(parent) {
                    push(violations, ViolationReason::MissingParent(parent.clone()));
                }
            }
        }
        Err(DocumentError::Unreadable(msg)) => {
            push(violations, ViolationReason::ManifestUnreadable(msg));
        }
        Err(DocumentError::SchemaMismatch(msg)) => {
            push(violations, ViolationReason::ManifestSchema(msg));
        }
    }

    let supplement_key = supplement_path(dir);
    let supplement = if storage.exists(&supplement_key).await? {
        let bytes = storage.get(&supplement_key).await?;
        match parse_supplement(&bytes) {
            Ok(supplement) => Some(supplement),
            Err(DocumentError::Unreadable(msg)) => {
                push(violations, ViolationReason::SupplementUnreadable(msg));
                None
            }
            Err(DocumentError::SchemaMismatch(msg)) => {
                push(violations, ViolationReason::SupplementSchema(msg));
                None
            }
        }
    } else {
        push(violations, ViolationReason::MissingSupplement);
        None
    };

    let metadata_key = metadata_path(dir);
    if storage.exists(&metadata_key).await? {
        let bytes = storage.get(&metadata_key).await?;
        if let Err(err) = parse_metadata(&bytes) {
            let msg = match err {
                DocumentError::Unreadable(msg) | DocumentError::SchemaMismatch(msg) => msg,
            };
            push(violations, ViolationReason::MetadataUnreadable(msg));
        }
    }

    // Cross-check the supplement against the files actually present.
    // Nested baskets are checked on their own, so their files are not
    // this basket's concern.
    if let Some(supplement) = supplement {
        let basket_prefix = format!("{dir}/");
        let data_keys: BTreeSet<&str> = keys
            .iter()
            .filter(|key| key.starts_with(&basket_prefix))
            .filter(|key| {
                *key != &manifest_key && *key != &supplement_key && *key != &metadata_key
            })
            .filter(|key| {
                !basket_dirs
                    .iter()
                    .any(|other| other != dir && key.starts_with(&format!("{other}/")))
            })
            .map(String::as_str)
            .collect();
        let listed: BTreeSet<&str> = supplement
            .integrity_data
            .iter()
            .filter(|record| !record.stub)
            .map(|record| record.upload_path.as_str())
            .collect();

        for missing in listed.difference(&data_keys) {
            push(
                violations,
                ViolationReason::SupplementFileMissing((*missing).to_string()),
            );
        }
        for unlisted in data_keys.difference(&listed) {
            push(
                violations,
                ViolationReason::UnlistedFile((*unlisted).to_string()),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit_basket, CommitRequest};
    use crate::schema::UploadItem;
    use bytes::Bytes;
    use larder_core::{MemoryBackend, WritePrecondition};

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

    #[tokio::test]
    async fn committed_baskets_pass_clean() {
        let storage = MemoryBackend::new();
        seed_basket(&storage, "0001", &[]).await;
        seed_basket(&storage, "0002", &["0001"]).await;

        let violations = validate_pantry(&storage, "pantry").await.unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let storage = MemoryBackend::new();
        seed_basket(&storage, "0001", &[]).await;

        let first = validate_pantry(&storage, "pantry").await.unwrap();
        let second = validate_pantry(&storage, "pantry").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_supplement_and_corrupt_manifest_are_reported() {
        let storage = MemoryBackend::new();
        storage
            .put(
                "pantry/raw/bad/basket_manifest.json",
                Bytes::from("{not json"),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        let violations = validate_pantry(&storage, "pantry").await.unwrap();
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .any(|v| v.reason == ViolationReason::MissingSupplement));
        assert!(violations
            .iter()
            .any(|v| matches!(v.reason, ViolationReason::ManifestUnreadable(_))));
    }

    #[tokio::test]
    async fn nested_basket_is_reported() {
        let storage = MemoryBackend::new();
        let outer = seed_basket(&storage, "0001", &[]).await;
        let inner_manifest = serde_json::json!({
            "uuid": "inner",
            "upload_time": "2026-01-05T12:00:00Z",
            "parent_uuids": [],
            "basket_type": "raw",
            "label": "",
            "format_version": "0.1.0",
        });
        storage
            .put(
                &format!("{outer}/inner/basket_manifest.json"),
                Bytes::from(serde_json::to_vec(&inner_manifest).unwrap()),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        let violations = validate_pantry(&storage, "pantry").await.unwrap();
        assert!(violations.iter().any(|v| {
            v.path == format!("{outer}/inner") && v.reason == ViolationReason::NestedBasket
        }));
    }

    #[tokio::test]
    async fn supplement_file_cross_check_cuts_both_ways() {
        let storage = MemoryBackend::new();
        let address = seed_basket(&storage, "0001", &[]).await;

        storage
            .put(
                &format!("{address}/extra.bin"),
                Bytes::from_static(b"x"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        storage
            .remove(&format!("{address}/0001.txt"), false)
            .await
            .unwrap();

        let violations = validate_pantry(&storage, "pantry").await.unwrap();
        assert!(violations.iter().any(|v| matches!(
            &v.reason,
            ViolationReason::SupplementFileMissing(p) if p.ends_with("0001.txt")
        )));
        assert!(violations.iter().any(|v| matches!(
            &v.reason,
            ViolationReason::UnlistedFile(p) if p.ends_with("extra.bin")
        )));
    }

    #[tokio::test]
    async fn missing_parent_is_reported() {
        let storage = MemoryBackend::new();
        seed_basket(&storage, "0002", &["ghost"]).await;

        let violations = validate_pantry(&storage, "pantry").await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(
            violations[0].reason,
            ViolationReason::MissingParent("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn stub_uploads_are_not_expected_on_disk() {
        let storage = MemoryBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.bin");
        std::fs::write(&file, b"payload").unwrap();

        let mut request = CommitRequest::new("raw");
        request.unique_id = Some("0001".to_string());
        request.upload_items = vec![UploadItem {
            path: file.to_string_lossy().into_owned(),
            stub: true,
        }];
        commit_basket(&storage, "pantry", request).await.unwrap();

        let violations = validate_pantry(&storage, "pantry").await.unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[tokio::test]
    async fn missing_root_is_not_found() {
        let storage = MemoryBackend::new();
        let err = validate_pantry(&storage, "nowhere").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
