//! Mirroring basket documents into a queryable document store.
//!
//! The mirror is a convenience projection, never ground truth: baskets
//! already mirrored are skipped, and a lost mirror can always be
//! rebuilt from the pantry.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use larder_core::{Error, Result, StorageBackend};

use crate::basket::Basket;

/// Collection holding one document per basket manifest.
pub const MANIFEST_COLLECTION: &str = "manifest";
/// Collection holding one document per basket supplement.
pub const SUPPLEMENT_COLLECTION: &str = "supplement";
/// Collection holding one document per basket metadata document.
pub const METADATA_COLLECTION: &str = "metadata";

/// A document store the pantry can mirror basket documents into.
#[async_trait]
pub trait DocumentMirror: Send + Sync {
    /// Inserts `document` into `collection` keyed by basket uuid.
    ///
    /// Returns `false` without modifying anything when the uuid is
    /// already present in the collection.
    async fn upsert(&self, collection: &str, uuid: &str, document: Value) -> Result<bool>;
}

/// In-memory mirror, for tests and single-process use.
#[derive(Default)]
pub struct MemoryMirror {
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryMirror {
    /// Creates an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document for `uuid` in `collection`, if mirrored.
    pub async fn get(&self, collection: &str, uuid: &str) -> Option<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(uuid))
            .cloned()
    }

    /// Number of documents in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl DocumentMirror for MemoryMirror {
    async fn upsert(&self, collection: &str, uuid: &str, document: Value) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(uuid) {
            return Ok(false);
        }
        docs.insert(uuid.to_string(), document);
        Ok(true)
    }
}

/// How many documents a mirror pass wrote and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    /// Documents newly written.
    pub inserted: usize,
    /// Documents skipped because their uuid was already mirrored.
    pub skipped: usize,
}

/// Mirrors one basket's documents into the store.
///
/// Manifest and supplement documents are always produced; a metadata
/// document only when the basket has metadata. Every document carries
/// the basket uuid and type so collections are queryable on their own.
pub async fn mirror_basket(
    storage: Arc<dyn StorageBackend>,
    mirror: &dyn DocumentMirror,
    address: &str,
) -> Result<MirrorReport> {
    let basket = Basket::open(storage, address).await?;
    let manifest = basket.manifest();
    let uuid = manifest.uuid.clone();
    let basket_type = manifest.basket_type.clone();

    let mut report = MirrorReport::default();
    let mut record = |inserted: bool| {
        if inserted {
            report.inserted += 1;
        } else {
            report.skipped += 1;
        }
    };

    let manifest_doc = serde_json::to_value(manifest)
        .map_err(|err| Error::serialization(err.to_string()))?;
    record(
        mirror
            .upsert(MANIFEST_COLLECTION, &uuid, manifest_doc)
            .await?,
    );

    let supplement = basket.supplement().await?;
    let supplement_doc = tag_document(
        serde_json::to_value(&supplement)
            .map_err(|err| Error::serialization(err.to_string()))?,
        &uuid,
        &basket_type,
    );
    record(
        mirror
            .upsert(SUPPLEMENT_COLLECTION, &uuid, supplement_doc)
            .await?,
    );

    if let Some(metadata) = basket.metadata().await? {
        let metadata_doc = tag_document(metadata, &uuid, &basket_type);
        record(
            mirror
                .upsert(METADATA_COLLECTION, &uuid, metadata_doc)
                .await?,
        );
    }
    Ok(report)
}

/// Adds uuid and basket_type keys to a document. Non-object documents
/// are wrapped under a `metadata` key first.
fn tag_document(document: Value, uuid: &str, basket_type: &str) -> Value {
    let mut map = match document {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("metadata".to_string(), other);
            map
        }
    };
    map.insert("uuid".to_string(), Value::String(uuid.to_string()));
    map.insert(
        "basket_type".to_string(),
        Value::String(basket_type.to_string()),
    );
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit_basket, CommitRequest};
    use crate::schema::UploadItem;
    use larder_core::MemoryBackend;

    async fn seed_basket(
        storage: &MemoryBackend,
        id: &str,
        metadata: Option<Value>,
    ) -> String {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(format!("{id}.txt"));
        std::fs::write(&file, id.as_bytes()).unwrap();

        let mut request = CommitRequest::new("raw");
        request.unique_id = Some(id.to_string());
        request.metadata = metadata;
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
    async fn basket_documents_are_mirrored_once() {
        let storage = Arc::new(MemoryBackend::new());
        let address =
            seed_basket(&storage, "0001", Some(serde_json::json!({"quality": "gold"}))).await;
        let mirror = MemoryMirror::new();

        let report = mirror_basket(storage.clone(), &mirror, &address)
            .await
            .unwrap();
        assert_eq!(report, MirrorReport { inserted: 3, skipped: 0 });

        let doc = mirror.get(METADATA_COLLECTION, "0001").await.unwrap();
        assert_eq!(doc["quality"], "gold");
        assert_eq!(doc["uuid"], "0001");
        assert_eq!(doc["basket_type"], "raw");

        // A second pass is a no-op.
        let report = mirror_basket(storage, &mirror, &address).await.unwrap();
        assert_eq!(report, MirrorReport { inserted: 0, skipped: 3 });
        assert_eq!(mirror.len(MANIFEST_COLLECTION).await, 1);
    }

    #[tokio::test]
    async fn baskets_without_metadata_skip_the_metadata_collection() {
        let storage = Arc::new(MemoryBackend::new());
        let address = seed_basket(&storage, "0001", None).await;
        let mirror = MemoryMirror::new();

        let report = mirror_basket(storage, &mirror, &address).await.unwrap();
        assert_eq!(report, MirrorReport { inserted: 2, skipped: 0 });
        assert_eq!(mirror.len(METADATA_COLLECTION).await, 0);
    }
}
