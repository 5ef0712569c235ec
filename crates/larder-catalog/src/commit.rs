//! The basket commit protocol.
//!
//! A commit stages local files, derives integrity records, and writes
//! the basket documents in a fixed order: data files, manifest,
//! metadata (when supplied), supplement. Each step is durable before
//! the next begins, which makes partial-failure cleanup deterministic:
//! on any error the whole destination subtree is deleted and the
//! original error is returned, so callers always observe an
//! all-or-nothing outcome.
//!
//! The "destination must not exist" precheck plus a create-if-absent
//! precondition on the first durable write are the only ordering guards
//! between concurrent commits to the same destination; the race window
//! between precheck and first write is closed by the precondition, not
//! the precheck.

use bytes::Bytes;
use serde_json::Value;
use std::path::{Path, PathBuf};

use larder_core::paths::{
    basket_dir, is_reserved_filename, manifest_path, metadata_path, supplement_path,
};
use larder_core::{Error, Result, StorageBackend, WritePrecondition, WriteResult};

use crate::integrity::{derive_integrity, IntegrityConfig, IntegrityRecord, STUB_UPLOAD_PATH};
use crate::schema::{BasketManifest, BasketSupplement, UploadItem, FORMAT_VERSION};

/// Everything a single basket commit needs, validated before any I/O.
///
/// Explicit fields with defaults replace per-call keyword plumbing:
/// construct with [`CommitRequest::new`] and override what you need.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Files and directories to stage.
    pub upload_items: Vec<UploadItem>,
    /// Basket type; becomes the first path segment under the root.
    pub basket_type: String,
    /// Basket id; generated when `None`.
    pub unique_id: Option<String>,
    /// Uuids of the baskets this one derives from.
    pub parent_ids: Vec<String>,
    /// Free-form metadata document. `None` (or an empty object) means
    /// no metadata document is written.
    pub metadata: Option<Value>,
    /// User-friendly label.
    pub label: String,
    /// Integrity sampling configuration.
    pub integrity: IntegrityConfig,
}

impl CommitRequest {
    /// Creates a request for the given basket type with defaults.
    #[must_use]
    pub fn new(basket_type: impl Into<String>) -> Self {
        Self {
            upload_items: Vec::new(),
            basket_type: basket_type.into(),
            unique_id: None,
            parent_ids: Vec::new(),
            metadata: None,
            label: String::new(),
            integrity: IntegrityConfig::default(),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Storage path of the new basket.
    pub address: String,
    /// The manifest that was written.
    pub manifest: BasketManifest,
}

/// Commits a basket under `{pantry_root}/{basket_type}/{unique_id}`.
///
/// # Errors
///
/// - `InvalidInput` for malformed upload items, reserved or duplicate
///   basenames, or a metadata-only commit missing parents or metadata.
/// - `NotFound` when an item path does not exist locally.
/// - `AlreadyExists` when the destination is already occupied.
/// - Any storage error, after the destination subtree has been rolled
///   back.
pub async fn commit_basket(
    storage: &dyn StorageBackend,
    pantry_root: &str,
    request: CommitRequest,
) -> Result<CommitOutcome> {
    validate_upload_items(&request.upload_items).await?;

    let metadata = normalize_metadata(request.metadata);
    if request.upload_items.is_empty() && (request.parent_ids.is_empty() || metadata.is_none()) {
        return Err(Error::InvalidInput(
            "a basket without upload items must supply both parent_ids and metadata".into(),
        ));
    }

    let unique_id = request
        .unique_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let destination = basket_dir(pantry_root, &request.basket_type, &unique_id);

    if storage.exists(&destination).await? {
        return Err(Error::AlreadyExists(format!(
            "upload directory already exists: '{destination}'"
        )));
    }

    let mut writer = GuardedWriter::new(storage, &destination);
    let result = run_commit(
        &mut writer,
        &destination,
        &unique_id,
        request.upload_items,
        request.basket_type,
        request.parent_ids,
        metadata,
        request.label,
        request.integrity,
    )
    .await;

    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            // Deterministic cleanup: delete the whole destination if any
            // of it became durable, then surface the original error.
            if writer.wrote_anything && storage.exists(&destination).await.unwrap_or(false) {
                if let Err(cleanup_err) = storage.remove(&destination, true).await {
                    tracing::warn!(
                        destination = %destination,
                        error = %cleanup_err,
                        "failed to clean up partial basket after commit error"
                    );
                }
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_commit(
    writer: &mut GuardedWriter<'_>,
    destination: &str,
    unique_id: &str,
    upload_items: Vec<UploadItem>,
    basket_type: String,
    parent_ids: Vec<String>,
    metadata: Option<Value>,
    label: String,
    integrity: IntegrityConfig,
) -> Result<CommitOutcome> {
    // Step 1-2: stage every file, deriving integrity records and copying
    // bytes for non-stub items.
    let mut integrity_data: Vec<IntegrityRecord> = Vec::new();
    for item in &upload_items {
        let item_path = PathBuf::from(&item.path);
        let files = collect_files(&item_path).await?;
        for local in files {
            let mut record = derive_integrity(&local, integrity).await?;
            if item.stub {
                record.stub = true;
                record.upload_path = STUB_UPLOAD_PATH.to_string();
            } else {
                let upload_path = format!("{destination}/{}", relative_key(&item_path, &local)?);
                record.upload_path = upload_path.clone();
                let bytes = Bytes::from(tokio::fs::read(&local).await?);
                writer.put(&upload_path, bytes).await?;
            }
            integrity_data.push(record);
        }
    }

    // Step 3: manifest.
    let manifest = BasketManifest {
        uuid: unique_id.to_string(),
        upload_time: chrono::Utc::now(),
        parent_uuids: parent_ids,
        basket_type,
        label,
        format_version: FORMAT_VERSION.to_string(),
    };
    writer
        .put(&manifest_path(destination), to_json_bytes(&manifest)?)
        .await?;

    // Step 4: metadata, only when supplied.
    if let Some(metadata) = &metadata {
        writer
            .put(&metadata_path(destination), to_json_bytes(metadata)?)
            .await?;
    }

    // Step 5: supplement.
    let supplement = BasketSupplement {
        upload_items,
        integrity_data,
    };
    writer
        .put(&supplement_path(destination), to_json_bytes(&supplement)?)
        .await?;

    Ok(CommitOutcome {
        address: destination.to_string(),
        manifest,
    })
}

/// Storage writer that applies a create-if-absent precondition to the
/// first durable write under the destination.
struct GuardedWriter<'a> {
    storage: &'a dyn StorageBackend,
    destination: &'a str,
    wrote_anything: bool,
}

impl<'a> GuardedWriter<'a> {
    fn new(storage: &'a dyn StorageBackend, destination: &'a str) -> Self {
        Self {
            storage,
            destination,
            wrote_anything: false,
        }
    }

    async fn put(&mut self, path: &str, data: Bytes) -> Result<()> {
        let first = !self.wrote_anything;
        let precondition = if first {
            WritePrecondition::DoesNotExist
        } else {
            WritePrecondition::None
        };
        // A put that errors can still have persisted bytes (a torn
        // write), so the write counts as attempted before the result
        // is known.
        self.wrote_anything = true;
        match self.storage.put(path, data, precondition).await? {
            WriteResult::Success => Ok(()),
            WriteResult::PreconditionFailed => {
                // Nothing was written and the destination belongs to
                // the race winner; it must not be cleaned up.
                if first {
                    self.wrote_anything = false;
                }
                Err(Error::AlreadyExists(format!(
                    "lost creation race for upload directory: '{}'",
                    self.destination
                )))
            }
        }
    }
}

async fn validate_upload_items(items: &[UploadItem]) -> Result<()> {
    let mut basenames: Vec<String> = Vec::new();
    for item in items {
        let path = Path::new(&item.path);
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(Error::NotFound(format!(
                "'path' does not exist: '{}'",
                item.path
            )));
        }
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::InvalidInput(format!("upload item has no basename: '{}'", item.path))
            })?;
        if is_reserved_filename(&basename) {
            return Err(Error::InvalidInput(format!(
                "'{basename}' filename not allowed"
            )));
        }
        if basenames.contains(&basename) {
            return Err(Error::InvalidInput(format!(
                "upload item folder and file names must be unique: duplicate name = {basename}"
            )));
        }
        basenames.push(basename);
    }
    Ok(())
}

fn normalize_metadata(metadata: Option<Value>) -> Option<Value> {
    match metadata {
        Some(Value::Object(map)) if map.is_empty() => None,
        other => other,
    }
}

/// Collects the files under an upload item: the file itself, or every
/// file below a directory, in sorted order for deterministic layout.
async fn collect_files(item_path: &Path) -> Result<Vec<PathBuf>> {
    let meta = tokio::fs::metadata(item_path).await?;
    if meta.is_file() {
        return Ok(vec![item_path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut stack = vec![item_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Storage key of `local` relative to the upload item's parent, so a
/// directory item keeps its own name as the top-level folder in the
/// basket.
fn relative_key(item_path: &Path, local: &Path) -> Result<String> {
    let base = item_path.parent().unwrap_or(item_path);
    let rel = local.strip_prefix(base).map_err(|_| {
        Error::internal(format!(
            "staged file {} escapes upload item {}",
            local.display(),
            item_path.display()
        ))
    })?;
    Ok(rel
        .to_string_lossy()
        .replace(std::path::MAIN_SEPARATOR, "/"))
}

fn to_json_bytes<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| Error::serialization(err.to_string()))
}
