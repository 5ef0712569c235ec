//! Storage capability consumed by the basket catalog.
//!
//! The contract is object-store shaped: flat keys, recursive listing by
//! prefix, and conditional creation. Directories are implicit — a prefix
//! exists exactly when some object lives under it. Any object store or
//! local filesystem satisfying this trait can host a pantry.
//!
//! The `DoesNotExist` precondition is the only ordering guard for
//! concurrent commits to the same destination: backends must implement
//! it with create-if-absent semantics, not a check-then-write.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
///
/// Precondition failure is a normal result, never an error — callers
/// decide whether a lost race is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// The write succeeded.
    Success,
    /// The precondition was not met; nothing was written.
    PreconditionFailed,
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key), relative to the store root.
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification timestamp, when the backend tracks one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for hosting pantries.
///
/// All methods must be safe to invoke concurrently from independent
/// callers; implementations should not assume single-threaded use.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Returns a short discriminator for this backend kind
    /// (recorded as `storage_type` in index entries).
    fn kind(&self) -> &'static str;

    /// Returns true if `path` names an object, or a prefix under which
    /// at least one object exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes an object with an optional precondition.
    async fn put(&self, path: &str, data: Bytes, precondition: WritePrecondition)
        -> Result<WriteResult>;

    /// Lists all objects under the given prefix, recursively.
    ///
    /// Returns an empty vec if nothing matches. Ordering is arbitrary;
    /// callers requiring determinism must sort.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Deletes an object, or a whole prefix when `recursive` is true.
    ///
    /// Succeeds even if nothing exists at the path (idempotent).
    async fn remove(&self, path: &str, recursive: bool) -> Result<()>;

    /// Copies an object within the store.
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;
}

fn as_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{trimmed}/")
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`; used for tests and the pantry write probe.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, StoredObject>>> {
        self.objects
            .read()
            .map_err(|_| Error::internal("lock poisoned"))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, StoredObject>>> {
        self.objects
            .write()
            .map_err(|_| Error::internal("lock poisoned"))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let objects = self.lock_read()?;
        if objects.contains_key(path) {
            return Ok(true);
        }
        let prefix = as_prefix(path);
        Ok(objects.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        self.lock_read()?
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.lock_write()?;

        if precondition == WritePrecondition::DoesNotExist && objects.contains_key(path) {
            return Ok(WriteResult::PreconditionFailed);
        }

        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(WriteResult::Success)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.lock_read()?;
        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| ObjectMeta {
                path: path.clone(),
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified),
            })
            .collect())
    }

    async fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        let mut objects = self.lock_write()?;
        objects.remove(path);
        if recursive {
            let prefix = as_prefix(path);
            objects.retain(|k, _| !k.starts_with(&prefix));
        }
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let data = self.get(src).await?;
        self.put(dst, data, WritePrecondition::None).await?;
        Ok(())
    }
}

// ============================================================================
// Local filesystem backend
// ============================================================================

/// Storage backend rooted at a local directory.
///
/// Object keys map to paths below the root; parent directories spring
/// into existence on write, matching object-store semantics.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    /// Creates a backend rooted at `root`. The directory is created if
    /// it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|seg| seg == "..") {
            return Err(Error::InvalidInput(format!(
                "path traversal not allowed: {path}"
            )));
        }
        Ok(self.root.join(path))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    }

    async fn walk_files(&self, dir: PathBuf) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source("read_dir failed", e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::storage_with_source("file_type failed", e))?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else {
                    files.push(entry.path());
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full)
            .await
            .map_err(|e| Error::storage_with_source("exists probe failed", e))?)
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(err) => Err(Error::storage_with_source("read failed", err)),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage_with_source("create_dir_all failed", e))?;
        }

        match precondition {
            WritePrecondition::DoesNotExist => {
                // create_new gives atomic create-if-absent on the filesystem,
                // which is the ordering guard commits rely on.
                let mut options = tokio::fs::OpenOptions::new();
                options.write(true).create_new(true);
                match options.open(&full).await {
                    Ok(file) => {
                        use tokio::io::AsyncWriteExt;
                        let mut file = file;
                        file.write_all(&data)
                            .await
                            .map_err(|e| Error::storage_with_source("write failed", e))?;
                        file.flush()
                            .await
                            .map_err(|e| Error::storage_with_source("flush failed", e))?;
                        Ok(WriteResult::Success)
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                        Ok(WriteResult::PreconditionFailed)
                    }
                    Err(err) => Err(Error::storage_with_source("open failed", err)),
                }
            }
            WritePrecondition::None => {
                tokio::fs::write(&full, &data)
                    .await
                    .map_err(|e| Error::storage_with_source("write failed", e))?;
                Ok(WriteResult::Success)
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Walk from the deepest existing directory implied by the prefix,
        // then filter keys: a prefix may end mid-filename.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = self.resolve(dir_part)?;
        let files = self.walk_files(start).await?;

        let mut metas = Vec::new();
        for file in files {
            let Some(key) = self.key_for(&file) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let meta = tokio::fs::metadata(&file)
                .await
                .map_err(|e| Error::storage_with_source("metadata failed", e))?;
            let last_modified = meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);
            metas.push(ObjectMeta {
                path: key,
                size: meta.len(),
                last_modified,
            });
        }
        Ok(metas)
    }

    async fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        let full = self.resolve(path)?;
        let result = if recursive && full.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::storage_with_source("remove failed", err)),
        }
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let src_full = self.resolve(src)?;
        let dst_full = self.resolve(dst)?;
        if let Some(parent) = dst_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage_with_source("create_dir_all failed", e))?;
        }
        match tokio::fs::copy(&src_full, &dst_full).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {src}")))
            }
            Err(err) => Err(Error::storage_with_source("copy failed", err)),
        }
    }
}
