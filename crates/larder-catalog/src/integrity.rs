//! Content fingerprinting for uploaded files.
//!
//! Small files are hashed whole. Files larger than `3 * byte_count`
//! bytes are fingerprinted from the first, middle, and last `byte_count`
//! bytes only — a deliberate trade-off that bounds hashing time for very
//! large files at the cost of full-file integrity proof. The byte count
//! used is recorded in the integrity record so the fingerprint can be
//! reproduced later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use larder_core::{Error, Result};

/// Default sample size in bytes (100 MB).
pub const DEFAULT_BYTE_COUNT: u64 = 100_000_000;

/// Maximum permitted sample size in bytes (300 MB).
pub const MAX_BYTE_COUNT: u64 = 300_000_000;

/// Sentinel recorded as `upload_path` for stub items.
pub const STUB_UPLOAD_PATH: &str = "stub";

/// Configuration for integrity derivation.
///
/// Validated at construction: `byte_count` must be in
/// `(0, MAX_BYTE_COUNT]`.
#[derive(Debug, Clone, Copy)]
pub struct IntegrityConfig {
    byte_count: u64,
}

impl IntegrityConfig {
    /// Creates a config with an explicit sample size.
    pub fn new(byte_count: u64) -> Result<Self> {
        if byte_count == 0 {
            return Err(Error::InvalidInput(format!(
                "'byte_count' must be greater than zero: '{byte_count}'"
            )));
        }
        if byte_count > MAX_BYTE_COUNT {
            return Err(Error::InvalidInput(format!(
                "'byte_count' must be less than or equal to {MAX_BYTE_COUNT} bytes: \
                 '{byte_count}'"
            )));
        }
        Ok(Self { byte_count })
    }

    /// Returns the configured sample size.
    #[must_use]
    pub const fn byte_count(&self) -> u64 {
        self.byte_count
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            byte_count: DEFAULT_BYTE_COUNT,
        }
    }
}

/// One integrity record per uploaded file, stored in the supplement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrityRecord {
    /// Path to the original source of the data.
    pub source_path: String,
    /// Destination path in the pantry, or `"stub"` for stub items.
    pub upload_path: String,
    /// SHA-256 over the sampled bytes, hex encoded.
    pub hash: String,
    /// Size of the source file in bytes.
    pub file_size: u64,
    /// Sample size used for the fingerprint.
    pub byte_count: u64,
    /// Wall-clock time the file was read.
    pub access_date: DateTime<Utc>,
    /// Whether the file bytes were withheld from the upload.
    pub stub: bool,
}

/// Derives an integrity record for a local file.
///
/// # Errors
///
/// Returns `NotFound` if `path` does not name a file.
pub async fn derive_integrity(path: &Path, config: IntegrityConfig) -> Result<IntegrityRecord> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) | Err(_) => {
            return Err(Error::NotFound(format!(
                "'file_path' does not exist: '{}'",
                path.display()
            )));
        }
    };

    let file_size = meta.len();
    let byte_count = config.byte_count();

    let hash = if file_size <= byte_count.saturating_mul(3) {
        let bytes = tokio::fs::read(path).await?;
        format!("{:x}", Sha256::digest(&bytes))
    } else {
        let mut hasher = Sha256::new();
        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = vec![0u8; usize::try_from(byte_count).map_err(|_| {
            Error::InvalidInput(format!("'byte_count' too large for platform: {byte_count}"))
        })?];

        // First, middle, and last byte_count bytes, in that order.
        let midpoint_seek = (file_size / 2).saturating_sub(byte_count / 2);
        let end_seek = file_size - byte_count;

        file.read_exact(&mut buf).await?;
        hasher.update(&buf);
        file.seek(std::io::SeekFrom::Start(midpoint_seek)).await?;
        file.read_exact(&mut buf).await?;
        hasher.update(&buf);
        file.seek(std::io::SeekFrom::Start(end_seek)).await?;
        file.read_exact(&mut buf).await?;
        hasher.update(&buf);

        format!("{:x}", hasher.finalize())
    };

    Ok(IntegrityRecord {
        source_path: path.to_string_lossy().into_owned(),
        upload_path: String::new(),
        hash,
        file_size,
        byte_count,
        access_date: Utc::now(),
        stub: false,
    })
}
