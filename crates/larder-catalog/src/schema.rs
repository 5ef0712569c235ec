//! Typed basket documents and strict parse helpers.
//!
//! The manifest and supplement are required-keys-exact-match documents:
//! unknown keys, missing keys, and wrong types are all schema
//! violations. Metadata is free-form and need only parse as JSON.
//!
//! Parse failures distinguish "unreadable JSON" from "parseable but
//! schema-mismatched" so callers (the validator in particular) can
//! report them separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::integrity::IntegrityRecord;
use larder_core::Error;

/// Format version recorded in manifests written by this crate.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder format version for manifests written before the field
/// existed.
pub const LEGACY_FORMAT_VERSION: &str = "<0.1.0";

fn legacy_format_version() -> String {
    LEGACY_FORMAT_VERSION.to_string()
}

/// Required identity and lineage document of a basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasketManifest {
    /// Unique id of the basket within its pantry.
    pub uuid: String,
    /// Commit timestamp.
    pub upload_time: DateTime<Utc>,
    /// Uuids of the baskets this one was derived from, in caller order.
    pub parent_uuids: Vec<String>,
    /// Basket type, the first path segment under the pantry root.
    pub basket_type: String,
    /// User-friendly label; may be empty.
    pub label: String,
    /// Version of the writer that produced the basket.
    #[serde(default = "legacy_format_version")]
    pub format_version: String,
}

/// One file or directory staged for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadItem {
    /// Local path to the file or directory.
    pub path: String,
    /// When true, only integrity data is recorded — no bytes are copied.
    pub stub: bool,
}

/// Required document listing upload items and per-file integrity records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasketSupplement {
    /// The upload items the basket was committed with.
    pub upload_items: Vec<UploadItem>,
    /// One record per file reached through the upload items.
    pub integrity_data: Vec<IntegrityRecord>,
}

/// How a basket document failed to parse.
#[derive(Debug, Clone)]
pub enum DocumentError {
    /// The bytes are not valid JSON.
    Unreadable(String),
    /// Valid JSON that does not match the document schema.
    SchemaMismatch(String),
}

impl DocumentError {
    /// Converts into the workspace error type with path context.
    #[must_use]
    pub fn into_error(self, path: &str) -> Error {
        match self {
            Self::Unreadable(msg) => {
                Error::schema(path, format!("could not be loaded as json: {msg}"))
            }
            Self::SchemaMismatch(msg) => {
                Error::schema(path, format!("schema does not match: {msg}"))
            }
        }
    }
}

fn parse_document<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> std::result::Result<T, DocumentError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| DocumentError::Unreadable(err.to_string()))?;
    serde_json::from_value(value).map_err(|err| DocumentError::SchemaMismatch(err.to_string()))
}

/// Parses and schema-checks a manifest document.
pub fn parse_manifest(bytes: &[u8]) -> std::result::Result<BasketManifest, DocumentError> {
    parse_document(bytes)
}

/// Parses and schema-checks a supplement document.
pub fn parse_supplement(bytes: &[u8]) -> std::result::Result<BasketSupplement, DocumentError> {
    parse_document(bytes)
}

/// Parses a metadata document. Any valid JSON is accepted.
pub fn parse_metadata(bytes: &[u8]) -> std::result::Result<Value, DocumentError> {
    serde_json::from_slice(bytes).map_err(|err| DocumentError::Unreadable(err.to_string()))
}
