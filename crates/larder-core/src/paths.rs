//! Basket path layout and containment checks.
//!
//! On-disk contract:
//!
//! ```text
//! {pantry_root}/{basket_type}/{unique_id}/
//!     basket_manifest.json     (required)
//!     basket_supplement.json   (required)
//!     basket_metadata.json     (optional)
//!     <uploaded files/dirs>
//! ```
//!
//! The index catalog for file-backed backends lives at
//! `{pantry_root}/index/{version}-index.json`.

use crate::error::{Error, Result};

/// Required identity/lineage document of a basket.
pub const MANIFEST_FILENAME: &str = "basket_manifest.json";
/// Required document listing upload items and integrity records.
pub const SUPPLEMENT_FILENAME: &str = "basket_supplement.json";
/// Optional user-supplied metadata document.
pub const METADATA_FILENAME: &str = "basket_metadata.json";

/// Filenames reserved for basket documents; uploaded data files may
/// never use these names.
pub const RESERVED_FILENAMES: [&str; 3] =
    [MANIFEST_FILENAME, SUPPLEMENT_FILENAME, METADATA_FILENAME];

/// Basket type reserved for the index's own table documents. Baskets of
/// this type are skipped during rescans to avoid self-reference.
pub const INDEX_BASKET_TYPE: &str = "index";

/// Returns true if `name` is one of the reserved basket document names.
#[must_use]
pub fn is_reserved_filename(name: &str) -> bool {
    RESERVED_FILENAMES.contains(&name)
}

fn join(base: &str, leaf: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        leaf.to_string()
    } else {
        format!("{base}/{leaf}")
    }
}

/// Returns the storage path of a basket directory.
#[must_use]
pub fn basket_dir(pantry_root: &str, basket_type: &str, unique_id: &str) -> String {
    join(&join(pantry_root, basket_type), unique_id)
}

/// Returns the manifest path for a basket directory.
#[must_use]
pub fn manifest_path(basket_dir: &str) -> String {
    join(basket_dir, MANIFEST_FILENAME)
}

/// Returns the supplement path for a basket directory.
#[must_use]
pub fn supplement_path(basket_dir: &str) -> String {
    join(basket_dir, SUPPLEMENT_FILENAME)
}

/// Returns the metadata path for a basket directory.
#[must_use]
pub fn metadata_path(basket_dir: &str) -> String {
    join(basket_dir, METADATA_FILENAME)
}

/// Returns the path of a file-backed index table document.
#[must_use]
pub fn index_table_path(pantry_root: &str, version: u128) -> String {
    join(
        &join(pantry_root, INDEX_BASKET_TYPE),
        &format!("{version}-index.json"),
    )
}

/// Prefix under which file-backed index table documents live.
#[must_use]
pub fn index_table_prefix(pantry_root: &str) -> String {
    format!("{}/", join(pantry_root, INDEX_BASKET_TYPE))
}

/// Extracts the version stamp from an index table document path.
///
/// Returns `None` for paths that are not index table documents.
#[must_use]
pub fn index_table_version(path: &str) -> Option<u128> {
    let name = path.rsplit('/').next()?;
    let stamp = name.strip_suffix("-index.json")?;
    stamp.parse().ok()
}

/// Validates that `address` is contained within the pantry root.
///
/// Rejects addresses outside the root, and any attempt to escape it
/// with `..` segments.
pub fn validate_path_in_pantry(pantry_root: &str, address: &str) -> Result<()> {
    let root = pantry_root.trim_end_matches('/');
    let within = address == root || address.starts_with(&format!("{root}/"));
    if !within || address.split('/').any(|seg| seg == "..") {
        return Err(Error::InvalidInput(format!(
            "attempting to access basket outside of pantry: {address}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basket_paths_compose() {
        let dir = basket_dir("pantry", "raw", "0001");
        assert_eq!(dir, "pantry/raw/0001");
        assert_eq!(manifest_path(&dir), "pantry/raw/0001/basket_manifest.json");
        assert_eq!(
            supplement_path(&dir),
            "pantry/raw/0001/basket_supplement.json"
        );
        assert_eq!(metadata_path(&dir), "pantry/raw/0001/basket_metadata.json");
    }

    #[test]
    fn index_table_version_roundtrip() {
        let path = index_table_path("pantry", 1234567890);
        assert_eq!(path, "pantry/index/1234567890-index.json");
        assert_eq!(index_table_version(&path), Some(1234567890));
        assert_eq!(index_table_version("pantry/raw/0001/file.json"), None);
    }

    #[test]
    fn containment_rejects_outside_and_escapes() {
        assert!(validate_path_in_pantry("pantry", "pantry/raw/0001").is_ok());
        assert!(validate_path_in_pantry("pantry", "pantry").is_ok());
        assert!(validate_path_in_pantry("pantry", "elsewhere/raw/0001").is_err());
        assert!(validate_path_in_pantry("pantry", "pantry/../other").is_err());
        // Sibling roots sharing a name prefix are outside.
        assert!(validate_path_in_pantry("pantry", "pantry2/raw/0001").is_err());
    }

    #[test]
    fn reserved_names_are_flagged() {
        assert!(is_reserved_filename("basket_manifest.json"));
        assert!(is_reserved_filename("basket_supplement.json"));
        assert!(is_reserved_filename("basket_metadata.json"));
        assert!(!is_reserved_filename("data.csv"));
    }
}
