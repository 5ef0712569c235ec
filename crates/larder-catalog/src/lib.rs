//! Basket cataloging: the commit protocol, indexes, lineage, and the
//! pantry that ties them to one storage root.
//!
//! Data enters a pantry only through [`commit::commit_basket`] (or
//! [`pantry::Pantry::upload_basket`]), which stages files and writes
//! the basket documents atomically from the reader's point of view.
//! Everything else — indexes, lineage, mirrors — is derived from those
//! documents and can be rebuilt from storage at any time.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod basket;
pub mod commit;
pub mod index;
pub mod integrity;
pub mod lineage;
pub mod mirror;
pub mod pantry;
pub mod schema;
pub mod validate;

pub use basket::Basket;
pub use commit::{commit_basket, CommitOutcome, CommitRequest};
pub use index::{
    scan_basket, scan_pantry, FileIndex, Index, IndexEntry, PostgresIndex, ScanReport,
    ScanWarning, SqliteIndex, TableQuery,
};
pub use integrity::{derive_integrity, IntegrityConfig, IntegrityRecord};
pub use lineage::{get_children, get_parents, LineageOptions, LineageRow};
pub use mirror::{mirror_basket, DocumentMirror, MemoryMirror, MirrorReport};
pub use pantry::Pantry;
pub use schema::{BasketManifest, BasketSupplement, UploadItem};
pub use validate::{validate_pantry, Violation, ViolationReason};
