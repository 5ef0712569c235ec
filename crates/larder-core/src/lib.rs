//! # larder-core
//!
//! Core primitives for the Larder basket catalog:
//!
//! - **Errors**: the shared error taxonomy and result alias
//! - **Storage**: the object-store capability trait plus in-memory and
//!   local-filesystem backends
//! - **Paths**: the on-disk basket layout and containment checks
//! - **Observability**: logging initialization
//!
//! Domain logic (commit protocol, index, validator, pantry) lives in
//! `larder-catalog`; this crate defines only the primitives shared
//! across components.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod observability;
pub mod paths;
pub mod storage;

pub use error::{Error, Result};
pub use storage::{
    LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
};
