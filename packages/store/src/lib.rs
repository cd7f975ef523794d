//! # faashost-store
//!
//! Storage collaborators of the guest sandbox:
//!
//! - [`KvStore`]: the persistent key-value contract (get, put, scan by
//!   prefix), with [`MemoryKv`] as an in-process implementation.
//! - [`BlobStore`]: content-addressed blobs with aliases. Guest bytecode is
//!   fetched from here by alias.
//! - [`Persistence`]: the namespaced key-value view guests use through the
//!   `core` host API.

pub mod blob;
pub mod error;
pub mod kv;
pub mod persistence;

pub use blob::{BlobAbstract, BlobStore, ContentId, CONTENT_ID_SCHEME};
pub use error::{Result, StoreError};
pub use kv::{KvStore, MemoryKv};
pub use persistence::Persistence;
