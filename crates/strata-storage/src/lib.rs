//! Strata Storage Library
//!
//! This crate provides the [`Storage`] trait and its implementations for the local
//! filesystem and for object stores (Amazon S3 and anything else `object_store`
//! speaks).
//!
//! # Key format
//!
//! A stored file is addressed by `(dir, name)`. All backends use the same key
//! layout, `{dir}/{name}`, so switching backends never changes where a version
//! lives relative to its root:
//!
//! - **Local**: `<base_path>/{dir}/{name}`
//! - **Object store**: object `{dir}/{name}` inside the configured bucket
//!
//! Keys must not contain `..` segments. Key generation is centralized in the
//! `keys` module so all backends stay consistent.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod object;
pub mod signing;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use object::ObjectStorage;
pub use strata_core::{StorageBackend, StoreOptions, UrlOptions};
pub use traits::{Storage, StorageError, StorageResult};
