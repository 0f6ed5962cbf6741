//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{StorageBackend, StoreOptions, UrlOptions};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// All storage backends (object store, local filesystem) must implement this
/// trait and behave identically through it: callers never learn which backend
/// holds their files.
///
/// **Key format:** `(dir, name)` maps to the key `{dir}/{name}`. See the crate
/// root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Copy the bytes at `source` into `(dir, name)`.
    ///
    /// Intermediate directories are created as needed; overwriting an existing
    /// key is allowed and storing the same bytes twice leaves the same result.
    async fn store(
        &self,
        source: &Path,
        dir: &str,
        name: &str,
        opts: &StoreOptions,
    ) -> StorageResult<()>;

    /// Return a local path holding the bytes of `(dir, name)`.
    ///
    /// Backends that keep files on disk may return the stored path itself;
    /// remote backends download into a fresh private file owned by the caller.
    async fn load(&self, dir: &str, name: &str, opts: &StoreOptions) -> StorageResult<PathBuf>;

    /// Remove `(dir, name)`. Deleting a key that does not exist succeeds.
    async fn delete(&self, dir: &str, name: &str, opts: &StoreOptions) -> StorageResult<()>;

    /// Copy one stored key to another, server-side where the backend supports it.
    async fn copy(
        &self,
        src_dir: &str,
        src_name: &str,
        dst_dir: &str,
        dst_name: &str,
        opts: &StoreOptions,
    ) -> StorageResult<()>;

    /// Build a read URL for `(dir, name)`.
    ///
    /// Plain URLs depend only on the inputs and configuration. Signed URLs are
    /// additionally bound to their expiry instant.
    async fn url(&self, dir: &str, name: &str, opts: &UrlOptions) -> StorageResult<String>;

    /// Check if a key exists
    async fn exists(&self, dir: &str, name: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
