//! Strata Core Library
//!
//! This crate provides the value types shared by every strata component: the
//! [`FileHandle`] value object, the [`Uploader`] contract describing how a file is
//! turned into versions, the per-version outcome types and their aggregation,
//! the error taxonomy and the process-wide configuration.

pub mod config;
pub mod error;
pub mod file;
pub mod outcome;
pub mod storage_types;
pub mod uploader;

// Re-export commonly used types
pub use config::{
    Config, DownloadConfig, ExecConfig, LocalStorageConfig, ObjectStorageConfig, SchedulerConfig,
};
pub use error::{StrataError, StrataResult, VersionError};
pub use file::FileHandle;
pub use outcome::{combine, Report, TransformResult, VersionOutcome};
pub use storage_types::{StorageBackend, StoreOptions, UrlOptions};
pub use uploader::{Uploader, VersionId, ORIGINAL_VERSION};
