//! Strata Processing Library
//!
//! This crate turns uploaded files into stored versions:
//!
//! - [`TransformScheduler`] runs an [`Uploader`](strata_core::Uploader)'s
//!   version tree concurrently and reports every version's outcome
//! - [`CommandExecutor`] runs external conversion tools under a timeout
//! - [`ManifestUploader`] is an uploader declared in JSON
//! - [`download()`] fetches a remote URL into a local file handle

#[cfg(feature = "download")]
pub mod download;
pub mod exec;
pub mod manifest;
pub mod scheduler;

// Re-export commonly used types
#[cfg(feature = "download")]
pub use download::{download, DownloadError};
pub use exec::{CommandExecutor, ExecError, ExecOptions, ExecResultExt};
pub use manifest::{Manifest, ManifestUploader, TransformSpec};
pub use scheduler::TransformScheduler;
