//! Error types module
//!
//! [`StrataError`] is the error returned by whole-file operations (store, load,
//! copy, validation, configuration). [`VersionError`] is the reason recorded for a
//! single failed version inside a [`Report`](crate::Report); it is a plain value so
//! that reports can be cloned, compared and serialized.

use serde::Serialize;
use std::time::Duration;

use crate::outcome::Report;

#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Uploader mismatch: cannot copy from {source_uploader:?} to {target_uploader:?}")]
    UploaderMismatch {
        source_uploader: Option<String>,
        target_uploader: Option<String>,
    },

    #[error("Invalid file handle: {0}")]
    Construction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{} of {} versions failed", .0.failures().count(), .0.len())]
    PartialFailure(Report),
}

pub type StrataResult<T> = Result<T, StrataError>;

/// Reason a single version did not get stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum VersionError {
    #[error("transform failed: {0}")]
    Transform(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl VersionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, VersionError::Timeout(_))
    }
}

impl From<VersionError> for StrataError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::Transform(msg) => StrataError::Transform(msg),
            VersionError::Persistence(msg) => StrataError::Persistence(msg),
            VersionError::NotFound(msg) => StrataError::NotFound(msg),
            VersionError::Timeout(after) => StrataError::Timeout(after),
        }
    }
}
