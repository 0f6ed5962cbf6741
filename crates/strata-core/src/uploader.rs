//! Uploader contract
//!
//! An [`Uploader`] declares how one uploaded file becomes a set of stored
//! versions: which versions exist, where each is stored, what each is named and
//! how its bytes are derived. Concrete uploaders are plain values implementing
//! the trait; every method except [`Uploader::id`] has a default.

use async_trait::async_trait;

use crate::error::StrataError;
use crate::file::FileHandle;
use crate::outcome::TransformResult;
use crate::storage_types::StoreOptions;

pub type VersionId = String;

/// The version that holds the uploaded bytes unchanged under the default transform.
pub const ORIGINAL_VERSION: &str = "original";

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Identity stamped onto every handle this uploader stores. Copies are only
    /// allowed between handles carrying the same identity.
    fn id(&self) -> &str;

    /// Versions derived from `file` when it is stored.
    fn versions(&self, _file: &FileHandle) -> Vec<VersionId> {
        vec![ORIGINAL_VERSION.to_string()]
    }

    /// Storage directory for a version handle (its name is already the version's filename).
    fn store_dir(&self, _file: &FileHandle) -> String {
        "uploads".to_string()
    }

    fn store_options(&self, _file: &FileHandle) -> StoreOptions {
        StoreOptions::default()
    }

    /// Stored name of `version` for the original `file`.
    ///
    /// Must be a pure function of its arguments: it is evaluated both when
    /// storing and later when building read URLs or deleting.
    fn filename(&self, file: &FileHandle, version: &str) -> String {
        if version == ORIGINAL_VERSION {
            file.name().to_string()
        } else {
            format!("{}_{}{}", version, file.rootname(), file.extension())
        }
    }

    /// Derive `target` for `version` from `source`.
    ///
    /// The default stores the source bytes unchanged.
    async fn transform(
        &self,
        source: &FileHandle,
        target: FileHandle,
        _version: &str,
    ) -> TransformResult {
        match source.location() {
            Some(location) => TransformResult::Transformed(target.with_location(location)),
            None => TransformResult::Failed(format!("{} has no local bytes", source.name())),
        }
    }

    /// Accept or reject an incoming file before it is stored.
    fn validate(&self, _file: &FileHandle) -> Result<(), StrataError> {
        Ok(())
    }

    /// Host that should serve this uploader's files instead of the backend's own.
    fn assets_host(&self) -> Option<String> {
        None
    }
}
