//! FileHandle value object
//!
//! A [`FileHandle`] names a logical file independently of any storage backend.
//! It carries the file name split into `rootname` and `extension`, an optional
//! on-disk `location` holding the current bytes, an opaque `scope` used to
//! parameterize storage paths, and the identity of the uploader that owns it.
//!
//! The name parts are kept consistent: `name` always equals
//! `rootname + extension`, compared case-insensitively on the extension, and the
//! extension is always lower-cased. A name given at construction keeps its
//! original case; mutating `rootname` or `extension` rebuilds `name` from the parts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{StrataError, StrataResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredFileHandle")]
pub struct FileHandle {
    name: String,
    rootname: String,
    extension: String,
    location: Option<PathBuf>,
    scope: Option<serde_json::Value>,
    uploader: Option<String>,
}

impl FileHandle {
    /// Build a handle from an explicit name, a location, or both.
    ///
    /// When only a location is given the name is its final path component.
    pub fn new(name: Option<String>, location: Option<PathBuf>) -> StrataResult<Self> {
        let name = match (name, location.as_deref()) {
            (Some(name), _) if !name.is_empty() => name,
            (_, Some(path)) => file_name_of(path).ok_or_else(|| {
                StrataError::Construction(format!(
                    "location {} has no file name",
                    path.display()
                ))
            })?,
            _ => {
                return Err(StrataError::Construction(
                    "a file handle needs a name or a location".to_string(),
                ))
            }
        };

        let (rootname, extension) = split_name(&name);
        Ok(Self {
            name,
            rootname,
            extension,
            location,
            scope: None,
            uploader: None,
        })
    }

    pub fn from_name(name: impl Into<String>) -> StrataResult<Self> {
        Self::new(Some(name.into()), None)
    }

    pub fn from_location(location: impl Into<PathBuf>) -> StrataResult<Self> {
        Self::new(None, Some(location.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rootname(&self) -> &str {
        &self.rootname
    }

    /// Lower-cased extension including the leading dot, or empty.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn scope(&self) -> Option<&serde_json::Value> {
        self.scope.as_ref()
    }

    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }

    /// Replace the name and rederive rootname and extension from it.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        let (rootname, extension) = split_name(&name);
        self.name = name;
        self.rootname = rootname;
        self.extension = extension;
    }

    /// Replace the rootname, keeping the extension.
    pub fn set_rootname(&mut self, rootname: impl Into<String>) {
        self.rootname = rootname.into();
        self.name = format!("{}{}", self.rootname, self.extension);
    }

    /// Replace the extension. Accepts `"png"` or `".png"`; empty clears it.
    pub fn set_extension(&mut self, extension: &str) {
        self.extension = normalize_extension(extension);
        self.name = format!("{}{}", self.rootname, self.extension);
    }

    pub fn set_location(&mut self, location: Option<PathBuf>) {
        self.location = location;
    }

    pub fn set_scope(&mut self, scope: Option<serde_json::Value>) {
        self.scope = scope;
    }

    pub fn set_uploader(&mut self, uploader: Option<String>) {
        self.uploader = uploader;
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.set_extension(extension);
        self
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn without_location(mut self) -> Self {
        self.location = None;
        self
    }

    pub fn with_scope(mut self, scope: serde_json::Value) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }
}

/// Serialized form of a [`FileHandle`]. `rootname` and `extension` are
/// written out for readers but always rederived from `name` on the way in.
#[derive(Deserialize)]
struct StoredFileHandle {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location: Option<PathBuf>,
    #[serde(default)]
    scope: Option<serde_json::Value>,
    #[serde(default)]
    uploader: Option<String>,
}

impl TryFrom<StoredFileHandle> for FileHandle {
    type Error = StrataError;

    fn try_from(stored: StoredFileHandle) -> StrataResult<Self> {
        let mut file = FileHandle::new(stored.name, stored.location)?;
        file.scope = stored.scope;
        file.uploader = stored.uploader;
        Ok(file)
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Split a name into `(rootname, lower-cased extension)` using path semantics:
/// the extension starts at the last dot, and a leading dot alone is not one.
fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(_), Some(ext)) if !ext.is_empty() => {
            let ext = ext.to_string_lossy();
            let root_len = name.len() - ext.len() - 1;
            (
                name[..root_len].to_string(),
                format!(".{}", ext.to_lowercase()),
            )
        }
        _ => (name.to_string(), String::new()),
    }
}

fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim_start_matches('.');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed.to_lowercase())
    }
}
