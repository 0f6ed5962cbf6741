//! Declarative uploader built from a JSON manifest.
//!
//! ```json
//! {
//!   "id": "documents",
//!   "store_dir": "uploads/documents/{scope.id}",
//!   "versions": ["original", "pdf"],
//!   "transforms": {
//!     "pdf":   { "command": ["soffice-convert", "{source}", "{target}"], "extension": ".pdf", "children": ["thumb"] },
//!     "thumb": { "command": ["convert", "{source}[0]", "-thumbnail", "200x200", "{target}"], "extension": ".png", "timeout_secs": 10 }
//!   }
//! }
//! ```
//!
//! Versions without a transform are stored unchanged. `store_dir` may refer to
//! the handle's scope: `{scope}` for a scalar scope, `{scope.<field>}` for a
//! field of an object scope.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use strata_core::{
    FileHandle, StoreOptions, StrataError, StrataResult, TransformResult, Uploader, VersionId,
    ORIGINAL_VERSION,
};

use crate::exec::{CommandExecutor, ExecOptions, ExecResultExt};

fn default_store_dir() -> String {
    "uploads".to_string()
}

fn default_versions() -> Vec<VersionId> {
    vec![ORIGINAL_VERSION.to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub id: String,
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    #[serde(default = "default_versions")]
    pub versions: Vec<VersionId>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub assets_host: Option<String>,
    /// Accepted extensions without the dot; empty accepts everything.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub transforms: BTreeMap<VersionId, TransformSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformSpec {
    pub command: Vec<String>,
    /// Extension of the produced file; the source's extension when absent.
    #[serde(default)]
    pub extension: Option<String>,
    /// Versions derived from this version's output.
    #[serde(default)]
    pub children: Vec<VersionId>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// A failing command skips the version instead of failing it.
    #[serde(default)]
    pub optional: bool,
}

impl Manifest {
    pub fn from_json(json: &str) -> StrataResult<Self> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| StrataError::Config(format!("invalid manifest: {}", e)))?;
        manifest.check()?;
        Ok(manifest)
    }

    fn check(&self) -> StrataResult<()> {
        if self.id.trim().is_empty() {
            return Err(StrataError::Config("manifest id must not be empty".to_string()));
        }
        if let Some((version, _)) = self.transforms.iter().find(|(_, t)| t.command.is_empty()) {
            return Err(StrataError::Config(format!(
                "transform for version {} has an empty command",
                version
            )));
        }
        for version in &self.versions {
            self.check_acyclic(version, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Children are derived recursively, so a version may not be its own ancestor.
    fn check_acyclic<'a>(&'a self, version: &'a str, path: &mut Vec<&'a str>) -> StrataResult<()> {
        if path.contains(&version) {
            path.push(version);
            return Err(StrataError::Config(format!(
                "version cycle: {}",
                path.join(" -> ")
            )));
        }
        let Some(spec) = self.transforms.get(version) else {
            return Ok(());
        };

        path.push(version);
        for child in &spec.children {
            self.check_acyclic(child, path)?;
        }
        path.pop();
        Ok(())
    }

    fn allows(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.allowed_extensions.is_empty()
            || self
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

pub struct ManifestUploader {
    manifest: Manifest,
    executor: CommandExecutor,
}

impl ManifestUploader {
    pub fn new(manifest: Manifest, executor: CommandExecutor) -> StrataResult<Self> {
        manifest.check()?;
        Ok(Self { manifest, executor })
    }

    pub fn from_json(json: &str, executor: CommandExecutor) -> StrataResult<Self> {
        Ok(Self {
            manifest: Manifest::from_json(json)?,
            executor,
        })
    }

    pub async fn from_path(path: &Path, executor: CommandExecutor) -> StrataResult<Self> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            StrataError::Config(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        Self::from_json(&json, executor)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

#[async_trait]
impl Uploader for ManifestUploader {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn versions(&self, _file: &FileHandle) -> Vec<VersionId> {
        self.manifest.versions.clone()
    }

    fn store_dir(&self, file: &FileHandle) -> String {
        expand_scope(&self.manifest.store_dir, file.scope())
    }

    fn store_options(&self, _file: &FileHandle) -> StoreOptions {
        StoreOptions {
            content_type: self.manifest.content_type.clone(),
            cache_control: self.manifest.cache_control.clone(),
            ..StoreOptions::default()
        }
    }

    fn filename(&self, file: &FileHandle, version: &str) -> String {
        if version == ORIGINAL_VERSION {
            return file.name().to_string();
        }
        let renamed = match self
            .manifest
            .transforms
            .get(version)
            .and_then(|t| t.extension.as_deref())
        {
            Some(extension) => file.clone().with_extension(extension),
            None => file.clone(),
        };
        format!("{}_{}{}", version, renamed.rootname(), renamed.extension())
    }

    async fn transform(
        &self,
        source: &FileHandle,
        target: FileHandle,
        version: &str,
    ) -> TransformResult {
        let Some(spec) = self.manifest.transforms.get(version) else {
            return match source.location() {
                Some(location) => TransformResult::Transformed(target.with_location(location)),
                None => TransformResult::failed(format!("{} has no local bytes", source.name())),
            };
        };

        let opts = ExecOptions {
            timeout: spec.timeout_secs.map(Duration::from_secs),
        };
        let result = self
            .executor
            .exec(source, target, &spec.command, &opts)
            .await;

        if let Err(ref e) = result {
            if spec.optional {
                tracing::info!(version = %version, error = %e, "Optional transform failed, skipping");
                return TransformResult::Skipped;
            }
        }

        match result.into_transform(version) {
            TransformResult::Transformed(target) if !spec.children.is_empty() => {
                TransformResult::TransformedWithChildren(target, spec.children.clone())
            }
            other => other,
        }
    }

    fn validate(&self, file: &FileHandle) -> Result<(), StrataError> {
        if self.manifest.allows(file.extension()) {
            return Ok(());
        }
        Err(StrataError::Validation(format!(
            "extension {:?} is not allowed; allowed: {}",
            file.extension(),
            self.manifest.allowed_extensions.join(", ")
        )))
    }

    fn assets_host(&self) -> Option<String> {
        self.manifest.assets_host.clone()
    }
}

/// Replace `{scope}` / `{scope.<field>}` in `template` with scalar values from `scope`.
fn expand_scope(template: &str, scope: Option<&serde_json::Value>) -> String {
    let mut dir = template.to_string();
    match scope {
        Some(serde_json::Value::Object(fields)) => {
            for (field, value) in fields {
                if let Some(value) = scalar(value) {
                    dir = dir.replace(&format!("{{scope.{}}}", field), &value);
                }
            }
        }
        Some(value) => {
            if let Some(value) = scalar(value) {
                dir = dir.replace("{scope}", &value);
            }
        }
        None => {}
    }
    dir
}

fn scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
