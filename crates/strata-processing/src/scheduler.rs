//! Transform scheduler
//!
//! [`TransformScheduler`] turns one file into every version its [`Uploader`]
//! declares. Each version is a branch running on its own task: the branch
//! transforms the file, persists the result and, when the transform yields
//! child versions, derives those from the freshly produced target while the
//! target itself is being persisted. Branches never affect each other; a
//! failed, panicking or timed-out branch is recorded in the [`Report`] and its
//! siblings carry on.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use strata_core::{
    combine, FileHandle, Report, SchedulerConfig, StrataError, StrataResult, TransformResult,
    Uploader, UrlOptions, VersionError, VersionId, VersionOutcome,
};
use strata_storage::{Storage, StorageError};
use tokio::task::JoinSet;

type Outcomes = Vec<(VersionId, VersionOutcome)>;

#[derive(Clone)]
pub struct TransformScheduler {
    uploader: Arc<dyn Uploader>,
    storage: Arc<dyn Storage>,
    config: Arc<SchedulerConfig>,
}

impl TransformScheduler {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        storage: Arc<dyn Storage>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            uploader,
            storage,
            config: Arc::new(config),
        }
    }

    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        &self.uploader
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Run the uploader's validation for an incoming file.
    pub fn validate(&self, file: &FileHandle) -> StrataResult<()> {
        self.uploader.validate(file).map_err(|e| match e {
            StrataError::Validation(reason) => StrataError::Validation(reason),
            other => StrataError::Validation(other.to_string()),
        })
    }

    /// Derive and persist every version of `file`.
    ///
    /// The report holds every version reached, successes included; it is an
    /// error when at least one of them failed. Nothing is rolled back.
    #[tracing::instrument(skip(self, file), fields(uploader = %self.uploader.id(), file = %file.name()))]
    pub async fn store(&self, file: FileHandle) -> Report {
        let start = Instant::now();
        let file = file.with_uploader(self.uploader.id());
        let versions = self.uploader.versions(&file);
        let original = Arc::new(file.clone());

        let report = combine(self.process_versions(original, file, versions).await);

        if report.is_ok() {
            tracing::info!(
                versions = report.len(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Stored all versions"
            );
        } else {
            tracing::warn!(
                versions = report.len(),
                failed = report.failures().count(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Store finished with failed versions"
            );
        }
        report
    }

    /// Locate the stored bytes of the version named by `file`.
    ///
    /// Only the version whose stored name equals `file.name()` is touched.
    #[tracing::instrument(skip(self, file), fields(uploader = %self.uploader.id(), file = %file.name()))]
    pub async fn load(&self, file: FileHandle) -> StrataResult<FileHandle> {
        let dir = self.uploader.store_dir(&file);
        let opts = self.uploader.store_options(&file);

        let path = self
            .storage
            .load(&dir, file.name(), &opts)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(key) => StrataError::NotFound(key),
                other => StrataError::Persistence(other.to_string()),
            })?;

        Ok(file.with_location(path).with_uploader(self.uploader.id()))
    }

    /// Delete every version of `file`.
    ///
    /// All deletes are attempted even when some fail. In the returned report
    /// `Stored` means the version is no longer stored: its backend delete
    /// succeeded, or it was already absent.
    #[tracing::instrument(skip(self, file), fields(uploader = %self.uploader.id(), file = %file.name()))]
    pub async fn delete(&self, file: &FileHandle) -> Report {
        let deletes = self.uploader.versions(file).into_iter().map(|version| {
            let handle = self.version_handle(file, &version);
            async move {
                let dir = self.uploader.store_dir(&handle);
                let opts = self.uploader.store_options(&handle);
                let outcome = self
                    .bounded_storage_call(self.storage.delete(&dir, handle.name(), &opts))
                    .await;
                (version, outcome)
            }
        });

        let report = combine(join_all(deletes).await);
        for (version, error) in report.failures() {
            tracing::warn!(version = %version, error = %error, "Failed to delete version");
        }
        report
    }

    /// Re-derive every version from the stored original of `file`.
    #[tracing::instrument(skip(self, file), fields(uploader = %self.uploader.id(), file = %file.name()))]
    pub async fn regenerate(&self, file: FileHandle) -> StrataResult<Report> {
        let loaded = self.load(file).await?;
        let report = self.store(loaded.clone()).await;

        // Remote backends download into scratch; local ones hand back the stored file.
        if let Some(location) = loaded.location() {
            if self.in_scratch(location) {
                let _ = tokio::fs::remove_file(location).await;
            }
        }

        Ok(report)
    }

    /// Copy every stored version of `source` to the names `target` gives them.
    ///
    /// Both handles must belong to the same uploader; otherwise nothing is
    /// touched and [`StrataError::UploaderMismatch`] is returned.
    #[tracing::instrument(skip(self, source, target), fields(uploader = %self.uploader.id(), source = %source.name(), target = %target.name()))]
    pub async fn copy(&self, source: &FileHandle, target: &FileHandle) -> StrataResult<Report> {
        if source.uploader() != target.uploader() {
            return Err(StrataError::UploaderMismatch {
                source_uploader: source.uploader().map(str::to_string),
                target_uploader: target.uploader().map(str::to_string),
            });
        }

        let copies = self.uploader.versions(source).into_iter().map(|version| {
            let from = self.version_handle(source, &version);
            let to = self.version_handle(target, &version);
            async move {
                let from_dir = self.uploader.store_dir(&from);
                let to_dir = self.uploader.store_dir(&to);
                let opts = self.uploader.store_options(&to);
                let outcome = self
                    .bounded_storage_call(self.storage.copy(
                        &from_dir,
                        from.name(),
                        &to_dir,
                        to.name(),
                        &opts,
                    ))
                    .await;
                (version, outcome)
            }
        });

        Ok(combine(join_all(copies).await))
    }

    /// Read URL of `version` of `file`.
    pub async fn url(&self, file: &FileHandle, version: &str, signed: bool) -> StrataResult<String> {
        let handle = self.version_handle(file, version);
        let dir = self.uploader.store_dir(&handle);
        let opts = UrlOptions {
            signed,
            expires_in: None,
            assets_host: self.uploader.assets_host(),
        };

        self.storage
            .url(&dir, handle.name(), &opts)
            .await
            .map_err(|e| StrataError::Persistence(e.to_string()))
    }

    /// `file` renamed to the stored name of `version`, without local bytes.
    fn version_handle(&self, file: &FileHandle, version: &str) -> FileHandle {
        file.clone()
            .with_name(self.uploader.filename(file, version))
            .without_location()
    }

    /// Run every version in `versions` on its own task and collect the outcomes.
    ///
    /// A branch over its time budget is dropped, which aborts its whole subtree.
    fn process_versions(
        &self,
        original: Arc<FileHandle>,
        current: FileHandle,
        versions: Vec<VersionId>,
    ) -> BoxFuture<'static, Outcomes> {
        let scheduler = self.clone();

        async move {
            let limit = scheduler.config.version_timeout;
            let mut branches = JoinSet::new();
            let mut spawned = HashMap::new();

            for version in versions {
                let branch = scheduler.clone();
                let original = original.clone();
                let current = current.clone();
                let id = version.clone();

                let handle = branches.spawn(async move {
                    match tokio::time::timeout(
                        limit,
                        branch.process_version(original, current, id.clone()),
                    )
                    .await
                    {
                        Ok(outcomes) => outcomes,
                        Err(_) => {
                            tracing::warn!(
                                version = %id,
                                timeout_ms = limit.as_millis() as u64,
                                "Version timed out"
                            );
                            vec![(id, VersionOutcome::Error(VersionError::Timeout(limit)))]
                        }
                    }
                });
                spawned.insert(handle.id(), version);
            }

            let mut outcomes = Vec::new();
            while let Some(joined) = branches.join_next_with_id().await {
                match joined {
                    Ok((_, branch_outcomes)) => outcomes.extend(branch_outcomes),
                    Err(e) => {
                        let Some(version) = spawned.remove(&e.id()) else {
                            continue;
                        };
                        let reason = if e.is_panic() {
                            format!("branch panicked: {}", panic_message(e.into_panic()))
                        } else {
                            "branch was cancelled".to_string()
                        };
                        tracing::error!(version = %version, reason = %reason, "Version branch failed");
                        outcomes.push((version, VersionOutcome::Error(VersionError::Transform(reason))));
                    }
                }
            }
            outcomes
        }
        .boxed()
    }

    async fn process_version(
        &self,
        original: Arc<FileHandle>,
        current: FileHandle,
        version: VersionId,
    ) -> Outcomes {
        let target = current
            .clone()
            .with_name(self.uploader.filename(&original, &version))
            .without_location();

        let result = AssertUnwindSafe(self.uploader.transform(&current, target, &version))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                TransformResult::Failed(format!("transform panicked: {}", panic_message(panic)))
            });

        match result {
            TransformResult::TransformedWithChildren(target, children) => {
                let target = target.with_uploader(self.uploader.id());
                let (persisted, mut child_outcomes) = tokio::join!(
                    self.persist(&target),
                    self.process_versions(original, target.clone(), children),
                );
                self.discard_scratch(&current, &target).await;

                child_outcomes.insert(0, (version, persisted));
                child_outcomes
            }
            TransformResult::Transformed(target) => {
                let target = target.with_uploader(self.uploader.id());
                let persisted = self.persist(&target).await;
                self.discard_scratch(&current, &target).await;
                vec![(version, persisted)]
            }
            TransformResult::Skipped => {
                tracing::debug!(version = %version, "Transform skipped version");
                vec![(version, VersionOutcome::NoStore)]
            }
            TransformResult::Failed(reason) => {
                tracing::warn!(version = %version, reason = %reason, "Transform failed");
                vec![(version, VersionOutcome::Error(VersionError::Transform(reason)))]
            }
        }
    }

    async fn persist(&self, target: &FileHandle) -> VersionOutcome {
        let Some(location) = target.location() else {
            return VersionOutcome::Error(VersionError::Persistence(format!(
                "{} has no local bytes",
                target.name()
            )));
        };
        let dir = self.uploader.store_dir(target);
        let opts = self.uploader.store_options(target);

        self.bounded_storage_call(self.storage.store(location, &dir, target.name(), &opts))
            .await
    }

    /// Await one storage call under the store timeout.
    async fn bounded_storage_call<F>(&self, call: F) -> VersionOutcome
    where
        F: std::future::Future<Output = Result<(), StorageError>>,
    {
        let limit = self.config.store_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(())) => VersionOutcome::Stored,
            Ok(Err(StorageError::NotFound(key))) => {
                VersionOutcome::Error(VersionError::NotFound(key))
            }
            Ok(Err(e)) => VersionOutcome::Error(VersionError::Persistence(e.to_string())),
            Err(_) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "Storage call timed out");
                VersionOutcome::Error(VersionError::Timeout(limit))
            }
        }
    }

    /// Remove a target the transform wrote into scratch once nothing needs it.
    async fn discard_scratch(&self, source: &FileHandle, target: &FileHandle) {
        let Some(location) = target.location() else {
            return;
        };
        if source.location() == Some(location) || !self.in_scratch(location) {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(location).await {
            tracing::debug!(path = %location.display(), error = %e, "Could not remove scratch file");
        }
    }

    fn in_scratch(&self, path: &Path) -> bool {
        path.starts_with(&self.config.scratch_dir)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
