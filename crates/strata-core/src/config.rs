//! Configuration module
//!
//! [`Config`] is read once at startup (explicitly or with [`Config::from_env`])
//! and handed by value to the components that need it. Each component takes its
//! own sub-configuration so it can be built in isolation, e.g. in tests.

use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::StorageBackend;

// Common constants
const EXEC_TIMEOUT_SECS: u64 = 15;
const EXEC_KILL_GRACE_MS: u64 = 2_000;
const STORE_TIMEOUT_SECS: u64 = 30;
const VERSION_TIMEOUT_SECS: u64 = 60;
const SIGNED_URL_EXPIRY_SECS: u64 = 24 * 60 * 60;
const MULTIPART_THRESHOLD_BYTES: u64 = 8 * 1024 * 1024;
const DOWNLOAD_MAX_REDIRECTS: usize = 10;
const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Timeouts governing the transform scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Budget for one version branch (transform, persist, children).
    pub version_timeout: Duration,
    /// Budget for a single storage call.
    pub store_timeout: Duration,
    /// Directory holding executor and download outputs; targets found here are
    /// discarded once persisted.
    pub scratch_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            version_timeout: Duration::from_secs(VERSION_TIMEOUT_SECS),
            store_timeout: Duration::from_secs(STORE_TIMEOUT_SECS),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// Settings for running external commands.
#[derive(Clone, Debug)]
pub struct ExecConfig {
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL when a command is terminated.
    pub kill_grace: Duration,
    pub scratch_dir: PathBuf,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(EXEC_TIMEOUT_SECS),
            kill_grace: Duration::from_millis(EXEC_KILL_GRACE_MS),
            scratch_dir: default_scratch_dir(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LocalStorageConfig {
    /// Root directory; files land at `<base_path>/<dir>/<name>`.
    pub base_path: PathBuf,
    /// Base URL the root directory is served under.
    pub base_url: String,
    pub signing_secret: Option<String>,
    pub signed_url_expiry: Duration,
    pub assets_host: Option<String>,
}

impl LocalStorageConfig {
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
            signing_secret: None,
            signed_url_expiry: Duration::from_secs(SIGNED_URL_EXPIRY_SECS),
            assets_host: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObjectStorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, ...).
    pub endpoint: Option<String>,
    pub signed_url_expiry: Duration,
    pub assets_host: Option<String>,
    pub multipart_threshold: u64,
    /// Where downloaded objects are written on load.
    pub scratch_dir: PathBuf,
}

impl ObjectStorageConfig {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            signed_url_expiry: Duration::from_secs(SIGNED_URL_EXPIRY_SECS),
            assets_host: None,
            multipart_threshold: MULTIPART_THRESHOLD_BYTES,
            scratch_dir: default_scratch_dir(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub max_redirects: usize,
    pub timeout: Duration,
    pub scratch_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_redirects: DOWNLOAD_MAX_REDIRECTS,
            timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub local_storage_path: PathBuf,
    pub local_storage_base_url: String,
    pub url_signing_secret: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub exec_timeout: Duration,
    pub exec_kill_grace: Duration,
    pub store_timeout: Duration,
    pub version_timeout: Duration,
    pub signed_url_expiry: Duration,
    pub assets_host: Option<String>,
    pub scratch_dir: PathBuf,
    pub multipart_threshold: u64,
    pub download_max_redirects: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Local,
            local_storage_path: PathBuf::from("./uploads"),
            local_storage_base_url: "/uploads".to_string(),
            url_signing_secret: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            exec_timeout: Duration::from_secs(EXEC_TIMEOUT_SECS),
            exec_kill_grace: Duration::from_millis(EXEC_KILL_GRACE_MS),
            store_timeout: Duration::from_secs(STORE_TIMEOUT_SECS),
            version_timeout: Duration::from_secs(VERSION_TIMEOUT_SECS),
            signed_url_expiry: Duration::from_secs(SIGNED_URL_EXPIRY_SECS),
            assets_host: None,
            scratch_dir: default_scratch_dir(),
            multipart_threshold: MULTIPART_THRESHOLD_BYTES,
            download_max_redirects: DOWNLOAD_MAX_REDIRECTS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value
                .parse::<StorageBackend>()
                .context("STORAGE_BACKEND must be 'local' or 's3'")?,
            Err(_) => defaults.storage_backend,
        };

        let config = Config {
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_storage_path),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or(defaults.local_storage_base_url),
            url_signing_secret: env::var("URL_SIGNING_SECRET").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            exec_timeout: secs_var("EXEC_TIMEOUT_SECS", EXEC_TIMEOUT_SECS)?,
            exec_kill_grace: Duration::from_millis(
                parse_var("EXEC_KILL_GRACE_MS", EXEC_KILL_GRACE_MS)?,
            ),
            store_timeout: secs_var("STORE_TIMEOUT_SECS", STORE_TIMEOUT_SECS)?,
            version_timeout: secs_var("VERSION_TIMEOUT_SECS", VERSION_TIMEOUT_SECS)?,
            signed_url_expiry: secs_var("SIGNED_URL_EXPIRY_SECS", SIGNED_URL_EXPIRY_SECS)?,
            assets_host: env::var("ASSETS_HOST").ok().filter(|h| !h.trim().is_empty()),
            scratch_dir: env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            multipart_threshold: parse_var("MULTIPART_THRESHOLD_BYTES", MULTIPART_THRESHOLD_BYTES)?,
            download_max_redirects: parse_var("DOWNLOAD_MAX_REDIRECTS", DOWNLOAD_MAX_REDIRECTS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.storage_backend == StorageBackend::S3 {
            if self.s3_bucket.is_none() {
                return Err(anyhow::anyhow!("S3_BUCKET must be set for the s3 backend"));
            }
            if self.s3_region.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_REGION or AWS_REGION must be set for the s3 backend"
                ));
            }
        }

        for (name, value) in [
            ("EXEC_TIMEOUT_SECS", self.exec_timeout),
            ("STORE_TIMEOUT_SECS", self.store_timeout),
            ("VERSION_TIMEOUT_SECS", self.version_timeout),
            ("SIGNED_URL_EXPIRY_SECS", self.signed_url_expiry),
        ] {
            if value.is_zero() {
                return Err(anyhow::anyhow!("{} must be greater than zero", name));
            }
        }

        Ok(())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            version_timeout: self.version_timeout,
            store_timeout: self.store_timeout,
            scratch_dir: self.scratch_dir.clone(),
        }
    }

    pub fn exec(&self) -> ExecConfig {
        ExecConfig {
            timeout: self.exec_timeout,
            kill_grace: self.exec_kill_grace,
            scratch_dir: self.scratch_dir.clone(),
        }
    }

    pub fn local_storage(&self) -> LocalStorageConfig {
        LocalStorageConfig {
            base_path: self.local_storage_path.clone(),
            base_url: self.local_storage_base_url.clone(),
            signing_secret: self.url_signing_secret.clone(),
            signed_url_expiry: self.signed_url_expiry,
            assets_host: self.assets_host.clone(),
        }
    }

    /// Remote backend settings; `None` until bucket and region are configured.
    pub fn object_storage(&self) -> Option<ObjectStorageConfig> {
        Some(ObjectStorageConfig {
            bucket: self.s3_bucket.clone()?,
            region: self.s3_region.clone()?,
            endpoint: self.s3_endpoint.clone(),
            signed_url_expiry: self.signed_url_expiry,
            assets_host: self.assets_host.clone(),
            multipart_threshold: self.multipart_threshold,
            scratch_dir: self.scratch_dir.clone(),
        })
    }

    pub fn download(&self) -> DownloadConfig {
        DownloadConfig {
            max_redirects: self.download_max_redirects,
            timeout: self.version_timeout,
            scratch_dir: self.scratch_dir.clone(),
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    env::temp_dir().join("strata")
}

fn parse_var<T>(name: &str, default: T) -> Result<T, anyhow::Error>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration, anyhow::Error> {
    parse_var(name, default).map(Duration::from_secs)
}
