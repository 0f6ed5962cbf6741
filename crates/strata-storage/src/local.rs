use crate::keys::{object_key, rebase_on_host, url_path};
use crate::signing::sign_url;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::{StorageBackend, StoreOptions, UrlOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use strata_core::LocalStorageConfig;
use tokio::fs;
use uuid::Uuid;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    config: LocalStorageConfig,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// The root directory (`config.base_path`, e.g. "/var/lib/strata/uploads") is
    /// created if missing. `config.base_url` (e.g. "http://localhost:3000/uploads")
    /// is the URL the root directory is served under.
    pub async fn new(config: LocalStorageConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                config.base_path.display(),
                e
            ))
        })?;

        let base_path = config.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        Ok(LocalStorage { base_path, config })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert `(dir, name)` to a filesystem path with security validation
    ///
    /// Validates that the key cannot escape the base storage directory, including
    /// through symlinks already present under it. Paths that do not exist yet are
    /// checked through their nearest existing ancestor.
    fn key_to_path(&self, dir: &str, name: &str) -> StorageResult<(String, PathBuf)> {
        let key = object_key(dir, name)?;
        let path = self.base_path.join(&key);
        self.ensure_inside_base(&path)?;
        Ok((key, path))
    }

    fn ensure_inside_base(&self, path: &Path) -> StorageResult<()> {
        let resolved = path
            .ancestors()
            .find_map(|ancestor| ancestor.canonicalize().ok());

        match resolved {
            Some(canonical) if canonical.starts_with(&self.base_path) => Ok(()),
            _ => Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            )),
        }
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), url_path(key))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Copy `source` over `dest` through a staging file in the destination
    /// directory, so readers never observe a half-written file.
    async fn write_atomically(&self, source: &Path, dest: &Path) -> StorageResult<u64> {
        self.ensure_parent_dir(dest).await?;
        self.ensure_inside_base(dest)?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = dest.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        let size = match fs::copy(source, &staging).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e.into());
            }
        };

        if let Err(e) = fs::rename(&staging, dest).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        Ok(size)
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(
        &self,
        source: &Path,
        dir: &str,
        name: &str,
        _opts: &StoreOptions,
    ) -> StorageResult<()> {
        let (key, path) = self.key_to_path(dir, name)?;
        let start = std::time::Instant::now();

        if same_file(source, &path).await {
            tracing::debug!(key = %key, "Source is already stored at destination");
            return Ok(());
        }

        let size = self.write_atomically(source, &path).await.map_err(|e| {
            tracing::error!(
                error = %e,
                source = %source.display(),
                path = %path.display(),
                "Local storage store failed"
            );
            StorageError::UploadFailed(format!(
                "Failed to store {} at {}: {}",
                source.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage store successful"
        );

        Ok(())
    }

    async fn load(&self, dir: &str, name: &str, _opts: &StoreOptions) -> StorageResult<PathBuf> {
        let (key, path) = self.key_to_path(dir, name)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key));
        }

        tracing::debug!(path = %path.display(), key = %key, "Local storage load");
        Ok(path)
    }

    async fn delete(&self, dir: &str, name: &str, _opts: &StoreOptions) -> StorageResult<()> {
        let (key, path) = self.key_to_path(dir, name)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "Local storage delete of absent key");
                return Ok(());
            }
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn copy(
        &self,
        src_dir: &str,
        src_name: &str,
        dst_dir: &str,
        dst_name: &str,
        _opts: &StoreOptions,
    ) -> StorageResult<()> {
        let (from_key, from_path) = self.key_to_path(src_dir, src_name)?;
        let (to_key, to_path) = self.key_to_path(dst_dir, dst_name)?;

        if !fs::try_exists(&from_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(from_key));
        }
        if from_path == to_path {
            return Ok(());
        }

        self.write_atomically(&from_path, &to_path)
            .await
            .map_err(|e| {
                StorageError::CopyFailed(format!(
                    "Failed to copy {} to {}: {}",
                    from_path.display(),
                    to_path.display(),
                    e
                ))
            })?;

        tracing::info!(
            from_key = %from_key,
            to_key = %to_key,
            from_path = %from_path.display(),
            to_path = %to_path.display(),
            "Local storage copy successful"
        );

        Ok(())
    }

    async fn url(&self, dir: &str, name: &str, opts: &UrlOptions) -> StorageResult<String> {
        let (key, _) = self.key_to_path(dir, name)?;
        let mut url = self.generate_url(&key);

        if opts.signed {
            let secret = self.config.signing_secret.as_deref().ok_or_else(|| {
                StorageError::ConfigError(
                    "URL_SIGNING_SECRET is required for signed local URLs".to_string(),
                )
            })?;
            let expires_in = opts.expires_in.unwrap_or(self.config.signed_url_expiry);
            url = sign_url(&url, &key, expires_in, secret.as_bytes())?;
        }

        if let Some(host) = opts.assets_host.as_ref().or(self.config.assets_host.as_ref()) {
            url = rebase_on_host(&url, host)?;
        }

        Ok(url)
    }

    async fn exists(&self, dir: &str, name: &str) -> StorageResult<bool> {
        let (_, path) = self.key_to_path(dir, name)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn storage_in(dir: &Path) -> LocalStorage {
        LocalStorage::new(LocalStorageConfig::new(
            dir.join("store"),
            "http://localhost:3000/uploads",
        ))
        .await
        .unwrap()
    }

    async fn source_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_local_storage_store_load() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let source = source_file(dir.path(), "in.txt", b"test data").await;

        storage
            .store(&source, "docs/2024", "test.txt", &StoreOptions::default())
            .await
            .unwrap();

        let loaded = storage
            .load("docs/2024", "test.txt", &StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(loaded, storage.base_path().join("docs/2024/test.txt"));
        assert_eq!(fs::read(&loaded).await.unwrap(), b"test data");
    }

    #[tokio::test]
    async fn test_store_onto_itself_keeps_bytes() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let source = source_file(dir.path(), "in.txt", b"keep me").await;
        let opts = StoreOptions::default();

        storage.store(&source, "docs", "a.txt", &opts).await.unwrap();
        let stored = storage.load("docs", "a.txt", &opts).await.unwrap();
        storage.store(&stored, "docs", "a.txt", &opts).await.unwrap();

        assert_eq!(fs::read(&stored).await.unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_store_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let source = source_file(dir.path(), "in.txt", b"x").await;

        storage
            .store(&source, "docs", "a.txt", &StoreOptions::default())
            .await
            .unwrap();

        let mut entries = fs::read_dir(storage.base_path().join("docs")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let opts = StoreOptions::default();

        let result = storage.load("../../..", "passwd", &opts).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("..", "passwd", &opts).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("uploads", "../../passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_cannot_escape_base() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).await.unwrap();
        std::os::unix::fs::symlink(&outside, storage.base_path().join("docs")).unwrap();
        let source = source_file(dir.path(), "in.txt", b"x").await;
        let opts = StoreOptions::default();

        let result = storage.store(&source, "docs", "new.txt", &opts).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside.join("new.txt").exists());

        let result = storage.store(&source, "docs/nested", "new.txt", &opts).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside.join("nested").exists());

        storage.store(&source, "inside", "new.txt", &opts).await.unwrap();
        assert!(storage.exists("inside", "new.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_storage_delete_nonexistent() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let result = storage
            .delete("nonexistent", "file.txt", &StoreOptions::default())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_local_storage_load_missing() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let result = storage
            .load("nonexistent", "file.txt", &StoreOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(key)) if key == "nonexistent/file.txt"));
    }

    #[tokio::test]
    async fn test_plain_url_encodes_name() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let url = storage
            .url("avatars", "my cat.jpg", &UrlOptions::default())
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:3000/uploads/avatars/my%20cat.jpg");
    }

    #[tokio::test]
    async fn test_signed_url_requires_secret() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let result = storage.url("avatars", "cat.jpg", &UrlOptions::signed()).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_signed_url_with_assets_host() {
        let dir = tempdir().unwrap();
        let mut config = LocalStorageConfig::new(dir.path().join("store"), "/uploads");
        config.signing_secret = Some("secret".to_string());
        config.assets_host = Some("https://cdn.example.com".to_string());
        let storage = LocalStorage::new(config).await.unwrap();

        let url = storage
            .url(
                "avatars",
                "cat.jpg",
                &UrlOptions::signed().expires_in(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/uploads/avatars/cat.jpg?expires="));
        assert!(url.contains("&signature="));

        let plain = storage
            .url("avatars", "cat.jpg", &UrlOptions::default())
            .await
            .unwrap();
        assert_eq!(plain, "https://cdn.example.com/uploads/avatars/cat.jpg");
    }
}
