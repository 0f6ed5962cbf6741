use crate::keys::{object_key, rebase_on_host, url_path};
use crate::traits::{Storage, StorageError, StorageResult};
use crate::{StorageBackend, StoreOptions, UrlOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload, WriteMultipart,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::ObjectStorageConfig;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Parts uploaded concurrently during a multipart upload.
const MAX_CONCURRENT_PARTS: usize = 4;
const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Object store backed storage (Amazon S3 and S3-compatible providers in
/// production, any [`ObjectStore`] in tests).
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    config: ObjectStorageConfig,
}

impl ObjectStorage {
    /// Create an S3 backed instance
    ///
    /// Credentials are read from the environment (`AWS_ACCESS_KEY_ID`,
    /// `AWS_SECRET_ACCESS_KEY`, ...). `config.endpoint` selects an S3-compatible
    /// provider (e.g., "http://localhost:9000" for MinIO).
    pub fn s3(config: ObjectStorageConfig) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone());

        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        Ok(ObjectStorage {
            store: s3.clone(),
            signer: Some(s3),
            config,
        })
    }

    /// Wrap an arbitrary object store. Signed URLs need [`ObjectStorage::with_signer`].
    pub fn with_store(store: Arc<dyn ObjectStore>, config: ObjectStorageConfig) -> Self {
        ObjectStorage {
            store,
            signer: None,
            config,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Generate public URL for an object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style: {endpoint}/{bucket}/{key}
    fn generate_url(&self, key: &str) -> String {
        let path = url_path(key);
        if let Some(ref endpoint) = self.config.endpoint {
            format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.config.bucket,
                path
            )
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.config.bucket, self.config.region, path
            )
        }
    }

    async fn put_small(
        &self,
        location: &ObjectPath,
        payload: PutPayload,
        attributes: Attributes,
    ) -> StorageResult<()> {
        self.store
            .put_opts(location, payload, PutOptions::from(attributes))
            .await
            .map(|_| ())
            .map_err(|e| StorageError::UploadFailed(e.to_string()))
    }

    async fn put_multipart(
        &self,
        location: &ObjectPath,
        mut file: fs::File,
        attributes: Attributes,
    ) -> StorageResult<()> {
        let upload = self
            .store
            .put_multipart_opts(location, attributes.into())
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let mut writer = WriteMultipart::new(upload);

        let streamed: StorageResult<()> = async {
            let mut buf = vec![0u8; READ_BUFFER_BYTES];
            loop {
                let read = file.read(&mut buf).await?;
                if read == 0 {
                    return Ok(());
                }
                writer
                    .wait_for_capacity(MAX_CONCURRENT_PARTS)
                    .await
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
                writer.write(&buf[..read]);
            }
        }
        .await;

        match streamed {
            Ok(()) => writer
                .finish()
                .await
                .map(|_| ())
                .map_err(|e| StorageError::UploadFailed(e.to_string())),
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(error = %abort_err, location = %location, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn download_to(&self, location: &ObjectPath, key: &str, dest: &Path) -> StorageResult<u64> {
        let result = self.store.get(location).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;

        let mut file = fs::File::create(dest).await?;
        let mut stream = result.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;

        Ok(written)
    }
}

fn attributes_for(opts: &StoreOptions) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(ref content_type) = opts.content_type {
        attributes.insert(Attribute::ContentType, content_type.clone().into());
    }
    if let Some(ref cache_control) = opts.cache_control {
        attributes.insert(Attribute::CacheControl, cache_control.clone().into());
    }
    for (key, value) in &opts.metadata {
        attributes.insert(Attribute::Metadata(key.clone().into()), value.clone().into());
    }
    attributes
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn store(
        &self,
        source: &Path,
        dir: &str,
        name: &str,
        opts: &StoreOptions,
    ) -> StorageResult<()> {
        let key = object_key(dir, name)?;
        let location = ObjectPath::from(key.clone());
        let start = std::time::Instant::now();

        let file = fs::File::open(source).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open {}: {}", source.display(), e))
        })?;
        let size = file.metadata().await?.len();
        let attributes = attributes_for(opts);

        // Empty bodies go through a single put: multipart uploads reject them.
        let result = if size == 0 {
            self.put_small(&location, PutPayload::from(Bytes::new()), attributes)
                .await
        } else if size <= self.config.multipart_threshold {
            let data = fs::read(source).await?;
            self.put_small(&location, PutPayload::from(Bytes::from(data)), attributes)
                .await
        } else {
            self.put_multipart(&location, file, attributes).await
        };

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.config.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object store upload failed"
            );
            e
        })?;

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            size_bytes = size,
            multipart = size > self.config.multipart_threshold,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store upload successful"
        );

        Ok(())
    }

    async fn load(&self, dir: &str, name: &str, _opts: &StoreOptions) -> StorageResult<PathBuf> {
        let key = object_key(dir, name)?;
        let location = ObjectPath::from(key.clone());
        let start = std::time::Instant::now();

        fs::create_dir_all(&self.config.scratch_dir).await?;
        let dest = self
            .config
            .scratch_dir
            .join(format!("{}-{}", Uuid::new_v4(), name));

        let size = match self.download_to(&location, &key, &dest).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&dest).await;
                if !e.is_not_found() {
                    tracing::error!(
                        error = %e,
                        bucket = %self.config.bucket,
                        key = %key,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Object store download failed"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            size_bytes = size,
            path = %dest.display(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store download successful"
        );

        Ok(dest)
    }

    async fn delete(&self, dir: &str, name: &str, _opts: &StoreOptions) -> StorageResult<()> {
        let key = object_key(dir, name)?;
        let location = ObjectPath::from(key.clone());
        let start = std::time::Instant::now();

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.config.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object store delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store delete successful"
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
        let from_key = object_key(src_dir, src_name)?;
        let to_key = object_key(dst_dir, dst_name)?;
        let start = std::time::Instant::now();

        self.store
            .copy(
                &ObjectPath::from(from_key.clone()),
                &ObjectPath::from(to_key.clone()),
            )
            .await
            .map_err(|e| match e {
                ObjectStoreError::NotFound { .. } => StorageError::NotFound(from_key.clone()),
                other => StorageError::CopyFailed(other.to_string()),
            })?;

        tracing::info!(
            from_key = %from_key,
            to_key = %to_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store copy successful"
        );

        Ok(())
    }

    async fn url(&self, dir: &str, name: &str, opts: &UrlOptions) -> StorageResult<String> {
        let key = object_key(dir, name)?;

        let mut url = if opts.signed {
            let signer = self.signer.as_ref().ok_or_else(|| {
                StorageError::ConfigError("object store has no URL signer".to_string())
            })?;
            let expires_in = opts.expires_in.unwrap_or(self.config.signed_url_expiry);
            signer
                .signed_url(Method::GET, &ObjectPath::from(key), expires_in)
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?
                .to_string()
        } else {
            self.generate_url(&key)
        };

        if let Some(host) = opts.assets_host.as_ref().or(self.config.assets_host.as_ref()) {
            url = rebase_on_host(&url, host)?;
        }

        Ok(url)
    }

    async fn exists(&self, dir: &str, name: &str) -> StorageResult<bool> {
        let location = ObjectPath::from(object_key(dir, name)?);
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
