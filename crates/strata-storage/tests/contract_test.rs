//! Behavioural contract shared by every storage backend.
//!
//! Each check runs once against the local filesystem backend and once against
//! the object store backend (over an in-memory store), and must give the same
//! observable result for both.

use object_store::memory::InMemory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{LocalStorageConfig, ObjectStorageConfig};
use strata_storage::{
    LocalStorage, ObjectStorage, Storage, StorageError, StoreOptions, UrlOptions,
};
use tempfile::{tempdir, TempDir};

struct Backends {
    _dir: TempDir,
    sources: PathBuf,
    backends: Vec<(&'static str, Arc<dyn Storage>)>,
}

async fn backends() -> Backends {
    let dir = tempdir().unwrap();
    let sources = dir.path().join("sources");
    tokio::fs::create_dir_all(&sources).await.unwrap();

    let local = LocalStorage::new(LocalStorageConfig::new(
        dir.path().join("local"),
        "http://localhost:3000/uploads",
    ))
    .await
    .unwrap();

    let mut object_config = ObjectStorageConfig::new("media", "eu-west-1");
    object_config.scratch_dir = dir.path().join("scratch");
    let object = ObjectStorage::with_store(Arc::new(InMemory::new()), object_config);

    Backends {
        sources,
        backends: vec![("local", Arc::new(local)), ("object", Arc::new(object))],
        _dir: dir,
    }
}

async fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, data).await.unwrap();
    path
}

#[tokio::test]
async fn store_then_load_round_trips_bytes() {
    let env = backends().await;
    let source = write_source(&env.sources, "cat.jpg", b"\xff\xd8jpeg bytes").await;
    let opts = StoreOptions::default().with_content_type("image/jpeg");

    for (label, storage) in &env.backends {
        storage
            .store(&source, "uploads/avatars/42", "cat.jpg", &opts)
            .await
            .unwrap_or_else(|e| panic!("{}: store failed: {}", label, e));

        let loaded = storage
            .load("uploads/avatars/42", "cat.jpg", &opts)
            .await
            .unwrap_or_else(|e| panic!("{}: load failed: {}", label, e));
        assert_eq!(
            tokio::fs::read(&loaded).await.unwrap(),
            b"\xff\xd8jpeg bytes",
            "{}",
            label
        );
        assert!(storage.exists("uploads/avatars/42", "cat.jpg").await.unwrap(), "{}", label);
    }
}

#[tokio::test]
async fn overwrite_is_allowed_and_idempotent() {
    let env = backends().await;
    let first = write_source(&env.sources, "v1.txt", b"first").await;
    let second = write_source(&env.sources, "v2.txt", b"second").await;
    let opts = StoreOptions::default();

    for (label, storage) in &env.backends {
        storage.store(&first, "docs", "a.txt", &opts).await.unwrap();
        storage.store(&second, "docs", "a.txt", &opts).await.unwrap();
        storage.store(&second, "docs", "a.txt", &opts).await.unwrap();

        let loaded = storage.load("docs", "a.txt", &opts).await.unwrap();
        assert_eq!(tokio::fs::read(&loaded).await.unwrap(), b"second", "{}", label);
    }
}

#[tokio::test]
async fn zero_byte_files_are_stored() {
    let env = backends().await;
    let empty = write_source(&env.sources, "empty.txt", b"").await;
    let opts = StoreOptions::default();

    for (label, storage) in &env.backends {
        storage.store(&empty, "docs", "empty.txt", &opts).await.unwrap();
        let loaded = storage.load("docs", "empty.txt", &opts).await.unwrap();
        assert!(tokio::fs::read(&loaded).await.unwrap().is_empty(), "{}", label);
    }
}

#[tokio::test]
async fn load_of_missing_key_is_not_found() {
    let env = backends().await;

    for (label, storage) in &env.backends {
        let result = storage
            .load("docs", "missing.txt", &StoreOptions::default())
            .await;
        assert!(
            matches!(result, Err(StorageError::NotFound(ref key)) if key == "docs/missing.txt"),
            "{}: {:?}",
            label,
            result
        );
    }
}

#[tokio::test]
async fn delete_is_idempotent() {
    let env = backends().await;
    let source = write_source(&env.sources, "a.txt", b"bytes").await;
    let opts = StoreOptions::default();

    for (label, storage) in &env.backends {
        storage.store(&source, "docs", "a.txt", &opts).await.unwrap();
        storage.delete("docs", "a.txt", &opts).await.unwrap();
        assert!(!storage.exists("docs", "a.txt").await.unwrap(), "{}", label);

        storage
            .delete("docs", "a.txt", &opts)
            .await
            .unwrap_or_else(|e| panic!("{}: delete of absent key failed: {}", label, e));
    }
}

#[tokio::test]
async fn copy_duplicates_without_touching_source() {
    let env = backends().await;
    let source = write_source(&env.sources, "a.txt", b"original content").await;
    let opts = StoreOptions::default();

    for (label, storage) in &env.backends {
        storage.store(&source, "docs/1", "a.txt", &opts).await.unwrap();
        storage
            .copy("docs/1", "a.txt", "docs/2", "b.txt", &opts)
            .await
            .unwrap_or_else(|e| panic!("{}: copy failed: {}", label, e));

        let copied = storage.load("docs/2", "b.txt", &opts).await.unwrap();
        assert_eq!(tokio::fs::read(&copied).await.unwrap(), b"original content", "{}", label);
        assert!(storage.exists("docs/1", "a.txt").await.unwrap(), "{}", label);
    }
}

#[tokio::test]
async fn copy_of_missing_key_is_not_found() {
    let env = backends().await;

    for (label, storage) in &env.backends {
        let result = storage
            .copy("docs", "missing.txt", "docs", "b.txt", &StoreOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))), "{}", label);
    }
}

#[tokio::test]
async fn traversal_keys_are_rejected() {
    let env = backends().await;
    let source = write_source(&env.sources, "a.txt", b"bytes").await;

    for (label, storage) in &env.backends {
        let result = storage
            .store(&source, "../outside", "a.txt", &StoreOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))), "{}", label);
    }
}

#[tokio::test]
async fn plain_urls_are_deterministic_and_honour_assets_host() {
    let env = backends().await;
    let opts = UrlOptions::default().assets_host("https://cdn.example.com");

    for (label, storage) in &env.backends {
        let first = storage.url("avatars", "cat.jpg", &opts).await.unwrap();
        let second = storage.url("avatars", "cat.jpg", &opts).await.unwrap();
        assert_eq!(first, second, "{}", label);
        assert!(first.starts_with("https://cdn.example.com/"), "{}: {}", label, first);
        assert!(first.ends_with("/avatars/cat.jpg"), "{}: {}", label, first);
    }
}
