//! 存储契约的对外行为

use std::sync::Arc;
use tierguard::{FailingStorage, MemoryStorage, Storage};

#[tokio::test]
async fn test_ttl_zero_expires_immediately() {
    let storage = MemoryStorage::new();
    storage.set("k", "v", Some(0)).await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_overwrite_replaces_value_and_ttl() {
    let storage = MemoryStorage::new();
    storage.set("k", "old", Some(0)).await.unwrap();
    storage.set("k", "new", Some(3600)).await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), Some("new".to_string()));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let storage = MemoryStorage::new();
    storage.delete("missing").await.unwrap();
    storage.set("k", "v", None).await.unwrap();
    storage.delete("k").await.unwrap();
    storage.delete("k").await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_failing_storage_errors_on_every_call() {
    let storage: Arc<dyn Storage> = Arc::new(FailingStorage);
    assert!(storage.get("k").await.is_err());
    assert!(storage.set("k", "v", None).await.is_err());
    assert!(storage.delete("k").await.is_err());
}
