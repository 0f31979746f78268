//! In-memory object store.
//!
//! Objects are held in a `tokio::sync::RwLock<BTreeMap<...>>` keyed by
//! object key, so listings come back in key order like a real bucket.
//! Create-only puts are checked and applied under one write lock, which makes
//! them atomic.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Cursor;

use super::backend::{
    ListedObject, ObjectContent, ObjectHead, ObjectStore, PutMode, StoreFuture,
};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: tokio::sync::RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn head(&self, key: &str) -> StoreFuture<'_, ObjectHead> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let obj = objects.get(&key).ok_or(StoreError::NotFound)?;
            Ok(ObjectHead {
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified),
            })
        })
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<ListedObject>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, obj)| ListedObject {
                    key: key.clone(),
                    size: obj.data.len() as u64,
                    last_modified: Some(obj.last_modified),
                    owner: None,
                })
                .collect())
        })
    }

    fn get(&self, key: &str, offset: u64) -> StoreFuture<'_, ObjectContent> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let obj = objects.get(&key).ok_or(StoreError::NotFound)?;
            let size = obj.data.len() as u64;
            let start = offset.min(size);
            let body = obj.data.slice(start as usize..);
            Ok(ObjectContent {
                size,
                start,
                body: Box::new(Cursor::new(body)),
            })
        })
    }

    fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StoreFuture<'_, u64> {
        let key = key.to_string();
        Box::pin(async move {
            let len = data.len() as u64;
            let mut objects = self.objects.write().await;
            if mode == PutMode::CreateOnly && objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists);
            }
            objects.insert(
                key,
                StoredObject {
                    data,
                    last_modified: Utc::now(),
                },
            );
            Ok(len)
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            objects.remove(&key).map(|_| ()).ok_or(StoreError::NotFound)
        })
    }

    fn check_bucket(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn supports_conditional_put(&self) -> bool {
        true
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(content: ObjectContent) -> Vec<u8> {
        let mut body = content.body;
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let store = MemoryObjectStore::new();
        let written = store
            .put("a/key.txt", Bytes::from("hello world"), PutMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(written, 11);

        let content = store.get("a/key.txt", 0).await.unwrap();
        assert_eq!(content.size, 11);
        assert_eq!(content.start, 0);
        assert_eq!(read_all(content).await, b"hello world");
    }

    #[tokio::test]
    async fn test_get_with_offset() {
        let store = MemoryObjectStore::new();
        store
            .put("k", Bytes::from("0123456789"), PutMode::Overwrite)
            .await
            .unwrap();

        let content = store.get("k", 4).await.unwrap();
        assert_eq!(content.size, 10);
        assert_eq!(content.start, 4);
        assert_eq!(read_all(content).await, b"456789");

        for offset in [10, 50] {
            let past_end = store.get("k", offset).await.unwrap();
            assert_eq!(past_end.size, 10);
            assert_eq!(past_end.start, 10);
            assert!(read_all(past_end).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryObjectStore::new();
        assert_eq!(store.get("nope", 0).await.unwrap_err(), StoreError::NotFound);
        assert_eq!(store.head("nope").await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_create_only_rejects_existing() {
        let store = MemoryObjectStore::new();
        store
            .put("k", Bytes::from("one"), PutMode::CreateOnly)
            .await
            .unwrap();
        assert_eq!(
            store
                .put("k", Bytes::from("two"), PutMode::CreateOnly)
                .await
                .unwrap_err(),
            StoreError::AlreadyExists
        );
        store
            .put("k", Bytes::from("three"), PutMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(store.head("k").await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_in_key_order() {
        let store = MemoryObjectStore::new();
        for key in ["docs/b.txt", "docs/a.txt", "images/x.png", "docsx"] {
            store
                .put(key, Bytes::from("data"), PutMode::Overwrite)
                .await
                .unwrap();
        }

        let keys: Vec<String> = store
            .list("docs/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["docs/a.txt", "docs/b.txt"]);

        assert_eq!(store.list("").await.unwrap().len(), 4);
        assert!(store.list("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryObjectStore::new();
        store
            .put("k", Bytes::from("v"), PutMode::Overwrite)
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.delete("k").await.unwrap_err(), StoreError::NotFound);
    }
}
