//! Abstract object store trait.
//!
//! Every backend the object-store driver can run against implements
//! [`ObjectStore`]. The trait mirrors the flat key/value data model of a
//! bucket: there are no directories, no rename and no append.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::errors::StoreError;

/// Boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Readable object content.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a head-object request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, if the backend reported one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Owner display name, when the backend exposes it.
    pub owner: Option<String>,
}

/// Content returned by a get-object request.
pub struct ObjectContent {
    /// Total object size in bytes, independent of any range.
    pub size: u64,
    /// Offset of the first byte in `body`.
    pub start: u64,
    pub body: ObjectBody,
}

impl ObjectContent {
    /// A read positioned at the end of a `size`-byte object: no bytes left.
    pub fn exhausted(size: u64) -> Self {
        Self {
            size,
            start: size,
            body: Box::new(tokio::io::empty()),
        }
    }
}

impl std::fmt::Debug for ObjectContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContent")
            .field("size", &self.size)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

/// Write semantics for [`ObjectStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing object.
    Overwrite,
    /// Fail with [`StoreError::AlreadyExists`] if the key exists. Only valid
    /// when [`ObjectStore::supports_conditional_put`] is true.
    CreateOnly,
}

/// Async object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch size and modification time of `key`.
    /// Missing keys, including the empty key, yield [`StoreError::NotFound`].
    fn head(&self, key: &str) -> StoreFuture<'_, ObjectHead>;

    /// List every object whose key starts with `prefix` (empty = whole bucket).
    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<ListedObject>>;

    /// Read `key` starting at byte `offset`.
    ///
    /// An offset at or past the end yields empty content with
    /// `start == size`. Backends without ranged reads ignore `offset` and
    /// return `start == 0`.
    fn get(&self, key: &str, offset: u64) -> StoreFuture<'_, ObjectContent>;

    /// Store `data` under `key`, returning the number of bytes written.
    fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StoreFuture<'_, u64>;

    /// Delete `key`. Missing keys yield [`StoreError::NotFound`].
    fn delete(&self, key: &str) -> StoreFuture<'_, ()>;

    /// Check that the bucket itself is reachable.
    fn check_bucket(&self) -> StoreFuture<'_, ()>;

    /// Whether [`PutMode::CreateOnly`] is honored atomically.
    fn supports_conditional_put(&self) -> bool {
        false
    }

    /// Whether [`get`](Self::get) honors its offset.
    fn supports_ranged_reads(&self) -> bool {
        true
    }
}
