//! Test doubles shared by the driver and factory tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::StoreError;
use crate::storage::backend::{
    ListedObject, ObjectContent, ObjectHead, ObjectStore, PutMode, StoreFuture,
};
use crate::storage::memory::MemoryObjectStore;
use crate::telemetry::MetricsSender;

/// Wraps a [`MemoryObjectStore`] and counts every call made against it.
pub struct CountingStore {
    inner: MemoryObjectStore,
    calls: AtomicUsize,
    conditional: bool,
    ranged: bool,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(false, true)
    }

    pub fn with_capabilities(conditional: bool, ranged: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryObjectStore::new(),
            calls: AtomicUsize::new(0),
            conditional,
            ranged,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ObjectStore for CountingStore {
    fn head(&self, key: &str) -> StoreFuture<'_, ObjectHead> {
        self.tick();
        self.inner.head(key)
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<ListedObject>> {
        self.tick();
        self.inner.list(prefix)
    }

    fn get(&self, key: &str, offset: u64) -> StoreFuture<'_, ObjectContent> {
        self.tick();
        let offset = if self.ranged { offset } else { 0 };
        self.inner.get(key, offset)
    }

    fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StoreFuture<'_, u64> {
        self.tick();
        self.inner.put(key, data, mode)
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        self.tick();
        self.inner.delete(key)
    }

    fn check_bucket(&self) -> StoreFuture<'_, ()> {
        self.tick();
        self.inner.check_bucket()
    }

    fn supports_conditional_put(&self) -> bool {
        self.conditional
    }

    fn supports_ranged_reads(&self) -> bool {
        self.ranged
    }
}

/// Applies S3 request validation on top of a [`MemoryObjectStore`]: an empty
/// key fails before any request is sent, as the SDK does for a missing
/// required field.
#[derive(Default)]
pub struct KeyValidatingStore {
    inner: MemoryObjectStore,
}

impl KeyValidatingStore {
    fn missing_key<T: Send + 'static>() -> StoreFuture<'static, T> {
        Box::pin(async {
            Err(StoreError::backend(
                "Unknown",
                "failed to construct request: key was missing",
            ))
        })
    }
}

impl ObjectStore for KeyValidatingStore {
    fn head(&self, key: &str) -> StoreFuture<'_, ObjectHead> {
        if key.is_empty() {
            return Self::missing_key();
        }
        self.inner.head(key)
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<ListedObject>> {
        self.inner.list(prefix)
    }

    fn get(&self, key: &str, offset: u64) -> StoreFuture<'_, ObjectContent> {
        if key.is_empty() {
            return Self::missing_key();
        }
        self.inner.get(key, offset)
    }

    fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StoreFuture<'_, u64> {
        if key.is_empty() {
            return Self::missing_key();
        }
        self.inner.put(key, data, mode)
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        if key.is_empty() {
            return Self::missing_key();
        }
        self.inner.delete(key)
    }

    fn check_bucket(&self) -> StoreFuture<'_, ()> {
        self.inner.check_bucket()
    }
}

/// A store whose every call fails with a backend error.
pub struct BrokenStore;

impl ObjectStore for BrokenStore {
    fn head(&self, _key: &str) -> StoreFuture<'_, ObjectHead> {
        Box::pin(async { Err(StoreError::backend("AccessDenied", "Access Denied")) })
    }

    fn list(&self, _prefix: &str) -> StoreFuture<'_, Vec<ListedObject>> {
        Box::pin(async { Err(StoreError::backend("AccessDenied", "Access Denied")) })
    }

    fn get(&self, _key: &str, _offset: u64) -> StoreFuture<'_, ObjectContent> {
        Box::pin(async { Err(StoreError::backend("AccessDenied", "Access Denied")) })
    }

    fn put(&self, _key: &str, _data: Bytes, _mode: PutMode) -> StoreFuture<'_, u64> {
        Box::pin(async { Err(StoreError::backend("AccessDenied", "Access Denied")) })
    }

    fn delete(&self, _key: &str) -> StoreFuture<'_, ()> {
        Box::pin(async { Err(StoreError::backend("AccessDenied", "Access Denied")) })
    }

    fn check_bucket(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Err(StoreError::backend("NoSuchBucket", "bucket missing")) })
    }
}

/// Records every report it receives.
#[derive(Default)]
pub struct RecordingSender {
    reports: Mutex<Vec<(&'static str, u64)>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<(&'static str, u64)> {
        self.reports.lock().unwrap().clone()
    }
}

impl MetricsSender for RecordingSender {
    fn send_get(&self, size: u64, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(("GET", size));
        Ok(())
    }

    fn send_put(&self, size: u64, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(("PUT", size));
        Ok(())
    }
}

/// Fails every report.
pub struct FailingSender;

impl MetricsSender for FailingSender {
    fn send_get(&self, _size: u64, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        anyhow::bail!("metrics backend unreachable")
    }

    fn send_put(&self, _size: u64, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        anyhow::bail!("metrics backend unreachable")
    }
}
