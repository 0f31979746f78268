//! Driver over a flat object store.
//!
//! Key mapping: the client path minus its leading `/` is the object key.
//! A listing of `photos` covers the keys under `photos/`, so sibling keys
//! such as `photos-old/x` are not part of it.
//!
//! The bucket has no directories, no rename and no append, so:
//!   - `stat` on a missing key answers with a synthesized prefix entry,
//!   - cd / mkdir / mv / rmdir always fail once past the feature gate,
//!   - puts replace whole objects; append mode is refused.
//!
//! With the no-overwrite policy and a backend lacking conditional writes,
//! `put_file` checks for the key and then writes. Two sessions racing on the
//! same key can both pass the check; the last write wins.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use super::{
    counted_download, listing_prefix, object_key, report_put, Download, Driver, DriverFuture,
    DriverSettings, ObjectMetadata, Visitor,
};
use crate::bucket::BucketIdentity;
use crate::errors::{DriverError, StoreError};
use crate::features::Feature;
use crate::storage::backend::{ObjectBody, ObjectStore, PutMode};
use crate::telemetry::MetricsSender;

/// Per-connection driver backed by an [`ObjectStore`].
pub struct ObjectStoreDriver {
    settings: DriverSettings,
    bucket: Arc<BucketIdentity>,
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricsSender>,
}

impl ObjectStoreDriver {
    pub fn new(
        settings: DriverSettings,
        bucket: Arc<BucketIdentity>,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricsSender>,
    ) -> Self {
        Self {
            settings,
            bucket,
            store,
            metrics,
        }
    }

    /// Check the feature gate for `feature`, logging a refusal.
    fn gate(&self, feature: Feature) -> Result<(), DriverError> {
        self.settings.features.require(feature).inspect_err(|_| {
            warn!(op = feature.op_name(), "Operation is not enabled");
        })
    }

    /// Gate, then refuse: the bucket cannot emulate `feature` faithfully.
    fn unsupported(&self, feature: Feature) -> Result<(), DriverError> {
        self.gate(feature)?;
        warn!(op = feature.op_name(), "Operation is not supported by the object store");
        Err(DriverError::OperationNotSupported {
            op: feature.op_name(),
        })
    }

    fn backend_failure(&self, op: &str, key: &str, err: StoreError) -> DriverError {
        if let StoreError::Backend { ref code, ref message } = err {
            error!(
                op,
                object = %self.bucket.object_url(key),
                code = %code,
                "{message}"
            );
        }
        DriverError::from_store(key, err)
    }

    /// Whether an object exists under `key`.
    async fn object_exists(&self, key: &str) -> Result<bool, DriverError> {
        debug!(object = %self.bucket.object_url(key), "Checking if object exists");
        match self.store.head(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(self.backend_failure("HEAD", key, e)),
        }
    }

    /// Pick the write mode that enforces the overwrite policy for `key`.
    async fn put_mode(&self, key: &str) -> Result<PutMode, DriverError> {
        if !self.settings.no_overwrite {
            return Ok(PutMode::Overwrite);
        }
        if self.store.supports_conditional_put() {
            return Ok(PutMode::CreateOnly);
        }
        if self.object_exists(key).await? {
            return Err(self.overwrite_forbidden(key));
        }
        Ok(PutMode::Overwrite)
    }

    fn overwrite_forbidden(&self, key: &str) -> DriverError {
        error!(
            object = %self.bucket.object_url(key),
            "Object already exists and overwriting is forbidden"
        );
        DriverError::OverwriteForbidden {
            key: key.to_string(),
        }
    }
}

impl Driver for ObjectStoreDriver {
    fn stat<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            let key = object_key(path);
            // The bucket root is never an object, and S3 rejects an empty key.
            if key.is_empty() {
                return Ok(ObjectMetadata::prefix(key));
            }
            match self.store.head(key).await {
                Ok(head) => Ok(ObjectMetadata::object(
                    key,
                    head.size,
                    head.last_modified.unwrap_or_else(Utc::now),
                )),
                // A client listing a prefix stats it first; answer as if it
                // were a directory instead of failing the listing.
                Err(StoreError::NotFound) => {
                    debug!(key = %key, "No object under key, presenting it as a prefix");
                    Ok(ObjectMetadata::prefix(key))
                }
                Err(e) => Err(self.backend_failure("STAT", key, e)),
            }
        })
    }

    fn change_dir<'a>(&'a self, _path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.unsupported(Feature::ChangeDir) })
    }

    fn list_dir<'a>(&'a self, path: &'a str, visit: Visitor<'a>) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::List)?;
            let prefix = listing_prefix(path);

            let objects = self
                .store
                .list(&prefix)
                .await
                .map_err(|e| self.backend_failure("LS", &prefix, e))?;

            for obj in objects {
                let meta = ObjectMetadata::object(
                    obj.key,
                    obj.size,
                    obj.last_modified.unwrap_or_else(Utc::now),
                )
                .with_owner(obj.owner);
                if let Err(e) = visit(&meta) {
                    error!(
                        object = %self.bucket.object_url(&meta.name),
                        error = %e,
                        "Could not list object"
                    );
                }
            }
            Ok(())
        })
    }

    fn delete_dir<'a>(&'a self, _path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.unsupported(Feature::RemoveDir) })
    }

    fn delete_file<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::Remove)?;
            let key = object_key(path);
            self.store
                .delete(key)
                .await
                .map_err(|e| self.backend_failure("RM", key, e))?;
            info!(op = "RM", object = %self.bucket.object_url(key), "Deleted object");
            Ok(())
        })
    }

    fn rename<'a>(&'a self, _from: &'a str, _to: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.unsupported(Feature::Move) })
    }

    fn make_dir<'a>(&'a self, _path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.unsupported(Feature::MakeDir) })
    }

    fn get_file<'a>(&'a self, path: &'a str, offset: u64) -> DriverFuture<'a, Download> {
        Box::pin(async move {
            self.gate(Feature::Get)?;
            let key = object_key(path);
            let offset = if self.store.supports_ranged_reads() {
                offset
            } else {
                0
            };

            let content = self
                .store
                .get(key, offset)
                .await
                .map_err(|e| self.backend_failure("GET", key, e))?;

            info!(
                op = "GET",
                object = %self.bucket.object_url(key),
                size = content.size,
                "Serving object"
            );
            Ok(Download {
                size: content.size,
                offset: content.start,
                reader: counted_download(&self.metrics, key, content.body),
            })
        })
    }

    fn put_file<'a>(
        &'a self,
        path: &'a str,
        mut data: ObjectBody,
        append: bool,
    ) -> DriverFuture<'a, u64> {
        Box::pin(async move {
            self.gate(Feature::Put)?;
            let key = object_key(path);
            if append {
                error!(
                    object = %self.bucket.object_url(key),
                    "Can not append, the backend does not support appending"
                );
                return Err(DriverError::AppendNotSupported {
                    key: key.to_string(),
                });
            }

            let mode = self.put_mode(key).await?;

            let mut buffer = Vec::new();
            data.read_to_end(&mut buffer).await.inspect_err(|e| {
                error!(
                    object = %self.bucket.object_url(key),
                    error = %e,
                    "Reading upload from client failed"
                );
            })?;

            let written = match self.store.put(key, Bytes::from(buffer), mode).await {
                Ok(n) => n,
                Err(StoreError::AlreadyExists) => return Err(self.overwrite_forbidden(key)),
                Err(e) => return Err(self.backend_failure("PUT", key, e)),
            };

            info!(
                op = "PUT",
                object = %self.bucket.object_url(key),
                size = written,
                "Stored object"
            );
            report_put(&self.metrics, key, written);
            Ok(written)
        })
    }
}

// -- Tests -------------------------------------------------------------------
