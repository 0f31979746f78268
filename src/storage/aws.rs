//! S3-compatible object store.
//!
//! Talks to a single bucket on AWS S3 or any S3-compatible service (Ceph,
//! MinIO, ...). The client is bound to the endpoint, region and static
//! credentials resolved from the configuration, with SDK retries disabled
//! so every backend failure surfaces on the first attempt.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::backend::{
    ListedObject, ObjectContent, ObjectHead, ObjectStore, PutMode, StoreFuture,
};
use crate::bucket::{BucketIdentity, StoreCredentials};
use crate::errors::StoreError;

/// Object store backed by an S3 bucket.
pub struct S3ObjectStore {
    /// AWS S3 SDK client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Send `If-None-Match: *` for create-only puts.
    conditional_writes: bool,
}

impl S3ObjectStore {
    /// Create a client for `bucket` using static `credentials`.
    pub async fn new(
        bucket: &BucketIdentity,
        credentials: &StoreCredentials,
        conditional_writes: bool,
    ) -> Self {
        let creds = aws_sdk_s3::config::Credentials::new(
            &credentials.access_key,
            &credentials.secret_key,
            None, // session_token
            None, // expiry
            "f3-config",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(bucket.region.clone()))
            .credentials_provider(creds)
            .retry_config(aws_config::retry::RetryConfig::disabled())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(&bucket.endpoint)
            .force_path_style(bucket.path_style)
            .build();

        info!(
            bucket = %bucket.name,
            endpoint = %bucket.endpoint,
            region = %bucket.region,
            path_style = bucket.path_style,
            "S3 object store initialized"
        );

        Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.name.clone(),
            conditional_writes,
        }
    }

    /// Map an SDK error to a [`StoreError`], keeping the service error code.
    fn map_sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let code = err.code().unwrap_or("Unknown").to_string();
        let message = match err.message() {
            Some(msg) => msg.to_string(),
            None => DisplayErrorContext(&err).to_string(),
        };
        StoreError::Backend {
            code,
            message: format!("AWS S3 {context}: {message}"),
        }
    }
}

fn to_utc(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn non_negative(n: Option<i64>) -> u64 {
    n.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

/// Whether an error code means the requested range starts past the end.
fn is_unsatisfiable_range(code: Option<&str>) -> bool {
    code == Some("InvalidRange")
}

/// Total object size from a `Content-Range` value such as `bytes 5-9/10`.
fn total_from_content_range(content_range: &str) -> Option<u64> {
    let (_, total) = content_range.rsplit_once('/')?;
    total.trim().parse().ok()
}

impl ObjectStore for S3ObjectStore {
    fn head(&self, key: &str) -> StoreFuture<'_, ObjectHead> {
        let key = key.to_string();
        Box::pin(async move {
            // The SDK refuses to build a request without a key.
            if key.is_empty() {
                return Err(StoreError::NotFound);
            }
            debug!("AWS head_object: bucket={} key={}", self.bucket, key);

            let resp = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                        StoreError::NotFound
                    } else {
                        Self::map_sdk_error("head_object", e)
                    }
                })?;

            Ok(ObjectHead {
                size: non_negative(resp.content_length()),
                last_modified: resp.last_modified().and_then(to_utc),
            })
        })
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<ListedObject>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            debug!("AWS list_objects_v2: bucket={} prefix={}", self.bucket, prefix);

            let mut objects = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .fetch_owner(true);
                if !prefix.is_empty() {
                    req = req.prefix(&prefix);
                }
                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("list_objects_v2", e))?;

                for obj in resp.contents() {
                    let Some(key) = obj.key() else { continue };
                    objects.push(ListedObject {
                        key: key.to_string(),
                        size: non_negative(obj.size()),
                        last_modified: obj.last_modified().and_then(to_utc),
                        owner: obj
                            .owner()
                            .and_then(|o| o.display_name().or(o.id()))
                            .map(str::to_string),
                    });
                }

                if resp.is_truncated() == Some(true) {
                    continuation_token = resp.next_continuation_token().map(str::to_string);
                    if continuation_token.is_none() {
                        break;
                    }
                } else {
                    break;
                }
            }

            Ok(objects)
        })
    }

    fn get(&self, key: &str, offset: u64) -> StoreFuture<'_, ObjectContent> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "AWS get_object: bucket={} key={} offset={}",
                self.bucket, key, offset
            );

            let mut req = self.client.get_object().bucket(&self.bucket).key(&key);
            if offset > 0 {
                req = req.range(format!("bytes={offset}-"));
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                    return Err(StoreError::NotFound);
                }
                // Resuming at or past the end of the object: S3 answers 416.
                Err(e) if offset > 0 && is_unsatisfiable_range(e.code()) => {
                    let head = self.head(&key).await?;
                    debug!(
                        "AWS get_object: bucket={} key={} offset={} is past size={}",
                        self.bucket, key, offset, head.size
                    );
                    return Ok(ObjectContent::exhausted(head.size));
                }
                Err(e) => return Err(Self::map_sdk_error("get_object", e)),
            };

            let returned = non_negative(resp.content_length());
            let size = resp
                .content_range()
                .and_then(total_from_content_range)
                .unwrap_or(returned + offset);
            let start = size.saturating_sub(returned);

            Ok(ObjectContent {
                size,
                start,
                body: Box::new(Box::pin(resp.body.into_async_read())),
            })
        })
    }

    fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StoreFuture<'_, u64> {
        let key = key.to_string();
        Box::pin(async move {
            let len = data.len() as u64;
            debug!(
                "AWS put_object: bucket={} key={} bytes={} mode={:?}",
                self.bucket, key, len, mode
            );

            let mut req = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(data));
            if mode == PutMode::CreateOnly {
                req = req.if_none_match("*");
            }

            req.send().await.map_err(|e| {
                let conflict = matches!(
                    e.code(),
                    Some("PreconditionFailed") | Some("ConditionalRequestConflict")
                );
                if mode == PutMode::CreateOnly && conflict {
                    StoreError::AlreadyExists
                } else {
                    Self::map_sdk_error("put_object", e)
                }
            })?;

            Ok(len)
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            // S3 delete_object is idempotent, so a missing key has to be
            // detected up front. Not atomic against a concurrent delete.
            self.head(&key).await?;

            debug!("AWS delete_object: bucket={} key={}", self.bucket, key);

            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

            Ok(())
        })
    }

    fn check_bucket(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            debug!("AWS head_bucket: bucket={}", self.bucket);
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("head_bucket", e))?;
            Ok(())
        })
    }

    fn supports_conditional_put(&self) -> bool {
        self.conditional_writes
    }
}

// -- Tests -------------------------------------------------------------------
