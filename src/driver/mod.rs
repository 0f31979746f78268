//! The file-operation contract the protocol engine drives.
//!
//! A [`Driver`] is created per connection by
//! [`DriverFactory`](crate::factory::DriverFactory). Two implementations exist:
//! [`ObjectStoreDriver`] maps the hierarchical interface onto a flat bucket,
//! [`FsDriver`] serves a local directory tree. Both consult the same
//! [`FeatureFlags`](crate::features::FeatureFlags) before touching storage.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

use crate::errors::DriverError;
use crate::features::FeatureFlags;
use crate::storage::backend::ObjectBody;
use crate::telemetry::MetricsSender;

pub mod fs;
pub mod object_store;

pub use fs::FsDriver;
pub use object_store::ObjectStoreDriver;

/// Boxed future returned by [`Driver`] operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Callback invoked once per listed entry.
pub type Visitor<'a> = &'a mut (dyn FnMut(&ObjectMetadata) -> anyhow::Result<()> + Send);

/// Owner/group label used when the backend does not expose one.
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Permission policy shared by every driver a factory creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub features: FeatureFlags,
    /// Forbid replacing an existing object's content.
    pub no_overwrite: bool,
}

/// Metadata of a stat'd or listed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object key (or file name), doubling as the path shown to clients.
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Whether the entry should be presented as a directory.
    pub is_prefix: bool,
    /// Unix permission bits presented to clients.
    pub mode: u32,
    owner: Option<String>,
}

impl ObjectMetadata {
    /// Metadata of a confirmed object.
    pub fn object(name: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            is_prefix: false,
            mode: 0o644,
            owner: None,
        }
    }

    /// A zero-size, current-timestamped directory stand-in for a key that
    /// exists only as a prefix of other keys.
    pub fn prefix(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified: Utc::now(),
            is_prefix: true,
            mode: 0o755,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner.filter(|o| !o.is_empty());
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Owner name, or `"Unknown"`.
    pub fn owner(&self) -> &str {
        self.owner.as_deref().unwrap_or(UNKNOWN_OWNER)
    }

    /// Always `"Unknown"`; neither backend exposes a group.
    pub fn group(&self) -> &str {
        UNKNOWN_OWNER
    }
}

/// A readable download.
pub struct Download {
    /// Total size of the object in bytes.
    pub size: u64,
    /// Offset of the first byte the reader yields. Equal to the requested
    /// offset (capped at `size`) when the backend honors ranges, otherwise 0
    /// and the caller discards the leading bytes itself.
    pub offset: u64,
    pub reader: ObjectBody,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("size", &self.size)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// The operation set the protocol engine calls with client-supplied paths.
pub trait Driver: Send + Sync {
    /// Metadata of the entry at `path`.
    fn stat<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ObjectMetadata>;

    /// Validate a change of working directory to `path`.
    fn change_dir<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()>;

    /// Call `visit` for every entry under `path`. A failing visit is logged
    /// and iteration continues.
    fn list_dir<'a>(&'a self, path: &'a str, visit: Visitor<'a>) -> DriverFuture<'a, ()>;

    fn delete_dir<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()>;

    fn delete_file<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()>;

    fn rename<'a>(&'a self, from: &'a str, to: &'a str) -> DriverFuture<'a, ()>;

    fn make_dir<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()>;

    /// Open `path` for reading from `offset`.
    fn get_file<'a>(&'a self, path: &'a str, offset: u64) -> DriverFuture<'a, Download>;

    /// Store `data` at `path`, returning the number of bytes written.
    fn put_file<'a>(
        &'a self,
        path: &'a str,
        data: ObjectBody,
        append: bool,
    ) -> DriverFuture<'a, u64>;
}

/// Object key for a client path: the path without leading slashes.
pub fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Key prefix covering the contents of the directory at `path`: the key
/// with a trailing `/`, or empty for the root.
pub fn listing_prefix(path: &str) -> String {
    let key = object_key(path);
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

// -- Telemetry helpers --------------------------------------------------------

/// Report a completed GET. Failures are logged, never returned.
pub(crate) fn report_get(metrics: &Arc<dyn MetricsSender>, key: &str, size: u64) {
    if let Err(e) = metrics.send_get(size, Utc::now()) {
        warn!(key = %key, error = %e, "Failed to send GET metric");
    }
}

/// Report a completed PUT. Failures are logged, never returned.
pub(crate) fn report_put(metrics: &Arc<dyn MetricsSender>, key: &str, size: u64) {
    if let Err(e) = metrics.send_put(size, Utc::now()) {
        warn!(key = %key, error = %e, "Failed to send PUT metric");
    }
}

/// Wrap `reader` so the GET is reported once it has been read to the end.
pub(crate) fn counted_download(
    metrics: &Arc<dyn MetricsSender>,
    key: &str,
    reader: ObjectBody,
) -> ObjectBody {
    let metrics = Arc::clone(metrics);
    let key = key.to_string();
    Box::new(crate::telemetry::CountingReader::new(
        reader,
        Box::new(move |bytes| report_get(&metrics, &key, bytes)),
    ))
}

#[cfg(test)]
pub(crate) mod testing;

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_strips_leading_slashes() {
        assert_eq!(object_key("/a/b.txt"), "a/b.txt");
        assert_eq!(object_key("//a"), "a");
        assert_eq!(object_key("a/"), "a/");
        assert_eq!(object_key("/"), "");
    }

    #[test]
    fn test_listing_prefix_names_a_directory() {
        assert_eq!(listing_prefix("/"), "");
        assert_eq!(listing_prefix(""), "");
        assert_eq!(listing_prefix("/photos"), "photos/");
        assert_eq!(listing_prefix("photos/"), "photos/");
        assert_eq!(listing_prefix("/a/b"), "a/b/");
    }

    #[test]
    fn test_metadata_defaults() {
        let meta = ObjectMetadata::object("k", 3, Utc::now());
        assert!(!meta.is_prefix);
        assert_eq!(meta.owner(), "Unknown");
        assert_eq!(meta.group(), "Unknown");
        assert_eq!(meta.mode, 0o644);

        let owned = meta.with_owner(Some("alice".to_string()));
        assert_eq!(owned.owner(), "alice");
        assert_eq!(owned.clone().with_owner(Some(String::new())).owner(), "Unknown");
    }

    #[test]
    fn test_prefix_metadata() {
        let meta = ObjectMetadata::prefix("photos");
        assert!(meta.is_prefix);
        assert_eq!(meta.size, 0);
        assert!(meta.modified <= Utc::now());
    }
}
