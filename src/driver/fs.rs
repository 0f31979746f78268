//! Driver over a local directory tree.
//!
//! Paths are resolved relative to the configured root. Unlike the object
//! store, the filesystem has real directories, rename and append, so every
//! operation is supported once its feature flag is enabled.

use chrono::{DateTime, Utc};
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncSeekExt;
use tracing::{debug, error, info, warn};

use super::{
    counted_download, object_key, report_put, Download, Driver, DriverFuture, DriverSettings,
    ObjectMetadata, Visitor,
};
use crate::errors::DriverError;
use crate::features::Feature;
use crate::storage::backend::ObjectBody;
use crate::telemetry::MetricsSender;

/// Per-connection driver rooted at a local directory.
pub struct FsDriver {
    settings: DriverSettings,
    root: Arc<PathBuf>,
    metrics: Arc<dyn MetricsSender>,
}

impl FsDriver {
    pub fn new(
        settings: DriverSettings,
        root: Arc<PathBuf>,
        metrics: Arc<dyn MetricsSender>,
    ) -> Self {
        Self {
            settings,
            root,
            metrics,
        }
    }

    fn gate(&self, feature: Feature) -> Result<(), DriverError> {
        self.settings.features.require(feature).inspect_err(|_| {
            warn!(op = feature.op_name(), "Operation is not enabled");
        })
    }

    /// Resolve a client path below the root, rejecting `..` components.
    fn resolve(&self, path: &str) -> Result<PathBuf, DriverError> {
        let relative = object_key(path);
        let mut resolved = self.root.as_ref().clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    warn!(path = %path, "Path traversal rejected");
                    return Err(DriverError::BackendError {
                        code: "InvalidPath".to_string(),
                        message: format!("path {path:?} escapes the root directory"),
                    });
                }
            }
        }
        Ok(resolved)
    }

    fn map_io(path: &str, err: io::Error) -> DriverError {
        match err.kind() {
            io::ErrorKind::NotFound => DriverError::ObjectNotFound {
                key: path.to_string(),
            },
            kind => {
                error!(path = %path, error = %err, "Filesystem operation failed");
                DriverError::BackendError {
                    code: format!("{kind:?}"),
                    message: err.to_string(),
                }
            }
        }
    }

    fn metadata_for(name: String, meta: &std::fs::Metadata) -> ObjectMetadata {
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let entry = if meta.is_dir() {
            ObjectMetadata::prefix(name)
        } else {
            ObjectMetadata::object(name, meta.len(), modified)
        };
        let entry = ObjectMetadata { modified, ..entry };
        match permission_bits(meta) {
            Some(mode) => entry.with_mode(mode),
            None => entry,
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permission_bits(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

impl Driver for FsDriver {
    fn stat<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            let meta = fs::metadata(&full).await.map_err(|e| Self::map_io(path, e))?;
            Ok(Self::metadata_for(object_key(path).to_string(), &meta))
        })
    }

    fn change_dir<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::ChangeDir)?;
            let full = self.resolve(path)?;
            let meta = fs::metadata(&full).await.map_err(|e| Self::map_io(path, e))?;
            if !meta.is_dir() {
                return Err(DriverError::ObjectNotFound {
                    key: path.to_string(),
                });
            }
            debug!(path = %path, "Changed directory");
            Ok(())
        })
    }

    fn list_dir<'a>(&'a self, path: &'a str, visit: Visitor<'a>) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::List)?;
            let full = self.resolve(path)?;
            let mut entries = fs::read_dir(&full).await.map_err(|e| Self::map_io(path, e))?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io(path, e))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(entry = %name, error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                let info = Self::metadata_for(name, &meta);
                if let Err(e) = visit(&info) {
                    error!(entry = %info.name, error = %e, "Could not list entry");
                }
            }
            Ok(())
        })
    }

    fn delete_dir<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::RemoveDir)?;
            let full = self.resolve(path)?;
            if full == *self.root {
                return Err(DriverError::BackendError {
                    code: "InvalidPath".to_string(),
                    message: "refusing to remove the root directory".to_string(),
                });
            }
            fs::remove_dir_all(&full).await.map_err(|e| Self::map_io(path, e))?;
            info!(op = "RMDIR", path = %path, "Removed directory");
            Ok(())
        })
    }

    fn delete_file<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::Remove)?;
            let full = self.resolve(path)?;
            fs::remove_file(&full).await.map_err(|e| Self::map_io(path, e))?;
            info!(op = "RM", path = %path, "Removed file");
            Ok(())
        })
    }

    fn rename<'a>(&'a self, from: &'a str, to: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::Move)?;
            let src = self.resolve(from)?;
            let dst = self.resolve(to)?;
            fs::rename(&src, &dst).await.map_err(|e| Self::map_io(from, e))?;
            info!(op = "MV", from = %from, to = %to, "Renamed");
            Ok(())
        })
    }

    fn make_dir<'a>(&'a self, path: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Feature::MakeDir)?;
            let full = self.resolve(path)?;
            fs::create_dir_all(&full).await.map_err(|e| Self::map_io(path, e))?;
            info!(op = "MKDIR", path = %path, "Created directory");
            Ok(())
        })
    }

    fn get_file<'a>(&'a self, path: &'a str, offset: u64) -> DriverFuture<'a, Download> {
        Box::pin(async move {
            self.gate(Feature::Get)?;
            let full = self.resolve(path)?;
            let mut file = fs::File::open(&full).await.map_err(|e| Self::map_io(path, e))?;
            let size = file.metadata().await.map_err(|e| Self::map_io(path, e))?.len();
            let start = offset.min(size);
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| Self::map_io(path, e))?;

            info!(op = "GET", path = %path, size, "Serving file");
            Ok(Download {
                size,
                offset: start,
                reader: counted_download(&self.metrics, path, Box::new(file)),
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
            let full = self.resolve(path)?;

            if let Ok(existing) = fs::metadata(&full).await {
                if existing.is_dir() {
                    return Err(DriverError::BackendError {
                        code: "IsADirectory".to_string(),
                        message: format!("{path:?} is already a directory"),
                    });
                }
                if self.settings.no_overwrite {
                    error!(path = %path, "File already exists and overwriting is forbidden");
                    return Err(DriverError::OverwriteForbidden {
                        key: path.to_string(),
                    });
                }
            }

            let mut options = fs::OpenOptions::new();
            options.create(true);
            if append {
                options.append(true);
            } else {
                options.write(true).truncate(true);
            }
            let mut file = options.open(&full).await.map_err(|e| Self::map_io(path, e))?;

            let written = tokio::io::copy(&mut data, &mut file).await?;
            tokio::io::AsyncWriteExt::flush(&mut file).await?;

            info!(op = "PUT", path = %path, size = written, append, "Stored file");
            report_put(&self.metrics, path, written);
            Ok(written)
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::RecordingSender;
    use crate::features::FeatureFlags;
    use crate::telemetry::NopSender;
    use tokio::io::AsyncReadExt;

    fn test_driver(features: &str, no_overwrite: bool) -> (tempfile::TempDir, FsDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(
            DriverSettings {
                features: FeatureFlags::parse(features).unwrap(),
                no_overwrite,
            },
            Arc::new(dir.path().to_path_buf()),
            Arc::new(NopSender),
        );
        (dir, driver)
    }

    fn body(data: &[u8]) -> ObjectBody {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    async fn read_download(download: Download) -> Vec<u8> {
        let mut reader = download.reader;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, driver) = test_driver("get,put", false);
        assert_eq!(driver.put_file("/file.txt", body(b"hello"), false).await.unwrap(), 5);
        let download = driver.get_file("/file.txt", 0).await.unwrap();
        assert_eq!(download.size, 5);
        assert_eq!(read_download(download).await, b"hello");
    }

    #[tokio::test]
    async fn test_get_with_offset_seeks() {
        let (_dir, driver) = test_driver("get,put", false);
        driver.put_file("f", body(b"0123456789"), false).await.unwrap();
        let download = driver.get_file("f", 7).await.unwrap();
        assert_eq!(download.offset, 7);
        assert_eq!(read_download(download).await, b"789");
    }

    #[tokio::test]
    async fn test_append_extends_file() {
        let (_dir, driver) = test_driver("get,put", false);
        driver.put_file("log", body(b"one,"), false).await.unwrap();
        driver.put_file("log", body(b"two"), true).await.unwrap();
        let download = driver.get_file("log", 0).await.unwrap();
        assert_eq!(read_download(download).await, b"one,two");
    }

    #[tokio::test]
    async fn test_overwrite_truncates() {
        let (_dir, driver) = test_driver("get,put", false);
        driver.put_file("f", body(b"a long first version"), false).await.unwrap();
        driver.put_file("f", body(b"short"), false).await.unwrap();
        let download = driver.get_file("f", 0).await.unwrap();
        assert_eq!(read_download(download).await, b"short");
    }

    #[tokio::test]
    async fn test_no_overwrite() {
        let (_dir, driver) = test_driver("put", true);
        driver.put_file("f", body(b"v1"), false).await.unwrap();
        assert!(matches!(
            driver.put_file("f", body(b"v2"), false).await,
            Err(DriverError::OverwriteForbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_lifecycle() {
        let (dir, driver) = test_driver("cd,ls,mkdir,rmdir,put", false);
        driver.make_dir("/a/b").await.unwrap();
        driver.change_dir("/a/b").await.unwrap();
        driver.put_file("/a/b/f.txt", body(b"xyz"), false).await.unwrap();

        let mut names = Vec::new();
        driver
            .list_dir("/a", &mut |meta: &ObjectMetadata| -> anyhow::Result<()> {
                names.push((meta.name.clone(), meta.is_prefix));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(names, vec![("b".to_string(), true)]);

        driver.delete_dir("/a").await.unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_change_dir_requires_directory() {
        let (_dir, driver) = test_driver("cd,put", false);
        driver.put_file("f", body(b"x"), false).await.unwrap();
        assert!(matches!(
            driver.change_dir("f").await,
            Err(DriverError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            driver.change_dir("missing").await,
            Err(DriverError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename() {
        let (dir, driver) = test_driver("mv,put", false);
        driver.put_file("old", body(b"x"), false).await.unwrap();
        driver.rename("/old", "/new").await.unwrap();
        assert!(dir.path().join("new").exists());
        assert!(!dir.path().join("old").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_file() {
        let (_dir, driver) = test_driver("rm", false);
        assert!(matches!(
            driver.delete_file("ghost").await,
            Err(DriverError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stat() {
        let (_dir, driver) = test_driver("put,mkdir", false);
        driver.put_file("f", body(b"abcd"), false).await.unwrap();
        driver.make_dir("d").await.unwrap();

        let file = driver.stat("/f").await.unwrap();
        assert_eq!(file.size, 4);
        assert!(!file.is_prefix);

        let dir = driver.stat("/d").await.unwrap();
        assert!(dir.is_prefix);

        assert!(matches!(
            driver.stat("/nope").await,
            Err(DriverError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, driver) = test_driver("get,put,rmdir", false);
        for path in ["../etc/passwd", "/a/../../b"] {
            assert!(matches!(
                driver.get_file(path, 0).await,
                Err(DriverError::BackendError { ref code, .. }) if code == "InvalidPath"
            ));
        }
        assert!(driver.delete_dir("/").await.is_err());
    }

    #[tokio::test]
    async fn test_gates_apply() {
        let (_dir, driver) = test_driver("ls", false);
        assert!(matches!(
            driver.make_dir("d").await,
            Err(DriverError::OperationNotEnabled { op: "MKDIR" })
        ));
        assert!(matches!(
            driver.put_file("f", body(b"x"), false).await,
            Err(DriverError::OperationNotEnabled { op: "PUT" })
        ));
    }

    #[tokio::test]
    async fn test_transfers_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = RecordingSender::new();
        let driver = FsDriver::new(
            DriverSettings {
                features: FeatureFlags::parse("get,put").unwrap(),
                no_overwrite: false,
            },
            Arc::new(dir.path().to_path_buf()),
            metrics.clone(),
        );
        driver.put_file("f", body(b"12345"), false).await.unwrap();
        let download = driver.get_file("f", 2).await.unwrap();
        read_download(download).await;
        assert_eq!(metrics.reports(), vec![("PUT", 5), ("GET", 3)]);
    }
}
