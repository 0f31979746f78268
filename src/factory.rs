//! Driver construction.
//!
//! [`DriverFactory::build`] validates everything that can be validated up
//! front (feature list, bucket URL, store credentials), creates the backend
//! client and the telemetry sink once, and then hands out cheap per-session
//! drivers from [`DriverFactory::new_driver`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::bucket::{BucketIdentity, StoreCredentials, DEFAULT_REGION};
use crate::driver::{Driver, DriverSettings, FsDriver, ObjectStoreDriver};
use crate::errors::DriverError;
use crate::features::{FeatureFlags, DEFAULT_FEATURE_SET};
use crate::storage::aws::S3ObjectStore;
use crate::storage::backend::ObjectStore;
use crate::storage::memory::MemoryObjectStore;
use crate::telemetry::{self, MetricsSender};

/// Bucket URL assumed by the memory backend when none is configured.
pub const MEMORY_BUCKET_URL: &str = "memory://f3.local";

/// Which storage the drivers talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// An S3-compatible bucket.
    S3,
    /// An in-process bucket; contents vanish with the process.
    Memory,
    /// A local directory tree.
    Fs { root: PathBuf },
}

/// Everything the factory needs to build drivers.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Comma-separated feature list, e.g. `"ls,get,put"`.
    pub features: String,
    pub no_overwrite: bool,
    pub backend: BackendKind,
    /// `access_key:secret_key` for the bucket.
    pub store_credentials: String,
    pub bucket_url: String,
    pub region: String,
    pub path_style: bool,
    /// Use create-only puts for the no-overwrite policy.
    pub conditional_writes: bool,
    pub telemetry_enabled: bool,
    /// Hostname label for telemetry; detected when unset.
    pub hostname: Option<String>,
    /// Serve Prometheus metrics on this address.
    pub prometheus_listen: Option<SocketAddr>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            features: DEFAULT_FEATURE_SET.to_string(),
            no_overwrite: false,
            backend: BackendKind::S3,
            store_credentials: String::new(),
            bucket_url: String::new(),
            region: DEFAULT_REGION.to_string(),
            path_style: false,
            conditional_writes: false,
            telemetry_enabled: true,
            hostname: None,
            prometheus_listen: None,
        }
    }
}

enum Target {
    Bucket {
        bucket: Arc<BucketIdentity>,
        store: Arc<dyn ObjectStore>,
    },
    Directory {
        root: Arc<PathBuf>,
    },
}

/// Immutable configuration shared by every driver it creates.
pub struct DriverFactory {
    settings: DriverSettings,
    target: Target,
    metrics: Arc<dyn MetricsSender>,
}

impl DriverFactory {
    /// Validate `config` and create the shared backend client.
    ///
    /// Steps run in a fixed order so the first configuration problem is the
    /// one reported: feature list, bucket URL, store credentials, client,
    /// telemetry sink.
    pub async fn build(config: &FactoryConfig) -> Result<Self, DriverError> {
        let features = FeatureFlags::parse(&config.features).inspect_err(|e| {
            error!(features = %config.features, error = %e, "Invalid feature list");
        })?;
        let settings = DriverSettings {
            features,
            no_overwrite: config.no_overwrite,
        };

        let target = match &config.backend {
            BackendKind::S3 => {
                let bucket =
                    BucketIdentity::parse(&config.bucket_url, &config.region, config.path_style)?;
                let credentials = StoreCredentials::parse(&config.store_credentials)?;
                let store =
                    S3ObjectStore::new(&bucket, &credentials, config.conditional_writes).await;
                Target::Bucket {
                    bucket: Arc::new(bucket),
                    store: Arc::new(store),
                }
            }
            BackendKind::Memory => {
                let url = if config.bucket_url.trim().is_empty() {
                    MEMORY_BUCKET_URL
                } else {
                    config.bucket_url.as_str()
                };
                let bucket = BucketIdentity::parse(url, &config.region, config.path_style)?;
                Target::Bucket {
                    bucket: Arc::new(bucket),
                    store: Arc::new(MemoryObjectStore::new()),
                }
            }
            BackendKind::Fs { root } => Target::Directory {
                root: Arc::new(root.clone()),
            },
        };

        let metrics = if config.telemetry_enabled {
            if let Some(listen) = config.prometheus_listen {
                if let Err(e) = telemetry::install_prometheus(listen) {
                    error!(%listen, error = %e, "Prometheus exporter unavailable");
                }
            }
            let hostname = config.hostname.clone().unwrap_or_else(telemetry::hostname);
            telemetry::build_sender(true, hostname)
        } else {
            telemetry::build_sender(false, String::new())
        };

        info!(
            features = %settings.features,
            no_overwrite = settings.no_overwrite,
            telemetry = config.telemetry_enabled,
            "Driver factory ready"
        );

        Ok(Self {
            settings,
            target,
            metrics,
        })
    }

    /// Factory over an already constructed object store.
    pub fn with_object_store(
        settings: DriverSettings,
        bucket: BucketIdentity,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricsSender>,
    ) -> Self {
        Self {
            settings,
            target: Target::Bucket {
                bucket: Arc::new(bucket),
                store,
            },
            metrics,
        }
    }

    /// Factory over a local directory.
    pub fn with_filesystem(
        settings: DriverSettings,
        root: impl Into<PathBuf>,
        metrics: Arc<dyn MetricsSender>,
    ) -> Self {
        Self {
            settings,
            target: Target::Directory {
                root: Arc::new(root.into()),
            },
            metrics,
        }
    }

    /// A driver for one session. Never touches the backend.
    pub fn new_driver(&self) -> Box<dyn Driver> {
        match &self.target {
            Target::Bucket { bucket, store } => Box::new(ObjectStoreDriver::new(
                self.settings,
                Arc::clone(bucket),
                Arc::clone(store),
                Arc::clone(&self.metrics),
            )),
            Target::Directory { root } => Box::new(FsDriver::new(
                self.settings,
                Arc::clone(root),
                Arc::clone(&self.metrics),
            )),
        }
    }

    pub fn settings(&self) -> DriverSettings {
        self.settings
    }

    /// The bucket drivers operate on, if the backend is an object store.
    pub fn bucket(&self) -> Option<&BucketIdentity> {
        match &self.target {
            Target::Bucket { bucket, .. } => Some(bucket.as_ref()),
            Target::Directory { .. } => None,
        }
    }

    /// Confirm the backend is reachable with the configured credentials.
    pub async fn verify_bucket(&self) -> Result<(), DriverError> {
        match &self.target {
            Target::Bucket { bucket, store } => {
                store.check_bucket().await.map_err(|e| {
                    error!(
                        bucket = %bucket.name,
                        endpoint = %bucket.endpoint,
                        error = %e,
                        "Bucket check failed"
                    );
                    DriverError::from_store(&bucket.name, e)
                })?;
                info!(bucket = %bucket.name, "Bucket is accessible");
                Ok(())
            }
            Target::Directory { root } => {
                let meta = tokio::fs::metadata(root.as_ref()).await?;
                if !meta.is_dir() {
                    return Err(DriverError::BackendError {
                        code: "NotADirectory".to_string(),
                        message: format!("{} is not a directory", root.display()),
                    });
                }
                info!(root = %root.display(), "Root directory is accessible");
                Ok(())
            }
        }
    }
}

// -- Tests -------------------------------------------------------------------
