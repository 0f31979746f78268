//! Configuration loading and types for f3.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct. Command-line flags and environment variables
//! override individual fields afterwards (see `main.rs`). Each subsection
//! governs a different part of the system: the listen address handed to the
//! protocol engine, driver policy, the storage backend, telemetry and
//! logging.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::factory::{BackendKind, FactoryConfig};

/// Port used when the listen address does not name one.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Driver policy.
    #[serde(default)]
    pub driver: DriverConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Transfer telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `host[:port]` the protocol engine binds.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Which operations sessions may perform.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Comma-separated feature list: cd, ls, rmdir, rm, mv, mkdir, get, put.
    #[serde(default = "default_features")]
    pub features: String,

    /// Refuse to replace existing objects.
    #[serde(default)]
    pub no_overwrite: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            features: default_features(),
            no_overwrite: false,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: "s3", "memory" or "fs".
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Virtual-hosted bucket URL, e.g. `https://my-bucket.s3.example.com`.
    #[serde(default)]
    pub bucket_url: String,

    /// `access_key:secret_key`.
    #[serde(default)]
    pub credentials: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Address the bucket as `endpoint/bucket`.
    #[serde(default)]
    pub path_style: bool,

    /// Enforce no-overwrite with create-only puts (`If-None-Match: *`).
    #[serde(default)]
    pub conditional_writes: bool,

    /// Root directory for the "fs" backend.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket_url: String::new(),
            credentials: String::new(),
            region: default_region(),
            path_style: false,
            conditional_writes: false,
            root_dir: default_root_dir(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Report transfers. When off a no-op sink is used.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hostname label; detected when unset.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Serve Prometheus metrics on this `ip:port`.
    #[serde(default)]
    pub prometheus_listen: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: None,
            prometheus_listen: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Translate into the factory's input, validating backend-specific
    /// settings that serde cannot.
    pub fn to_factory_config(&self) -> anyhow::Result<FactoryConfig> {
        let backend = match self.storage.backend.as_str() {
            "s3" => BackendKind::S3,
            "memory" => BackendKind::Memory,
            "fs" => BackendKind::Fs {
                root: PathBuf::from(&self.storage.root_dir),
            },
            other => bail!("unknown storage.backend '{other}' (expected s3, memory or fs)"),
        };

        let prometheus_listen = self
            .telemetry
            .prometheus_listen
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("invalid telemetry.prometheus_listen '{addr}'"))
            })
            .transpose()?;

        Ok(FactoryConfig {
            features: self.driver.features.clone(),
            no_overwrite: self.driver.no_overwrite,
            backend,
            store_credentials: self.storage.credentials.clone(),
            bucket_url: self.storage.bucket_url.clone(),
            region: self.storage.region.clone(),
            path_style: self.storage.path_style,
            conditional_writes: self.storage.conditional_writes,
            telemetry_enabled: self.telemetry.enabled,
            hostname: self.telemetry.hostname.clone(),
            prometheus_listen,
        })
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:21".to_string()
}

fn default_features() -> String {
    crate::features::DEFAULT_FEATURE_SET.to_string()
}

fn default_storage_backend() -> String {
    "s3".to_string()
}

fn default_region() -> String {
    crate::bucket::DEFAULT_REGION.to_string()
}

fn default_root_dir() -> String {
    "./data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Split a `host[:port]` listen address. The port defaults to 21.
///
/// Bracketed IPv6 hosts (`[::1]:2121`) are accepted.
pub fn split_listen_addr(addr: &str) -> anyhow::Result<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        bail!("listen address is empty");
    }

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .with_context(|| format!("unterminated IPv6 host in '{addr}'"))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => bail!("unexpected '{tail}' after IPv6 host in '{addr}'"),
            },
        }
    } else {
        match addr.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    };

    if host.is_empty() {
        bail!("listen address '{addr}' has no host");
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .with_context(|| format!("invalid port in listen address '{addr}'"))?,
        None => DEFAULT_FTP_PORT,
    };
    Ok((host.to_string(), port))
}

// -- Tests -------------------------------------------------------------------
