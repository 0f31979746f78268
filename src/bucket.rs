//! Bucket identity and backend credentials.
//!
//! A bucket is configured by its virtual-hosted URL, e.g.
//! `https://my-bucket.s3.example.com`. The first DNS label of the host is the
//! bucket name; the scheme plus the rest of the host is the service endpoint.

use std::fmt;

use url::Url;

use crate::errors::DriverError;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "custom";

/// Where the bucket lives and how to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketIdentity {
    /// Bucket name (first DNS label of the URL host).
    pub name: String,
    /// Service endpoint, e.g. `https://s3.example.com`.
    pub endpoint: String,
    /// Backend region.
    pub region: String,
    /// Address the bucket as `endpoint/bucket` instead of `bucket.endpoint`.
    pub path_style: bool,
    url: Url,
}

impl BucketIdentity {
    /// Parse a bucket URL.
    pub fn parse(bucket_url: &str, region: &str, path_style: bool) -> Result<Self, DriverError> {
        let malformed = || DriverError::MalformedBucketURL {
            url: bucket_url.to_string(),
        };

        let url = Url::parse(bucket_url.trim()).map_err(|_| malformed())?;
        let host = url.host_str().ok_or_else(malformed)?;
        let (name, rest) = host.split_once('.').ok_or_else(malformed)?;
        if name.is_empty() || rest.is_empty() {
            return Err(malformed());
        }

        let endpoint = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), rest, port),
            None => format!("{}://{}", url.scheme(), rest),
        };

        Ok(Self {
            name: name.to_string(),
            endpoint,
            region: region.to_string(),
            path_style,
            url,
        })
    }

    /// Fully qualified URL of the object under `key`, used in log output.
    pub fn object_url(&self, key: &str) -> String {
        let mut url = self.url.clone();
        url.set_path(key);
        url.to_string()
    }
}

impl fmt::Display for BucketIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Static access-key/secret-key pair for the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl StoreCredentials {
    /// Parse `access_key:secret_key`. Exactly two non-empty fields are required.
    pub fn parse(pair: &str) -> Result<Self, DriverError> {
        let fields: Vec<&str> = pair.trim().split(':').collect();
        match fields.as_slice() {
            [access, secret] if !access.is_empty() && !secret.is_empty() => Ok(Self {
                access_key: access.to_string(),
                secret_key: secret.to_string(),
            }),
            _ => Err(DriverError::MalformedStoreCredentials),
        }
    }
}

// -- Tests --------------------------------------------------------------------
