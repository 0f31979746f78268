//! Error types for the driver adapter.
//!
//! [`DriverError`] is the taxonomy surfaced to the protocol engine. Every
//! variant carries a stable code (see [`DriverError::code`]) that the engine
//! maps onto a client-visible reply. [`StoreError`] is the narrower error
//! returned by [`crate::storage::backend::ObjectStore`] implementations.

use thiserror::Error;

/// Errors surfaced by feature parsing, factory construction and driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The feature specification was empty or contained an unknown token.
    #[error("invalid feature spec: {reason}")]
    InvalidFeatureSpec { reason: String },

    /// The credential source contained no `username:password` pair.
    #[error("no credentials found")]
    NoCredentialsFound,

    /// Username/password pair did not match the credential store.
    #[error("authentication failed for user {username:?}")]
    AuthenticationFailed { username: String },

    /// The bucket URL is not of the form `scheme://bucket.host[...]`.
    #[error("not a fully qualified bucket URL (e.g. 'https://bucket.host.domain'): {url:?}")]
    MalformedBucketURL { url: String },

    /// The backend credentials are not of the form `access_key:secret_key`.
    #[error("malformed store credentials, not in format 'access_key:secret_key'")]
    MalformedStoreCredentials,

    /// The capability guarding this operation is absent from the feature flags.
    #[error("{op:?} is not enabled")]
    OperationNotEnabled { op: &'static str },

    /// The backend has no faithful equivalent for this operation.
    #[error("{op:?} is not supported by the object store backend")]
    OperationNotSupported { op: &'static str },

    /// Append mode was requested but the backend cannot append.
    #[error("can not append to {key:?} because the backend does not support appending")]
    AppendNotSupported { key: String },

    /// The no-overwrite policy is active and the object already exists.
    #[error("object {key:?} already exists and overwriting is forbidden")]
    OverwriteForbidden { key: String },

    /// The requested object does not exist.
    #[error("object {key:?} not found")]
    ObjectNotFound { key: String },

    /// Any other backend-reported failure.
    #[error("backend error {code}: {message}")]
    BackendError { code: String, message: String },

    /// Reading or writing the transfer stream failed.
    #[error("transfer failed: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            DriverError::InvalidFeatureSpec { .. } => "InvalidFeatureSpec",
            DriverError::NoCredentialsFound => "NoCredentialsFound",
            DriverError::AuthenticationFailed { .. } => "AuthenticationFailed",
            DriverError::MalformedBucketURL { .. } => "MalformedBucketURL",
            DriverError::MalformedStoreCredentials => "MalformedStoreCredentials",
            DriverError::OperationNotEnabled { .. } => "OperationNotEnabled",
            DriverError::OperationNotSupported { .. } => "OperationNotSupported",
            DriverError::AppendNotSupported { .. } => "AppendNotSupported",
            DriverError::OverwriteForbidden { .. } => "OverwriteForbidden",
            DriverError::ObjectNotFound { .. } => "ObjectNotFound",
            DriverError::BackendError { .. } => "BackendError",
            DriverError::Io(_) => "TransferFailed",
        }
    }

    /// Whether this error was raised while constructing a factory, as opposed
    /// to during a single driver operation.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            DriverError::InvalidFeatureSpec { .. }
                | DriverError::NoCredentialsFound
                | DriverError::MalformedBucketURL { .. }
                | DriverError::MalformedStoreCredentials
        )
    }

    /// Translate a store error for the object at `key`.
    pub fn from_store(key: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DriverError::ObjectNotFound {
                key: key.to_string(),
            },
            StoreError::AlreadyExists => DriverError::OverwriteForbidden {
                key: key.to_string(),
            },
            StoreError::Backend { code, message } => DriverError::BackendError { code, message },
        }
    }
}

/// Errors reported by an object store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No object exists under the key.
    #[error("not found")]
    NotFound,

    /// A create-only write found an existing object.
    #[error("object already exists")]
    AlreadyExists,

    /// Any other failure, with the backend's code and message.
    #[error("{code}: {message}")]
    Backend { code: String, message: String },
}

impl StoreError {
    /// Build a [`StoreError::Backend`] from a code and anything displayable.
    pub fn backend(code: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StoreError::Backend {
            code: code.into(),
            message: message.to_string(),
        }
    }
}

// -- Tests --------------------------------------------------------------------
