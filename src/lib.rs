//! f3 library: an FTP-facing driver layer over object storage.
//!
//! An FTP protocol engine authenticates users against [`credentials`] and
//! obtains one [`driver::Driver`] per session from a
//! [`factory::DriverFactory`]. The driver translates file operations into
//! object store requests through [`storage`], enforcing the operation
//! allow-list in [`features`] and reporting transfers to [`telemetry`].

pub mod bucket;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod errors;
pub mod factory;
pub mod features;
pub mod logging;
pub mod storage;
pub mod telemetry;

pub use driver::{Driver, ObjectMetadata};
pub use errors::DriverError;
pub use factory::{DriverFactory, FactoryConfig};
pub use features::{Feature, FeatureFlags};
