//! Object storage backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over the bucket the
//! object-store driver talks to. Implementations exist for S3-compatible
//! services and for an in-process map.

pub mod aws;
pub mod backend;
pub mod memory;
