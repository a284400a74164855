//! Shipwright - reproducible build and release-signing pipeline
//!
//! Takes a source revision, builds statically linked binaries for a fixed
//! set of platform targets inside a controlled container environment,
//! packages them into deterministic `.tar.xz` archives, computes SHA-256
//! checksums, produces detached Ed25519 signatures, and publishes the
//! signed artifacts to a release host with atomic `latest` promotion.

pub mod config;
pub mod container;
pub mod integrity;
pub mod manifest;
pub mod package;
pub mod pipeline;
pub mod publish;
pub mod signal;
pub mod snapshot;
pub mod version;

pub use config::ReleaseConfig;
pub use pipeline::{BuiltRelease, Pipeline, PipelineError};
pub use version::VersionMode;
