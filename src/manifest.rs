//! Release descriptor
//!
//! `release.json` summarizes a finished release: product, version,
//! revision, and the per-target artifact entries. Serialized as canonical
//! JSON (RFC 8785) so the descriptor bytes are as reproducible as the
//! archives they describe.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::version::Revision;

/// Schema version for release.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "shipwright/release@1";

/// File name of the descriptor inside the versioned release directory
pub const RELEASE_MANIFEST_NAME: &str = "release.json";

/// One target's artifact triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    /// Platform triple
    pub target: String,

    /// Archive file name
    pub artifact: String,

    /// Hex SHA-256 digest of the archive bytes
    pub sha256: String,

    /// Detached signature file name
    pub signature: String,
}

/// Descriptor for one published release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Product name
    pub product: String,

    /// Release version
    pub version: String,

    /// Full commit id the release was built from
    pub revision: String,

    /// Commit time in unix seconds
    pub commit_time: i64,

    /// Per-target artifacts, in configured target order
    pub artifacts: Vec<ReleaseEntry>,
}

impl ReleaseManifest {
    pub fn new(product: &str, version: &str, revision: &Revision) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            product: product.to_string(),
            version: version.to_string(),
            revision: revision.commit.clone(),
            commit_time: revision.commit_time,
            artifacts: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: ReleaseEntry) {
        self.artifacts.push(entry);
    }

    /// Canonical JSON bytes (JCS); stable across runs for the same release
    pub fn to_canonical_json(&self) -> io::Result<Vec<u8>> {
        serde_json_canonicalizer::to_vec(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Write the descriptor into `dir`
    pub fn write_to_dir(&self, dir: &Path) -> io::Result<()> {
        let bytes = self.to_canonical_json()?;
        fs::write(dir.join(RELEASE_MANIFEST_NAME), bytes)
    }

    /// Load a descriptor from `dir`
    pub fn from_dir(dir: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(dir.join(RELEASE_MANIFEST_NAME))?;
        serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
