//! Release publication
//!
//! Uploads a finished release to the remote store under a version-scoped
//! path, then promotes the convenience aliases. Aliasing happens only
//! after every upload for the version has succeeded, and `latest` is the
//! final atomic step, so it never points at a partial release.

pub mod remote;

pub use remote::{MockRemote, Remote, RemoteError, SshRemote};

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::integrity::companion_path;
use crate::manifest::RELEASE_MANIFEST_NAME;
use crate::package::archive_file_name;

/// Publication errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("artifact missing for target {target}: {path}")]
    MissingArtifact { target: String, path: PathBuf },

    #[error("release descriptor missing: {path}")]
    MissingManifest { path: PathBuf },
}

/// Result type for publication
pub type PublishResult<T> = Result<T, PublishError>;

/// Publishes finished releases to a [`Remote`]
pub struct Publisher<'a, R: Remote> {
    remote: &'a R,
    product: &'a str,
    verbose: bool,
}

impl<'a, R: Remote> Publisher<'a, R> {
    pub fn new(remote: &'a R, product: &'a str) -> Self {
        Self {
            remote,
            product,
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The archive/checksum/signature file names for one target
    fn triple(&self, version: &str, target: &str) -> [String; 3] {
        let archive = archive_file_name(self.product, version, target);
        [
            archive.clone(),
            format!("{}.sha256", archive),
            format!("{}.sig", archive),
        ]
    }

    /// Upload the versioned artifact set, then promote aliases.
    ///
    /// `local_dir` holds the artifacts for `version`; `targets` is the
    /// full configured target set. Each alias points at the versioned
    /// file so older releases stay addressable after promotion.
    pub fn publish(
        &self,
        version: &str,
        local_dir: &Path,
        targets: &[String],
    ) -> PublishResult<()> {
        // Every upload must land before any alias moves
        for target in targets {
            for name in self.triple(version, target) {
                let local = local_dir.join(&name);
                if !local.is_file() {
                    return Err(PublishError::MissingArtifact {
                        target: target.clone(),
                        path: local,
                    });
                }
                if self.verbose {
                    eprintln!("uploading {}/{}", version, name);
                }
                self.remote.upload(&local, &format!("{}/{}", version, name))?;
            }
        }

        let manifest = local_dir.join(RELEASE_MANIFEST_NAME);
        if !manifest.is_file() {
            return Err(PublishError::MissingManifest { path: manifest });
        }
        self.remote.upload(
            &manifest,
            &format!("{}/{}", version, RELEASE_MANIFEST_NAME),
        )?;

        // Per-target aliases next, each an atomic replacement
        for target in targets {
            let archive = archive_file_name(self.product, version, target);
            for suffix in ["", ".sha256", ".sig"] {
                let alias = format!("{}-{}.tar.xz{}", self.product, target, suffix);
                let versioned = format!("{}/{}{}", version, archive, suffix);
                if self.verbose {
                    eprintln!("aliasing {} -> {}", alias, versioned);
                }
                self.remote.symlink_atomic(&versioned, &alias)?;
            }
        }

        // `latest` moves last; a failure anywhere above leaves the
        // previous release as the valid head
        self.remote.symlink_atomic(version, "latest")?;

        Ok(())
    }
}

/// Local artifact paths expected for one (version, target)
pub fn expected_artifacts(
    product: &str,
    version: &str,
    target: &str,
    local_dir: &Path,
) -> [PathBuf; 3] {
    let archive = local_dir.join(archive_file_name(product, version, target));
    let sha256 = companion_path(&archive, "sha256");
    let sig = companion_path(&archive, "sig");
    [archive, sha256, sig]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn stage_release(dir: &Path, version: &str, targets: &[&str]) {
        for target in targets {
            let archive = archive_file_name("product", version, target);
            fs::write(dir.join(&archive), format!("bytes-{}", target)).unwrap();
            fs::write(dir.join(format!("{}.sha256", archive)), "digest\n").unwrap();
            fs::write(dir.join(format!("{}.sig", archive)), "signature\n").unwrap();
        }
        fs::write(dir.join(RELEASE_MANIFEST_NAME), "{}").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_publish_layout_and_aliases() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local");
        fs::create_dir_all(&local).unwrap();
        stage_release(&local, "2.1.0", &["t1", "t2"]);

        let remote = MockRemote::new(dir.path().join("store"));
        let publisher = Publisher::new(&remote, "product");
        let targets = vec!["t1".to_string(), "t2".to_string()];
        publisher.publish("2.1.0", &local, &targets).unwrap();

        let root = remote.root();
        // Versioned layout
        assert!(root.join("2.1.0/product-2.1.0-t1.tar.xz").is_file());
        assert!(root.join("2.1.0/product-2.1.0-t2.tar.xz.sig").is_file());
        assert!(root.join("2.1.0/release.json").is_file());

        // Per-target aliases resolve to the versioned bytes
        let via_alias = fs::read(root.join("product-t1.tar.xz")).unwrap();
        let versioned = fs::read(root.join("2.1.0/product-2.1.0-t1.tar.xz")).unwrap();
        assert_eq!(via_alias, versioned);

        // latest resolves to the versioned directory
        assert_eq!(
            fs::read_link(root.join("latest")).unwrap(),
            Path::new("2.1.0")
        );
        assert!(root.join("latest/release.json").is_file());
    }

    #[test]
    fn test_missing_artifact_fails_before_upload() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local");
        fs::create_dir_all(&local).unwrap();
        // No artifacts staged at all

        let remote = MockRemote::new(dir.path().join("store"));
        let publisher = Publisher::new(&remote, "product");
        let targets = vec!["t1".to_string()];

        let result = publisher.publish("2.1.0", &local, &targets);
        assert!(matches!(result, Err(PublishError::MissingArtifact { .. })));
        assert_eq!(remote.upload_count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_upload_never_promotes_latest() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local");
        fs::create_dir_all(&local).unwrap();
        stage_release(&local, "2.1.0", &["t1", "t2"]);

        // Seed the store with a previous release as the current head
        let store = dir.path().join("store");
        fs::create_dir_all(store.join("2.0.0")).unwrap();
        let seed = MockRemote::new(store.clone());
        seed.symlink_atomic("2.0.0", "latest").unwrap();

        // Fail partway through the uploads for 2.1.0
        let remote = MockRemote::failing_after(store.clone(), 2);
        let publisher = Publisher::new(&remote, "product");
        let targets = vec!["t1".to_string(), "t2".to_string()];

        let result = publisher.publish("2.1.0", &local, &targets);
        assert!(matches!(
            result,
            Err(PublishError::Remote(RemoteError::Transport(_)))
        ));

        // The previous release is still the valid head
        assert_eq!(
            fs::read_link(store.join("latest")).unwrap(),
            Path::new("2.0.0")
        );
        // And no alias was repointed at the new version
        assert!(store.join("product-t1.tar.xz").symlink_metadata().is_err());
    }

    #[test]
    fn test_expected_artifacts_naming() {
        let dir = Path::new("/tmp/out/2.1.0");
        let [archive, sha256, sig] = expected_artifacts("product", "2.1.0", "t1", dir);
        assert_eq!(
            archive,
            Path::new("/tmp/out/2.1.0/product-2.1.0-t1.tar.xz")
        );
        assert_eq!(
            sha256,
            Path::new("/tmp/out/2.1.0/product-2.1.0-t1.tar.xz.sha256")
        );
        assert_eq!(sig, Path::new("/tmp/out/2.1.0/product-2.1.0-t1.tar.xz.sig"));
    }
}
