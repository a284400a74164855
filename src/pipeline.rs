//! Pipeline orchestration
//!
//! Composes version resolution, snapshotting, the container build,
//! packaging, integrity, and publication with fail-fast semantics: the
//! first failing stage aborts the run, and partial output from an aborted
//! run is never an input to a later stage. Environment preconditions
//! (container engine, signing key) are checked before any build work
//! starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, ReleaseConfig};
use crate::container::{BuildFacts, BuildOrchestrator, ContainerError, Engine};
use crate::integrity::{self, ChecksumRecord, IntegrityError};
use crate::manifest::{ReleaseEntry, ReleaseManifest, RELEASE_MANIFEST_NAME};
use crate::package::{PackageError, Packager};
use crate::publish::{expected_artifacts, PublishError, Publisher, Remote, SshRemote};
use crate::signal::CancelFlag;
use crate::snapshot::{self, SnapshotError};
use crate::version::{self, Revision, VersionError, VersionMode};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("version resolution error: {0}")]
    Version(#[from] VersionError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("container build error: {0}")]
    Container(#[from] ContainerError),

    #[error("packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 1,
            PipelineError::Version(_) => 20,
            PipelineError::Snapshot(_) => 21,
            PipelineError::Container(ContainerError::MissingToolchain) => 10,
            PipelineError::Container(ContainerError::Cancelled) => 80,
            PipelineError::Container(_) => 30,
            PipelineError::Package(_) => 40,
            PipelineError::Integrity(IntegrityError::MissingKey { .. }) => 10,
            PipelineError::Integrity(_) => 50,
            PipelineError::Publish(_) => 60,
            PipelineError::Io(_) => 1,
            PipelineError::Cancelled => 80,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// One produced artifact triple
#[derive(Debug, Clone)]
pub struct BuiltArtifact {
    pub target: String,
    pub archive: PathBuf,
    pub checksum: ChecksumRecord,
    pub signature: PathBuf,
}

/// A finished local release, every target built, checksummed, signed and
/// self-verified
#[derive(Debug, Clone)]
pub struct BuiltRelease {
    pub version: String,
    pub revision: Revision,
    pub output_dir: PathBuf,
    pub artifacts: Vec<BuiltArtifact>,
}

/// Drives one release end to end
pub struct Pipeline {
    config: ReleaseConfig,
    cancel: Arc<CancelFlag>,
}

impl Pipeline {
    pub fn new(config: ReleaseConfig, cancel: Arc<CancelFlag>) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    fn check_cancelled(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Build, package, checksum and sign every configured target.
    ///
    /// Artifacts land under `<output_root>/<version>/`; the build outputs
    /// themselves are staged under `<output_root>/<version>/build/`.
    pub fn build(&self, mode: VersionMode) -> PipelineResult<BuiltRelease> {
        // Environment preconditions, before any build work
        let engine = Engine::detect(self.config.engine.as_deref())?;
        let key = integrity::load_signing_key(&self.config.signing_key_path())?;

        let revision = version::resolve_revision(&self.config.repo)?;
        let release_version = version::resolve_version(&self.config.repo, &revision, mode)?;

        if self.config.verbose {
            eprintln!(
                "building {} {} from revision {}",
                self.config.product, release_version, revision.short
            );
        }

        let source = snapshot::snapshot(&self.config.repo, &revision)?;
        let facts = BuildFacts::new(&revision, &release_version);

        let out_dir = self.config.output_root.join(&release_version);
        fs::create_dir_all(&out_dir)?;
        let stage_dir = out_dir.join("build");

        self.check_cancelled()?;
        let orchestrator = BuildOrchestrator::new(engine, &self.config, facts);
        let outputs = orchestrator.run(&source, &stage_dir, &self.cancel)?;

        let packager = Packager::new(
            &self.config.product,
            &release_version,
            revision.commit_time,
        )
        .with_xz_level(self.config.xz_level);

        let mut release_manifest =
            ReleaseManifest::new(&self.config.product, &release_version, &revision);
        let mut artifacts = Vec::with_capacity(outputs.len());

        for output in &outputs {
            self.check_cancelled()?;

            let archive = packager.package(output, &out_dir)?;
            let (record, _) = integrity::write_checksum(&archive)?;
            let signature = integrity::sign_archive(&archive, &key)?;

            if self.config.verbose {
                eprintln!("packaged {} ({})", record.file_name, output.target);
            }

            release_manifest.push(ReleaseEntry {
                target: output.target.clone(),
                artifact: record.file_name.clone(),
                sha256: record.sha256.clone(),
                signature: signature
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            });
            artifacts.push(BuiltArtifact {
                target: output.target.clone(),
                archive,
                checksum: record,
                signature,
            });
        }

        release_manifest.write_to_dir(&out_dir)?;

        Ok(BuiltRelease {
            version: release_version,
            revision,
            output_dir: out_dir,
            artifacts,
        })
    }

    /// Publish every configured target to the configured release host.
    ///
    /// The version must resolve strictly: a published release corresponds
    /// to a tag. An existing complete local release is revalidated and
    /// reused; anything else is built first.
    pub fn upload(&self) -> PipelineResult<BuiltRelease> {
        let remote = SshRemote::new(self.config.remote.clone()).map_err(PublishError::from)?;
        self.upload_to(&remote)
    }

    /// Publish against any remote; tests drive this with a mock store
    pub fn upload_to<R: Remote>(&self, remote: &R) -> PipelineResult<BuiltRelease> {
        let revision = version::resolve_revision(&self.config.repo)?;
        let release_version =
            version::resolve_version(&self.config.repo, &revision, VersionMode::Strict)?;
        let out_dir = self.config.output_root.join(&release_version);

        let release = if self.release_complete(&out_dir, &release_version) {
            self.reload_release(&out_dir, &release_version, revision)?
        } else {
            self.build(VersionMode::Strict)?
        };

        self.check_cancelled()?;

        let publisher =
            Publisher::new(remote, &self.config.product).with_verbose(self.config.verbose);
        publisher.publish(&release.version, &release.output_dir, &self.config.targets)?;

        Ok(release)
    }

    /// Whether every configured target's triple and the descriptor exist
    fn release_complete(&self, out_dir: &Path, version: &str) -> bool {
        out_dir.join(RELEASE_MANIFEST_NAME).is_file()
            && self.config.targets.iter().all(|target| {
                expected_artifacts(&self.config.product, version, target, out_dir)
                    .iter()
                    .all(|path| path.is_file())
            })
    }

    /// Revalidate an existing local release before publishing it.
    /// Partial or tampered output from an earlier run is never published:
    /// every checksum is recomputed and every signature verified against
    /// the public key.
    fn reload_release(
        &self,
        out_dir: &Path,
        version: &str,
        revision: Revision,
    ) -> PipelineResult<BuiltRelease> {
        let public = integrity::load_verifying_key(&self.config.public_key_path())?;

        let mut artifacts = Vec::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            let [archive, _, signature] =
                expected_artifacts(&self.config.product, version, target, out_dir);

            let record = integrity::verify_checksum(&archive)?;
            if !integrity::verify_archive(&archive, &signature, &public)? {
                return Err(PipelineError::Integrity(
                    IntegrityError::SelfVerificationFailed { path: archive },
                ));
            }

            artifacts.push(BuiltArtifact {
                target: target.clone(),
                archive,
                checksum: record,
                signature,
            });
        }

        Ok(BuiltRelease {
            version: version.to_string(),
            revision,
            output_dir: out_dir.to_path_buf(),
            artifacts,
        })
    }
}
