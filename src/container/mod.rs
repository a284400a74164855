//! Container build orchestration
//!
//! Builds the isolated build image from a source snapshot, extracts every
//! configured target's output, and guarantees teardown of the container
//! instance and the image on every exit path. The only inputs the build
//! may vary on are the injected [`BuildFacts`]; wall-clock time and random
//! identifiers never reach the container.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::config::ReleaseConfig;
use crate::signal::CancelFlag;
use crate::snapshot::SourceSnapshot;
use crate::version::Revision;

/// Container orchestration errors
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("no container engine found (tried podman, docker)")]
    MissingToolchain,

    #[error("container build failed with {status}")]
    BuildFailed { status: std::process::ExitStatus },

    #[error("build output missing for target {target}: {path} not present in image")]
    ExtractionFailed { target: String, path: String },

    #[error("{engine} {action} failed: {detail}")]
    CommandFailed {
        engine: String,
        action: String,
        detail: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Environment facts injected into the container build; the only
/// permitted revision-dependent inputs.
#[derive(Debug, Clone)]
pub struct BuildFacts {
    /// Unix seconds of the commit; exported as SOURCE_DATE_EPOCH
    pub commit_time: i64,

    /// Full commit id
    pub revision: String,

    /// Resolved release version
    pub version: String,
}

impl BuildFacts {
    pub fn new(revision: &Revision, version: &str) -> Self {
        Self {
            commit_time: revision.commit_time,
            revision: revision.commit.clone(),
            version: version.to_string(),
        }
    }

    /// `--build-arg` values for the image build
    pub fn build_args(&self) -> Vec<String> {
        vec![
            format!("SOURCE_DATE_EPOCH={}", self.commit_time),
            format!("RELEASE_COMMIT={}", self.revision),
            format!("RELEASE_VERSION={}", self.version),
        ]
    }
}

/// Container engine driving the isolated build
#[derive(Debug, Clone)]
pub struct Engine {
    program: String,
}

impl Engine {
    /// Probe for a usable engine before any container work begins.
    /// podman is preferred; docker is the fallback.
    pub fn detect(preferred: Option<&str>) -> ContainerResult<Self> {
        let candidates: Vec<&str> = match preferred {
            Some(program) => vec![program],
            None => vec!["podman", "docker"],
        };

        for program in candidates {
            let probe = Command::new(program)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if matches!(probe, Ok(status) if status.success()) {
                return Ok(Self {
                    program: program.to_string(),
                });
            }
        }

        Err(ContainerError::MissingToolchain)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run an engine subcommand, capturing output
    fn run(&self, action: &str, args: &[&str]) -> ContainerResult<()> {
        let output = Command::new(&self.program).args(args).output()?;
        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                engine: self.program.clone(),
                action: action.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Binaries and documentation produced for one target; owned by the
/// orchestrator until handed to the packager, read-only thereafter.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub target: String,
    pub root: PathBuf,
}

/// Removes the extraction container when dropped. Teardown is a
/// resource-lifetime contract: it runs on success and failure alike.
struct ContainerGuard<'e> {
    engine: &'e Engine,
    name: String,
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        // Best effort; the container may already be gone
        let _ = Command::new(self.engine.program())
            .args(["rm", "--force", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Removes the build image when dropped
struct ImageGuard<'e> {
    engine: &'e Engine,
    tag: String,
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        let _ = Command::new(self.engine.program())
            .args(["rmi", "--force", &self.tag])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Drives the isolated build environment for one release
pub struct BuildOrchestrator<'a> {
    engine: Engine,
    config: &'a ReleaseConfig,
    facts: BuildFacts,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(engine: Engine, config: &'a ReleaseConfig, facts: BuildFacts) -> Self {
        Self {
            engine,
            config,
            facts,
        }
    }

    /// Image tag, unique per version and never random
    pub fn image_tag(&self) -> String {
        format!("{}-build:{}", self.config.product, self.facts.version)
    }

    /// Build the image with the snapshot as the entire build context.
    /// Streaming the snapshot on stdin keeps untracked files out of the
    /// context even when the working tree is dirty.
    pub fn build_image(&self, snapshot: &SourceSnapshot) -> ContainerResult<String> {
        let tag = self.image_tag();

        if self.config.verbose {
            eprintln!(
                "building image {} with {} ({} byte snapshot)",
                tag,
                self.engine.program(),
                snapshot.tar_bytes.len()
            );
        }

        let mut cmd = Command::new(self.engine.program());
        cmd.arg("build")
            .arg("--file")
            .arg(&self.config.containerfile)
            .args(["--tag", tag.as_str()]);
        for arg in self.facts.build_args() {
            cmd.args(["--build-arg", arg.as_str()]);
        }
        cmd.arg("-").stdin(Stdio::piped());

        let mut child = cmd.spawn()?;
        {
            let mut stdin = child.stdin.take().ok_or_else(|| ContainerError::CommandFailed {
                engine: self.engine.program().to_string(),
                action: "build".to_string(),
                detail: "stdin unavailable".to_string(),
            })?;
            stdin.write_all(&snapshot.tar_bytes)?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(ContainerError::BuildFailed { status });
        }

        Ok(tag)
    }

    /// Extract every configured target's output from the built image into
    /// `dest/<target>`. The container and the image are removed before
    /// this returns, whatever the outcome.
    pub fn extract_outputs(
        &self,
        image: &str,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> ContainerResult<Vec<BuildOutput>> {
        let _image = ImageGuard {
            engine: &self.engine,
            tag: image.to_string(),
        };

        let name = format!("{}-extract-{}", self.config.product, self.facts.version);
        // A created (never started) container is enough: only the image
        // filesystem is read
        self.engine
            .run("create", &["create", "--name", &name, image])?;
        let _container = ContainerGuard {
            engine: &self.engine,
            name: name.clone(),
        };

        fs::create_dir_all(dest)?;

        let mut outputs = Vec::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            if cancel.is_cancelled() {
                return Err(ContainerError::Cancelled);
            }

            let image_path = format!("{}/{}", self.config.image_output_root, target);
            let src = format!("{}:{}", name, image_path);

            if self.config.verbose {
                eprintln!("extracting {} from {}", target, src);
            }

            let status = Command::new(self.engine.program())
                .arg("cp")
                .arg(&src)
                .arg(dest)
                .stdout(Stdio::null())
                .status()?;
            if !status.success() {
                return Err(ContainerError::ExtractionFailed {
                    target: target.clone(),
                    path: image_path,
                });
            }

            outputs.push(BuildOutput {
                target: target.clone(),
                root: dest.join(target),
            });
        }

        Ok(outputs)
    }

    /// Build the image and extract all target outputs
    pub fn run(
        &self,
        snapshot: &SourceSnapshot,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> ContainerResult<Vec<BuildOutput>> {
        if cancel.is_cancelled() {
            return Err(ContainerError::Cancelled);
        }
        let image = self.build_image(snapshot)?;
        self.extract_outputs(&image, dest, cancel)
    }
}
