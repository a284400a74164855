//! Version and revision resolution
//!
//! Derives the immutable revision identity (commit id, short id, commit
//! time) and the release version from repository state. A release version
//! comes from an exact `v*` tag on the revision; without one, strict mode
//! fails and permissive mode synthesizes a deterministic build identifier
//! from the commit time, never from the wall clock.

use chrono::TimeZone;
use chrono::Utc;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Version resolution errors
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("git invocation failed: {0}")]
    Git(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no release tag on revision {revision}")]
    NoVersionTag { revision: String },

    #[error("resolved version for revision {revision} is empty")]
    EmptyVersion { revision: String },
}

/// Result type for version operations
pub type VersionResult<T> = Result<T, VersionError>;

/// Behavior when the revision carries no release tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMode {
    /// Fall back to a deterministic build identifier
    #[default]
    Permissive,
    /// Fail with [`VersionError::NoVersionTag`]
    Strict,
}

/// Immutable identity of the source state being built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Full commit id
    pub commit: String,

    /// Abbreviated commit id for display and fallback versions
    pub short: String,

    /// Commit time in unix seconds; the single timestamp every build
    /// input is stamped with
    pub commit_time: i64,
}

/// Run git in `repo` and return trimmed stdout
fn git_stdout(repo: &Path, args: &[&str]) -> VersionResult<String> {
    let output = Command::new("git").arg("-C").arg(repo).args(args).output()?;
    if !output.status.success() {
        return Err(VersionError::Git(format!(
            "git {}: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Resolve the revision at HEAD. Computed once per pipeline run.
pub fn resolve_revision(repo: &Path) -> VersionResult<Revision> {
    let commit = git_stdout(repo, &["rev-parse", "HEAD"])?;
    let short = git_stdout(repo, &["rev-parse", "--short", "HEAD"])?;
    let commit_time = git_stdout(repo, &["log", "-1", "--format=%ct", &commit])?
        .parse::<i64>()
        .map_err(|e| VersionError::Git(format!("unparseable commit time: {}", e)))?;

    Ok(Revision {
        commit,
        short,
        commit_time,
    })
}

/// Resolve the release version for a revision.
///
/// An exact `v*` tag on the revision wins, with the `v` prefix stripped.
/// `git describe` failing here means no exact tag; the repository itself
/// was already validated when the revision resolved.
pub fn resolve_version(
    repo: &Path,
    revision: &Revision,
    mode: VersionMode,
) -> VersionResult<String> {
    let described = git_stdout(
        repo,
        &[
            "describe",
            "--exact-match",
            "--match",
            "v*",
            &revision.commit,
        ],
    );

    match described {
        Ok(tag) => {
            let version = tag.strip_prefix('v').unwrap_or(&tag).to_string();
            if version.is_empty() {
                return Err(VersionError::EmptyVersion {
                    revision: revision.short.clone(),
                });
            }
            Ok(version)
        }
        Err(_) => match mode {
            VersionMode::Strict => Err(VersionError::NoVersionTag {
                revision: revision.short.clone(),
            }),
            VersionMode::Permissive => Ok(fallback_version(revision)),
        },
    }
}

/// Deterministic build identifier for untagged revisions:
/// `<YYYYMMDD>.<short>`, dated by the commit time in UTC.
fn fallback_version(revision: &Revision) -> String {
    let date = Utc
        .timestamp_opt(revision.commit_time, 0)
        .single()
        .map(|t| t.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "19700101".to_string());
    format!("{}.{}", date, revision.short)
}
