//! Deterministic source snapshots
//!
//! Captures exactly the tracked tree of a revision via `git archive`,
//! decoupling the build from the working tree's mutable state. The
//! snapshot is content-addressed: the same revision always yields
//! byte-identical tar bytes and therefore the same digest.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

use crate::version::Revision;

/// Snapshot errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("revision {revision} cannot be resolved to a tree: {detail}")]
    UnresolvableRevision { revision: String, detail: String },
}

/// A content-addressed snapshot of one revision's tracked tree
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    /// Uncompressed tar bytes, entry timestamps fixed to the commit time
    /// by `git archive`
    pub tar_bytes: Vec<u8>,

    /// SHA-256 over the tar bytes
    pub sha256: String,
}

/// Snapshot the revision's tree. Untracked and ignored files never appear.
pub fn snapshot(repo: &Path, revision: &Revision) -> Result<SourceSnapshot, SnapshotError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["archive", "--format=tar", revision.commit.as_str()])
        .output()?;

    if !output.status.success() {
        return Err(SnapshotError::UnresolvableRevision {
            revision: revision.short.clone(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let sha256 = {
        let mut hasher = Sha256::new();
        hasher.update(&output.stdout);
        hex::encode(hasher.finalize())
    };

    Ok(SourceSnapshot {
        tar_bytes: output.stdout,
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::resolve_revision;
    use std::fs;
    use tempfile::TempDir;

    fn git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.org")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.org")
            .env("GIT_AUTHOR_DATE", "2024-03-01T12:00:00+00:00")
            .env("GIT_COMMITTER_DATE", "2024-03-01T12:00:00+00:00")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn repo_with_commit() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "--quiet"]);
        fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
        dir
    }

    #[test]
    fn test_snapshot_deterministic() {
        let repo = repo_with_commit();
        let revision = resolve_revision(repo.path()).unwrap();

        let first = snapshot(repo.path(), &revision).unwrap();
        let second = snapshot(repo.path(), &revision).unwrap();

        assert_eq!(first.tar_bytes, second.tar_bytes);
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first.sha256.len(), 64);
    }

    #[test]
    fn test_snapshot_excludes_untracked() {
        let repo = repo_with_commit();
        let revision = resolve_revision(repo.path()).unwrap();
        let before = snapshot(repo.path(), &revision).unwrap();

        // An untracked file must not change the snapshot
        fs::write(repo.path().join("scratch.txt"), "untracked").unwrap();
        let after = snapshot(repo.path(), &revision).unwrap();

        assert_eq!(before.sha256, after.sha256);
    }

    #[test]
    fn test_snapshot_tracks_revision_not_worktree() {
        let repo = repo_with_commit();
        let revision = resolve_revision(repo.path()).unwrap();
        let before = snapshot(repo.path(), &revision).unwrap();

        // Dirtying a tracked file without committing must not change the
        // snapshot either; the snapshot is of the revision, not the tree
        fs::write(repo.path().join("main.rs"), "fn main() { changed() }\n").unwrap();
        let after = snapshot(repo.path(), &revision).unwrap();

        assert_eq!(before.sha256, after.sha256);
    }

    #[test]
    fn test_bad_revision_fails() {
        let repo = repo_with_commit();
        let bogus = Revision {
            commit: "0000000000000000000000000000000000000000".to_string(),
            short: "0000000".to_string(),
            commit_time: 0,
        };

        assert!(matches!(
            snapshot(repo.path(), &bogus),
            Err(SnapshotError::UnresolvableRevision { .. })
        ));
    }
}
