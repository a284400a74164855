//! Release host transport
//!
//! Abstracts the remote store for testability: [`SshRemote`] drives
//! rsync/ssh against the real release host, [`MockRemote`] is a
//! local-filesystem stand-in used by tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::config::RemoteConfig;

/// Transport errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("remote command failed: {0}")]
    CommandFailed(String),

    #[error("no release host configured")]
    NotConfigured,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A release store reachable by the publisher
pub trait Remote {
    /// Copy a local file to `rel` under the release root, creating parent
    /// directories as needed
    fn upload(&self, local: &Path, rel: &str) -> Result<(), RemoteError>;

    /// Atomically (re)point the link at `link_rel` to `target`, a path
    /// relative to the link's own directory
    fn symlink_atomic(&self, target: &str, link_rel: &str) -> Result<(), RemoteError>;
}

/// Production transport: rsync for content, ssh for link management
pub struct SshRemote {
    config: RemoteConfig,
}

impl SshRemote {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        if config.host.is_empty() {
            return Err(RemoteError::NotConfigured);
        }
        Ok(Self { config })
    }

    fn ssh_destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn ssh_options(&self) -> [String; 4] {
        [
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_seconds),
        ]
    }

    /// Run a command on the release host
    fn ssh_run(&self, command: &str) -> Result<(), RemoteError> {
        let output = Command::new("ssh")
            .args(self.ssh_options())
            .arg(self.ssh_destination())
            .arg(command)
            .stdout(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(RemoteError::CommandFailed(format!(
                "{}: {}",
                command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Remote for SshRemote {
    fn upload(&self, local: &Path, rel: &str) -> Result<(), RemoteError> {
        let remote_path = format!("{}/{}", self.config.release_root, rel);
        if let Some(parent) = Path::new(&remote_path).parent() {
            self.ssh_run(&format!("mkdir -p '{}'", parent.display()))?;
        }

        let ssh_command = format!(
            "ssh -o BatchMode=yes -o ConnectTimeout={}",
            self.config.connect_timeout_seconds
        );
        let output = Command::new("rsync")
            .args(["--archive", "--compress", "-e", ssh_command.as_str()])
            .arg(local)
            .arg(format!("{}:{}", self.ssh_destination(), remote_path))
            .stdout(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(RemoteError::Transport(format!(
                "rsync to {}: {}",
                remote_path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn symlink_atomic(&self, target: &str, link_rel: &str) -> Result<(), RemoteError> {
        let link = format!("{}/{}", self.config.release_root, link_rel);
        // Stage the new link under a temporary name, then rename over the
        // old one; readers always observe either the old or the new link
        self.ssh_run(&format!(
            "ln -sfn '{target}' '{link}.tmp' && mv -Tf '{link}.tmp' '{link}'",
            target = target,
            link = link,
        ))
    }
}

/// Local-filesystem stand-in for tests, with optional fault injection
pub struct MockRemote {
    root: PathBuf,
    uploads: AtomicUsize,
    fail_after: Option<usize>,
}

impl MockRemote {
    /// A remote rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            uploads: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// A remote whose uploads start failing after `n` successes
    pub fn failing_after(root: PathBuf, n: usize) -> Self {
        Self {
            root,
            uploads: AtomicUsize::new(0),
            fail_after: Some(n),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Uploads performed so far
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

impl Remote for MockRemote {
    fn upload(&self, local: &Path, rel: &str) -> Result<(), RemoteError> {
        let done = self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if done >= limit {
                return Err(RemoteError::Transport("injected upload failure".to_string()));
            }
        }

        let dest = self.root.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dest)?;
        Ok(())
    }

    fn symlink_atomic(&self, target: &str, link_rel: &str) -> Result<(), RemoteError> {
        let link = self.root.join(link_rel);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut staged_name = link
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        staged_name.push(".tmp");
        let staged = link.with_file_name(staged_name);
        if staged.symlink_metadata().is_ok() {
            fs::remove_file(&staged)?;
        }

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, &staged)?;
            fs::rename(&staged, &link)?;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = (target, staged, link);
            Err(RemoteError::CommandFailed(
                "symlinks unsupported on this platform".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ssh_remote_requires_host() {
        let config = RemoteConfig::default();
        assert!(matches!(
            SshRemote::new(config),
            Err(RemoteError::NotConfigured)
        ));
    }

    #[test]
    fn test_mock_upload() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("artifact.txt");
        fs::write(&local, b"bytes").unwrap();

        let remote = MockRemote::new(dir.path().join("store"));
        remote.upload(&local, "2.1.0/artifact.txt").unwrap();

        assert_eq!(
            fs::read(remote.root().join("2.1.0/artifact.txt")).unwrap(),
            b"bytes"
        );
        assert_eq!(remote.upload_count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_mock_symlink_replaces_atomically() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new(dir.path().to_path_buf());
        fs::create_dir_all(dir.path().join("1.0.0")).unwrap();
        fs::create_dir_all(dir.path().join("2.0.0")).unwrap();

        remote.symlink_atomic("1.0.0", "latest").unwrap();
        assert_eq!(
            fs::read_link(dir.path().join("latest")).unwrap(),
            Path::new("1.0.0")
        );

        // Repointing replaces the old link, it never fails on existence
        remote.symlink_atomic("2.0.0", "latest").unwrap();
        assert_eq!(
            fs::read_link(dir.path().join("latest")).unwrap(),
            Path::new("2.0.0")
        );
    }

    #[test]
    fn test_mock_fault_injection() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("artifact.txt");
        fs::write(&local, b"bytes").unwrap();

        let remote = MockRemote::failing_after(dir.path().join("store"), 1);
        assert!(remote.upload(&local, "a").is_ok());
        assert!(matches!(
            remote.upload(&local, "b"),
            Err(RemoteError::Transport(_))
        ));
    }
}
