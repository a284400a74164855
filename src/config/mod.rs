//! Release pipeline configuration
//!
//! Loads `.shipwright.toml`, applies built-in defaults, and layers CLI
//! overrides on top. The result is a single immutable [`ReleaseConfig`]
//! handed to every pipeline stage; no stage reads ambient environment
//! state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file location, relative to the repository root
pub const DEFAULT_CONFIG_PATH: &str = ".shipwright.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no targets configured")]
    NoTargets,

    #[error("xz level {0} out of range (0-9)")]
    XzLevelOutOfRange(u32),
}

/// Remote release host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Release host; empty means publishing is not configured
    pub host: String,

    /// SSH user on the release host
    pub user: String,

    /// Directory on the release host that holds every published version
    pub release_root: String,

    /// SSH connection timeout in seconds
    pub connect_timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "release".to_string(),
            release_root: "/srv/releases".to_string(),
            connect_timeout_seconds: 30,
        }
    }
}

/// Immutable configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Product name embedded in archive file names
    pub product: String,

    /// Ordered list of platform triples to build
    pub targets: Vec<String>,

    /// Repository root the revision is resolved from
    pub repo: PathBuf,

    /// Container engine override; podman then docker are probed when unset
    pub engine: Option<String>,

    /// Containerfile describing the isolated build environment
    pub containerfile: PathBuf,

    /// Directory inside the built image that holds per-target output
    pub image_output_root: String,

    /// Local directory that receives per-version artifacts
    pub output_root: PathBuf,

    /// Signing key location (base64 Ed25519 seed)
    pub signing_key: String,

    /// Public key location (base64 Ed25519 key)
    pub public_key: String,

    /// xz compression preset; pinned so archive bytes are reproducible
    pub xz_level: u32,

    /// Remote release host
    pub remote: RemoteConfig,

    /// Progress output on stderr
    #[serde(skip)]
    pub verbose: bool,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            product: "shipwright".to_string(),
            targets: vec![
                "x86_64-unknown-linux-musl".to_string(),
                "aarch64-unknown-linux-musl".to_string(),
                "x86_64-apple-darwin".to_string(),
                "aarch64-apple-darwin".to_string(),
            ],
            repo: PathBuf::from("."),
            engine: None,
            containerfile: PathBuf::from("build/Containerfile"),
            image_output_root: "/builds".to_string(),
            output_root: PathBuf::from("build/artifacts"),
            signing_key: "~/.config/shipwright/keys/release.key".to_string(),
            public_key: "~/.config/shipwright/keys/release.pub".to_string(),
            xz_level: 6,
            remote: RemoteConfig::default(),
            verbose: false,
        }
    }
}

impl ReleaseConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path, or fall back to defaults when the
    /// default config file does not exist
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject configurations no run could succeed with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.xz_level > 9 {
            return Err(ConfigError::XzLevelOutOfRange(self.xz_level));
        }
        Ok(())
    }

    /// Signing key path with `~/` expanded
    pub fn signing_key_path(&self) -> PathBuf {
        expand_tilde(&self.signing_key)
    }

    /// Public key path with `~/` expanded
    pub fn public_key_path(&self) -> PathBuf {
        expand_tilde(&self.public_key)
    }
}

/// Expand a leading `~/` against $HOME
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
