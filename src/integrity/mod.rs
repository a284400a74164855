//! Checksums and release signing
//!
//! SHA-256 checksum records and detached Ed25519 signatures over archive
//! bytes. A freshly produced signature must pass self-verification before
//! the pipeline proceeds; failure there is a trust-chain defect and is
//! surfaced distinctly from build problems. Pre-existing signatures are
//! discarded and regenerated, never trusted stale.

use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Signature algorithm identifier
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Errors from checksum and signing operations
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("signing key not found at {path}; run keygen first")]
    MissingKey { path: PathBuf },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("malformed checksum record {path}")]
    MalformedChecksum { path: PathBuf },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("checksum mismatch for {path}: recorded {recorded}, actual {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        recorded: String,
        actual: String,
    },

    #[error("signature for {path} failed self-verification")]
    SelfVerificationFailed { path: PathBuf },
}

/// Result type for integrity operations
pub type IntegrityResult<T> = Result<T, IntegrityError>;

/// Persisted digest of an archive's exact bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    /// Hex SHA-256 digest
    pub sha256: String,

    /// File name the digest belongs to
    pub file_name: String,
}

impl ChecksumRecord {
    /// sha256sum-compatible line
    pub fn to_line(&self) -> String {
        format!("{}  {}\n", self.sha256, self.file_name)
    }

    /// Parse a sha256sum-compatible line
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let sha256 = parts.next()?.to_string();
        let file_name = parts.next()?.trim().to_string();
        if sha256.len() != 64 || file_name.is_empty() {
            return None;
        }
        Some(Self { sha256, file_name })
    }
}

/// Companion file path: `<archive>.<ext>`
pub fn companion_path(archive: &Path, ext: &str) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}", ext));
    archive.with_file_name(name)
}

/// Compute the checksum record for an archive
pub fn checksum(archive: &Path) -> IntegrityResult<ChecksumRecord> {
    let bytes = fs::read(archive)?;
    let sha256 = {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    };
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ChecksumRecord { sha256, file_name })
}

/// Write `<archive>.sha256` next to the archive; returns the record and
/// the companion path
pub fn write_checksum(archive: &Path) -> IntegrityResult<(ChecksumRecord, PathBuf)> {
    let record = checksum(archive)?;
    let path = companion_path(archive, "sha256");
    fs::write(&path, record.to_line())?;
    Ok((record, path))
}

/// Verify an archive against its persisted checksum record
pub fn verify_checksum(archive: &Path) -> IntegrityResult<ChecksumRecord> {
    let record_path = companion_path(archive, "sha256");
    let contents = fs::read_to_string(&record_path)?;
    let recorded = ChecksumRecord::parse(&contents).ok_or_else(|| {
        IntegrityError::MalformedChecksum {
            path: record_path.clone(),
        }
    })?;

    let actual = checksum(archive)?;
    if recorded.sha256 != actual.sha256 {
        return Err(IntegrityError::ChecksumMismatch {
            path: archive.to_path_buf(),
            recorded: recorded.sha256,
            actual: actual.sha256,
        });
    }
    Ok(actual)
}

/// Produce `<archive>.sig`. Any pre-existing signature is deleted first,
/// and the fresh signature must verify against the signer's public key
/// before this returns.
pub fn sign_archive(archive: &Path, key: &SigningKey) -> IntegrityResult<PathBuf> {
    let sig_path = companion_path(archive, "sig");
    if sig_path.exists() {
        fs::remove_file(&sig_path)?;
    }

    let bytes = fs::read(archive)?;
    let signature = key.sign(&bytes);
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
    fs::write(&sig_path, format!("{}\n", encoded))?;

    // Self-check: the signature as persisted must verify
    if !verify_archive(archive, &sig_path, &key.verifying_key())? {
        return Err(IntegrityError::SelfVerificationFailed {
            path: archive.to_path_buf(),
        });
    }

    Ok(sig_path)
}

/// Verify a detached signature file against the archive bytes
pub fn verify_archive(
    archive: &Path,
    sig_path: &Path,
    public: &VerifyingKey,
) -> IntegrityResult<bool> {
    let encoded = fs::read_to_string(sig_path)?;
    let sig_bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| IntegrityError::InvalidSignature(e.to_string()))?;

    let bytes = fs::read(archive)?;
    Ok(public.verify(&bytes, &signature).is_ok())
}

/// Load the signing key (base64 Ed25519 seed) from its well-known path
pub fn load_signing_key(path: &Path) -> IntegrityResult<SigningKey> {
    if !path.exists() {
        return Err(IntegrityError::MissingKey {
            path: path.to_path_buf(),
        });
    }
    let encoded = fs::read_to_string(path)?;
    decode_signing_key(encoded.trim())
        .map_err(|e| IntegrityError::InvalidKey(format!("{}: {}", path.display(), e)))
}

/// Load the public key (base64) from its well-known path
pub fn load_verifying_key(path: &Path) -> IntegrityResult<VerifyingKey> {
    if !path.exists() {
        return Err(IntegrityError::MissingKey {
            path: path.to_path_buf(),
        });
    }
    let encoded = fs::read_to_string(path)?;
    decode_verifying_key(encoded.trim())
        .map_err(|e| IntegrityError::InvalidKey(format!("{}: {}", path.display(), e)))
}

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Write a keypair to the well-known paths. The signing key file is
/// created with owner-only permissions.
pub fn write_keypair(
    key: &SigningKey,
    signing_path: &Path,
    public_path: &Path,
) -> IntegrityResult<()> {
    if let Some(parent) = signing_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(parent) = public_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(signing_path, format!("{}\n", encode_signing_key(key)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(signing_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::write(
        public_path,
        format!("{}\n", encode_verifying_key(&key.verifying_key())),
    )?;
    Ok(())
}

/// Compute the SHA-256 fingerprint of a public key
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encode a signing key to base64 for storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.to_bytes())
}

/// Decode a signing key from base64
pub fn decode_signing_key(encoded: &str) -> IntegrityResult<SigningKey> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| IntegrityError::InvalidKey("signing key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes_array))
}

/// Encode a verifying key to base64 for storage
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> IntegrityResult<VerifyingKey> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| IntegrityError::InvalidKey("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes_array).map_err(|e| IntegrityError::InvalidKey(e.to_string()))
}
