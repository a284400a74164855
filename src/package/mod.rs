//! Deterministic artifact packaging
//!
//! Assembles one target's build output into a canonical tar stream and
//! compresses it with xz at a pinned preset. Entries are sorted by name,
//! owner and group are fixed to 0, permissions are masked to 0755/0644,
//! and every entry is stamped with the revision's commit time instead of
//! filesystem timestamps. Given the same revision, build facts and
//! target, the archive bytes are identical.

mod docs;

pub use docs::{DocFilter, DocFilterError};

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;
use xz2::write::XzEncoder;

use crate::container::BuildOutput;

/// Pinned compression preset; part of the reproducibility contract
pub const DEFAULT_XZ_LEVEL: u32 = 6;

/// Fixed owner/group for every archive entry
const ENTRY_OWNER: u64 = 0;

/// Packaging errors
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("build output missing for target {target}: {path}")]
    MissingOutput { target: String, path: PathBuf },

    #[error("build output for target {target} contains no files")]
    EmptyOutput { target: String },
}

/// Result type for packaging operations
pub type PackageResult<T> = Result<T, PackageError>;

/// Archive file name for one (product, version, target)
pub fn archive_file_name(product: &str, version: &str, target: &str) -> String {
    format!("{}-{}-{}.tar.xz", product, version, target)
}

/// What one collected entry is
enum EntryKind {
    File { executable: bool },
    Directory,
    Symlink { target: PathBuf },
}

/// Builds canonical archives from per-target build output
pub struct Packager<'a> {
    product: &'a str,
    version: &'a str,
    commit_time: i64,
    xz_level: u32,
    docs: DocFilter,
}

impl<'a> Packager<'a> {
    pub fn new(product: &'a str, version: &'a str, commit_time: i64) -> Self {
        Self {
            product,
            version,
            commit_time,
            xz_level: DEFAULT_XZ_LEVEL,
            docs: DocFilter::default(),
        }
    }

    /// Override the pinned compression preset
    pub fn with_xz_level(mut self, level: u32) -> Self {
        self.xz_level = level;
        self
    }

    /// Archive file name for a target
    pub fn archive_name(&self, target: &str) -> String {
        archive_file_name(self.product, self.version, target)
    }

    /// Directory prefix every archive member lives under
    fn member_prefix(&self, target: &str) -> String {
        format!("{}-{}-{}", self.product, self.version, target)
    }

    /// Package one target's output; returns the written archive path
    pub fn package(&self, output: &BuildOutput, out_dir: &Path) -> PackageResult<PathBuf> {
        let tar_bytes = self.canonical_tar(output)?;
        let compressed = compress(&tar_bytes, self.xz_level)?;

        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(self.archive_name(&output.target));
        fs::write(&path, &compressed)?;
        Ok(path)
    }

    /// Collect entries in canonical (name) order
    fn collect(&self, output: &BuildOutput) -> PackageResult<BTreeMap<PathBuf, EntryKind>> {
        if !output.root.is_dir() {
            return Err(PackageError::MissingOutput {
                target: output.target.clone(),
                path: output.root.clone(),
            });
        }

        let mut entries = BTreeMap::new();
        for entry in WalkDir::new(&output.root).follow_links(false) {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(&output.root)
                .map_err(|_| PackageError::MissingOutput {
                    target: output.target.clone(),
                    path: entry.path().to_path_buf(),
                })?;
            if rel.as_os_str().is_empty() {
                continue;
            }

            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink {
                    target: fs::read_link(entry.path())?,
                }
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File {
                    executable: is_executable(entry.path()),
                }
            };

            entries.insert(rel.to_path_buf(), kind);
        }

        if !entries
            .values()
            .any(|kind| matches!(kind, EntryKind::File { .. }))
        {
            return Err(PackageError::EmptyOutput {
                target: output.target.clone(),
            });
        }

        Ok(entries)
    }

    /// Serialize the canonical tar stream
    fn canonical_tar(&self, output: &BuildOutput) -> PackageResult<Vec<u8>> {
        let entries = self.collect(output)?;
        let prefix = self.member_prefix(&output.target);
        let mtime = self.commit_time.max(0) as u64;

        let mut tar_buffer = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_buffer);

            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mtime(mtime);
            header.set_uid(ENTRY_OWNER);
            header.set_gid(ENTRY_OWNER);
            header.set_mode(0o755);
            builder.append_data(&mut header, format!("{}/", prefix), io::empty())?;

            for (rel, kind) in &entries {
                let member = format!("{}/{}", prefix, rel.display());

                match kind {
                    EntryKind::File { executable } => {
                        let mut file = File::open(output.root.join(rel))?;
                        let mut contents = Vec::new();
                        file.read_to_end(&mut contents)?;

                        if self.docs.is_doc(rel) {
                            contents = self.docs.normalize(&contents);
                        }

                        let mut header = Header::new_gnu();
                        header.set_entry_type(EntryType::Regular);
                        header.set_size(contents.len() as u64);
                        header.set_mtime(mtime);
                        header.set_uid(ENTRY_OWNER);
                        header.set_gid(ENTRY_OWNER);
                        header.set_mode(if *executable { 0o755 } else { 0o644 });
                        builder.append_data(&mut header, &member, contents.as_slice())?;
                    }
                    EntryKind::Directory => {
                        let mut header = Header::new_gnu();
                        header.set_entry_type(EntryType::Directory);
                        header.set_size(0);
                        header.set_mtime(mtime);
                        header.set_uid(ENTRY_OWNER);
                        header.set_gid(ENTRY_OWNER);
                        header.set_mode(0o755);
                        builder.append_data(&mut header, format!("{}/", member), io::empty())?;
                    }
                    EntryKind::Symlink { target } => {
                        let mut header = Header::new_gnu();
                        header.set_entry_type(EntryType::Symlink);
                        header.set_size(0);
                        header.set_mtime(mtime);
                        header.set_uid(ENTRY_OWNER);
                        header.set_gid(ENTRY_OWNER);
                        header.set_mode(0o777);
                        builder.append_link(&mut header, &member, target)?;
                    }
                }
            }

            builder.finish()?;
        }

        Ok(tar_buffer)
    }
}

/// xz-compress at the given preset
fn compress(bytes: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = XzEncoder::new(Vec::new(), level);
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Check if a file carries an executable bit
fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    false
}
