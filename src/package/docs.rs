//! Documentation normalization
//!
//! Generated man pages and similar text files carry generator comment
//! headers and build dates; both vary between build environments and are
//! stripped before archiving so archive bytes depend only on the
//! revision.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex_lite::Regex;
use std::path::Path;

/// Archive members treated as documentation
const DOC_PATTERNS: &[&str] = &["man/**", "share/man/**"];

/// Lines removed from documentation before archiving
const STRIP_PATTERNS: &[&str] = &[
    // roff comment lines; generators stamp tool name, version and date here
    r#"^\.\\""#,
    // plain-text generator stamps
    r"(?i)^\s*(<!--\s*)?(automatically\s+)?generated\s+(by|on|with)\b",
];

/// Errors building the filter
#[derive(Debug, thiserror::Error)]
pub enum DocFilterError {
    #[error("glob pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("strip pattern error: {0}")]
    Pattern(#[from] regex_lite::Error),
}

/// Selects documentation members and strips their volatile lines
#[derive(Debug)]
pub struct DocFilter {
    docs: GlobSet,
    strip: Vec<Regex>,
}

impl Default for DocFilter {
    fn default() -> Self {
        Self::new().unwrap()
    }
}

impl DocFilter {
    pub fn new() -> Result<Self, DocFilterError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DOC_PATTERNS {
            builder.add(Glob::new(pattern)?);
        }

        let strip = STRIP_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            docs: builder.build()?,
            strip,
        })
    }

    /// Whether the archive member at `rel` counts as documentation
    pub fn is_doc(&self, rel: &Path) -> bool {
        self.docs.is_match(rel)
    }

    /// Strip volatile lines. Non-UTF-8 content passes through untouched.
    pub fn normalize(&self, content: &[u8]) -> Vec<u8> {
        let text = match std::str::from_utf8(content) {
            Ok(text) => text,
            Err(_) => return content.to_vec(),
        };

        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            if self.strip.iter().any(|re| re.is_match(line)) {
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        out.into_bytes()
    }
}
