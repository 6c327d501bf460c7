//! Cache key generation utilities.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use trellis_core::context::OsFamily;
use trellis_core::{Error, Result};

/// Key of one dependency cache entry: (OS family, lockfile hash) under a
/// workflow-chosen prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub prefix: String,
    pub os_family: String,
    pub lockfile_hash: String,
}

impl CacheKey {
    pub fn new(
        prefix: impl Into<String>,
        os_family: impl Into<String>,
        lockfile_hash: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            os_family: os_family.into(),
            lockfile_hash: lockfile_hash.into(),
        }
    }

    /// Key for a job running on `os` (a runner identifier like
    /// `macos-latest`); every runner of one family shares the entry.
    pub fn for_os(prefix: &str, os: &str, lockfile_hash: &str) -> Self {
        Self::new(prefix, family_name(os), lockfile_hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.prefix, self.os_family, self.lockfile_hash)
    }
}

fn family_name(os: &str) -> String {
    match OsFamily::classify(os) {
        OsFamily::Linux => "linux".to_string(),
        OsFamily::Macos => "macos".to_string(),
        OsFamily::Windows => "windows".to_string(),
        OsFamily::Other => sanitize_key(&os.trim().to_ascii_lowercase()).replace('-', "_"),
    }
}

/// Content hash of a dependency lockfile (first 8 bytes of SHA-256, hex).
pub fn hash_lockfile(contents: &[u8]) -> String {
    let hash = Sha256::digest(contents);
    hex::encode(&hash[..8])
}

/// Read and hash the lockfile at `path`.
pub async fn hash_lockfile_path(path: &Path) -> Result<String> {
    let contents = tokio::fs::read(path).await.map_err(|e| {
        Error::InvalidWorkflow(format!("cannot read lockfile {}: {}", path.display(), e))
    })?;
    Ok(hash_lockfile(&contents))
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            _ => c,
        })
        .collect()
}
