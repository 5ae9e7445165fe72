//! Hashing for workbook identity and build fingerprints.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// First 8 hex characters of the SHA-256 of `path`.
///
/// Callers pass a canonical path so the same directory always yields the
/// same suffix.
pub fn short_path_hash(path: &Path) -> String {
    let mut digest = sha256_hex(path.to_string_lossy().as_bytes());
    digest.truncate(8);
    digest
}

/// Digest over an ordered list of parts.
///
/// Parts are NUL-terminated so `["ab", "c"]` and `["a", "bc"]` differ.
#[derive(Default)]
pub struct Fingerprint(Sha256);

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&mut self, part: &str) -> &mut Self {
        self.0.update(part.as_bytes());
        self.0.update([0u8]);
        self
    }

    pub fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}
