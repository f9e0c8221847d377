//! Checksums and fingerprints
//!
//! Artifact checksums are SHA-256 over the produced bytes. Fingerprints feed
//! labelled, length-prefixed fields into one digest; row sets are sorted
//! first, so the order concurrent sub-tasks settled in never shows up in a
//! fingerprint.

use sha2::{Digest, Sha256};

/// SHA-256 of bytes as lowercase hex.
pub fn checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[derive(Clone)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    /// `domain` separates fingerprints of different kinds of record.
    pub fn new(domain: &str) -> Self {
        Self { hasher: Sha256::new() }.field("domain", domain)
    }

    pub fn field(mut self, label: &str, value: impl AsRef<[u8]>) -> Self {
        for part in [label.as_bytes(), value.as_ref()] {
            self.hasher.update((part.len() as u64).to_be_bytes());
            self.hasher.update(part);
        }
        self
    }

    pub fn optional(self, label: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.field(label, [1u8]).field(label, v),
            None => self.field(label, [0u8]),
        }
    }

    /// Rows are sorted before hashing.
    pub fn rows(mut self, label: &str, mut rows: Vec<(String, String)>) -> Self {
        rows.sort();
        self = self.field(label, (rows.len() as u64).to_be_bytes());
        for (key, value) in rows {
            self = self.field(&key, value);
        }
        self
    }

    pub fn hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }

    /// `<prefix>-` followed by the first 16 hex characters.
    pub fn handle(self, prefix: &str) -> String {
        let digest = self.hex();
        format!("{prefix}-{}", &digest[..16])
    }
}
