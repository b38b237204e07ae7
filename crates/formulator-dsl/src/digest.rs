//! Stable procedure digests.
//!
//! Digests identify procedure text and preview inputs across edits:
//!
//! - algorithm: **FNV-1a 64-bit**
//! - output: `"fnv1a64:<16 lowercase hex digits>"`
//!
//! They are not a security primitive. Candidate de-duplication and the preview
//! cache only need a deterministic identity for identical inputs.

/// Prefix used in serialized digests.
pub const DIGEST_PREFIX: &str = "fnv1a64:";

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

fn fnv1a64(hash: u64, bytes: &[u8]) -> u64 {
    let mut hash = hash;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Digest arbitrary bytes.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{:016x}", fnv1a64(FNV_OFFSET_BASIS, bytes))
}

/// Digest of a procedure's text, ignoring surrounding whitespace.
pub fn procedure_digest(text: &str) -> String {
    fnv1a64_digest_bytes(text.trim().as_bytes())
}

/// Incremental digest over a sequence of fields.
///
/// Each field is length-prefixed so `("ab", "c")` and `("a", "bc")` digest
/// differently.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    hash: u64,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprint {
    pub fn new() -> Self {
        Self {
            hash: FNV_OFFSET_BASIS,
        }
    }

    pub fn field(mut self, bytes: &[u8]) -> Self {
        self.hash = fnv1a64(self.hash, &(bytes.len() as u64).to_le_bytes());
        self.hash = fnv1a64(self.hash, bytes);
        self
    }

    pub fn str(self, text: &str) -> Self {
        self.field(text.as_bytes())
    }

    pub fn u64(self, value: u64) -> Self {
        self.field(&value.to_le_bytes())
    }

    pub fn finish(&self) -> String {
        format!("{DIGEST_PREFIX}{:016x}", self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_vectors() {
        assert_eq!(fnv1a64_digest_bytes(b""), "fnv1a64:cbf29ce484222325");
        assert_eq!(fnv1a64_digest_bytes(b"a"), "fnv1a64:af63dc4c8601ec8c");
    }

    #[test]
    fn procedure_digest_ignores_outer_whitespace() {
        assert_eq!(procedure_digest("  x => x \n"), procedure_digest("x => x"));
        assert_ne!(procedure_digest("x => x"), procedure_digest("x => x + 0"));
    }

    #[test]
    fn fingerprint_fields_are_delimited() {
        let a = Fingerprint::new().str("ab").str("c").finish();
        let b = Fingerprint::new().str("a").str("bc").finish();
        assert_ne!(a, b);
        assert_eq!(a, Fingerprint::new().str("ab").str("c").finish());
    }
}
