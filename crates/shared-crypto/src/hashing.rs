//! # KangarooTwelve Hashing
//!
//! Every transaction identity in the ledger is the 256-bit KangarooTwelve
//! digest of its encoded bytes. This module is the single place the hash
//! primitive is touched; everything else consumes [`Digest`] values.

use shared_types::Digest;
use tiny_keccak::{Hasher, KangarooTwelve};

/// Stateful KangarooTwelve hasher producing a 32-byte [`Digest`].
pub struct K12Hasher {
    inner: KangarooTwelve<&'static [u8]>,
}

impl K12Hasher {
    /// Create new hasher with an empty customization string.
    pub fn new() -> Self {
        Self {
            inner: KangarooTwelve::new(&[]),
        }
    }

    /// Update with data.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        let mut out = [0u8; 32];
        self.inner.finalize(&mut out);
        Digest(out)
    }
}

impl Default for K12Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash data with KangarooTwelve (one-shot).
pub fn k12_digest(data: &[u8]) -> Digest {
    let mut hasher = K12Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
