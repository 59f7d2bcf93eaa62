//! Digest → arena-offset lookup table.
//!
//! Open addressing with linear probing, sized for every current-epoch
//! transaction. The all-zero digest marks an empty slot, which is why it is
//! rejected on insert. When a probe wraps all the way around, the insert is
//! dropped; the transaction stays reachable through its tick and slot.

use shared_types::{Digest, TxOffset};

#[derive(Clone, Copy)]
struct DigestEntry {
    digest: Digest,
    offset: TxOffset,
}

/// Fixed-capacity digest lookup table.
pub(crate) struct DigestIndex {
    entries: Box<[DigestEntry]>,
}

impl DigestIndex {
    pub(crate) fn new(capacity: usize) -> Self {
        let empty = DigestEntry {
            digest: Digest::ZERO,
            offset: TxOffset::ABSENT,
        };
        Self {
            entries: vec![empty; capacity].into_boxed_slice(),
        }
    }

    fn slot_of(&self, digest: &Digest) -> usize {
        digest.word7() as usize % self.entries.len()
    }

    /// Inserts a digest → offset mapping. Returns `false` when nothing was
    /// stored: a zero digest, or a full table.
    // TODO: skip the insert when the digest is already present instead of
    // storing a duplicate probe entry.
    pub(crate) fn insert(&mut self, digest: Digest, offset: TxOffset) -> bool {
        if digest.is_zero() {
            return false;
        }
        let start = self.slot_of(&digest);
        let mut index = start;
        while !self.entries[index].digest.is_zero() {
            index = (index + 1) % self.entries.len();
            if index == start {
                // Table full; drop the insert.
                return false;
            }
        }
        self.entries[index] = DigestEntry { digest, offset };
        true
    }

    /// Resolves a digest to its arena offset.
    pub(crate) fn find(&self, digest: &Digest) -> Option<TxOffset> {
        if digest.is_zero() {
            return None;
        }
        let start = self.slot_of(digest);
        let mut index = start;
        while !self.entries[index].digest.is_zero() {
            if self.entries[index].digest == *digest {
                return Some(self.entries[index].offset);
            }
            index = (index + 1) % self.entries.len();
            if index == start {
                break;
            }
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        let empty = DigestEntry {
            digest: Digest::ZERO,
            offset: TxOffset::ABSENT,
        };
        self.entries.fill(empty);
    }
}
