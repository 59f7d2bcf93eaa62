//! Core ledger entities.
//!
//! A tick is one consensus round. Every computor casts one [`TickVote`] per
//! tick, and at most one [`TickData`] record describes the tick's contents.
//! Both use `epoch == 0` to mark an unused slot, so zeroed storage reads as
//! empty.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

/// A 32-byte public key / entity identity.
pub type PublicKey = [u8; 32];

/// A 64-byte signature.
pub type Signature = [u8; 64];

// =============================================================================
// DIGEST
// =============================================================================

/// 256-bit KangarooTwelve digest of a transaction's encoded bytes.
///
/// The all-zero digest is reserved as the "empty slot" marker of the digest
/// lookup table, so it is never inserted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// The reserved empty-slot marker.
    pub const ZERO: Digest = Digest([0; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    /// The eighth 32-bit word of the digest, used as the hash-table key.
    pub fn word7(&self) -> u32 {
        u32::from_le_bytes([self.0[28], self.0[29], self.0[30], self.0[31]])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Leading 4 bytes are plenty to tell digests apart in test output.
        write!(
            f,
            "Digest({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// =============================================================================
// TRANSACTION OFFSET
// =============================================================================

/// Byte position of a transaction inside an arena.
///
/// Zero encodes "absent": real transactions always live at or above the
/// arena's reserved prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct TxOffset(pub u64);

impl TxOffset {
    /// The "no transaction in this slot" marker.
    pub const ABSENT: TxOffset = TxOffset(0);

    pub fn is_absent(&self) -> bool {
        self.0 == 0
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// TICK VOTE
// =============================================================================

/// One computor's vote on one tick.
#[serde_as]
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TickVote {
    /// Index of the voting computor.
    pub computor_index: u16,
    /// Epoch the vote belongs to; 0 marks an unused slot.
    pub epoch: u16,
    /// Tick number voted on.
    pub tick: u32,
    /// Millisecond timestamp the computor attached to the vote.
    pub timestamp: u64,
    /// Digest of the previous tick as seen by the computor.
    pub prev_tick_digest: Digest,
    /// Digest over the transactions the computor includes in this tick.
    pub transaction_digest: Digest,
    /// Computor signature over the fields above.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl TickVote {
    /// Fixed encoded size in snapshot files.
    pub const ENCODED_SIZE: usize = 2 + 2 + 4 + 8 + 32 + 32 + 64;

    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            computor_index: 0,
            epoch: 0,
            tick: 0,
            timestamp: 0,
            prev_tick_digest: Digest::ZERO,
            transaction_digest: Digest::ZERO,
            signature: [0; 64],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.epoch == 0
    }

    /// Writes the little-endian layout into `out`, which must be exactly
    /// [`Self::ENCODED_SIZE`] bytes.
    pub fn encode_into(&self, out: &mut [u8]) {
        assert_eq!(out.len(), Self::ENCODED_SIZE);
        out[0..2].copy_from_slice(&self.computor_index.to_le_bytes());
        out[2..4].copy_from_slice(&self.epoch.to_le_bytes());
        out[4..8].copy_from_slice(&self.tick.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        out[16..48].copy_from_slice(&self.prev_tick_digest.0);
        out[48..80].copy_from_slice(&self.transaction_digest.0);
        out[80..144].copy_from_slice(&self.signature);
    }

    /// Reads one vote back from its encoded layout.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_SIZE {
            return None;
        }
        let mut prev_tick_digest = [0u8; 32];
        prev_tick_digest.copy_from_slice(&bytes[16..48]);
        let mut transaction_digest = [0u8; 32];
        transaction_digest.copy_from_slice(&bytes[48..80]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[80..144]);
        Some(Self {
            computor_index: u16::from_le_bytes([bytes[0], bytes[1]]),
            epoch: u16::from_le_bytes([bytes[2], bytes[3]]),
            tick: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            timestamp: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            prev_tick_digest: Digest(prev_tick_digest),
            transaction_digest: Digest(transaction_digest),
            signature,
        })
    }
}

// =============================================================================
// TICK DATA
// =============================================================================

/// Per-tick record: which transactions the tick leader scheduled.
///
/// `transaction_digests` has one slot per per-tick transaction budget; a zero
/// digest means the slot is unused.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickData {
    /// Epoch the record belongs to; 0 marks "no data for this tick yet".
    pub epoch: u16,
    /// Tick number the record describes.
    pub tick: u32,
    /// Millisecond timestamp of the tick.
    pub timestamp: u64,
    /// Scheduled transaction digests. Empty for an unused slot; otherwise
    /// exactly the configured per-tick budget.
    pub transaction_digests: Vec<Digest>,
}

impl TickData {
    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            epoch: 0,
            tick: 0,
            timestamp: 0,
            transaction_digests: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.epoch == 0
    }

    /// Fixed encoded size for a given per-tick transaction budget.
    pub fn encoded_size(txs_per_tick: u32) -> usize {
        2 + 4 + 8 + 32 * txs_per_tick as usize
    }

    /// Writes the little-endian layout into `out`, which must be exactly
    /// [`Self::encoded_size`] bytes. Missing digest slots encode as zero.
    pub fn encode_into(&self, txs_per_tick: u32, out: &mut [u8]) {
        assert_eq!(out.len(), Self::encoded_size(txs_per_tick));
        out[0..2].copy_from_slice(&self.epoch.to_le_bytes());
        out[2..6].copy_from_slice(&self.tick.to_le_bytes());
        out[6..14].copy_from_slice(&self.timestamp.to_le_bytes());
        let digests = &mut out[14..];
        digests.fill(0);
        for (i, digest) in self
            .transaction_digests
            .iter()
            .take(txs_per_tick as usize)
            .enumerate()
        {
            digests[i * 32..(i + 1) * 32].copy_from_slice(&digest.0);
        }
    }

    /// Reads one record back from its encoded layout. An encoded empty slot
    /// decodes with no digest vector allocated.
    pub fn decode(txs_per_tick: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::encoded_size(txs_per_tick) {
            return None;
        }
        let epoch = u16::from_le_bytes([bytes[0], bytes[1]]);
        let tick = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let timestamp = u64::from_le_bytes(bytes[6..14].try_into().ok()?);
        let transaction_digests = if epoch == 0 {
            Vec::new()
        } else {
            bytes[14..]
                .chunks_exact(32)
                .map(|chunk| {
                    let mut digest = [0u8; 32];
                    digest.copy_from_slice(chunk);
                    Digest(digest)
                })
                .collect()
        };
        Some(Self {
            epoch,
            tick,
            timestamp,
            transaction_digests,
        })
    }
}
