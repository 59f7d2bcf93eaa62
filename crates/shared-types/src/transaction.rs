//! Transfer / contract-invocation transactions.
//!
//! Transactions are variable-size records stored back to back inside a byte
//! arena. [`Transaction`] is the owned form used at the edges;
//! [`TxView`] reads the same little-endian layout in place without copying,
//! which is how the storage subsystems walk arena memory.
//!
//! ## Wire Layout
//!
//! | bytes | field |
//! |---|---|
//! | 0..32 | source public key |
//! | 32..64 | destination public key |
//! | 64..72 | amount (i64) |
//! | 72..76 | tick (u32) |
//! | 76..78 | input type (u16) |
//! | 78..80 | input size (u16) |
//! | 80..80+n | input payload |
//! | 80+n..144+n | signature |

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::entities::{PublicKey, Signature};

/// Fixed prefix before the variable-size input payload.
pub const TX_HEADER_SIZE: usize = 32 + 32 + 8 + 4 + 2 + 2;

/// Trailing signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Hard cap on the input payload carried by one transaction.
pub const MAX_INPUT_SIZE: usize = 1024;

/// Hard cap on the amount moved by one transaction.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

/// An owned transaction record.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender identity.
    pub source_public_key: PublicKey,
    /// Receiver identity (a contract id for invocations).
    pub destination_public_key: PublicKey,
    /// Amount transferred; doubles as the invocation reward for contracts.
    pub amount: i64,
    /// Tick the transaction is scheduled for.
    pub tick: u32,
    /// Input discriminator; selects the contract procedure for invocations.
    pub input_type: u16,
    /// Variable-size input payload.
    pub input: Vec<u8>,
    /// Signature over everything above.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl Transaction {
    /// Encoded size: header, payload, signature.
    pub fn total_size(&self) -> usize {
        TX_HEADER_SIZE + self.input.len() + SIGNATURE_SIZE
    }

    /// Content check every stored transaction must pass: a representable
    /// amount and a payload within the wire cap.
    pub fn check_validity(&self) -> bool {
        (0..=MAX_AMOUNT).contains(&self.amount) && self.input.len() <= MAX_INPUT_SIZE
    }

    /// Encodes into the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.total_size()];
        self.encode_into(&mut out);
        out
    }

    /// Writes the wire layout into `out`, which must be exactly
    /// [`Self::total_size`] bytes.
    pub fn encode_into(&self, out: &mut [u8]) {
        assert_eq!(out.len(), self.total_size());
        out[0..32].copy_from_slice(&self.source_public_key);
        out[32..64].copy_from_slice(&self.destination_public_key);
        out[64..72].copy_from_slice(&self.amount.to_le_bytes());
        out[72..76].copy_from_slice(&self.tick.to_le_bytes());
        out[76..78].copy_from_slice(&self.input_type.to_le_bytes());
        out[78..80].copy_from_slice(&(self.input.len() as u16).to_le_bytes());
        out[80..80 + self.input.len()].copy_from_slice(&self.input);
        out[80 + self.input.len()..].copy_from_slice(&self.signature);
    }

    /// Decodes one transaction that spans the whole of `bytes`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let view = TxView::parse(bytes)?;
        if view.total_size() != bytes.len() {
            return None;
        }
        Some(view.to_owned())
    }
}

/// Zero-copy reader over one encoded transaction.
///
/// [`TxView::parse`] validates that the declared input size fits inside the
/// given slice before any accessor can run, so accessors never index out of
/// bounds.
#[derive(Clone, Copy, Debug)]
pub struct TxView<'a> {
    bytes: &'a [u8],
}

impl<'a> TxView<'a> {
    /// Reads the header at the start of `bytes` and returns a view over the
    /// transaction's exact extent. `None` if even the declared size does not
    /// fit.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < TX_HEADER_SIZE + SIGNATURE_SIZE {
            return None;
        }
        let input_size = u16::from_le_bytes([bytes[78], bytes[79]]) as usize;
        let total = TX_HEADER_SIZE + input_size + SIGNATURE_SIZE;
        if bytes.len() < total {
            return None;
        }
        Some(Self {
            bytes: &bytes[..total],
        })
    }

    pub fn source_public_key(&self) -> PublicKey {
        self.bytes[0..32].try_into().expect("fixed-width field")
    }

    pub fn destination_public_key(&self) -> PublicKey {
        self.bytes[32..64].try_into().expect("fixed-width field")
    }

    pub fn amount(&self) -> i64 {
        i64::from_le_bytes(self.bytes[64..72].try_into().expect("fixed-width field"))
    }

    pub fn tick(&self) -> u32 {
        u32::from_le_bytes(self.bytes[72..76].try_into().expect("fixed-width field"))
    }

    pub fn input_type(&self) -> u16 {
        u16::from_le_bytes([self.bytes[76], self.bytes[77]])
    }

    pub fn input_size(&self) -> usize {
        u16::from_le_bytes([self.bytes[78], self.bytes[79]]) as usize
    }

    pub fn input(&self) -> &'a [u8] {
        &self.bytes[TX_HEADER_SIZE..TX_HEADER_SIZE + self.input_size()]
    }

    pub fn signature(&self) -> Signature {
        self.bytes[TX_HEADER_SIZE + self.input_size()..]
            .try_into()
            .expect("fixed-width field")
    }

    /// Exact encoded size of the viewed transaction.
    pub fn total_size(&self) -> usize {
        self.bytes.len()
    }

    /// The transaction's exact encoded bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Same content check as [`Transaction::check_validity`].
    pub fn check_validity(&self) -> bool {
        (0..=MAX_AMOUNT).contains(&self.amount()) && self.input_size() <= MAX_INPUT_SIZE
    }

    pub fn to_owned(&self) -> Transaction {
        Transaction {
            source_public_key: self.source_public_key(),
            destination_public_key: self.destination_public_key(),
            amount: self.amount(),
            tick: self.tick(),
            input_type: self.input_type(),
            input: self.input().to_vec(),
            signature: self.signature(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(tick: u32, input: Vec<u8>) -> Transaction {
        Transaction {
            source_public_key: [1; 32],
            destination_public_key: [2; 32],
            amount: 1000,
            tick,
            input_type: 7,
            input,
            signature: [3; 64],
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let tx = sample_tx(42, vec![9, 8, 7]);
        let bytes = tx.encode();
        assert_eq!(bytes.len(), TX_HEADER_SIZE + 3 + SIGNATURE_SIZE);
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
    }

    #[test]
    fn view_reads_fields_in_place() {
        let tx = sample_tx(1234, vec![0xAB; 16]);
        let bytes = tx.encode();
        let view = TxView::parse(&bytes).unwrap();
        assert_eq!(view.tick(), 1234);
        assert_eq!(view.amount(), 1000);
        assert_eq!(view.input_type(), 7);
        assert_eq!(view.input(), &[0xAB; 16]);
        assert_eq!(view.total_size(), tx.total_size());
        assert!(view.check_validity());
    }

    #[test]
    fn view_parses_a_prefix_of_a_larger_buffer() {
        let tx = sample_tx(5, vec![1, 2]);
        let mut bytes = tx.encode();
        bytes.extend_from_slice(&[0xFF; 100]);
        let view = TxView::parse(&bytes).unwrap();
        assert_eq!(view.total_size(), tx.total_size());
        assert_eq!(view.to_owned(), tx);
    }

    #[test]
    fn parse_rejects_truncated_input() {
        let tx = sample_tx(5, vec![0; 100]);
        let bytes = tx.encode();
        // Header promises 100 input bytes, buffer stops short.
        assert!(TxView::parse(&bytes[..bytes.len() - 30]).is_none());
        assert!(TxView::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn validity_rejects_negative_and_oversized() {
        let mut tx = sample_tx(1, vec![]);
        tx.amount = -1;
        assert!(!tx.check_validity());
        tx.amount = MAX_AMOUNT + 1;
        assert!(!tx.check_validity());
        tx.amount = MAX_AMOUNT;
        assert!(tx.check_validity());
    }
}
