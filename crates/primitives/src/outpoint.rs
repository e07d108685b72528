//! Output references: the txid-based form found in raw transactions and the
//! dense-number forms used once a transaction has been indexed.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == [0u8; 32]
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        OutPoint::null()
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.hash);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            hash: decoder.read_hash()?,
            index: decoder.read_u32_le()?,
        })
    }
}

/// Txid-keyed reference used while the spending side only knows the hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RawOutputPointer {
    pub hash: Hash256,
    pub output_num: u16,
}

impl RawOutputPointer {
    pub const ENCODED_LEN: usize = 34;

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..32].copy_from_slice(&self.hash);
        out[32..].copy_from_slice(&self.output_num.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        Self {
            hash,
            output_num: u16::from_le_bytes([bytes[32], bytes[33]]),
        }
    }
}

impl From<&OutPoint> for RawOutputPointer {
    fn from(outpoint: &OutPoint) -> Self {
        Self {
            hash: outpoint.hash,
            output_num: outpoint.index as u16,
        }
    }
}

/// `(txNum, inoutNum)`; identifies an input or output slot of an indexed
/// transaction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct InoutPointer {
    pub tx_num: u32,
    pub inout_num: u16,
}

pub type OutputPointer = InoutPointer;

impl InoutPointer {
    pub const ENCODED_LEN: usize = 6;

    pub fn new(tx_num: u32, inout_num: u16) -> Self {
        Self { tx_num, inout_num }
    }

    /// Big-endian so that byte order matches numeric order in ordered stores.
    pub fn to_key(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.tx_num.to_be_bytes());
        out[4..].copy_from_slice(&self.inout_num.to_be_bytes());
        out
    }

    pub fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            tx_num: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            inout_num: u16::from_be_bytes([bytes[4], bytes[5]]),
        })
    }
}
