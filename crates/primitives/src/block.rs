//! Block header and block types.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{sha256d, Hash256};
use crate::transaction::{Transaction, TransactionDecodeError};

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        sha256d(&crate::encoding::encode(self))
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash(&self.prev_block);
        encoder.write_hash(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash()?,
            merkle_root: decoder.read_hash()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode(&mut encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            encoder.write_bytes(&tx.consensus_encode());
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode(&mut decoder)?;
        let count = decoder.read_length()?;
        let mut transactions = Vec::with_capacity(count.min(16_384));
        for index in 0..count {
            let offset = decoder.position();
            let tx = Transaction::decode_from(&mut decoder).map_err(|source| {
                BlockDecodeError::Transaction {
                    index,
                    offset,
                    source,
                }
            })?;
            transactions.push(tx);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes(decoder.remaining()).into());
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    /// Serialized size with and without witness data.
    pub fn sizes(&self) -> (u32, u32) {
        let overhead = HEADER_SIZE + varint_len(self.transactions.len() as u64);
        let (mut real, mut base) = (overhead, overhead);
        for tx in &self.transactions {
            real += tx.total_size();
            base += tx.base_size();
        }
        (real as u32, base as u32)
    }
}

pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[derive(Debug)]
pub enum BlockDecodeError {
    Decode(DecodeError),
    Transaction {
        index: usize,
        offset: usize,
        source: TransactionDecodeError,
    },
}

impl From<DecodeError> for BlockDecodeError {
    fn from(error: DecodeError) -> Self {
        BlockDecodeError::Decode(error)
    }
}

impl std::fmt::Display for BlockDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDecodeError::Decode(error) => write!(f, "{error}"),
            BlockDecodeError::Transaction {
                index,
                offset,
                source,
            } => write!(f, "transaction {index} at byte {offset}: {source}"),
        }
    }
}

impl std::error::Error for BlockDecodeError {}
