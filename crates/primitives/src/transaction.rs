//! Transactions in Bitcoin wire format, including BIP144 witness data.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{sha256d, Hash256};
use crate::outpoint::OutPoint;

const SEGWIT_FLAG: u8 = 0x01;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    fn encode_base(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }

    fn decode_base(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            prevout: OutPoint::consensus_decode(decoder)?,
            script_sig: decoder.read_var_bytes()?,
            sequence: decoder.read_u32_le()?,
            witness: Vec::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            value: decoder.read_i64_le()?,
            script_pubkey: decoder.read_var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

#[derive(Debug)]
pub enum TransactionDecodeError {
    Decode(DecodeError),
    InvalidSegwitFlag(u8),
    EmptyWitness,
}

impl std::fmt::Display for TransactionDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionDecodeError::Decode(err) => write!(f, "{err}"),
            TransactionDecodeError::InvalidSegwitFlag(flag) => {
                write!(f, "unknown segwit flag byte {flag:#04x}")
            }
            TransactionDecodeError::EmptyWitness => {
                write!(f, "segwit marker present but every witness is empty")
            }
        }
    }
}

impl std::error::Error for TransactionDecodeError {}

impl From<DecodeError> for TransactionDecodeError {
    fn from(err: DecodeError) -> Self {
        TransactionDecodeError::Decode(err)
    }
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.vin.iter().any(|input| !input.witness.is_empty())
    }

    /// Double SHA-256 of the serialization without witness data.
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.encode_base())
    }

    pub fn base_size(&self) -> usize {
        self.encode_base().len()
    }

    pub fn total_size(&self) -> usize {
        self.consensus_encode().len()
    }

    pub fn encode_base(&self) -> Vec<u8> {
        self.encode_with(false)
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        self.encode_with(self.has_witness())
    }

    fn encode_with(&self, witness: bool) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(64 + self.vin.len() * 48 + self.vout.len() * 34);
        encoder.write_i32_le(self.version);
        if witness {
            encoder.write_u8(0);
            encoder.write_u8(SEGWIT_FLAG);
        }
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.encode_base(&mut encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(&mut encoder);
        }
        if witness {
            for input in &self.vin {
                encoder.write_varint(input.witness.len() as u64);
                for item in &input.witness {
                    encoder.write_var_bytes(item);
                }
            }
        }
        encoder.write_u32_le(self.lock_time);
        encoder.into_inner()
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, TransactionDecodeError> {
        let version = decoder.read_i32_le()?;
        let segwit = decoder.peek_u8() == Some(0);
        if segwit {
            decoder.read_u8()?;
            let flag = decoder.read_u8()?;
            if flag != SEGWIT_FLAG {
                return Err(TransactionDecodeError::InvalidSegwitFlag(flag));
            }
        }

        let input_count = decoder.read_length()?;
        let mut vin = Vec::with_capacity(input_count.min(4096));
        for _ in 0..input_count {
            vin.push(TxIn::decode_base(decoder)?);
        }
        let output_count = decoder.read_length()?;
        let mut vout = Vec::with_capacity(output_count.min(4096));
        for _ in 0..output_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }

        if segwit {
            for input in vin.iter_mut() {
                let items = decoder.read_length()?;
                input.witness.reserve(items.min(256));
                for _ in 0..items {
                    input.witness.push(decoder.read_var_bytes()?);
                }
            }
            if vin.iter().all(|input| input.witness.is_empty()) {
                return Err(TransactionDecodeError::EmptyWitness);
            }
        }

        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, TransactionDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes(decoder.remaining()).into());
        }
        Ok(tx)
    }
}
