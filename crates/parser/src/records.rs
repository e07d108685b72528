//! Binary layouts of everything written under `chain/` and `scripts/`.

use blockidx_primitives::encoding::{DecodeError, Decoder, Encoder};
use blockidx_primitives::{Hash160, Hash256, InoutPointer};
use blockidx_script::{AddressType, RawAddress};

use crate::flatfiles::FixedRecord;

/// Spend sentinel for `tx_first_spent`.
pub const NEVER_SPENT: u32 = u32::MAX;

fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn get_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn get_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawBlock {
    pub hash: Hash256,
    pub coinbase_offset: u64,
    pub first_tx_index: u32,
    pub tx_count: u32,
    pub input_count: u32,
    pub output_count: u32,
    pub height: u32,
    pub version: i32,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub real_size: u32,
    pub base_size: u32,
}

impl FixedRecord for RawBlock {
    const SIZE: usize = 84;

    fn write_to(&self, out: &mut [u8]) {
        out[..32].copy_from_slice(&self.hash);
        out[32..40].copy_from_slice(&self.coinbase_offset.to_le_bytes());
        let fields = [
            self.first_tx_index,
            self.tx_count,
            self.input_count,
            self.output_count,
            self.height,
            self.version as u32,
            self.time,
            self.bits,
            self.nonce,
            self.real_size,
            self.base_size,
        ];
        for (idx, value) in fields.iter().enumerate() {
            put_u32(out, 40 + idx * 4, *value);
        }
    }

    fn read_from(bytes: &[u8]) -> Self {
        let field = |idx: usize| get_u32(bytes, 40 + idx * 4);
        Self {
            hash: get_array(bytes, 0),
            coinbase_offset: get_u64(bytes, 32),
            first_tx_index: field(0),
            tx_count: field(1),
            input_count: field(2),
            output_count: field(3),
            height: field(4),
            version: field(5) as i32,
            time: field(6),
            bits: field(7),
            nonce: field(8),
            real_size: field(9),
            base_size: field(10),
        }
    }
}

const VALUE_MASK: u64 = (1 << 60) - 1;

/// One input or output slot. Inputs link to the spent output's transaction,
/// outputs to their spender (0 while unspent).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Inout {
    pub linked_tx_num: u32,
    pub script_num: u32,
    packed: u64,
}

impl Inout {
    pub const SIZE: usize = 16;

    pub fn new(linked_tx_num: u32, script_num: u32, address_type: AddressType, value: i64) -> Self {
        let packed = (value as u64 & VALUE_MASK) | ((address_type as u64 & 0xf) << 60);
        Self {
            linked_tx_num,
            script_num,
            packed,
        }
    }

    pub fn value(&self) -> i64 {
        (self.packed & VALUE_MASK) as i64
    }

    pub fn address_type(&self) -> AddressType {
        AddressType::from_u8((self.packed >> 60) as u8).unwrap_or(AddressType::Nonstandard)
    }

    pub fn address(&self) -> RawAddress {
        RawAddress::new(self.script_num, self.address_type())
    }

    fn write(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.linked_tx_num);
        encoder.write_u32_le(self.script_num);
        encoder.write_u64_le(self.packed);
    }

    fn read(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            linked_tx_num: decoder.read_u32_le()?,
            script_num: decoder.read_u32_le()?,
            packed: decoder.read_u64_le()?,
        })
    }
}

/// Part 0 of a `tx_data` record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxRecord {
    pub real_size: u32,
    pub base_size: u32,
    pub lock_time: u32,
    pub inputs: Vec<Inout>,
    pub outputs: Vec<Inout>,
}

impl TxRecord {
    const HEADER_SIZE: usize = 20;

    /// Byte position of output `index` inside the encoded record.
    pub fn output_position(input_count: usize, index: usize) -> usize {
        Self::HEADER_SIZE + Inout::SIZE * (input_count + index)
    }

    pub fn input_count(bytes: &[u8]) -> usize {
        get_u32(bytes, 12) as usize
    }

    pub fn output_count(bytes: &[u8]) -> usize {
        get_u32(bytes, 16) as usize
    }

    /// Rewrites an output's link in an encoded record.
    pub fn set_output_link(bytes: &mut [u8], index: usize, spender: u32) -> Result<(), DecodeError> {
        let inputs = Self::input_count(bytes);
        if index >= Self::output_count(bytes) {
            return Err(DecodeError::InvalidData("output index past record"));
        }
        let at = Self::output_position(inputs, index);
        put_u32(bytes, at, spender);
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(
            Self::HEADER_SIZE + Inout::SIZE * (self.inputs.len() + self.outputs.len()),
        );
        encoder.write_u32_le(self.real_size);
        encoder.write_u32_le(self.base_size);
        encoder.write_u32_le(self.lock_time);
        encoder.write_u32_le(self.inputs.len() as u32);
        encoder.write_u32_le(self.outputs.len() as u32);
        for inout in self.inputs.iter().chain(self.outputs.iter()) {
            inout.write(&mut encoder);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let real_size = decoder.read_u32_le()?;
        let base_size = decoder.read_u32_le()?;
        let lock_time = decoder.read_u32_le()?;
        let input_count = decoder.read_u32_le()? as usize;
        let output_count = decoder.read_u32_le()? as usize;
        if decoder.remaining() != Inout::SIZE * (input_count + output_count) {
            return Err(DecodeError::InvalidData("inout count does not match record size"));
        }
        let inputs = (0..input_count)
            .map(|_| Inout::read(&mut decoder))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = (0..output_count)
            .map(|_| Inout::read(&mut decoder))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            real_size,
            base_size,
            lock_time,
            inputs,
            outputs,
        })
    }
}

/// `(spent output, spender)`, collected during a batch and applied by the
/// back-link pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct LinkRecord {
    pub output: InoutPointer,
    pub spender: u32,
}

impl FixedRecord for LinkRecord {
    const SIZE: usize = 10;

    fn write_to(&self, out: &mut [u8]) {
        put_u32(out, 0, self.output.tx_num);
        out[4..6].copy_from_slice(&self.output.inout_num.to_le_bytes());
        put_u32(out, 6, self.spender);
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            output: InoutPointer::new(get_u32(bytes, 0), u16::from_le_bytes([bytes[4], bytes[5]])),
            spender: get_u32(bytes, 6),
        }
    }
}

/// Bookkeeping shared by every script record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScriptHeader {
    pub tx_first_seen: u32,
    pub tx_first_spent: u32,
    /// Two bits per [`AddressType`]: seen, and seen at the top level.
    pub types_seen: u32,
}

impl ScriptHeader {
    pub const SIZE: usize = 12;

    pub fn new(tx_first_seen: u32) -> Self {
        Self {
            tx_first_seen,
            tx_first_spent: NEVER_SPENT,
            types_seen: 0,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.tx_first_spent != NEVER_SPENT
    }

    /// Records one sighting; returns whether the mask changed.
    pub fn mark_seen(&mut self, address_type: AddressType, top_level: bool) -> bool {
        let before = self.types_seen;
        let shift = 2 * address_type as u32;
        self.types_seen |= 1 << shift;
        if top_level {
            self.types_seen |= 1 << (shift + 1);
        }
        before != self.types_seen
    }

    pub fn seen(&self, address_type: AddressType) -> bool {
        self.types_seen & (1 << (2 * address_type as u32)) != 0
    }

    pub fn seen_top_level(&self, address_type: AddressType) -> bool {
        self.types_seen & (1 << (2 * address_type as u32 + 1)) != 0
    }

    pub fn write_to(&self, out: &mut [u8]) {
        put_u32(out, 0, self.tx_first_seen);
        put_u32(out, 4, self.tx_first_spent);
        put_u32(out, 8, self.types_seen);
    }

    pub fn read_from(bytes: &[u8]) -> Self {
        Self {
            tx_first_seen: get_u32(bytes, 0),
            tx_first_spent: get_u32(bytes, 4),
            types_seen: get_u32(bytes, 8),
        }
    }
}

/// PUBKEY bucket record. `pubkey_len` is zero while only the hash is known.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PubkeyRecord {
    pub header: ScriptHeader,
    pub hash: Hash160,
    pub pubkey_len: u8,
    pub pubkey: [u8; 65],
}

impl PubkeyRecord {
    pub fn new(tx_first_seen: u32, hash: Hash160, pubkey: Option<&[u8]>) -> Self {
        let mut record = Self {
            header: ScriptHeader::new(tx_first_seen),
            hash,
            pubkey_len: 0,
            pubkey: [0u8; 65],
        };
        if let Some(pubkey) = pubkey {
            record.set_pubkey(pubkey);
        }
        record
    }

    pub fn pubkey(&self) -> Option<&[u8]> {
        (self.pubkey_len > 0).then(|| &self.pubkey[..self.pubkey_len as usize])
    }

    /// Stores the key if none is stored yet; returns whether anything changed.
    pub fn set_pubkey(&mut self, pubkey: &[u8]) -> bool {
        if self.pubkey_len > 0 || pubkey.is_empty() || pubkey.len() > 65 {
            return false;
        }
        self.pubkey[..pubkey.len()].copy_from_slice(pubkey);
        self.pubkey_len = pubkey.len() as u8;
        true
    }
}

impl FixedRecord for PubkeyRecord {
    const SIZE: usize = ScriptHeader::SIZE + 20 + 1 + 65;

    fn write_to(&self, out: &mut [u8]) {
        self.header.write_to(&mut out[..12]);
        out[12..32].copy_from_slice(&self.hash);
        out[32] = self.pubkey_len;
        out[33..98].copy_from_slice(&self.pubkey);
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            header: ScriptHeader::read_from(bytes),
            hash: get_array(bytes, 12),
            pubkey_len: bytes[32],
            pubkey: get_array(bytes, 33),
        }
    }
}

/// SCRIPTHASH bucket record, shared by P2SH and P2WSH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptHashRecord {
    pub header: ScriptHeader,
    pub hash160: Hash160,
    /// Witness program; all zero when only seen as P2SH.
    pub hash256: Hash256,
    /// Redeem script address; script number 0 until revealed.
    pub wrapped: RawAddress,
    pub is_segwit: bool,
}

impl ScriptHashRecord {
    pub fn new(tx_first_seen: u32, hash160: Hash160) -> Self {
        Self {
            header: ScriptHeader::new(tx_first_seen),
            hash160,
            hash256: [0u8; 32],
            wrapped: RawAddress::new(0, AddressType::Nonstandard),
            is_segwit: false,
        }
    }

    pub fn is_revealed(&self) -> bool {
        self.wrapped.script_num != 0
    }
}

impl FixedRecord for ScriptHashRecord {
    const SIZE: usize = ScriptHeader::SIZE + 20 + 32 + RawAddress::ENCODED_LEN + 1;

    fn write_to(&self, out: &mut [u8]) {
        self.header.write_to(&mut out[..12]);
        out[12..32].copy_from_slice(&self.hash160);
        out[32..64].copy_from_slice(&self.hash256);
        out[64..69].copy_from_slice(&self.wrapped.to_bytes());
        out[69] = u8::from(self.is_segwit);
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            header: ScriptHeader::read_from(bytes),
            hash160: get_array(bytes, 12),
            hash256: get_array(bytes, 32),
            wrapped: RawAddress::from_bytes(&bytes[64..69])
                .unwrap_or(RawAddress::new(0, AddressType::Nonstandard)),
            is_segwit: bytes[69] != 0,
        }
    }
}

/// Part 0 of a MULTISIG record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultisigRecord {
    pub header: ScriptHeader,
    pub required: u8,
    /// PUBKEY script numbers of the members, in script order.
    pub members: Vec<u32>,
}

impl MultisigRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; ScriptHeader::SIZE];
        self.header.write_to(&mut out);
        out.push(self.required);
        out.push(self.members.len() as u8);
        for member in &self.members {
            out.extend_from_slice(&member.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = ScriptHeader::read_from(decoder.read_slice(ScriptHeader::SIZE)?);
        let required = decoder.read_u8()?;
        let count = decoder.read_u8()?;
        let members = (0..count)
            .map(|_| decoder.read_u32_le())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            header,
            required,
            members,
        })
    }
}

/// Part 0 of a NULL_DATA, WITNESS_UNKNOWN or NONSTANDARD record: the header
/// followed by the type's payload bytes.
pub fn encode_blob_record(header: &ScriptHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; ScriptHeader::SIZE];
    header.write_to(&mut out);
    out.extend_from_slice(payload);
    out
}

pub fn decode_blob_record(bytes: &[u8]) -> Result<(ScriptHeader, &[u8]), DecodeError> {
    if bytes.len() < ScriptHeader::SIZE {
        return Err(DecodeError::UnexpectedEof {
            wanted: ScriptHeader::SIZE,
            at: 0,
        });
    }
    Ok((ScriptHeader::read_from(bytes), &bytes[ScriptHeader::SIZE..]))
}

/// Witness stacks are stored as a var-int count of var-bytes items.
pub fn encode_witness(items: &[Vec<u8>]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(items.len() as u64);
    for item in items {
        encoder.write_var_bytes(item);
    }
    encoder.into_inner()
}

pub fn decode_witness(bytes: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let count = decoder.read_length()?;
    (0..count).map(|_| decoder.read_var_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inout_packs_value_and_type() {
        let inout = Inout::new(7, 3, AddressType::WitnessScriptHash, 2_100_000_000_000_000);
        assert_eq!(inout.value(), 2_100_000_000_000_000);
        assert_eq!(inout.address_type(), AddressType::WitnessScriptHash);
    }

    #[test]
    fn tx_record_output_link_rewrites_in_place() {
        let record = TxRecord {
            real_size: 200,
            base_size: 190,
            lock_time: 0,
            inputs: vec![Inout::new(1, 1, AddressType::PubkeyHash, 10)],
            outputs: vec![
                Inout::new(0, 2, AddressType::PubkeyHash, 4),
                Inout::new(0, 3, AddressType::ScriptHash, 5),
            ],
        };
        let mut bytes = record.encode();
        TxRecord::set_output_link(&mut bytes, 1, 99).expect("link");
        let decoded = TxRecord::decode(&bytes).expect("decode");
        assert_eq!(decoded.outputs[0].linked_tx_num, 0);
        assert_eq!(decoded.outputs[1].linked_tx_num, 99);
        assert!(TxRecord::set_output_link(&mut bytes, 2, 1).is_err());
    }

    #[test]
    fn types_seen_tracks_top_level_separately() {
        let mut header = ScriptHeader::new(5);
        assert!(header.mark_seen(AddressType::PubkeyHash, false));
        assert!(header.seen(AddressType::PubkeyHash));
        assert!(!header.seen_top_level(AddressType::PubkeyHash));
        assert!(header.mark_seen(AddressType::PubkeyHash, true));
        assert!(!header.mark_seen(AddressType::PubkeyHash, true));
    }
}
