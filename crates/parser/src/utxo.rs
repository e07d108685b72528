//! Unspent-output maps carried between runs.

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io;
use std::path::Path;

use blockidx_primitives::{InoutPointer, OutputPointer, RawOutputPointer};
use blockidx_script::AddressType;

use crate::error::ParserError;
use crate::flatfiles::FixedRecord;
use crate::write_file_atomic;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Utxo {
    pub value: i64,
    pub tx_num: u32,
    pub address_type: AddressType,
}

impl FixedRecord for Utxo {
    const SIZE: usize = 13;

    fn write_to(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.value.to_le_bytes());
        out[8..12].copy_from_slice(&self.tx_num.to_le_bytes());
        out[12] = self.address_type as u8;
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            value: i64::read_from(&bytes[..8]),
            tx_num: u32::read_from(&bytes[8..12]),
            address_type: AddressType::from_u8(bytes[12]).unwrap_or(AddressType::Nonstandard),
        }
    }

    fn validate(bytes: &[u8]) -> Result<(), &'static str> {
        match AddressType::from_u8(bytes[12]) {
            Some(_) => Ok(()),
            None => Err("unknown address type"),
        }
    }
}

impl FixedRecord for RawOutputPointer {
    const SIZE: usize = RawOutputPointer::ENCODED_LEN;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut raw = [0u8; RawOutputPointer::ENCODED_LEN];
        raw.copy_from_slice(&bytes[..RawOutputPointer::ENCODED_LEN]);
        RawOutputPointer::from_bytes(&raw)
    }
}

impl FixedRecord for InoutPointer {
    const SIZE: usize = 6;

    fn write_to(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.tx_num.to_le_bytes());
        out[4..6].copy_from_slice(&self.inout_num.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        InoutPointer::new(u32::read_from(&bytes[..4]), u16::read_from(&bytes[4..6]))
    }
}

/// Hash map persisted whole as `u64 count` followed by fixed-size pairs.
#[derive(Clone, Debug)]
pub struct SerializableMap<K, V> {
    map: HashMap<K, V>,
}

impl<K, V> Default for SerializableMap<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<K, V> SerializableMap<K, V>
where
    K: FixedRecord + Hash + Eq,
    V: FixedRecord,
{
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn add(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }

    pub fn erase(&mut self, key: &K) -> Option<V> {
        self.map.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn retain(&mut self, keep: impl FnMut(&K, &mut V) -> bool) {
        self.map.retain(keep);
    }

    pub fn serialize(&self, path: &Path) -> Result<(), ParserError> {
        let stride = K::SIZE + V::SIZE;
        let mut bytes = Vec::with_capacity(8 + self.map.len() * stride);
        bytes.extend_from_slice(&(self.map.len() as u64).to_le_bytes());
        let mut slot = vec![0u8; stride];
        for (key, value) in &self.map {
            key.write_to(&mut slot[..K::SIZE]);
            value.write_to(&mut slot[K::SIZE..]);
            bytes.extend_from_slice(&slot);
        }
        write_file_atomic(path, &bytes)?;
        Ok(())
    }

    /// A missing file leaves the map empty.
    pub fn unserialize(&mut self, path: &Path) -> Result<(), ParserError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.map.clear();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if bytes.len() < 8 {
            return Err(ParserError::Corrupt(format!("{} is truncated", path.display())));
        }
        let count = u64::read_from(&bytes[..8]) as usize;
        let stride = K::SIZE + V::SIZE;
        let body = &bytes[8..];
        if body.len() != count.saturating_mul(stride) {
            return Err(ParserError::Corrupt(format!(
                "{} holds {} bytes for {count} entries",
                path.display(),
                body.len()
            )));
        }
        for (entry, chunk) in body.chunks_exact(stride).enumerate() {
            K::validate(&chunk[..K::SIZE])
                .and_then(|()| V::validate(&chunk[K::SIZE..]))
                .map_err(|what| {
                    ParserError::Corrupt(format!("{} entry {entry}: {what}", path.display()))
                })?;
        }
        self.map = body
            .chunks_exact(stride)
            .map(|chunk| (K::read_from(&chunk[..K::SIZE]), V::read_from(&chunk[K::SIZE..])))
            .collect();
        Ok(())
    }
}

/// `RawOutputPointer -> Utxo` for every spendable unspent output.
#[derive(Clone, Debug, Default)]
pub struct UtxoState {
    inner: SerializableMap<RawOutputPointer, Utxo>,
}

impl UtxoState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, pointer: &RawOutputPointer) -> Option<&Utxo> {
        self.inner.get(pointer)
    }

    pub fn add(&mut self, pointer: RawOutputPointer, utxo: Utxo) {
        self.inner.add(pointer, utxo);
    }

    pub fn erase(&mut self, pointer: &RawOutputPointer) -> Result<Utxo, ParserError> {
        self.inner
            .erase(pointer)
            .ok_or(ParserError::MissingUtxo(*pointer))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RawOutputPointer, &Utxo)> {
        self.inner.iter()
    }

    pub fn serialize(&self, path: &Path) -> Result<(), ParserError> {
        self.inner.serialize(path)
    }

    pub fn unserialize(&mut self, path: &Path) -> Result<(), ParserError> {
        self.inner.unserialize(path)
    }
}

/// `OutputPointer -> scriptNum` of every spendable unspent output.
#[derive(Clone, Debug, Default)]
pub struct UtxoScriptState {
    inner: SerializableMap<OutputPointer, u32>,
}

impl UtxoScriptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn add(&mut self, pointer: OutputPointer, script_num: u32) {
        self.inner.add(pointer, script_num);
    }

    pub fn erase(&mut self, pointer: &OutputPointer) -> Result<u32, ParserError> {
        self.inner
            .erase(pointer)
            .ok_or(ParserError::MissingKey("utxo script state"))
    }

    pub fn serialize(&self, path: &Path) -> Result<(), ParserError> {
        self.inner.serialize(path)
    }

    pub fn unserialize(&mut self, path: &Path) -> Result<(), ParserError> {
        self.inner.unserialize(path)
    }
}
