//! Spend-time data that output extraction leaves for input extraction.
//! Only bare multisig outputs carry any: the member keys, needed to bound
//! the signature count of the spend.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use blockidx_primitives::encoding::{DecodeError, Decoder, Encoder};
use blockidx_primitives::OutputPointer;
use blockidx_script::{AddressType, SpendData};

use crate::error::ParserError;
use crate::write_file_atomic;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UtxoAddressState {
    multisig: HashMap<OutputPointer, Vec<Vec<u8>>>,
}

impl UtxoAddressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.multisig.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multisig.is_empty()
    }

    pub fn add_output(&mut self, spend: SpendData, pointer: OutputPointer) {
        if let SpendData::Multisig { pubkeys } = spend {
            self.multisig.insert(pointer, pubkeys);
        }
    }

    /// Takes the spend data of `pointer`. Types without stored data come
    /// back as [`SpendData::Plain`] without a lookup.
    pub fn spend_output(
        &mut self,
        pointer: &OutputPointer,
        address_type: AddressType,
    ) -> Result<SpendData, ParserError> {
        if address_type != AddressType::Multisig {
            return Ok(SpendData::Plain(address_type));
        }
        self.multisig
            .remove(pointer)
            .map(|pubkeys| SpendData::Multisig { pubkeys })
            .ok_or(ParserError::MissingKey("utxo address state"))
    }

    pub fn serialize(&self, path: &Path) -> Result<(), ParserError> {
        let mut encoder = Encoder::new();
        encoder.write_u64_le(self.multisig.len() as u64);
        for (pointer, pubkeys) in &self.multisig {
            encoder.write_u32_le(pointer.tx_num);
            encoder.write_u16_le(pointer.inout_num);
            encoder.write_varint(pubkeys.len() as u64);
            for pubkey in pubkeys {
                encoder.write_var_bytes(pubkey);
            }
        }
        write_file_atomic(path, &encoder.into_inner())?;
        Ok(())
    }

    pub fn unserialize(&mut self, path: &Path) -> Result<(), ParserError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.multisig.clear();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.multisig = decode_entries(&bytes)?;
        Ok(())
    }
}

fn decode_entries(bytes: &[u8]) -> Result<HashMap<OutputPointer, Vec<Vec<u8>>>, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let count = decoder.read_u64_le()? as usize;
    let mut entries = HashMap::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let pointer = OutputPointer::new(decoder.read_u32_le()?, decoder.read_u16_le()?);
        let keys = decoder.read_length()?;
        let pubkeys = (0..keys)
            .map(|_| decoder.read_var_bytes())
            .collect::<Result<Vec<_>, _>>()?;
        entries.insert(pointer, pubkeys);
    }
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes(decoder.remaining()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_multisig_outputs_are_tracked() {
        let mut state = UtxoAddressState::new();
        state.add_output(SpendData::Plain(AddressType::PubkeyHash), OutputPointer::new(1, 0));
        state.add_output(
            SpendData::Multisig {
                pubkeys: vec![vec![2; 33], vec![3; 33]],
            },
            OutputPointer::new(1, 1),
        );
        assert_eq!(state.len(), 1);

        let plain = state
            .spend_output(&OutputPointer::new(1, 0), AddressType::PubkeyHash)
            .expect("plain");
        assert_eq!(plain, SpendData::Plain(AddressType::PubkeyHash));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("utxo_address.dat");
        state.serialize(&path).expect("serialize");
        let mut restored = UtxoAddressState::new();
        restored.unserialize(&path).expect("unserialize");

        match restored
            .spend_output(&OutputPointer::new(1, 1), AddressType::Multisig)
            .expect("multisig")
        {
            SpendData::Multisig { pubkeys } => assert_eq!(pubkeys.len(), 2),
            other => panic!("unexpected spend data {other:?}"),
        }
        assert!(restored
            .spend_output(&OutputPointer::new(1, 1), AddressType::Multisig)
            .is_err());
    }
}
