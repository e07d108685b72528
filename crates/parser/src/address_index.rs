//! Address -> output occurrences and wrapped-address nesting, kept in the
//! `addressesDb/` store.
//!
//! Output keys are `dedup key | address type | txNum BE | outputNum BE`, so
//! a prefix scan over a dedup key yields its outputs in chain order. Nesting
//! keys are `child dedup key | child type | parent dedup key` with the txNum
//! that revealed the nesting as value.

use blockidx_primitives::InoutPointer;
use blockidx_script::{AddressType, DedupAddress, DedupAddressType, RawAddress};
use blockidx_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::access::{ChainAccess, ScriptAccess};
use crate::error::ParserError;
use crate::hash_index::decode_num;
use crate::indexer::TxIndexer;
use crate::records::TxRecord;
use crate::state::State;

const OUTPUT_KEY_LEN: usize = DedupAddress::ENCODED_LEN + 1 + 4 + 2;
const NESTED_KEY_LEN: usize = 2 * DedupAddress::ENCODED_LEN + 1;
/// Writes per batch before the pending batch goes to the store.
const BATCH_LIMIT: usize = 50_000;

fn output_key(address: RawAddress, pointer: InoutPointer) -> [u8; OUTPUT_KEY_LEN] {
    let mut key = [0u8; OUTPUT_KEY_LEN];
    key[..5].copy_from_slice(&address.dedup().to_key());
    key[5] = address.address_type as u8;
    key[6..10].copy_from_slice(&pointer.tx_num.to_be_bytes());
    key[10..].copy_from_slice(&pointer.inout_num.to_be_bytes());
    key
}

fn decode_output_key(key: &[u8]) -> Result<(RawAddress, InoutPointer), StoreError> {
    if key.len() != OUTPUT_KEY_LEN {
        return Err(StoreError::Corrupt("address output key"));
    }
    let dedup = DedupAddress::from_key(&key[..5]).ok_or(StoreError::Corrupt("address output key"))?;
    let address_type =
        AddressType::from_u8(key[5]).ok_or(StoreError::Corrupt("address output type"))?;
    let tx_num = u32::from_be_bytes([key[6], key[7], key[8], key[9]]);
    let inout_num = u16::from_be_bytes([key[10], key[11]]);
    Ok((
        RawAddress::new(dedup.script_num, address_type),
        InoutPointer::new(tx_num, inout_num),
    ))
}

fn nested_key(child: RawAddress, parent: DedupAddress) -> [u8; NESTED_KEY_LEN] {
    let mut key = [0u8; NESTED_KEY_LEN];
    key[..5].copy_from_slice(&child.dedup().to_key());
    key[5] = child.address_type as u8;
    key[6..].copy_from_slice(&parent.to_key());
    key
}

pub struct AddressIndex<S: KeyValueStore> {
    store: S,
    batch: WriteBatch,
}

impl<S: KeyValueStore> AddressIndex<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            batch: WriteBatch::new(),
        }
    }

    fn queue_put(&mut self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.batch.put(column, key, value);
        if self.batch.len() >= BATCH_LIMIT {
            self.write_pending()?;
        }
        Ok(())
    }

    fn write_pending(&mut self) -> Result<(), StoreError> {
        if !self.batch.is_empty() {
            let batch = std::mem::take(&mut self.batch);
            self.store.write_batch(&batch)?;
        }
        Ok(())
    }

    pub fn add_output(&mut self, address: RawAddress, pointer: InoutPointer) -> Result<(), StoreError> {
        self.queue_put(Column::AddressOutput, &output_key(address, pointer), &[])
    }

    pub fn add_nested(
        &mut self,
        child: RawAddress,
        parent: DedupAddress,
        tx_num: u32,
    ) -> Result<(), StoreError> {
        self.queue_put(
            Column::NestedAddress,
            &nested_key(child, parent),
            &tx_num.to_le_bytes(),
        )
    }

    /// Every output ever sent to the dedup address, in chain order, with the
    /// concrete type it was seen as.
    pub fn outputs(&self, address: DedupAddress) -> Result<Vec<(RawAddress, InoutPointer)>, StoreError> {
        self.store
            .scan_prefix(Column::AddressOutput, &address.to_key())?
            .iter()
            .map(|(key, _)| decode_output_key(key))
            .collect()
    }

    /// Script hashes that were revealed to wrap `child`, with the revealing tx.
    pub fn parents(&self, child: RawAddress) -> Result<Vec<(DedupAddress, u32)>, StoreError> {
        let mut prefix = [0u8; DedupAddress::ENCODED_LEN + 1];
        prefix[..5].copy_from_slice(&child.dedup().to_key());
        prefix[5] = child.address_type as u8;
        self.store
            .scan_prefix(Column::NestedAddress, &prefix)?
            .iter()
            .map(|(key, value)| {
                let parent = DedupAddress::from_key(&key[6..])
                    .ok_or(StoreError::Corrupt("nested address key"))?;
                Ok((parent, decode_num(value)?))
            })
            .collect()
    }

    /// Records the nesting revealed by spending `address` in `tx_num`,
    /// following wrapped script hashes down.
    fn add_reveals(
        &mut self,
        mut address: RawAddress,
        tx_num: u32,
        scripts: &ScriptAccess,
    ) -> Result<(), ParserError> {
        while address.address_type.dedup() == DedupAddressType::ScriptHash {
            let record = scripts.script_hash(address.script_num)?;
            if record.header.tx_first_spent != tx_num || !record.is_revealed() {
                break;
            }
            self.add_nested(record.wrapped, address.dedup(), tx_num)?;
            address = record.wrapped;
        }
        Ok(())
    }

    /// Deletes every output and nesting recorded by transactions at or past
    /// `state.tx_count`.
    pub fn rollback(&mut self, state: &State) -> Result<(), StoreError> {
        self.write_pending()?;
        let mut batch = WriteBatch::new();
        self.store.for_each_prefix(Column::AddressOutput, &[], &mut |key, _| {
            let (_, pointer) = decode_output_key(key)?;
            if pointer.tx_num >= state.tx_count {
                batch.delete(Column::AddressOutput, key);
            }
            Ok(())
        })?;
        self.store.for_each_prefix(Column::NestedAddress, &[], &mut |key, value| {
            if key.len() != NESTED_KEY_LEN {
                return Err(StoreError::Corrupt("nested address key"));
            }
            if decode_num(value)? >= state.tx_count {
                batch.delete(Column::NestedAddress, key);
            }
            Ok(())
        })?;
        if !batch.is_empty() {
            self.store.write_batch(&batch)?;
        }
        self.store.persist()
    }
}

impl<S: KeyValueStore> TxIndexer for AddressIndex<S> {
    fn name(&self) -> &'static str {
        "address index"
    }

    fn process_tx(
        &mut self,
        tx_num: u32,
        tx: &TxRecord,
        _chain: &ChainAccess,
        scripts: &ScriptAccess,
    ) -> Result<(), ParserError> {
        for (index, output) in tx.outputs.iter().enumerate() {
            self.add_output(output.address(), InoutPointer::new(tx_num, index as u16))?;
        }
        for input in &tx.inputs {
            self.add_reveals(input.address(), tx_num, scripts)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ParserError> {
        self.write_pending()?;
        self.store.persist()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockidx_storage::memory::MemoryStore;

    #[test]
    fn outputs_come_back_in_chain_order() {
        let mut index = AddressIndex::new(MemoryStore::new());
        let pkh = RawAddress::new(7, AddressType::PubkeyHash);
        let pk = RawAddress::new(7, AddressType::Pubkey);
        index.add_output(pkh, InoutPointer::new(300, 1)).expect("add");
        index.add_output(pk, InoutPointer::new(2, 0)).expect("add");
        index
            .add_output(RawAddress::new(8, AddressType::PubkeyHash), InoutPointer::new(5, 0))
            .expect("add");
        index.write_pending().expect("write");

        let found = index.outputs(pkh.dedup()).expect("outputs");
        assert_eq!(
            found,
            vec![
                (pk, InoutPointer::new(2, 0)),
                (pkh, InoutPointer::new(300, 1)),
            ]
        );
    }

    #[test]
    fn rollback_drops_later_outputs_and_nestings() {
        let mut index = AddressIndex::new(MemoryStore::new());
        let child = RawAddress::new(3, AddressType::WitnessPubkeyHash);
        let parent = RawAddress::new(1, AddressType::ScriptHash).dedup();
        index.add_output(child, InoutPointer::new(4, 0)).expect("add");
        index.add_output(child, InoutPointer::new(9, 0)).expect("add");
        index.add_nested(child, parent, 9).expect("nest");
        index.write_pending().expect("write");
        assert_eq!(index.parents(child).expect("parents"), vec![(parent, 9)]);

        let state = State {
            tx_count: 9,
            ..State::default()
        };
        index.rollback(&state).expect("rollback");
        assert_eq!(index.outputs(child.dedup()).expect("outputs").len(), 1);
        assert!(index.parents(child).expect("parents").is_empty());
    }
}
